//! Upgrade and recover command implementations.

use anyhow::{Context, Result};
use console::style;
use indicatif::ProgressBar;
use log::warn;
use rmiflash::{FirmwareImage, ImageBuffer, ReflashMode};
use std::path::Path;

use super::{confirm, device_config, open_flasher, progress_bar, with_display_refresh};
use crate::config::Config;
use crate::{Cli, CliError, install_interrupt_handler, was_interrupted};

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted by user".to_string()).into())
    } else {
        Ok(())
    }
}

/// Progress callback driving `pb`, relabelled at each new section.
fn track(pb: &ProgressBar) -> impl FnMut(&str, usize, usize) + '_ {
    let mut current_section = String::new();
    move |name: &str, current: usize, total: usize| {
        if name != current_section {
            current_section = name.to_string();
            pb.set_position(0);
            pb.set_message(format!("Writing {name}"));
        }
        if total > 0 {
            pb.set_position((current * 100 / total) as u64);
        }
    }
}

fn load_buffer(path: &Path) -> Result<ImageBuffer> {
    ImageBuffer::from_file(path)
        .with_context(|| format!("Failed to load image {}", path.display()))
}

/// Upgrade command implementation.
pub(crate) fn cmd_upgrade(
    cli: &Cli,
    config: &Config,
    image_path: &Path,
    config_only: bool,
    refresh_display: bool,
    yes: bool,
) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware image {}",
            style("📦").cyan(),
            image_path.display()
        );
    }

    let image = FirmwareImage::parse(load_buffer(image_path)?)
        .with_context(|| format!("Failed to parse image {}", image_path.display()))?;

    let header = image.header();
    if !cli.quiet {
        eprintln!(
            "{} Product {} version {} (format {})",
            style("ℹ").blue(),
            style(&header.product_id).cyan(),
            header.image_version.as_deref().unwrap_or("unknown"),
            header.format_version
        );
    }

    let device = device_config(cli, config)?;
    let (mode, what) = if config_only {
        (ReflashMode::ConfigOnly, "configuration")
    } else {
        (ReflashMode::Full, "firmware")
    };
    confirm(
        cli,
        yes,
        &format!(
            "Rewrite the {what} of the controller on {}?",
            device.bus_path.display()
        ),
    )?;

    if refresh_display && config.display.refresh_command.is_none() {
        warn!("--refresh-display given but no [display] refresh_command is configured");
    }

    let mut flasher = with_display_refresh(open_flasher(cli, &device)?, config)
        .with_refresh_after_upgrade(refresh_display);

    install_interrupt_handler();
    let pb = progress_bar(cli);
    let result = flasher.upgrade(image, mode, track(&pb));
    if let Err(err) = result {
        pb.abandon();
        return Err(err).context("Reflash failed");
    }
    pb.finish_with_message("Complete");

    ensure_not_interrupted()?;

    if !cli.quiet {
        eprintln!(
            "\n{} Reflash completed",
            style("🎉").green().bold()
        );
    }
    Ok(())
}

/// Recover command implementation.
pub(crate) fn cmd_recover(cli: &Cli, config: &Config, image_path: &Path, yes: bool) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading recovery image {}",
            style("📦").cyan(),
            image_path.display()
        );
    }

    let image = load_buffer(image_path)?;
    if image.is_empty() {
        return Err(CliError::Usage(format!(
            "Recovery image {} is empty",
            image_path.display()
        ))
        .into());
    }
    if !cli.quiet {
        eprintln!(
            "{} {} bytes to stream",
            style("ℹ").blue(),
            image.len()
        );
    }

    let device = device_config(cli, config)?;
    confirm(
        cli,
        yes,
        &format!(
            "Erase and recover the controller on {}?",
            device.bus_path.display()
        ),
    )?;

    let mut flasher = with_display_refresh(open_flasher(cli, &device)?, config);

    install_interrupt_handler();
    let pb = progress_bar(cli);
    let result = flasher.recover(image, track(&pb));
    if let Err(err) = result {
        pb.abandon();
        return Err(err).context("Recovery failed");
    }
    pb.finish_with_message("Complete");

    ensure_not_interrupted()?;

    if !cli.quiet {
        eprintln!(
            "\n{} Recovery completed",
            style("🎉").green().bold()
        );
    }
    Ok(())
}
