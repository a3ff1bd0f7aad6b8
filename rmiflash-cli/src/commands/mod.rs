//! Command implementations.
//!
//! Each subcommand is implemented in its own module; the helpers here are
//! shared by the commands that talk to a controller.

pub(crate) mod completions;
pub(crate) mod flash;
pub(crate) mod info;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Error as DialoguerError, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, warn};
use rmiflash::bus::native::{DEFAULT_I2C_ADDRESS, DeviceConfig, I2cDevBus};
use rmiflash::{AttentionLine, Flasher};
use std::io::IsTerminal;
use std::process::{Command, Stdio};

use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output};

/// A flasher bound to a native i2c-dev controller.
pub(crate) type NativeFlasher = Flasher<I2cDevBus, Box<dyn AttentionLine>>;

/// Resolve device settings: flags and environment first, then config files.
pub(crate) fn device_config(cli: &Cli, config: &Config) -> Result<DeviceConfig> {
    let Some(bus) = cli.bus.clone().or_else(|| config.device.bus.clone()) else {
        return Err(CliError::Usage(
            "No I2C bus specified. Use --bus, RMIFLASH_BUS or [device] bus in rmiflash.toml"
                .to_string(),
        )
        .into());
    };
    let address = cli
        .address
        .or(config.device.address)
        .unwrap_or(DEFAULT_I2C_ADDRESS);
    let active_low = !cli.attn_active_high && config.device.attn_active_low.unwrap_or(true);

    Ok(DeviceConfig::new(bus, address)
        .with_attn_gpio(cli.attn_gpio.or(config.device.attn_gpio))
        .with_attn_active_low(active_low))
}

/// Open the controller described by `device`.
pub(crate) fn open_flasher(cli: &Cli, device: &DeviceConfig) -> Result<NativeFlasher> {
    if !cli.quiet {
        eprintln!(
            "{} Using {} at address {:#04x}",
            style("🔌").cyan(),
            style(device.bus_path.display()).green(),
            device.address
        );
    }
    Flasher::open(device)
        .with_context(|| format!("Failed to open device {}", device.bus_path.display()))
}

/// Ask before a destructive operation unless `yes` was given.
pub(crate) fn confirm(cli: &Cli, yes: bool, prompt: &str) -> Result<()> {
    if yes {
        return Ok(());
    }
    if cli.non_interactive {
        return Err(CliError::Usage(
            "Refusing to flash without confirmation in non-interactive mode; pass --yes"
                .to_string(),
        )
        .into());
    }
    if !(std::io::stdin().is_terminal() && std::io::stderr().is_terminal()) {
        return Err(CliError::Usage(
            "Confirmation requires an interactive terminal; pass --yes".to_string(),
        )
        .into());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(())
    } else {
        Err(CliError::Cancelled("Operation cancelled".to_string()).into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Operation cancelled".to_string()).into()
            } else {
                CliError::Usage(format!("Confirmation prompt failed: {io_err}")).into()
            }
        },
    }
}

/// Progress bar for a flash run, hidden in quiet or non-TTY mode.
pub(crate) fn progress_bar(cli: &Cli) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Attach the configured display refresh command to `flasher`.
///
/// The command runs detached through `sh -c`; its outcome is not awaited.
pub(crate) fn with_display_refresh(flasher: NativeFlasher, config: &Config) -> NativeFlasher {
    let Some(command) = config.display.refresh_command.clone() else {
        return flasher;
    };
    flasher.with_display_refresh(move || spawn_refresh(&command))
}

fn spawn_refresh(command: &str) {
    debug!("Running display refresh: {command}");
    let spawned = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .spawn();
    if let Err(e) = spawned {
        warn!("Failed to run display refresh command: {e}");
    }
}
