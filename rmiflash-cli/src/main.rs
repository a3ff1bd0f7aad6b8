//! rmiflash CLI - Command-line tool for reflashing Synaptics RMI4 touch controllers.
//!
//! ## Features
//!
//! - Full F34 reflash of `.img` firmware images, or config-only updates
//! - F35 recovery of controllers stuck in the bootloader
//! - Device and image inspection, with JSON output for scripts
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use commands::completions::cmd_completions;
use commands::flash::{cmd_recover, cmd_upgrade};
use commands::info::{cmd_image_info, cmd_info};
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler while a flash operation is running.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed since the handler was installed.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Record Ctrl-C instead of terminating.
///
/// A reflash cannot be stopped half way without bricking the controller, so
/// the run continues and the command reports the interruption afterwards.
fn install_interrupt_handler() {
    let installed = ctrlc::set_handler(|| {
        if !INTERRUPTED.swap(true, Ordering::SeqCst) {
            eprintln!(
                "\n{} Interrupt received; finishing the flash operation first",
                style("⚠").yellow()
            );
        }
    });
    if let Err(e) = installed {
        log::warn!("Could not install Ctrl-C handler: {e}");
    }
}

/// Failures that map to a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Missing or conflicting arguments (exit 2).
    #[error("{0}")]
    Usage(String),
    /// An explicit `--config` file is missing or invalid (exit 3).
    #[error("{0}")]
    Config(String),
    /// The operator declined or interrupted the operation (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

/// rmiflash - reflash and recover Synaptics RMI4 touch controllers.
///
/// Environment variables:
///   RMIFLASH_BUS               - I2C adapter (e.g. /dev/i2c-5)
///   RMIFLASH_ADDRESS           - 7-bit slave address (default: 0x20)
///   RMIFLASH_ATTN_GPIO         - GPIO number of the ATTN line
///   RMIFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "rmiflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// I2C adapter the controller is attached to.
    #[arg(long, global = true, env = "RMIFLASH_BUS", value_name = "PATH")]
    bus: Option<String>,

    /// 7-bit I2C slave address (hex, e.g. 0x20).
    #[arg(
        short,
        long,
        global = true,
        env = "RMIFLASH_ADDRESS",
        value_parser = parse_hex_u16
    )]
    address: Option<u16>,

    /// GPIO number wired to the controller's ATTN pin.
    #[arg(long, global = true, env = "RMIFLASH_ATTN_GPIO", value_name = "GPIO")]
    attn_gpio: Option<u32>,

    /// ATTN is asserted high instead of low.
    #[arg(long, global = true)]
    attn_active_high: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "RMIFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Reflash a controller with a firmware image (F34).
    Upgrade {
        /// Path to the `.img` firmware image.
        image: PathBuf,

        /// Only rewrite the config and display config partitions.
        #[arg(long)]
        config_only: bool,

        /// Run the display refresh command after a successful upgrade.
        #[arg(long)]
        refresh_display: bool,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Recover a controller stuck in bootloader recovery mode (F35).
    Recover {
        /// Path to the raw recovery image.
        image: PathBuf,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show information read from the controller.
    Info {
        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Show the header of a firmware image file.
    ImageInfo {
        /// Path to the `.img` firmware image.
        image: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a hexadecimal I2C address (0x prefix optional).
fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

/// Map an error to the process exit code.
///
/// 1 generic, 2 usage, 3 configuration, 4 device communication,
/// 130 cancelled.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Config(_) => 3,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<rmiflash::Error>() {
        Some(rmiflash::Error::Config(_) | rmiflash::Error::Unsupported(_)) => 3,
        Some(
            rmiflash::Error::Bus { .. }
            | rmiflash::Error::Timeout(_)
            | rmiflash::Error::Protocol(_),
        ) => 4,
        _ => 1,
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "rmiflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)?
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Upgrade {
            image,
            config_only,
            refresh_display,
            yes,
        } => cmd_upgrade(cli, &config, image, *config_only, *refresh_display, *yes),
        Commands::Recover { image, yes } => cmd_recover(cli, &config, image, *yes),
        Commands::Info { json } => cmd_info(cli, &config, *json),
        Commands::ImageInfo { image, json } => cmd_image_info(image, *json),
        Commands::Completions { shell } => {
            cmd_completions(*shell);
            Ok(())
        },
    }
}
