//! Configuration file support for rmiflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (RMIFLASH_*)
//! 3. Local config file (./rmiflash.toml)
//! 4. Global config file (~/.config/rmiflash/config.toml)
//!
//! Flags and environment variables are resolved by clap; this module only
//! merges the files underneath them.

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::CliError;

/// Name of the per-directory config file.
pub const LOCAL_CONFIG_FILE: &str = "rmiflash.toml";

/// Touch controller connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSection {
    /// I2C adapter (e.g., "/dev/i2c-5").
    pub bus: Option<String>,
    /// 7-bit slave address.
    pub address: Option<u16>,
    /// GPIO number of the ATTN line.
    pub attn_gpio: Option<u32>,
    /// ATTN polarity. Active-low when unset.
    pub attn_active_low: Option<bool>,
}

/// Display collaborator settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplaySection {
    /// Shell command run after a reflash to refresh the panel.
    pub refresh_command: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Device configuration.
    #[serde(default)]
    pub device: DeviceSection,
    /// Display configuration.
    #[serde(default)]
    pub display: DisplaySection,
}

impl Config {
    /// Load configuration from the global and local config files.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// The file must exist and parse; there is no fallback to defaults.
    pub(crate) fn load_from_path(path: &Path) -> Result<Self, CliError> {
        let config = Self::read(path).map_err(CliError::Config)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load an implicit config file. Absent files are skipped, broken ones
    /// are reported and ignored.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        Self::read(path).inspect_err(|e| warn!("{e}")).ok()
    }

    fn read(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {e}", path.display()))
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "rmiflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Overlay the settings present in `other`.
    fn merge(&mut self, other: Self) {
        let Self { device, display } = other;
        if device.bus.is_some() {
            self.device.bus = device.bus;
        }
        if device.address.is_some() {
            self.device.address = device.address;
        }
        if device.attn_gpio.is_some() {
            self.device.attn_gpio = device.attn_gpio;
        }
        if device.attn_active_low.is_some() {
            self.device.attn_active_low = device.attn_active_low;
        }
        if display.refresh_command.is_some() {
            self.display.refresh_command = display.refresh_command;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.device.bus.is_none());
        assert!(config.device.address.is_none());
        assert!(config.device.attn_gpio.is_none());
        assert!(config.device.attn_active_low.is_none());
        assert!(config.display.refresh_command.is_none());
    }

    #[test]
    fn test_config_merge_overrides() {
        let mut base = Config::default();
        base.device.bus = Some("/dev/i2c-1".to_string());
        base.device.address = Some(0x20);

        let mut other = Config::default();
        other.device.bus = Some("/dev/i2c-5".to_string());
        other.device.attn_gpio = Some(42);
        other.display.refresh_command = Some("true".to_string());

        base.merge(other);

        assert_eq!(base.device.bus.as_deref(), Some("/dev/i2c-5"));
        assert_eq!(base.device.address, Some(0x20));
        assert_eq!(base.device.attn_gpio, Some(42));
        assert_eq!(base.display.refresh_command.as_deref(), Some("true"));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.device.bus = Some("/dev/i2c-3".to_string());
        base.device.attn_active_low = Some(false);

        base.merge(Config::default());

        assert_eq!(base.device.bus.as_deref(), Some("/dev/i2c-3"));
        assert_eq!(base.device.attn_active_low, Some(false));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[device]
bus = "/dev/i2c-5"
address = 44
attn_gpio = 110
attn_active_low = false

[display]
refresh_command = "echo 1 > /sys/class/graphics/fb0/refresh"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.device.bus.as_deref(), Some("/dev/i2c-5"));
        assert_eq!(config.device.address, Some(0x2C));
        assert_eq!(config.device.attn_gpio, Some(110));
        assert_eq!(config.device.attn_active_low, Some(false));
        assert!(
            config
                .display
                .refresh_command
                .unwrap()
                .contains("fb0")
        );
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: Config = toml::from_str("[display]\nrefresh_command = \"true\"\n").unwrap();
        assert!(config.device.bus.is_none());
        assert_eq!(config.display.refresh_command.as_deref(), Some("true"));

        let config: Config = toml::from_str("").unwrap();
        assert!(config.device.bus.is_none());
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.toml");
        fs::write(&path, "[device]\nbus = \"/dev/i2c-7\"\nattn_gpio = 5\n").unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.device.bus.as_deref(), Some("/dev/i2c-7"));
        assert_eq!(config.device.attn_gpio, Some(5));
    }

    #[test]
    fn test_load_from_path_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[device\nbus = ").unwrap();

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(matches!(err, CliError::Config(ref msg) if msg.contains("parse")));
    }

    #[test]
    fn test_load_from_path_rejects_missing_file() {
        let err = Config::load_from_path(Path::new("/nonexistent/path/config.toml")).unwrap_err();
        assert!(matches!(err, CliError::Config(ref msg) if msg.contains("/nonexistent/path")));
    }

    #[test]
    fn test_load_from_file_skips_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        assert!(Config::load_from_file(&path).is_none());
        assert!(Config::load_from_file(&dir.path().join("absent.toml")).is_none());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            let p = p.to_string_lossy().into_owned();
            assert!(p.contains("rmiflash"));
            assert!(p.ends_with("config.toml"));
        }
    }
}
