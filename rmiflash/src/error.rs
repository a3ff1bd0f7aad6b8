//! Error types for rmiflash.

use std::io;
use thiserror::Error;

/// Result type for rmiflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for rmiflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (image files, GPIO value files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Register read or write failed on the bus.
    #[error("Bus error at register {register:#04x}: {reason}")]
    Bus {
        /// Register address of the failed transfer.
        register: u8,
        /// Transport-level reason.
        reason: String,
    },

    /// Attention line did not assert in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed firmware image.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Image buffer could not be allocated.
    #[error("Cannot allocate {0} bytes for the firmware image")]
    Allocation(usize),

    /// Device is not in the state the operation requires.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unsupported platform or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a bus error for `register`.
    pub fn bus(register: u8, reason: impl Into<String>) -> Self {
        Self::Bus {
            register,
            reason: reason.into(),
        }
    }
}
