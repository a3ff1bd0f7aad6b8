//! Register bus and attention line abstractions.
//!
//! The reflash protocol talks to the controller through two primitives:
//!
//! - a [`RegisterBus`] that reads and writes bytes at an 8-bit register
//!   address (RMI4 over I2C on real hardware),
//! - an [`AttentionLine`] that reports whether the controller is asserting
//!   its ATTN signal.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------+
//! |  F34 / F35 Flasher |
//! +----+----------+----+
//!      |          |
//!      v          v
//! +---------+ +-----------+
//! | Register| | Attention |
//! |   Bus   | |   Line    |
//! +----+----+ +-----+-----+
//!      |            |
//!      v            v
//! +---------+ +-----------+
//! | i2c-dev | | sysfs GPIO|
//! +---------+ +-----------+
//!   Linux (feature `native`)
//! ```
//!
//! Both traits are synchronous and blocking. Implementations do not retry;
//! any failure is reported to the caller as [`Error::Bus`].

#[cfg(feature = "native")]
pub mod native;

use std::thread;
use std::time::{Duration, Instant};

use log::trace;

use crate::error::{Error, Result};

/// Synchronous register access on the controller.
pub trait RegisterBus {
    /// Read `buf.len()` bytes starting at `register`.
    fn read(&mut self, register: u8, buf: &mut [u8]) -> Result<()>;

    /// Write `data` starting at `register`.
    fn write(&mut self, register: u8, data: &[u8]) -> Result<()>;

    /// Read a single byte.
    fn read_byte(&mut self, register: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read(register, &mut buf)?;
        Ok(buf[0])
    }

    /// Write a single byte.
    fn write_byte(&mut self, register: u8, value: u8) -> Result<()> {
        self.write(register, &[value])
    }

    /// Read a little-endian 16-bit value.
    fn read_u16_le(&mut self, register: u8) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read(register, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }
}

impl<B: RegisterBus + ?Sized> RegisterBus for &mut B {
    fn read(&mut self, register: u8, buf: &mut [u8]) -> Result<()> {
        (**self).read(register, buf)
    }

    fn write(&mut self, register: u8, data: &[u8]) -> Result<()> {
        (**self).write(register, data)
    }
}

impl<B: RegisterBus + ?Sized> RegisterBus for Box<B> {
    fn read(&mut self, register: u8, buf: &mut [u8]) -> Result<()> {
        (**self).read(register, buf)
    }

    fn write(&mut self, register: u8, data: &[u8]) -> Result<()> {
        (**self).write(register, data)
    }
}

/// The controller's ATTN signal.
pub trait AttentionLine {
    /// Returns `true` while the controller asserts attention.
    fn is_asserted(&mut self) -> Result<bool>;
}

impl<A: AttentionLine + ?Sized> AttentionLine for &mut A {
    fn is_asserted(&mut self) -> Result<bool> {
        (**self).is_asserted()
    }
}

impl<A: AttentionLine + ?Sized> AttentionLine for Box<A> {
    fn is_asserted(&mut self) -> Result<bool> {
        (**self).is_asserted()
    }
}

/// Attention line for boards where ATTN is not wired to the host.
///
/// Always reports asserted, so waits return immediately and the protocol
/// relies on its fixed delays and flash-status checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unwired;

impl AttentionLine for Unwired {
    fn is_asserted(&mut self) -> Result<bool> {
        Ok(true)
    }
}

/// Poll `line` until it asserts or `timeout` elapses.
///
/// The line is sampled every `poll_interval`, and once more after the
/// deadline so a late assertion is not missed. Returns [`Error::Timeout`]
/// only after the full timeout has elapsed.
pub fn wait_ready<A: AttentionLine + ?Sized>(
    line: &mut A,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let start = Instant::now();

    while start.elapsed() < timeout {
        if line.is_asserted()? {
            trace!("ATTN asserted after {:?}", start.elapsed());
            return Ok(());
        }
        thread::sleep(poll_interval);
    }

    if line.is_asserted()? {
        return Ok(());
    }

    Err(Error::Timeout(format!(
        "attention line still busy after {} ms",
        timeout.as_millis()
    )))
}
