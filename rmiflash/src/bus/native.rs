//! Native backends: Linux `i2c-dev` register bus and sysfs GPIO attention.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rmiflash::bus::native::{DeviceConfig, I2cDevBus};
//! use rmiflash::bus::RegisterBus;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeviceConfig::new("/dev/i2c-5", 0x20);
//!     let mut bus = I2cDevBus::open(&config.bus_path, config.address)?;
//!     let status = bus.read_byte(0x13)?;
//!     println!("F01 status: {status:#04x}");
//!     Ok(())
//! }
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::bus::{AttentionLine, RegisterBus, Unwired};
use crate::error::{Error, Result};

/// Default 7-bit I2C address of RMI4 touch controllers.
pub const DEFAULT_I2C_ADDRESS: u16 = 0x20;

/// Root of the legacy sysfs GPIO interface.
const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Native device connection parameters.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// I2C adapter character device (e.g. `/dev/i2c-5`).
    pub bus_path: PathBuf,
    /// 7-bit slave address.
    pub address: u16,
    /// GPIO number wired to the controller's ATTN pin, if any.
    pub attn_gpio: Option<u32>,
    /// ATTN is asserted when the line reads low.
    pub attn_active_low: bool,
}

impl DeviceConfig {
    /// Create a configuration for the controller at `address` on `bus_path`.
    pub fn new(bus_path: impl Into<PathBuf>, address: u16) -> Self {
        Self {
            bus_path: bus_path.into(),
            address,
            attn_gpio: None,
            attn_active_low: true,
        }
    }

    /// Set the attention GPIO.
    #[must_use]
    pub fn with_attn_gpio(mut self, gpio: Option<u32>) -> Self {
        self.attn_gpio = gpio;
        self
    }

    /// Set the attention line polarity.
    #[must_use]
    pub fn with_attn_active_low(mut self, active_low: bool) -> Self {
        self.attn_active_low = active_low;
        self
    }

    /// Open the register bus and attention line described by this config.
    pub fn open(&self) -> Result<(I2cDevBus, Box<dyn AttentionLine>)> {
        let bus = I2cDevBus::open(&self.bus_path, self.address)?;
        let attn: Box<dyn AttentionLine> = match self.attn_gpio {
            Some(gpio) => Box::new(SysfsGpio::open(gpio, self.attn_active_low)?),
            None => {
                debug!("No attention GPIO configured, relying on fixed delays");
                Box::new(Unwired)
            },
        };
        Ok((bus, attn))
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new("/dev/i2c-0", DEFAULT_I2C_ADDRESS)
    }
}

/// RMI4 register bus over a Linux `i2c-dev` adapter.
pub struct I2cDevBus {
    file: File,
    path: PathBuf,
    address: u16,
}

impl I2cDevBus {
    /// Open `path` and bind it to the slave at `address`.
    pub fn open(path: impl AsRef<Path>, address: u16) -> Result<Self> {
        let path = path.as_ref();
        if address > 0x7F {
            return Err(Error::Config(format!(
                "I2C address {address:#06x} is not a 7-bit address"
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::Config(format!("cannot open {}: {e}", path.display())))?;

        let bus = Self {
            file,
            path: path.to_path_buf(),
            address,
        };
        bus.bind_slave()?;

        debug!("Opened {} at address {:#04x}", path.display(), address);
        Ok(bus)
    }

    /// Adapter path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Slave address.
    pub fn address(&self) -> u16 {
        self.address
    }

    #[cfg(target_os = "linux")]
    fn bind_slave(&self) -> Result<()> {
        linux::set_slave(&self.file, self.address).map_err(|e| {
            Error::Config(format!(
                "cannot bind {} to address {:#04x}: {e}",
                self.path.display(),
                self.address
            ))
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn bind_slave(&self) -> Result<()> {
        Err(Error::Unsupported(
            "i2c-dev register access is only available on Linux".into(),
        ))
    }
}

impl RegisterBus for I2cDevBus {
    fn read(&mut self, register: u8, buf: &mut [u8]) -> Result<()> {
        trace!("read  {register:#04x} x{}", buf.len());
        #[cfg(target_os = "linux")]
        {
            linux::write_read(&self.file, self.address, register, buf)
                .map_err(|e| Error::bus(register, e.to_string()))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = buf;
            Err(Error::bus(register, "i2c-dev is only available on Linux"))
        }
    }

    fn write(&mut self, register: u8, data: &[u8]) -> Result<()> {
        trace!("write {register:#04x} {data:02X?}");
        write_frame(&mut self.file, register, data)
    }
}

/// Send `[register, data...]` as one message. A short write is an error;
/// the remainder is never sent as a second message.
fn write_frame<W: Write>(out: &mut W, register: u8, data: &[u8]) -> Result<()> {
    let mut frame = Vec::with_capacity(data.len() + 1);
    frame.push(register);
    frame.extend_from_slice(data);

    let written = out
        .write(&frame)
        .map_err(|e| Error::bus(register, e.to_string()))?;
    if written != frame.len() {
        return Err(Error::bus(
            register,
            format!("short write: {written} of {} bytes", frame.len()),
        ));
    }
    Ok(())
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
mod linux {
    use std::fs::File;
    use std::io;
    use std::os::fd::AsRawFd;

    const I2C_SLAVE: libc::c_ulong = 0x0703;
    const I2C_RDWR: libc::c_ulong = 0x0707;
    const I2C_M_RD: u16 = 0x0001;

    /// `struct i2c_msg` from `<linux/i2c.h>`.
    #[repr(C)]
    struct I2cMsg {
        addr: u16,
        flags: u16,
        len: u16,
        buf: *mut u8,
    }

    /// `struct i2c_rdwr_ioctl_data` from `<linux/i2c-dev.h>`.
    #[repr(C)]
    struct I2cRdwrData {
        msgs: *mut I2cMsg,
        nmsgs: u32,
    }

    pub(super) fn set_slave(file: &File, address: u16) -> io::Result<()> {
        // SAFETY: `file` owns a valid descriptor for the lifetime of the call
        // and I2C_SLAVE takes its argument by value.
        let rc = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                I2C_SLAVE as _,
                libc::c_ulong::from(address),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Register-address write followed by a read, joined by a repeated start.
    pub(super) fn write_read(
        file: &File,
        address: u16,
        register: u8,
        buf: &mut [u8],
    ) -> io::Result<()> {
        let len = u16::try_from(buf.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "read too long"))?;
        let mut reg = register;
        let mut msgs = [
            I2cMsg {
                addr: address,
                flags: 0,
                len: 1,
                buf: &raw mut reg,
            },
            I2cMsg {
                addr: address,
                flags: I2C_M_RD,
                len,
                buf: buf.as_mut_ptr(),
            },
        ];
        let mut data = I2cRdwrData {
            msgs: msgs.as_mut_ptr(),
            nmsgs: 2,
        };

        // SAFETY: both message buffers outlive the ioctl and their lengths
        // match the `len` fields handed to the kernel.
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), I2C_RDWR as _, &raw mut data) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Attention line read from a sysfs GPIO `value` file.
pub struct SysfsGpio {
    file: File,
    path: PathBuf,
    active_low: bool,
}

impl SysfsGpio {
    /// Open GPIO `gpio`, exporting it as an input if needed.
    pub fn open(gpio: u32, active_low: bool) -> Result<Self> {
        let dir = Path::new(SYSFS_GPIO_ROOT).join(format!("gpio{gpio}"));
        if !dir.exists() {
            debug!("Exporting GPIO {gpio}");
            fs::write(Path::new(SYSFS_GPIO_ROOT).join("export"), gpio.to_string())
                .map_err(|e| Error::Config(format!("cannot export GPIO {gpio}: {e}")))?;
            fs::write(dir.join("direction"), "in")
                .map_err(|e| Error::Config(format!("cannot configure GPIO {gpio}: {e}")))?;
        }
        Self::from_path(dir.join("value"), active_low)
    }

    /// Use an arbitrary value file (`0`/`1` text).
    pub fn from_path(path: impl Into<PathBuf>, active_low: bool) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path)
            .map_err(|e| Error::Config(format!("cannot open {}: {e}", path.display())))?;
        Ok(Self {
            file,
            path,
            active_low,
        })
    }

    /// Value file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AttentionLine for SysfsGpio {
    fn is_asserted(&mut self) -> Result<bool> {
        let mut buf = [0u8; 2];
        self.file.seek(SeekFrom::Start(0))?;
        let n = self.file.read(&mut buf)?;
        let high = match buf[..n].first() {
            Some(b'0') => false,
            Some(b'1') => true,
            _ => {
                return Err(Error::Config(format!(
                    "unexpected GPIO value in {}",
                    self.path.display()
                )));
            },
        };
        Ok(high != self.active_low)
    }
}
