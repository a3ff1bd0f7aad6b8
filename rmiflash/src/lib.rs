//! # rmiflash
//!
//! A library for reflashing Synaptics RMI4 touch controllers.
//!
//! This crate provides:
//!
//! - Page Description Table (PDT) scanning
//! - Synaptics `.img` firmware image parsing
//! - The F34 reflash sequence (lockdown, erase, firmware/config/display
//!   config block writes)
//! - The F35 bootloader recovery sequence for bricked controllers
//!
//! The controller is reached through two small traits, [`RegisterBus`] and
//! [`AttentionLine`], so the protocol can run against real hardware or a
//! scripted register space.
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux `i2c-dev` adapters with an optional sysfs
//!   GPIO for the ATTN line
//! - Anything else, by implementing [`RegisterBus`] and [`AttentionLine`]
//!
//! ## Features
//!
//! - `native` (default): Linux i2c-dev and sysfs GPIO backends
//!
//! ## Example
//!
//! ```rust,no_run
//! use rmiflash::bus::native::DeviceConfig;
//! use rmiflash::{Flasher, FirmwareImage, ImageBuffer, ReflashMode};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::parse(ImageBuffer::from_file("PLG626.img")?)?;
//!     println!("Image for {}", image.header().product_id);
//!
//!     let mut flasher = Flasher::open(&DeviceConfig::new("/dev/i2c-5", 0x20))?;
//!     let info = flasher.read_device_info()?;
//!     println!("Device firmware: {:?}", info.firmware_version);
//!
//!     flasher.upgrade(image, ReflashMode::Full, |name, current, total| {
//!         println!("{name}: {current}/{total}");
//!     })?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod error;
pub mod flasher;
pub mod image;
pub mod protocol;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use {
    bus::{AttentionLine, RegisterBus, Unwired, wait_ready},
    error::{Error, Result},
    flasher::{DeviceInfo, Flasher, FlasherConfig, RecoveryState, ReflashMode, ReflashState},
    image::{FirmwareImage, ImageBuffer, ImageHeader},
    protocol::{DeviceLayout, FlashCommand, FlashGeometry, Partition},
};
