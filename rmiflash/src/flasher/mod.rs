//! Reflash and recovery orchestration.
//!
//! [`Flasher`] owns the register bus and attention line for one controller
//! and drives either the F34 reflash sequence ([`Flasher::upgrade`]) or the
//! F35 recovery sequence ([`Flasher::recover`]). Register layout discovered
//! by a PDT scan lives only for the duration of one run.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rmiflash::bus::native::DeviceConfig;
//! use rmiflash::{Flasher, ReflashMode};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeviceConfig::new("/dev/i2c-5", 0x20).with_attn_gpio(Some(42));
//!     let mut flasher = Flasher::open(&config)?;
//!
//!     flasher.upgrade_from_file("PLG626-V1.02.img", ReflashMode::Full, |name, current, total| {
//!         println!("{name}: {current}/{total}");
//!     })?;
//!     Ok(())
//! }
//! ```

mod recovery;
mod reflash;

use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::bus::{self, AttentionLine, RegisterBus};
use crate::error::{Error, Result};
use crate::image::{FirmwareImage, ImageBuffer};
use crate::protocol::f01::{self, CoreRegisters};
use crate::protocol::pdt::{self, DeviceLayout, FunctionBlock};
use crate::protocol::{FlashGeometry, PAGE_SELECT};

pub use recovery::RecoveryState;
pub use reflash::{ReflashMode, ReflashState};

/// Protocol delays and attention timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlasherConfig {
    /// Default attention wait.
    pub attention_timeout: Duration,
    /// Attention wait after `EraseAll`.
    pub erase_all_timeout: Duration,
    /// Attention wait after `EraseUIConfig`.
    pub erase_config_timeout: Duration,
    /// Attention wait after each config block.
    pub config_block_timeout: Duration,
    /// Delay after masking interrupts, before the bootloader handshake.
    pub enable_settle: Duration,
    /// Delay after the `Enable` command.
    pub enable_command_delay: Duration,
    /// Delay after reset, skipping the first spurious attention.
    pub reset_settle: Duration,
    /// Fixed wait after the F35 erase.
    pub recovery_erase_wait: Duration,
    /// Fixed wait after the F35 reset.
    pub recovery_reset_wait: Duration,
    /// Attention line sampling interval.
    pub poll_interval: Duration,
}

impl Default for FlasherConfig {
    fn default() -> Self {
        Self {
            attention_timeout: Duration::from_millis(1000),
            erase_all_timeout: Duration::from_millis(6000),
            erase_config_timeout: Duration::from_millis(2000),
            config_block_timeout: Duration::from_millis(100),
            enable_settle: Duration::from_millis(20),
            enable_command_delay: Duration::from_millis(100),
            reset_settle: Duration::from_millis(150),
            recovery_erase_wait: Duration::from_millis(2000),
            recovery_reset_wait: Duration::from_millis(250),
            poll_interval: Duration::from_micros(50),
        }
    }
}

impl FlasherConfig {
    /// Set the default attention wait.
    #[must_use]
    pub fn with_attention_timeout(mut self, timeout: Duration) -> Self {
        self.attention_timeout = timeout;
        self
    }

    /// Set the attention wait after `EraseAll`.
    #[must_use]
    pub fn with_erase_all_timeout(mut self, timeout: Duration) -> Self {
        self.erase_all_timeout = timeout;
        self
    }

    /// Set the attention wait after `EraseUIConfig`.
    #[must_use]
    pub fn with_erase_config_timeout(mut self, timeout: Duration) -> Self {
        self.erase_config_timeout = timeout;
        self
    }

    /// Set the attention wait after each config block.
    #[must_use]
    pub fn with_config_block_timeout(mut self, timeout: Duration) -> Self {
        self.config_block_timeout = timeout;
        self
    }

    /// Set the attention sampling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Identification read from a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Product ID from F01, if F01 is present.
    pub product_id: Option<String>,
    /// Firmware build number from F01.
    pub firmware_version: Option<u32>,
    /// Package ID, when the controller reports one.
    pub package_id: Option<u16>,
    /// Controller is in bootloader recovery mode.
    pub recovery_mode: bool,
    /// F34 block geometry (absent in recovery mode).
    pub geometry: Option<FlashGeometry>,
}

/// Reflash driver for one RMI4 controller.
pub struct Flasher<B: RegisterBus, A: AttentionLine> {
    bus: B,
    attn: A,
    config: FlasherConfig,
    display_refresh: Option<Box<dyn FnMut()>>,
    refresh_after_upgrade: bool,
}

impl<B: RegisterBus, A: AttentionLine> Flasher<B, A> {
    /// Create a flasher with default timing.
    pub fn new(bus: B, attn: A) -> Self {
        Self {
            bus,
            attn,
            config: FlasherConfig::default(),
            display_refresh: None,
            refresh_after_upgrade: false,
        }
    }

    /// Replace the timing configuration.
    #[must_use]
    pub fn with_config(mut self, config: FlasherConfig) -> Self {
        self.config = config;
        self
    }

    /// Hook invoked after a finished run to refresh the display.
    ///
    /// Always called after recovery; after an upgrade only when
    /// [`with_refresh_after_upgrade`](Self::with_refresh_after_upgrade) is set.
    #[must_use]
    pub fn with_display_refresh<F>(mut self, refresh: F) -> Self
    where
        F: FnMut() + 'static,
    {
        self.display_refresh = Some(Box::new(refresh));
        self
    }

    /// Refresh the display after an upgrade as well.
    #[must_use]
    pub fn with_refresh_after_upgrade(mut self, refresh: bool) -> Self {
        self.refresh_after_upgrade = refresh;
        self
    }

    /// Timing configuration.
    pub fn config(&self) -> &FlasherConfig {
        &self.config
    }

    /// Get a reference to the register bus.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Get a mutable reference to the register bus.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Consume the flasher and return the register bus.
    pub fn into_bus(self) -> B {
        self.bus
    }

    /// Scan the controller and read its identification.
    pub fn read_device_info(&mut self) -> Result<DeviceInfo> {
        self.select_page()?;
        let layout = self.scan()?;

        let mut info = DeviceInfo {
            product_id: None,
            firmware_version: None,
            package_id: None,
            recovery_mode: layout.recovery_mode(),
            geometry: None,
        };
        if let FunctionBlock::Reflash { geometry, .. } = layout.block {
            info.geometry = Some(geometry);
        }
        if let Some(core) = layout.core {
            info.product_id = Some(f01::read_product_id(&mut self.bus, &core)?);
            info.firmware_version = Some(f01::read_firmware_version(&mut self.bus, &core)?);
            info.package_id = f01::read_package_id(&mut self.bus, &core)?;
        }
        Ok(info)
    }

    /// Run the F34 reflash sequence.
    ///
    /// The image is consumed and zeroed on return, whatever the outcome.
    /// Fails with [`Error::Protocol`] if the controller is in bootloader
    /// recovery mode.
    pub fn upgrade<F>(&mut self, image: FirmwareImage, mode: ReflashMode, progress: F) -> Result<()>
    where
        F: FnMut(&str, usize, usize),
    {
        reflash::ReflashRun::new(self, image, mode, progress).execute()
    }

    /// Run the F35 recovery sequence, streaming the raw image.
    ///
    /// Fails with [`Error::Protocol`] if the controller is not in
    /// bootloader recovery mode.
    pub fn recover<F>(&mut self, image: ImageBuffer, progress: F) -> Result<()>
    where
        F: FnMut(&str, usize, usize),
    {
        recovery::RecoveryRun::new(self, image, progress).execute()
    }

    /// Load, parse and flash an image file.
    pub fn upgrade_from_file<P, F>(&mut self, path: P, mode: ReflashMode, progress: F) -> Result<()>
    where
        P: AsRef<Path>,
        F: FnMut(&str, usize, usize),
    {
        let image = FirmwareImage::parse(ImageBuffer::from_file(path)?)?;
        let header = image.header();
        info!(
            "Image product ID {}, version {}",
            header.product_id,
            header.image_version.as_deref().unwrap_or("unknown")
        );
        self.upgrade(image, mode, progress)
    }

    /// Load an image file and run recovery with it.
    pub fn recover_from_file<P, F>(&mut self, path: P, progress: F) -> Result<()>
    where
        P: AsRef<Path>,
        F: FnMut(&str, usize, usize),
    {
        let image = ImageBuffer::from_file(path)?;
        self.recover(image, progress)
    }

    /// Select register page 0, where the PDT lives.
    fn select_page(&mut self) -> Result<()> {
        self.bus.write_byte(PAGE_SELECT, 0x00)
    }

    /// Scan the PDT, then clear pending interrupts when F01 is reachable.
    fn scan(&mut self) -> Result<DeviceLayout> {
        let layout = pdt::scan(&mut self.bus)?;
        if let (false, Some(core)) = (layout.recovery_mode(), layout.core) {
            self.bus.read_byte(core.interrupt_status())?;
        }
        Ok(layout)
    }

    /// Wait for ATTN and clear the interrupt status.
    ///
    /// A line that stays busy is an error here and the interrupt status is
    /// left untouched.
    fn wait_for_attention(&mut self, core: Option<CoreRegisters>, timeout: Duration) -> Result<()> {
        if let Err(e) = bus::wait_ready(&mut self.attn, timeout, self.config.poll_interval) {
            if matches!(e, Error::Timeout(_)) {
                warn!("Interrupt pin is busy");
            }
            return Err(e);
        }
        if let Some(core) = core {
            self.bus.read_byte(core.interrupt_status())?;
        }
        Ok(())
    }

    /// Like [`wait_for_attention`](Self::wait_for_attention), but carries on
    /// after a timeout. Bus errors still abort.
    fn settle(&mut self, core: Option<CoreRegisters>, timeout: Duration) -> Result<()> {
        match self.wait_for_attention(core, timeout) {
            Err(Error::Timeout(reason)) => {
                debug!("Continuing after attention timeout: {reason}");
                Ok(())
            },
            other => other,
        }
    }

    fn refresh_display(&mut self) {
        if let Some(refresh) = self.display_refresh.as_mut() {
            info!("Requesting display refresh");
            refresh();
        }
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{AttentionLine, Flasher, Result};
    use crate::bus::native::{DeviceConfig, I2cDevBus};

    impl Flasher<I2cDevBus, Box<dyn AttentionLine>> {
        /// Open the controller described by `config`.
        pub fn open(config: &DeviceConfig) -> Result<Self> {
            let (bus, attn) = config.open()?;
            Ok(Self::new(bus, attn))
        }
    }
}
