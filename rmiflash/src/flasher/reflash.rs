//! F34 reflash state machine.
//!
//! ```text
//! Init -> InfoRead -> FlashEnabled -> Locked ---+
//!                        ^                      |
//!                        +----------------------+
//!                     FlashEnabled -> Erased -> FirmwareWritten
//!                       -> ConfigWritten -> DisplayConfigWritten -> Finalized
//! ```
//!
//! `Locked` is visited at most once, and only when the image carries
//! lockdown data and the bootloader reports itself unlocked. The config-only
//! mode skips `InfoRead`, `Locked` and `FirmwareWritten` and erases only the
//! UI config partition.

use log::{debug, info};

use super::{Flasher, pause};
use crate::bus::{AttentionLine, RegisterBus};
use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::protocol::f01::{self, CoreRegisters, RESET_COMMAND, STATUS_FLASH_PROG};
use crate::protocol::f34::{self, FlashCommand, FlashGeometry, Partition, ReflashRegisters};
use crate::protocol::pdt::DeviceLayout;

/// Blocks between progress log lines.
const PROGRESS_LOG_INTERVAL: usize = 100;

/// What an upgrade rewrites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReflashMode {
    /// Erase everything and write firmware, config and display config.
    #[default]
    Full,
    /// Erase and rewrite the UI config and display config only.
    ConfigOnly,
}

impl ReflashMode {
    fn partitions(self) -> &'static [Partition] {
        match self {
            Self::Full => &[
                Partition::Firmware,
                Partition::Config,
                Partition::DisplayConfig,
            ],
            Self::ConfigOnly => &[Partition::Config, Partition::DisplayConfig],
        }
    }
}

/// States of the F34 reflash sequence. Each names the step just completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflashState {
    /// Page selected, PDT scanned, image checked against the geometry.
    Init,
    /// Product ID and firmware version read.
    InfoRead,
    /// Bootloader in flash programming mode.
    FlashEnabled,
    /// Lockdown blocks written.
    Locked,
    /// Flash erased.
    Erased,
    /// Firmware blocks written.
    FirmwareWritten,
    /// UI config blocks written.
    ConfigWritten,
    /// Display config blocks written.
    DisplayConfigWritten,
    /// Controller reset into the new firmware.
    Finalized,
}

/// One F34 reflash run.
pub(super) struct ReflashRun<'f, B: RegisterBus, A: AttentionLine, P> {
    flasher: &'f mut Flasher<B, A>,
    image: FirmwareImage,
    mode: ReflashMode,
    progress: P,
    core: CoreRegisters,
    registers: ReflashRegisters,
    geometry: FlashGeometry,
    /// Last completed step; `None` until `Init` has run.
    state: Option<ReflashState>,
    locked_down: bool,
    #[cfg(test)]
    history: Vec<ReflashState>,
}

impl<'f, B, A, P> ReflashRun<'f, B, A, P>
where
    B: RegisterBus,
    A: AttentionLine,
    P: FnMut(&str, usize, usize),
{
    pub(super) fn new(
        flasher: &'f mut Flasher<B, A>,
        image: FirmwareImage,
        mode: ReflashMode,
        progress: P,
    ) -> Self {
        Self {
            flasher,
            image,
            mode,
            progress,
            core: CoreRegisters {
                query_base: 0,
                command_base: 0,
                control_base: 0,
                data_base: 0,
            },
            registers: ReflashRegisters::from_bases(0, 0),
            geometry: FlashGeometry::default(),
            state: None,
            locked_down: false,
            #[cfg(test)]
            history: Vec::new(),
        }
    }

    pub(super) fn execute(&mut self) -> Result<()> {
        while self.state != Some(ReflashState::Finalized) {
            let next = self.next_state()?;
            match next {
                ReflashState::Init => self.initialize()?,
                ReflashState::InfoRead => self.read_info()?,
                ReflashState::FlashEnabled => self.enable_flashing()?,
                ReflashState::Locked => self.lock_down()?,
                ReflashState::Erased => self.erase()?,
                ReflashState::FirmwareWritten => self.write_partition(Partition::Firmware)?,
                ReflashState::ConfigWritten => self.write_partition(Partition::Config)?,
                ReflashState::DisplayConfigWritten => {
                    self.write_partition(Partition::DisplayConfig)?;
                },
                ReflashState::Finalized => self.finalize()?,
            }
            self.enter(next);
        }

        info!("Reflash complete");
        Ok(())
    }

    fn enter(&mut self, state: ReflashState) {
        debug!("Reflash state: {:?} -> {state:?}", self.state);
        self.state = Some(state);
        #[cfg(test)]
        self.history.push(state);
    }

    fn next_state(&mut self) -> Result<ReflashState> {
        use ReflashState::{
            ConfigWritten, DisplayConfigWritten, Erased, Finalized, FirmwareWritten, FlashEnabled,
            InfoRead, Init, Locked,
        };

        let Some(state) = self.state else {
            return Ok(Init);
        };
        let next = match (state, self.mode) {
            (Init, ReflashMode::Full) => InfoRead,
            (Init, ReflashMode::ConfigOnly) | (InfoRead, _) | (Locked, _) => FlashEnabled,
            (FlashEnabled, _) => {
                if self.lockdown_pending()? {
                    Locked
                } else {
                    Erased
                }
            },
            (Erased, ReflashMode::Full) => FirmwareWritten,
            (Erased, ReflashMode::ConfigOnly) | (FirmwareWritten, _) => ConfigWritten,
            (ConfigWritten, _) => DisplayConfigWritten,
            (DisplayConfigWritten, _) | (Finalized, _) => Finalized,
        };
        Ok(next)
    }

    fn lockdown_pending(&mut self) -> Result<bool> {
        if self.mode != ReflashMode::Full || self.locked_down {
            return Ok(false);
        }
        if self.image.lockdown_data(self.geometry.block_size)?.is_none() {
            debug!("Skipping lockdown for this image");
            return Ok(false);
        }
        if !f34::is_unlocked(&mut self.flasher.bus, &self.registers)? {
            info!("Device already locked");
            self.locked_down = true;
            return Ok(false);
        }
        Ok(true)
    }

    fn initialize(&mut self) -> Result<()> {
        info!("Initializing reflash process...");
        self.flasher.select_page()?;
        self.rescan()?;
        self.image
            .check_geometry(&self.geometry, self.mode.partitions())
    }

    fn rescan(&mut self) -> Result<()> {
        let layout: DeviceLayout = self.flasher.scan()?;
        let (registers, geometry) = layout.require_reflash()?;
        if geometry.block_size == 0 {
            return Err(Error::Protocol("device reports a block size of 0".into()));
        }
        self.core = layout.require_core()?;
        self.registers = registers;
        self.geometry = geometry;
        Ok(())
    }

    fn read_info(&mut self) -> Result<()> {
        let bus = &mut self.flasher.bus;
        let product_id = f01::read_product_id(bus, &self.core)?;
        let version = f01::read_firmware_version(bus, &self.core)?;
        info!("Device product ID {product_id}, firmware {version}");
        if let Some(package_id) = f01::read_package_id(bus, &self.core)? {
            debug!("Package ID {package_id:#06x}");
        }
        Ok(())
    }

    fn enable_flashing(&mut self) -> Result<()> {
        info!("Enable reflash...");
        let status = f01::read_status(&mut self.flasher.bus, &self.core)?;
        if status & STATUS_FLASH_PROG != 0 {
            debug!("Flash programming already enabled");
            return Ok(());
        }

        self.flasher.bus.write_byte(self.core.interrupt_enable(), 0)?;
        pause(self.flasher.config.enable_settle);

        self.unlock()?;
        self.command(FlashCommand::Enable)?;
        pause(self.flasher.config.enable_command_delay);
        let timeout = self.flasher.config.attention_timeout;
        self.flasher.settle(Some(self.core), timeout)?;

        self.rescan()?;
        let version = f01::read_firmware_version(&mut self.flasher.bus, &self.core)?;
        debug!("Bootloader firmware version {version}");

        self.check_status(FlashCommand::Enable)?;
        Ok(())
    }

    fn lock_down(&mut self) -> Result<()> {
        info!("Device unlocked, writing lockdown data");
        let block_size = usize::from(self.geometry.block_size);
        let timeout = self.flasher.config.attention_timeout;

        let data = self
            .image
            .lockdown_data(self.geometry.block_size)?
            .ok_or_else(|| Error::InvalidImage("image has no lockdown data".into()))?;

        for (block, chunk) in data.chunks(block_size).enumerate() {
            let bus = &mut self.flasher.bus;
            bus.write(
                self.registers.block_number(),
                &f34::block_number_bytes(block as u16, Partition::Firmware),
            )?;
            bus.write(self.registers.block_data(), chunk)?;
            bus.write_byte(self.registers.flash_control(), FlashCommand::LockDown.opcode())?;

            self.flasher.settle(Some(self.core), timeout)?;
            f34::check_flash_status(&mut self.flasher.bus, &self.registers, FlashCommand::LockDown)?;
        }

        self.locked_down = true;
        Ok(())
    }

    fn erase(&mut self) -> Result<()> {
        self.image
            .check_geometry(&self.geometry, self.mode.partitions())?;

        let (command, timeout) = match self.mode {
            ReflashMode::Full => {
                info!("Program firmware section...");
                (FlashCommand::EraseAll, self.flasher.config.erase_all_timeout)
            },
            ReflashMode::ConfigOnly => {
                info!("Update config section...");
                (
                    FlashCommand::EraseUiConfig,
                    self.flasher.config.erase_config_timeout,
                )
            },
        };

        self.unlock()?;
        self.command(command)?;
        self.flasher.settle(Some(self.core), timeout)?;
        self.check_status(command)?;
        Ok(())
    }

    fn write_partition(&mut self, partition: Partition) -> Result<()> {
        let block_size = usize::from(self.geometry.block_size);
        let total = usize::from(self.geometry.block_count(partition));
        let command = partition.write_command();
        let timeout = self.flasher.config.config_block_timeout;
        let data = self.image.section(partition, &self.geometry)?;

        info!("Writing {} ({total} blocks)", partition.name());
        for (block, chunk) in data.chunks(block_size).enumerate() {
            let bus = &mut self.flasher.bus;
            // Firmware blocks auto-increment after the first block number.
            if partition != Partition::Firmware || block == 0 {
                bus.write(
                    self.registers.block_number(),
                    &f34::block_number_bytes(block as u16, partition),
                )?;
            }
            bus.write(self.registers.block_data(), chunk)?;
            bus.write_byte(self.registers.flash_control(), command.opcode())?;

            if partition != Partition::Firmware {
                self.flasher.settle(Some(self.core), timeout)?;
            }
            f34::check_flash_status(&mut self.flasher.bus, &self.registers, command)?;

            if block % PROGRESS_LOG_INTERVAL == 0 {
                debug!("{} block {block} / {total}", partition.name());
            }
            (self.progress)(partition.name(), block + 1, total);
        }
        info!("{} block {total} / {total}", partition.name());
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        info!("Finalizing reflash...");
        self.flasher
            .bus
            .write_byte(self.core.command(), RESET_COMMAND)?;

        // Reset raises two interrupts; sleep past the first.
        pause(self.flasher.config.reset_settle);
        let timeout = self.flasher.config.attention_timeout;
        self.flasher.settle(Some(self.core), timeout)?;

        self.rescan()?;
        let status = f01::read_status(&mut self.flasher.bus, &self.core)?;
        debug!("Device status after reset: {status:#04x}");

        if self.flasher.refresh_after_upgrade {
            self.flasher.refresh_display();
        }
        Ok(())
    }

    /// Read the bootloader ID and write it back.
    fn unlock(&mut self) -> Result<()> {
        let bus = &mut self.flasher.bus;
        let id = f34::read_bootloader_id(bus, &self.registers)?;
        debug!("Bootloader ID {:#06x}", u16::from_le_bytes(id));
        f34::write_bootloader_id(bus, &self.registers, id)
    }

    fn command(&mut self, command: FlashCommand) -> Result<()> {
        debug!("Flash command {command}");
        self.flasher
            .bus
            .write_byte(self.registers.flash_control(), command.opcode())
    }

    fn check_status(&mut self, command: FlashCommand) -> Result<bool> {
        f34::check_flash_status(&mut self.flasher.bus, &self.registers, command)
    }
}
