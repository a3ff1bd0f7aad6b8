//! F34: flash memory management (reflash).
//!
//! ## Register map
//!
//! | Register          | Address        | Width |
//! |-------------------|----------------|-------|
//! | Bootloader ID     | query + 0      | 2     |
//! | Flash properties  | query + 1      | 1     |
//! | Block size        | query + 2      | 2     |
//! | Block counts      | query + 3      | 6     |
//! | Block number      | data + 0       | 2     |
//! | Block data        | data + 1       | n     |
//! | Flash control     | data + 2       | 1     |
//! | Flash status      | data + 3       | 1     |
//!
//! Every flash command is written to the flash control register and
//! followed by a status check.

use std::fmt;

use log::{debug, warn};

use crate::bus::RegisterBus;
use crate::error::Result;

/// Flash properties bit reporting that the bootloader is unlocked.
pub const PROPERTY_UNLOCKED: u8 = 0x02;

/// Flash status bits that latch an error code.
pub const STATUS_ERROR_MASK: u8 = 0x3F;

/// Block-number high-byte mask selecting the display-config partition.
pub const DISPLAY_CONFIG_SELECT: u8 = 0x60;

/// Flash control opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlashCommand {
    /// Compute firmware CRC.
    FirmwareCrc = 0x01,
    /// Write one firmware block.
    FirmwareWrite = 0x02,
    /// Erase firmware and configuration.
    EraseAll = 0x03,
    /// Write one lockdown block.
    LockDown = 0x04,
    /// Read one config block.
    ConfigRead = 0x05,
    /// Write one config block.
    ConfigWrite = 0x06,
    /// Erase the UI configuration partition.
    EraseUiConfig = 0x07,
    /// Query the sensor ID.
    QuerySensorId = 0x08,
    /// Erase the bootloader configuration.
    EraseBlConfig = 0x09,
    /// Erase the display configuration.
    EraseDisplayConfig = 0x0A,
    /// Enter flash programming mode.
    Enable = 0x0F,
}

impl FlashCommand {
    /// Opcode byte.
    pub fn opcode(self) -> u8 {
        self as u8
    }

    /// Human-readable name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::FirmwareCrc => "FW_CRC",
            Self::FirmwareWrite => "WRITE_FW_BLOCK",
            Self::EraseAll => "ERASE_ALL",
            Self::LockDown => "WRITE_LOCKDOWN_BLOCK",
            Self::ConfigRead => "READ_CONFIG_BLOCK",
            Self::ConfigWrite => "WRITE_CONFIG_BLOCK",
            Self::EraseUiConfig => "ERASE_UI_CONFIG",
            Self::QuerySensorId => "READ_SENSOR_ID",
            Self::EraseBlConfig => "ERASE_BL_CONFIG",
            Self::EraseDisplayConfig => "ERASE_DISP_CONFIG",
            Self::Enable => "ENABLE_FLASH_PROG",
        }
    }
}

impl fmt::Display for FlashCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// F34 registers, derived from the PDT query and data bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflashRegisters {
    /// Query base.
    pub query_base: u8,
    /// Data base.
    pub data_base: u8,
}

impl ReflashRegisters {
    /// Derive all registers from the two PDT bases.
    pub fn from_bases(query_base: u8, data_base: u8) -> Self {
        Self {
            query_base,
            data_base,
        }
    }

    /// Bootloader ID query register.
    pub fn bootloader_id(&self) -> u8 {
        self.query_base
    }

    /// Flash properties query register.
    pub fn flash_properties(&self) -> u8 {
        self.query_base.wrapping_add(1)
    }

    /// Block size query register.
    pub fn block_size(&self) -> u8 {
        self.query_base.wrapping_add(2)
    }

    /// Block count query register (firmware, config, display config).
    pub fn block_counts(&self) -> u8 {
        self.query_base.wrapping_add(3)
    }

    /// Block number data register.
    pub fn block_number(&self) -> u8 {
        self.data_base
    }

    /// Block data register.
    pub fn block_data(&self) -> u8 {
        self.data_base.wrapping_add(1)
    }

    /// Flash control data register.
    pub fn flash_control(&self) -> u8 {
        self.data_base.wrapping_add(2)
    }

    /// Flash status data register.
    pub fn flash_status(&self) -> u8 {
        self.data_base.wrapping_add(3)
    }
}

/// Flash partitions written block by block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// Firmware code.
    Firmware,
    /// UI configuration.
    Config,
    /// Display configuration.
    DisplayConfig,
}

impl Partition {
    /// Section name used in logs and progress reports.
    pub fn name(self) -> &'static str {
        match self {
            Self::Firmware => "firmware",
            Self::Config => "config",
            Self::DisplayConfig => "display config",
        }
    }

    /// Command that programs one block of this partition.
    pub fn write_command(self) -> FlashCommand {
        match self {
            Self::Firmware => FlashCommand::FirmwareWrite,
            Self::Config | Self::DisplayConfig => FlashCommand::ConfigWrite,
        }
    }

    /// Mask OR'd into the high byte of the block number.
    pub fn block_select(self) -> u8 {
        match self {
            Self::DisplayConfig => DISPLAY_CONFIG_SELECT,
            Self::Firmware | Self::Config => 0,
        }
    }
}

/// Block size and per-partition block counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlashGeometry {
    /// Bytes per block, shared by every partition.
    pub block_size: u16,
    /// Firmware block count.
    pub firmware_blocks: u16,
    /// Config block count.
    pub config_blocks: u16,
    /// Display config block count.
    pub display_config_blocks: u16,
}

impl FlashGeometry {
    /// Number of blocks in `partition`.
    pub fn block_count(&self, partition: Partition) -> u16 {
        match partition {
            Partition::Firmware => self.firmware_blocks,
            Partition::Config => self.config_blocks,
            Partition::DisplayConfig => self.display_config_blocks,
        }
    }

    /// Bytes needed to fill `partition`.
    pub fn partition_len(&self, partition: Partition) -> usize {
        usize::from(self.block_count(partition)) * usize::from(self.block_size)
    }
}

/// Block number register payload: little-endian, with the partition
/// select mask in the high byte.
pub fn block_number_bytes(block: u16, partition: Partition) -> [u8; 2] {
    let [lo, hi] = block.to_le_bytes();
    [lo, hi | partition.block_select()]
}

/// Read block size and block counts from the query registers.
pub fn read_geometry<B: RegisterBus + ?Sized>(
    bus: &mut B,
    regs: &ReflashRegisters,
) -> Result<FlashGeometry> {
    let block_size = bus.read_u16_le(regs.block_size())?;

    let mut counts = [0u8; 6];
    bus.read(regs.block_counts(), &mut counts)?;

    let geometry = FlashGeometry {
        block_size,
        firmware_blocks: u16::from_le_bytes([counts[0], counts[1]]),
        config_blocks: u16::from_le_bytes([counts[2], counts[3]]),
        display_config_blocks: u16::from_le_bytes([counts[4], counts[5]]),
    };
    debug!("F34 geometry: {geometry:?}");
    Ok(geometry)
}

/// Read the flash status register after `command`.
///
/// Returns `true` when no error code is latched. A latched error is logged
/// and reported to the caller; it is not turned into an [`Error`].
///
/// [`Error`]: crate::Error
pub fn check_flash_status<B: RegisterBus + ?Sized>(
    bus: &mut B,
    regs: &ReflashRegisters,
    command: FlashCommand,
) -> Result<bool> {
    let status = bus.read_byte(regs.flash_status())?;
    if status & STATUS_ERROR_MASK == 0 {
        return Ok(true);
    }
    warn!("{command} failed: flash status {status:#04x}");
    Ok(false)
}

/// Whether the flash properties report an unlocked bootloader.
pub fn is_unlocked<B: RegisterBus + ?Sized>(bus: &mut B, regs: &ReflashRegisters) -> Result<bool> {
    let properties = bus.read_byte(regs.flash_properties())?;
    Ok(properties & PROPERTY_UNLOCKED != 0)
}

/// Read the 16-bit bootloader ID.
pub fn read_bootloader_id<B: RegisterBus + ?Sized>(
    bus: &mut B,
    regs: &ReflashRegisters,
) -> Result<[u8; 2]> {
    let mut id = [0u8; 2];
    bus.read(regs.bootloader_id(), &mut id)?;
    Ok(id)
}

/// Write the bootloader ID back to the block data register.
pub fn write_bootloader_id<B: RegisterBus + ?Sized>(
    bus: &mut B,
    regs: &ReflashRegisters,
    id: [u8; 2],
) -> Result<()> {
    bus.write(regs.block_data(), &id)
}
