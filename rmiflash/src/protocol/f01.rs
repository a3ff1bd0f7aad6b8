//! F01: RMI device control.
//!
//! Only the registers used around a reflash are modelled here: device
//! status, interrupt status, the reset command and the identification
//! queries.

use crate::bus::RegisterBus;
use crate::error::Result;

/// Device status bit set while the bootloader has flash programming enabled.
pub const STATUS_FLASH_PROG: u8 = 0x40;

/// Value written to the command register to reset the controller.
pub const RESET_COMMAND: u8 = 0x01;

/// Product ID length in bytes.
pub const PRODUCT_ID_LEN: usize = 10;

const PRODUCT_ID_OFFSET: u8 = 11;
const PACKAGE_ID_OFFSET: u8 = 17;
const FIRMWARE_VERSION_OFFSET: u8 = 18;
const QUERY43_LENGTH_OFFSET: u8 = 22;
const QUERY44_OFFSET: u8 = 23;

/// F01 register bases discovered in the PDT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreRegisters {
    /// Query base.
    pub query_base: u8,
    /// Command base.
    pub command_base: u8,
    /// Control base.
    pub control_base: u8,
    /// Data base.
    pub data_base: u8,
}

impl CoreRegisters {
    /// Device status register.
    pub fn device_status(&self) -> u8 {
        self.data_base
    }

    /// Interrupt status register; reading it clears pending interrupts.
    pub fn interrupt_status(&self) -> u8 {
        self.data_base.wrapping_add(1)
    }

    /// Interrupt enable register.
    pub fn interrupt_enable(&self) -> u8 {
        self.control_base.wrapping_add(1)
    }

    /// Device command register.
    pub fn command(&self) -> u8 {
        self.command_base
    }
}

/// Read the device status register.
pub fn read_status<B: RegisterBus + ?Sized>(bus: &mut B, core: &CoreRegisters) -> Result<u8> {
    bus.read_byte(core.device_status())
}

/// Read the 10-byte product ID as text, stopping at the first NUL.
pub fn read_product_id<B: RegisterBus + ?Sized>(
    bus: &mut B,
    core: &CoreRegisters,
) -> Result<String> {
    let mut raw = [0u8; PRODUCT_ID_LEN];
    bus.read(core.query_base.wrapping_add(PRODUCT_ID_OFFSET), &mut raw)?;
    let end = raw.iter().position(|&c| c == 0).unwrap_or(PRODUCT_ID_LEN);
    Ok(String::from_utf8_lossy(&raw[..end]).to_string())
}

/// Read the 24-bit little-endian firmware version.
pub fn read_firmware_version<B: RegisterBus + ?Sized>(
    bus: &mut B,
    core: &CoreRegisters,
) -> Result<u32> {
    let mut raw = [0u8; 3];
    bus.read(core.query_base.wrapping_add(FIRMWARE_VERSION_OFFSET), &mut raw)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], 0]))
}

/// Read the package ID, if the controller advertises one.
///
/// Query 43 must be present (non-zero low nibble of its length) and query 44
/// must flag package-ID support in bit 0.
pub fn read_package_id<B: RegisterBus + ?Sized>(
    bus: &mut B,
    core: &CoreRegisters,
) -> Result<Option<u16>> {
    let query43_len = bus.read_byte(core.query_base.wrapping_add(QUERY43_LENGTH_OFFSET))?;
    if query43_len & 0x0F == 0 {
        return Ok(None);
    }

    let query44 = bus.read_byte(core.query_base.wrapping_add(QUERY44_OFFSET))?;
    if query44 & 0x01 == 0 {
        return Ok(None);
    }

    bus.read_u16_le(core.query_base.wrapping_add(PACKAGE_ID_OFFSET))
        .map(Some)
}
