//! Page Description Table scan.
//!
//! The PDT lives at the top of page 0. Entries are six bytes wide and are
//! laid out downwards from `0xE9`:
//!
//! ```text
//! +-------+---------+---------+------+-------------+-------------+
//! | query | command | control | data | int/version | function id |
//! +-------+---------+---------+------+-------------+-------------+
//! ```
//!
//! A function ID of zero ends the table.

use log::{debug, trace};

use crate::bus::RegisterBus;
use crate::error::{Error, Result};
use crate::protocol::f01::CoreRegisters;
use crate::protocol::f34::{self, FlashGeometry, ReflashRegisters};
use crate::protocol::f35::RecoveryRegisters;

/// Address of the first (highest) PDT entry.
pub const PDT_START: u8 = 0xE9;

/// Scanning stops once the address falls to this watermark.
pub const PDT_END: u8 = 0xC0;

/// Size of one PDT entry.
pub const PDT_ENTRY_SIZE: u8 = 6;

/// F01 device control.
pub const FUNCTION_CORE: u8 = 0x01;
/// F34 flash memory management.
pub const FUNCTION_REFLASH: u8 = 0x34;
/// F35 bootloader recovery.
pub const FUNCTION_RECOVERY: u8 = 0x35;

/// One decoded PDT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionDescriptor {
    /// Query base.
    pub query_base: u8,
    /// Command base.
    pub command_base: u8,
    /// Control base.
    pub control_base: u8,
    /// Data base.
    pub data_base: u8,
    /// Interrupt source count and function version.
    pub version: u8,
    /// Function number (0 terminates the table).
    pub function_id: u8,
}

impl FunctionDescriptor {
    /// Decode a raw 6-byte entry.
    pub fn from_bytes(raw: [u8; 6]) -> Self {
        Self {
            query_base: raw[0],
            command_base: raw[1],
            control_base: raw[2],
            data_base: raw[3],
            version: raw[4],
            function_id: raw[5],
        }
    }

    fn core(&self) -> CoreRegisters {
        CoreRegisters {
            query_base: self.query_base,
            command_base: self.command_base,
            control_base: self.control_base,
            data_base: self.data_base,
        }
    }

    fn recovery(&self) -> RecoveryRegisters {
        RecoveryRegisters {
            query_base: self.query_base,
            control_base: self.control_base,
            data_base: self.data_base,
        }
    }
}

/// The active flashing function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionBlock {
    /// Normal F34 reflash, with geometry read from its query registers.
    Reflash {
        /// Derived F34 registers.
        registers: ReflashRegisters,
        /// Block size and counts.
        geometry: FlashGeometry,
    },
    /// Bootloader recovery mode (F35).
    Recovery(RecoveryRegisters),
}

/// Result of one PDT scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLayout {
    /// F01 registers, if F01 was listed before the scan stopped.
    pub core: Option<CoreRegisters>,
    /// Reflash or recovery function.
    pub block: FunctionBlock,
}

impl DeviceLayout {
    /// Whether the controller is in bootloader recovery mode.
    pub fn recovery_mode(&self) -> bool {
        matches!(self.block, FunctionBlock::Recovery(_))
    }

    /// F01 registers, or a protocol error when F01 was not found.
    pub fn require_core(&self) -> Result<CoreRegisters> {
        self.core
            .ok_or_else(|| Error::Protocol("F01 not found in PDT".into()))
    }

    /// F34 registers and geometry, or a protocol error in recovery mode.
    pub fn require_reflash(&self) -> Result<(ReflashRegisters, FlashGeometry)> {
        match self.block {
            FunctionBlock::Reflash {
                registers,
                geometry,
            } => Ok((registers, geometry)),
            FunctionBlock::Recovery(_) => Err(Error::Protocol(
                "device is in bootloader recovery mode".into(),
            )),
        }
    }

    /// F35 registers, or a protocol error when not in recovery mode.
    pub fn require_recovery(&self) -> Result<RecoveryRegisters> {
        match self.block {
            FunctionBlock::Recovery(registers) => Ok(registers),
            FunctionBlock::Reflash { .. } => Err(Error::Protocol(
                "device is not in bootloader recovery mode".into(),
            )),
        }
    }
}

/// Scan the PDT.
///
/// Stops at the first F35 entry, since F35 and F34 are never active
/// together. Otherwise F34 must be present and its geometry is read before
/// returning. Any bus error aborts the scan.
pub fn scan<B: RegisterBus + ?Sized>(bus: &mut B) -> Result<DeviceLayout> {
    let mut core = None;
    let mut reflash = None;

    let mut address = PDT_START;
    while address > PDT_END {
        let mut raw = [0u8; PDT_ENTRY_SIZE as usize];
        bus.read(address, &mut raw)?;
        let entry = FunctionDescriptor::from_bytes(raw);
        trace!("PDT {address:#04x}: {entry:?}");

        match entry.function_id {
            0 => break,
            FUNCTION_RECOVERY => {
                debug!("F35 found at {address:#04x}, bootloader recovery mode");
                return Ok(DeviceLayout {
                    core,
                    block: FunctionBlock::Recovery(entry.recovery()),
                });
            },
            FUNCTION_REFLASH => {
                debug!(
                    "F34 found: query {:#04x}, data {:#04x}",
                    entry.query_base, entry.data_base
                );
                reflash = Some(ReflashRegisters::from_bases(
                    entry.query_base,
                    entry.data_base,
                ));
            },
            FUNCTION_CORE => {
                debug!(
                    "F01 found: query {:#04x}, data {:#04x}",
                    entry.query_base, entry.data_base
                );
                core = Some(entry.core());
            },
            other => trace!("Skipping F{other:02X}"),
        }

        address = address.wrapping_sub(PDT_ENTRY_SIZE);
    }

    let registers =
        reflash.ok_or_else(|| Error::Protocol("neither F34 nor F35 found in PDT".into()))?;
    let geometry = f34::read_geometry(bus, &registers)?;

    Ok(DeviceLayout {
        core,
        block: FunctionBlock::Reflash {
            registers,
            geometry,
        },
    })
}
