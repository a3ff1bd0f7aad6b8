//! F35: bootloader recovery.
//!
//! A controller whose firmware is unusable comes up with only F35 in its
//! PDT. The whole image is then streamed as opaque 16-byte chunks.

use log::warn;

use crate::bus::RegisterBus;
use crate::error::Result;

/// Payload bytes per chunk.
pub const CHUNK_SIZE: usize = 16;

/// Chunk data write length: payload plus the trailing command byte.
pub const CHUNK_FRAME_LEN: usize = CHUNK_SIZE + 1;

const ERROR_CODE_MASK: u8 = 0x7F;
const CHUNK_NUMBER_OFFSET: u8 = 0;
const CHUNK_DATA_OFFSET: u8 = 2;
const CHUNK_COMMAND_OFFSET: u8 = 18;
const ERROR_CODE_OFFSET: u8 = 0;

/// Recovery commands written to the chunk command register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecoveryCommand {
    /// No operation.
    Idle = 0x00,
    /// Reserved.
    Reserved = 0x01,
    /// Program the chunk in the staging buffer.
    WriteChunk = 0x02,
    /// Erase the whole flash.
    EraseAll = 0x03,
    /// Reset into the new firmware.
    Reset = 0x10,
}

impl RecoveryCommand {
    /// Command byte.
    pub fn opcode(self) -> u8 {
        self as u8
    }
}

/// F35 register bases discovered in the PDT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryRegisters {
    /// Query base.
    pub query_base: u8,
    /// Control base.
    pub control_base: u8,
    /// Data base.
    pub data_base: u8,
}

impl RecoveryRegisters {
    /// Error code register.
    pub fn error_code(&self) -> u8 {
        self.data_base.wrapping_add(ERROR_CODE_OFFSET)
    }

    /// Chunk number register (LSB, MSB).
    pub fn chunk_number(&self) -> u8 {
        self.control_base.wrapping_add(CHUNK_NUMBER_OFFSET)
    }

    /// Chunk data register.
    pub fn chunk_data(&self) -> u8 {
        self.control_base.wrapping_add(CHUNK_DATA_OFFSET)
    }

    /// Chunk command register.
    pub fn chunk_command(&self) -> u8 {
        self.control_base.wrapping_add(CHUNK_COMMAND_OFFSET)
    }
}

/// Number of chunks needed for `len` bytes.
pub fn chunk_count(len: usize) -> usize {
    len.div_ceil(CHUNK_SIZE)
}

/// Build one chunk write: `payload` zero-padded to [`CHUNK_SIZE`] followed
/// by [`RecoveryCommand::WriteChunk`].
///
/// `payload` longer than a chunk is truncated.
pub fn build_chunk(payload: &[u8]) -> [u8; CHUNK_FRAME_LEN] {
    let mut frame = [0u8; CHUNK_FRAME_LEN];
    let n = payload.len().min(CHUNK_SIZE);
    frame[..n].copy_from_slice(&payload[..n]);
    frame[CHUNK_SIZE] = RecoveryCommand::WriteChunk.opcode();
    frame
}

/// Read the recovery error code and log it when non-zero.
pub fn read_error_code<B: RegisterBus + ?Sized>(
    bus: &mut B,
    regs: &RecoveryRegisters,
) -> Result<u8> {
    let code = bus.read_byte(regs.error_code())? & ERROR_CODE_MASK;
    if code != 0 {
        warn!("Recovery mode error code = {code:#04x}");
    }
    Ok(code)
}
