//! RMI4 protocol implementations.
//!
//! - [`pdt`]: Page Description Table scan
//! - [`f01`]: device control (status, reset, identification)
//! - [`f34`]: flash reflash commands and registers
//! - [`f35`]: bootloader-recovery reflash

pub mod f01;
pub mod f34;
pub mod f35;
pub mod pdt;

/// Page-select register; writing 0 selects page 0 where the PDT lives.
pub const PAGE_SELECT: u8 = 0xFF;

// Re-export common types
pub use f01::CoreRegisters;
pub use f34::{FlashCommand, FlashGeometry, Partition, ReflashRegisters};
pub use f35::{RecoveryCommand, RecoveryRegisters};
pub use pdt::{DeviceLayout, FunctionBlock, FunctionDescriptor};
