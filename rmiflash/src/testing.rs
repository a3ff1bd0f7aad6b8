//! Scripted register-space mock and image builders for unit tests.

use std::collections::HashMap;
use std::time::Duration;

use crate::bus::{AttentionLine, RegisterBus};
use crate::error::{Error, Result};
use crate::flasher::FlasherConfig;

/// One recorded bus transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    Read(u8, usize),
    Write(u8, Vec<u8>),
}

/// Register updates applied after a matching write.
struct Trigger {
    register: u8,
    data: Vec<u8>,
    updates: Vec<(u8, Vec<u8>)>,
}

/// RMI register space: every address holds a register of arbitrary width.
///
/// Reads return the register contents zero-padded to the requested length.
/// Writes are only logged; use [`MockBus::on_write`] to make a command
/// change what later reads see.
#[derive(Default)]
pub(crate) struct MockBus {
    regs: HashMap<u8, Vec<u8>>,
    pub(crate) ops: Vec<Op>,
    fail_write: Option<(u8, Vec<u8>)>,
    fail_read: Option<u8>,
    triggers: Vec<Trigger>,
}

impl MockBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&mut self, register: u8, value: &[u8]) {
        self.regs.insert(register, value.to_vec());
    }

    pub(crate) fn set_pdt_entry(&mut self, address: u8, entry: [u8; 6]) {
        self.set(address, &entry);
    }

    pub(crate) fn fail_write(&mut self, register: u8, data: &[u8]) {
        self.fail_write = Some((register, data.to_vec()));
    }

    pub(crate) fn fail_read(&mut self, register: u8) {
        self.fail_read = Some(register);
    }

    pub(crate) fn on_write(&mut self, register: u8, data: &[u8], updates: Vec<(u8, Vec<u8>)>) {
        self.triggers.push(Trigger {
            register,
            data: data.to_vec(),
            updates,
        });
    }

    pub(crate) fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Write(reg, data) => Some((*reg, data.clone())),
                Op::Read(..) => None,
            })
            .collect()
    }

    pub(crate) fn writes_to(&self, register: u8) -> Vec<Vec<u8>> {
        self.writes()
            .into_iter()
            .filter(|(reg, _)| *reg == register)
            .map(|(_, data)| data)
            .collect()
    }

    pub(crate) fn position(&self, register: u8, data: &[u8]) -> Option<usize> {
        self.ops
            .iter()
            .position(|op| matches!(op, Op::Write(r, d) if *r == register && d == data))
    }
}

impl RegisterBus for MockBus {
    fn read(&mut self, register: u8, buf: &mut [u8]) -> Result<()> {
        self.ops.push(Op::Read(register, buf.len()));
        if self.fail_read == Some(register) {
            return Err(Error::bus(register, "injected read failure"));
        }

        buf.fill(0);
        if let Some(value) = self.regs.get(&register) {
            let n = buf.len().min(value.len());
            buf[..n].copy_from_slice(&value[..n]);
        }
        Ok(())
    }

    fn write(&mut self, register: u8, data: &[u8]) -> Result<()> {
        self.ops.push(Op::Write(register, data.to_vec()));
        if let Some((reg, expected)) = &self.fail_write {
            if *reg == register && expected.as_slice() == data {
                return Err(Error::bus(register, "injected write failure"));
            }
        }

        let mut updates = Vec::new();
        for trigger in &self.triggers {
            if trigger.register == register && trigger.data == data {
                updates.extend(trigger.updates.iter().cloned());
            }
        }
        for (reg, value) in updates {
            self.regs.insert(reg, value);
        }
        Ok(())
    }
}

/// Attention line that is either always or never asserted.
pub(crate) struct FixedAttention(pub(crate) bool);

impl AttentionLine for FixedAttention {
    fn is_asserted(&mut self) -> Result<bool> {
        Ok(self.0)
    }
}

/// PDT placement used by the standard mock device.
pub(crate) mod layout {
    pub(crate) const F34_QUERY: u8 = 0x40;
    pub(crate) const F34_DATA: u8 = 0x00;
    pub(crate) const F01_QUERY: u8 = 0x50;
    pub(crate) const F01_COMMAND: u8 = 0x20;
    pub(crate) const F01_CONTROL: u8 = 0x10;
    pub(crate) const F01_DATA: u8 = 0x13;
    pub(crate) const F35_QUERY: u8 = 0x60;
    pub(crate) const F35_CONTROL: u8 = 0x70;
    pub(crate) const F35_DATA: u8 = 0x90;

    pub(crate) const BLOCK_NUMBER: u8 = F34_DATA;
    pub(crate) const BLOCK_DATA: u8 = F34_DATA + 1;
    pub(crate) const FLASH_CONTROL: u8 = F34_DATA + 2;
    pub(crate) const FLASH_STATUS: u8 = F34_DATA + 3;
}

/// A device in UI mode with F34 at 0xE9 and F01 at 0xE3.
pub(crate) fn reflash_device(block_size: u16, counts: [u16; 3]) -> MockBus {
    use layout::*;

    let mut bus = MockBus::new();
    bus.set_pdt_entry(0xE9, [F34_QUERY, 0, 0, F34_DATA, 0, 0x34]);
    bus.set_pdt_entry(0xE3, [F01_QUERY, F01_COMMAND, F01_CONTROL, F01_DATA, 0, 0x01]);

    bus.set(F34_QUERY, &0x1234u16.to_le_bytes());
    bus.set(F34_QUERY + 2, &block_size.to_le_bytes());
    let mut count_bytes = Vec::new();
    for count in counts {
        count_bytes.extend_from_slice(&count.to_le_bytes());
    }
    bus.set(F34_QUERY + 3, &count_bytes);

    bus.set(F01_QUERY + 11, b"TD4191-A00");
    bus.set(F01_QUERY + 18, &[0x03, 0x02, 0x01]);
    bus
}

/// A device stuck in bootloader recovery mode (F35 at 0xE9).
pub(crate) fn recovery_device() -> MockBus {
    use layout::*;

    let mut bus = MockBus::new();
    bus.set_pdt_entry(0xE9, [F35_QUERY, 0, F35_CONTROL, F35_DATA, 0, 0x35]);
    bus
}

/// Flasher configuration with every delay and timeout set to zero.
///
/// Also routes log output through the test harness (`RUST_LOG=debug`).
pub(crate) fn instant_config() -> FlasherConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    FlasherConfig {
        attention_timeout: Duration::ZERO,
        erase_all_timeout: Duration::ZERO,
        erase_config_timeout: Duration::ZERO,
        config_block_timeout: Duration::ZERO,
        enable_settle: Duration::ZERO,
        enable_command_delay: Duration::ZERO,
        reset_settle: Duration::ZERO,
        recovery_erase_wait: Duration::ZERO,
        recovery_reset_wait: Duration::ZERO,
        poll_interval: Duration::ZERO,
    }
}

/// Synthetic image: header, lockdown area, firmware, config, display config.
///
/// Each section byte is tagged so tests can tell sections apart:
/// firmware `0xA0 + block`, config `0xC0 + block`, display `0xD0 + block`.
#[derive(Clone, Copy)]
pub(crate) struct ImageSpec {
    pub(crate) format_version: u8,
    pub(crate) lockdown: bool,
    pub(crate) block_size: usize,
    pub(crate) firmware_blocks: usize,
    pub(crate) config_blocks: usize,
    pub(crate) display_blocks: usize,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            format_version: 6,
            lockdown: false,
            block_size: 16,
            firmware_blocks: 3,
            config_blocks: 2,
            display_blocks: 2,
        }
    }
}

impl ImageSpec {
    pub(crate) fn build(&self) -> Vec<u8> {
        let bs = self.block_size;
        let fw_size = self.firmware_blocks * bs;
        let config_start = 0x100 + fw_size;
        let display_start = config_start + self.config_blocks * bs;
        let total = display_start + self.display_blocks * bs;

        let mut data = vec![0u8; total];
        data[0x07] = self.format_version;
        data[0x08..0x0C].copy_from_slice(&(fw_size as u32).to_le_bytes());
        data[0x10..0x16].copy_from_slice(b"s3320t");
        data[0x1E] = u8::from(self.lockdown);
        data[0x40..0x44].copy_from_slice(&(display_start as u32).to_le_bytes());

        for (i, b) in data[0xB0..0x100].iter_mut().enumerate() {
            *b = 0x70 + (i / 16) as u8;
        }
        fill_blocks(&mut data[0x100..config_start], bs, 0xA0);
        fill_blocks(&mut data[config_start..display_start], bs, 0xC0);
        fill_blocks(&mut data[display_start..], bs, 0xD0);
        data
    }
}

fn fill_blocks(section: &mut [u8], block_size: usize, tag: u8) {
    for (i, b) in section.iter_mut().enumerate() {
        *b = tag.wrapping_add((i / block_size) as u8);
    }
}
