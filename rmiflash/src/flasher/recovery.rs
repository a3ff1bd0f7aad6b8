//! F35 recovery state machine: `Init -> Erased -> ChunksWritten -> Finalized`.

use log::{debug, info};

use super::{Flasher, pause};
use crate::bus::{AttentionLine, RegisterBus};
use crate::error::{Error, Result};
use crate::image::ImageBuffer;
use crate::protocol::f01;
use crate::protocol::f35::{self, CHUNK_SIZE, RecoveryCommand, RecoveryRegisters};

const PROGRESS_LOG_INTERVAL: usize = 100;

/// States of the F35 recovery sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// Page selected and recovery registers located.
    Init,
    /// Flash erased.
    Erased,
    /// Image streamed.
    ChunksWritten,
    /// Controller reset.
    Finalized,
}

pub(super) struct RecoveryRun<'f, B: RegisterBus, A: AttentionLine, P> {
    flasher: &'f mut Flasher<B, A>,
    image: ImageBuffer,
    progress: P,
    registers: RecoveryRegisters,
    #[cfg(test)]
    history: Vec<RecoveryState>,
}

impl<'f, B, A, P> RecoveryRun<'f, B, A, P>
where
    B: RegisterBus,
    A: AttentionLine,
    P: FnMut(&str, usize, usize),
{
    pub(super) fn new(flasher: &'f mut Flasher<B, A>, image: ImageBuffer, progress: P) -> Self {
        Self {
            flasher,
            image,
            progress,
            registers: RecoveryRegisters {
                query_base: 0,
                control_base: 0,
                data_base: 0,
            },
            #[cfg(test)]
            history: Vec::new(),
        }
    }

    pub(super) fn execute(&mut self) -> Result<()> {
        self.initialize()?;
        self.enter(RecoveryState::Init);

        self.erase()?;
        self.enter(RecoveryState::Erased);

        self.write_chunks()?;
        self.enter(RecoveryState::ChunksWritten);

        self.finalize()?;
        self.enter(RecoveryState::Finalized);

        info!("FW recovery finished");
        Ok(())
    }

    fn enter(&mut self, state: RecoveryState) {
        debug!("Recovery state: {state:?}");
        #[cfg(test)]
        self.history.push(state);
    }

    fn initialize(&mut self) -> Result<()> {
        info!("Initializing recovery process...");
        self.flasher.select_page()?;
        let layout = self.flasher.scan()?;
        self.registers = layout.require_recovery()?;
        debug!("F35 registers: {:?}", self.registers);
        Ok(())
    }

    fn erase(&mut self) -> Result<()> {
        info!("Erasing flash...");
        self.command(RecoveryCommand::EraseAll)?;
        pause(self.flasher.config.recovery_erase_wait);
        f35::read_error_code(&mut self.flasher.bus, &self.registers)?;
        Ok(())
    }

    fn write_chunks(&mut self) -> Result<()> {
        let bus = &mut self.flasher.bus;
        bus.write(self.registers.chunk_number(), &[0, 0])?;

        let total = f35::chunk_count(self.image.len());
        info!("Writing {total} chunks");
        for (chunk, payload) in self.image.as_bytes().chunks(CHUNK_SIZE).enumerate() {
            bus.write(self.registers.chunk_data(), &f35::build_chunk(payload))?;

            if chunk % PROGRESS_LOG_INTERVAL == 0 {
                debug!("[Recovery] {chunk} / {total}");
            }
            (self.progress)("recovery", chunk + 1, total);
        }
        info!("[Recovery] {total} / {total}");

        f35::read_error_code(bus, &self.registers)?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        info!("Resetting controller...");
        self.command(RecoveryCommand::Reset)?;
        pause(self.flasher.config.recovery_reset_wait);

        // Register layout is unknown until the PDT is scanned again.
        let timeout = self.flasher.config.attention_timeout;
        self.flasher.settle(None, timeout)?;

        let layout = self.flasher.scan()?;
        if layout.recovery_mode() {
            return Err(Error::Protocol(
                "controller is still in bootloader recovery mode after reset".into(),
            ));
        }
        let core = layout.require_core()?;
        let status = f01::read_status(&mut self.flasher.bus, &core)?;
        debug!("Device status after recovery: {status:#04x}");

        self.flasher.refresh_display();
        Ok(())
    }

    fn command(&mut self, command: RecoveryCommand) -> Result<()> {
        debug!("Recovery command {command:?}");
        self.flasher
            .bus
            .write_byte(self.registers.chunk_command(), command.opcode())
    }
}
