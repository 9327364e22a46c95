//! Data phase setup shared by the PIO and DMA backends

use super::regs::*;
use super::request::{CmdSlot, RespFlags};
use super::{HostState, pio::SgCursor};
use crate::hal::Platform;

/// How the data phase of the active request moves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// CPU copies through the data port on buffer interrupts
    Pio,
    /// System DMA channel paced by the controller DREQ
    Dma,
}

impl Backend {
    /// PIO for transfers of up to `barrier` blocks, DMA above when available
    pub fn select(have_dma: bool, blocks: u32, barrier: u32) -> Self {
        if have_dma && blocks > barrier {
            Backend::Dma
        } else {
            Backend::Pio
        }
    }
}

impl<P: Platform> HostState<P> {
    /// Program timeout, block geometry and interrupt set for `slot`
    pub(super) fn prepare_data(&mut self, slot: CmdSlot) {
        let Some(req) = self.mrq.as_mut() else {
            return;
        };
        let busy = req
            .command(slot)
            .is_some_and(|c| c.flags.contains(RespFlags::BUSY));
        let data = match slot {
            CmdSlot::Main => req.data.as_mut(),
            _ => None,
        };

        let geometry = data.map(|data| {
            data.bytes_xfered = 0;
            (data.blksz, data.blocks)
        });

        if geometry.is_some() || busy {
            self.io.write8(SDHCI_TIMEOUT_CONTROL, SDHCI_TIMEOUT_VAL);
        }

        let Some((blksz, blocks)) = geometry else {
            return;
        };

        self.data_active = true;
        self.data_early = false;
        self.blocks = blocks;
        self.cursor = SgCursor::default();

        self.backend = Backend::select(self.dma.is_some(), blocks, self.config.pio_dma_barrier);
        self.set_transfer_irqs();

        self.io.write16(
            SDHCI_BLOCK_SIZE,
            make_blksz(SDHCI_DEFAULT_BOUNDARY_ARG, blksz as u16),
        );
        self.io.write16(SDHCI_BLOCK_COUNT, blocks as u16);
    }

    /// Arm the buffer interrupts of the selected backend, mask the other's
    fn set_transfer_irqs(&mut self) {
        self.ier = match self.backend {
            Backend::Dma => (self.ier & !SDHCI_INT_PIO_MASK) | SDHCI_INT_DMA_MASK,
            Backend::Pio => (self.ier & !SDHCI_INT_DMA_MASK) | SDHCI_INT_PIO_MASK,
        };
        self.io.write32(SDHCI_INT_ENABLE, self.ier);
        self.io.write32(SDHCI_SIGNAL_ENABLE, self.ier);
    }

    /// Begin moving data once the command carrying it is on the bus
    pub(super) fn start_transfer(&mut self) {
        match self.backend {
            Backend::Dma => self.start_dma(),
            // Driven by DATA_AVAIL/SPACE_AVAIL
            Backend::Pio => {}
        }
    }

    /// Tear down whatever the backend still holds for the data phase
    pub(super) fn release_transfer(&mut self) {
        if self.backend == Backend::Dma {
            self.abort_dma();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fake::{self, Fake};
    use super::super::request::{Command, Data, Direction, Request};
    use super::*;
    use crate::config::HostConfig;

    #[test]
    fn barrier_is_inclusive() {
        assert_eq!(Backend::select(true, 1, 1), Backend::Pio);
        assert_eq!(Backend::select(true, 2, 1), Backend::Dma);
        assert_eq!(Backend::select(true, 1, 0), Backend::Dma);
        assert_eq!(Backend::select(false, 100, 0), Backend::Pio);
    }

    #[test]
    fn block_geometry_and_timeout_are_programmed() {
        let fake = Fake::new();
        let host = fake.host(HostConfig::default(), false);

        let data = Data::new(Direction::Write, 512, 3)
            .with_segment(fake::segment(&[0u8; 1536]))
            .unwrap();
        host.submit(Request::new(Command::new(25, 0, RespFlags::R1)).with_data(data))
            .unwrap();

        // Block count in the upper half, boundary 7 and size in the lower
        assert_eq!(fake.peek(SDHCI_BLOCK_SIZE), 0x0003_7200);
        assert_eq!(fake.peek(SDHCI_TIMEOUT_CONTROL) >> 16 & 0xFF, 0x0E);
        assert_ne!(fake.peek(SDHCI_INT_ENABLE) & SDHCI_INT_SPACE_AVAIL, 0);
        assert_eq!(fake.peek(SDHCI_INT_ENABLE) & SDHCI_INT_DMA_MASK, 0);
    }

    #[test]
    fn plain_command_leaves_timeout_alone() {
        let fake = Fake::new();
        let host = fake.host(HostConfig::default(), false);

        host.submit(Request::new(Command::new(13, 0, RespFlags::R1)))
            .unwrap();
        assert!(!fake.wrote_to(SDHCI_TIMEOUT_CONTROL & !3));

        fake.raise(SDHCI_INT_RESPONSE);
        host.irq();
        host.finish_request();

        host.submit(Request::new(Command::new(7, 0x1_0000, RespFlags::R1B)))
            .unwrap();
        assert!(fake.wrote_to(SDHCI_TIMEOUT_CONTROL & !3));
    }
}
