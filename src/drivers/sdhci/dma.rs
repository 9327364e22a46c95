//! DMA backend
//!
//! Reads complete through the engine callback, writes through the
//! controller's DATA_END interrupt: the last word leaving the DMA FIFO does
//! not mean the card has taken it.

use super::regs::*;
use super::HostState;
use crate::drivers::dma::{DmaChannel, DmaDirection, DmaError};
use crate::hal::{DmaChannels, Platform};

/// Channel and direction serving a transfer
fn channel_for<C>(channels: &mut DmaChannels<C>, read: bool) -> (&mut C, DmaDirection) {
    if read {
        (&mut channels.rx, DmaDirection::DevToMem)
    } else {
        (&mut channels.tx, DmaDirection::MemToDev)
    }
}

impl<P: Platform> HostState<P> {
    /// Map the scatter list and hand one descriptor to the engine
    pub(super) fn start_dma(&mut self) {
        if self.blocks == 0 {
            return;
        }
        let read = self.data_is_read();
        let Some(channels) = self.dma.as_mut() else {
            return;
        };
        let Some(data) = self.mrq.as_ref().and_then(|r| r.data.as_ref()) else {
            return;
        };
        let (chan, direction) = channel_for(channels, read);

        let mapped = chan.map_sg(&data.sg, direction);
        if mapped == 0 {
            // The watchdog resolves the stalled transfer
            log::error!("SDHCI: {}", DmaError::Map);
            return;
        }

        let Some(desc) = chan.prep_slave_sg(mapped, direction) else {
            log::error!("SDHCI: {}", DmaError::Prep);
            chan.unmap_sg(&data.sg, direction);
            return;
        };

        let signal = self.io.read32(SDHCI_SIGNAL_ENABLE);
        self.io
            .write32(SDHCI_SIGNAL_ENABLE, signal & !SDHCI_INT_PIO_MASK);

        let Some(channels) = self.dma.as_mut() else {
            return;
        };
        let (chan, _) = channel_for(channels, read);
        chan.submit(desc);
        chan.issue_pending();
        self.dma_mapped = true;
    }

    /// Release the mapping of a finished transfer
    pub(super) fn unmap_dma(&mut self) {
        if !self.dma_mapped {
            return;
        }
        let Some(channels) = self.dma.as_mut() else {
            return;
        };
        let Some(data) = self.mrq.as_ref().and_then(|r| r.data.as_ref()) else {
            return;
        };
        let (chan, direction) = channel_for(channels, data.is_read());
        chan.unmap_sg(&data.sg, direction);
        self.dma_mapped = false;
    }

    /// Stop the engine and release the mapping of an abandoned transfer
    pub(super) fn abort_dma(&mut self) {
        if !self.dma_mapped {
            return;
        }
        let read = self.data_is_read();
        if let Some(channels) = self.dma.as_mut() {
            channel_for(channels, read).0.terminate_all();
        }
        self.unmap_dma();
    }

    /// Engine callback: a read has landed in memory
    pub(super) fn dma_complete(&mut self) {
        if !self.data_active || !self.dma_mapped || !self.data_is_read() {
            return;
        }
        self.unmap_dma();
        self.data_done();
    }

    /// Finish the data phase, or defer it until the command response
    pub(super) fn data_done(&mut self) {
        if self.cmd.is_some() {
            self.data_early = true;
        } else {
            self.finish_data();
        }
    }
}
