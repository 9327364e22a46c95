//! Slave DMA channel interface
//!
//! The BCM2835 EMMC block has no bus-mastering engine of its own. Data is
//! moved between memory and the controller's 32-bit data port by a system
//! DMA channel paced by the controller's DREQ line. This module describes
//! the subset of a dmaengine-style channel the host driver consumes.

use crate::drivers::sdhci::request::Segment;

/// Transfer direction as seen by the DMA engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Memory to device (card write)
    MemToDev,
    /// Device to memory (card read)
    DevToMem,
}

/// Peripheral-side bus width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    Bytes1,
    Bytes2,
    Bytes4,
}

/// One-time peripheral configuration of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveConfig {
    pub direction: DmaDirection,
    /// Bus address of the peripheral FIFO
    pub fifo_addr: u32,
    pub width: BusWidth,
    /// DMA request line pacing the transfer
    pub dreq: u32,
}

/// DMA engine failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    /// The channel rejected the slave configuration
    Config,
    /// The scatter list could not be mapped
    Map,
    /// No descriptor could be prepared for the mapped list
    Prep,
}

impl core::fmt::Display for DmaError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DmaError::Config => f.write_str("DMA slave configuration rejected"),
            DmaError::Map => f.write_str("scatter list mapping failed"),
            DmaError::Prep => f.write_str("no DMA descriptor available"),
        }
    }
}

/// A slave DMA channel
///
/// Completion of a submitted descriptor is reported by the platform calling
/// [`Host::dma_complete`](crate::Host::dma_complete) from the engine's
/// callback context.
pub trait DmaChannel {
    type Descriptor;

    fn configure(&mut self, config: &SlaveConfig) -> Result<(), DmaError>;

    /// Map the scatter list for the device; returns the mapped entry count
    fn map_sg(&mut self, segments: &[Segment], direction: DmaDirection) -> usize;

    fn unmap_sg(&mut self, segments: &[Segment], direction: DmaDirection);

    /// Build one descriptor covering the first `mapped` entries
    fn prep_slave_sg(&mut self, mapped: usize, direction: DmaDirection)
        -> Option<Self::Descriptor>;

    fn submit(&mut self, descriptor: Self::Descriptor);

    fn issue_pending(&mut self);

    /// Abort anything in flight on the channel
    fn terminate_all(&mut self);
}
