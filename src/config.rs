//! Host configuration
//!
//! Tunables are passed explicitly at construction. Platforms that keep them
//! in a persistent blob can store a postcard-encoded [`HostConfig`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Physical peripheral base on BCM2835
const BCM2708_PERI_BASE: u32 = 0x2000_0000;

/// VideoCore bus address of the peripheral window
const BCM2835_VC_PERI_BASE: u32 = 0x7E00_0000;

/// DMA request line of the EMMC controller
const EMMC_DREQ: u32 = 11;

bitflags! {
    /// Register access pacing mask
    ///
    /// Diagnostics only. Low bits wait for the AXI interconnect to drain
    /// around accesses, bit 12 disables DMA, the two upper bytes encode an
    /// extra delay after every checked and raw write respectively.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugFlags: u32 {
        const WRITE_PRE_READS = 1 << 0;
        const WRITE_PRE_WRITES = 1 << 1;
        const WRITE_POST_READS = 1 << 2;
        const WRITE_POST_WRITES = 1 << 3;
        const RAW_PRE_READS = 1 << 4;
        const RAW_PRE_WRITES = 1 << 5;
        const RAW_POST_READS = 1 << 6;
        const RAW_POST_WRITES = 1 << 7;
        const READ_PRE_READS = 1 << 8;
        const READ_PRE_WRITES = 1 << 9;
        const READ_POST_READS = 1 << 10;
        const READ_POST_WRITES = 1 << 11;
        const FORCE_PIO = 1 << 12;

        // Delay nibbles live in the upper half
        const _ = !0;
    }
}

impl DebugFlags {
    /// Extra delay after a checked write, in microseconds
    pub fn write_delay_us(self) -> u32 {
        let bits = self.bits();
        ((bits >> 16) & 0xF) << ((bits >> 20) & 0xF)
    }

    /// Extra delay after a raw (data port) write, in microseconds
    pub fn raw_write_delay_us(self) -> u32 {
        let bits = self.bits();
        ((bits >> 24) & 0xF) << ((bits >> 28) & 0xF)
    }
}

/// Configuration blob could not be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    Malformed,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::Malformed => f.write_str("malformed host configuration"),
        }
    }
}

/// Per-host tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Inclusive block count at or below which PIO is used even with DMA
    pub pio_dma_barrier: u32,
    /// Raw [`DebugFlags`] mask
    pub debug: u32,
    /// Controller may issue CMD12 on its own
    pub auto_cmd12: bool,
    /// Controller may issue CMD23 on its own
    pub auto_cmd23: bool,
    pub max_blk_size: u32,
    pub max_blk_count: u32,
    pub max_req_size: u32,
    /// Added to the physical base to form the DMA FIFO bus address
    pub dma_bus_offset: u32,
    /// DMA request line used for the slave configuration
    pub dreq: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            pio_dma_barrier: 0,
            debug: 0,
            auto_cmd12: false,
            auto_cmd23: true,
            max_blk_size: 512,
            max_blk_count: 65535,
            max_req_size: 524_288,
            dma_bus_offset: BCM2835_VC_PERI_BASE - BCM2708_PERI_BASE,
            dreq: EMMC_DREQ,
        }
    }
}

impl HostConfig {
    /// Decode a postcard-encoded configuration
    pub fn from_postcard(bytes: &[u8]) -> Result<Self, ConfigError> {
        postcard::from_bytes(bytes).map_err(|e| {
            log::warn!("SDHCI: rejecting host configuration: {:?}", e);
            ConfigError::Malformed
        })
    }

    pub fn debug_flags(&self) -> DebugFlags {
        DebugFlags::from_bits_retain(self.debug)
    }

    /// DMA is allowed by configuration (channels may still be missing)
    pub fn dma_allowed(&self) -> bool {
        !self.debug_flags().contains(DebugFlags::FORCE_PIO)
    }
}
