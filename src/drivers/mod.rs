//! Hardware drivers for CrabMMC
//!
//! This module contains the SDHCI host driver and the DMA channel interface
//! it moves data through.

pub mod dma;
pub mod sdhci;
