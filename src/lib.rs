//! CrabMMC - SD/MMC host controller driver
//!
//! This library drives an SDHCI-compatible host controller whose register
//! window only tolerates 32-bit accesses (the BCM2835 "Arasan" EMMC block).
//! It executes block requests handed down by a storage stack: an optional
//! CMD23, the main command, an optional data phase moved by PIO or by an
//! external DMA engine, and an optional stop command.
//!
//! The driver is interrupt driven. The platform wires its interrupt line,
//! DMA completion callback, watchdog timer and deferred work context to the
//! entry points on [`drivers::sdhci::Host`].

#![no_std]
#![allow(unsafe_op_in_unsafe_fn)]

#[cfg(test)]
extern crate std;

pub mod config;
pub mod drivers;
pub mod hal;
pub mod logger;
pub mod time;

pub use config::{ConfigError, DebugFlags, HostConfig};
pub use drivers::sdhci::{
    Backend, BusSettings, DataWidth, DriverType, Host, HostCaps, IrqReturn, MmcCaps, Phase,
    Rejected, SdhciError, SignalVoltage, SubmitError,
};
pub use drivers::sdhci::request::{Command, Data, Direction, MmcError, Request, RespFlags, Segment};
