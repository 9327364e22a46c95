//! Register access over the 32-bit-only window
//!
//! The BCM2835 EMMC block ignores byte and halfword accesses, so every
//! sub-word register is reached by a read-modify-write of its containing
//! word. TRANSFER_MODE and COMMAND share the word at 0x0C; writing COMMAND
//! starts the command, so TRANSFER_MODE is kept in a shadow and only lands
//! in hardware together with the command.
//!
//! Each checked write is followed by a settle delay of two SD clock periods
//! at the current card clock (at least 400 kHz).

use crate::config::DebugFlags;
use crate::hal::Mmio;
use crate::time::Delay;

use super::regs::{SDHCI_COMMAND, SDHCI_TRANSFER_MODE};

/// Lowest clock the settle delay is computed for
const MIN_FREQ: u32 = 400_000;

/// Post-write settle time in microseconds at `clock_hz`
#[inline]
pub const fn write_delay_us(clock_hz: u32) -> u32 {
    let clock = if clock_hz > MIN_FREQ { clock_hz } else { MIN_FREQ };
    (2 * 1_000_000) / clock + 1
}

/// Register window plus the state needed to emulate sub-word writes
pub struct SdhciIo<M, D> {
    mmio: M,
    delay: D,
    /// TRANSFER_MODE/COMMAND word as hardware would hold it
    shadow: u32,
    /// Current card clock, drives the settle delay
    clock_hz: u32,
    debug: DebugFlags,
}

impl<M: Mmio, D: Delay> SdhciIo<M, D> {
    pub fn new(mmio: M, delay: D, debug: DebugFlags) -> Self {
        Self {
            mmio,
            delay,
            shadow: 0,
            clock_hz: 0,
            debug,
        }
    }

    pub fn delay(&self) -> &D {
        &self.delay
    }

    pub fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    pub fn set_clock_hz(&mut self, clock_hz: u32) {
        self.clock_hz = clock_hz;
    }

    pub fn shadow(&self) -> u32 {
        self.shadow
    }

    fn drain_reads(&self) {
        while self.mmio.axi_outstanding().reads > 1 {
            core::hint::spin_loop();
        }
    }

    fn drain_writes(&self) {
        while self.mmio.axi_outstanding().writes > 0 {
            core::hint::spin_loop();
        }
    }

    fn pace(&self, reads: DebugFlags, writes: DebugFlags) {
        if self.debug.contains(reads) {
            self.drain_reads();
        }
        if self.debug.contains(writes) {
            self.drain_writes();
        }
    }

    pub fn read32(&self, reg: u16) -> u32 {
        self.pace(DebugFlags::READ_PRE_READS, DebugFlags::READ_PRE_WRITES);
        let value = self.mmio.read32(reg);
        self.pace(DebugFlags::READ_POST_READS, DebugFlags::READ_POST_WRITES);
        value
    }

    pub fn read16(&self, reg: u16) -> u16 {
        let word = self.read32(reg & !3);
        let shift = ((reg >> 1) & 1) * 16;
        (word >> shift) as u16
    }

    pub fn read8(&self, reg: u16) -> u8 {
        let word = self.read32(reg & !3);
        let shift = (reg & 3) * 8;
        (word >> shift) as u8
    }

    /// Write a register and wait for it to settle
    pub fn write32(&mut self, reg: u16, value: u32) {
        self.pace(DebugFlags::WRITE_PRE_READS, DebugFlags::WRITE_PRE_WRITES);

        self.mmio.write32(reg, value);
        self.delay.delay_us(write_delay_us(self.clock_hz));

        let extra = self.debug.write_delay_us();
        if extra != 0 {
            self.delay.delay_us(extra);
        }

        self.pace(DebugFlags::WRITE_POST_READS, DebugFlags::WRITE_POST_WRITES);
    }

    /// Data port write without the settle delay
    pub fn write32_raw(&mut self, reg: u16, value: u32) {
        self.pace(DebugFlags::RAW_PRE_READS, DebugFlags::RAW_PRE_WRITES);

        self.mmio.write32(reg, value);

        let extra = self.debug.raw_write_delay_us();
        if extra != 0 {
            self.delay.delay_us(extra);
        }

        self.pace(DebugFlags::RAW_POST_READS, DebugFlags::RAW_POST_WRITES);
    }

    pub fn write16(&mut self, reg: u16, value: u16) {
        let old = if reg == SDHCI_COMMAND {
            self.shadow
        } else {
            self.read32(reg & !3)
        };
        let shift = ((reg >> 1) & 1) * 16;
        let mask = 0xFFFFu32 << shift;
        let new = (old & !mask) | ((value as u32) << shift);

        if reg == SDHCI_TRANSFER_MODE {
            self.shadow = new;
        } else {
            self.write32(reg & !3, new);
        }
    }

    pub fn write8(&mut self, reg: u16, value: u8) {
        let old = self.read32(reg & !3);
        let shift = (reg & 3) * 8;
        let mask = 0xFFu32 << shift;
        let new = (old & !mask) | ((value as u32) << shift);

        self.write32(reg & !3, new);
    }
}
