//! SD clock and bus configuration

use tock_registers::LocalRegisterCopy;

use super::regs::*;
use super::{HostState, SdhciError};
use crate::hal::Platform;
use crate::time::wait_for;

/// Stalls above this while the clock settles are reported
const CLOCK_STALL_REPORT_MS: u32 = 10;

/// Data bus width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataWidth {
    #[default]
    One,
    Four,
    Eight,
}

/// Output driver strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverType {
    A,
    #[default]
    B,
    C,
    D,
}

/// Signalling voltage of the data and command lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalVoltage {
    #[default]
    V330,
    V180,
}

/// Bus settings requested by the MMC core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusSettings {
    /// Card clock in Hz, 0 gates the clock
    pub clock_hz: u32,
    pub width: DataWidth,
    pub driver: DriverType,
    pub voltage: SignalVoltage,
}

/// Even divisor bringing `max_clock` to at most `target`, or 1 for the base clock
pub(super) fn clock_divisor(max_clock: u32, target: u32) -> u32 {
    if max_clock <= target {
        return 1;
    }
    let mut div = 2;
    while div < SDHCI_MAX_DIV_SPEC_300 && max_clock / div > target {
        div += 2;
    }
    div
}

type ClockReg = LocalRegisterCopy<u16, CLOCK_CONTROL::Register>;

impl<P: Platform> HostState<P> {
    /// Program the divider, wait for the internal clock and gate it to the card
    pub(super) fn set_clock(&mut self, clock_hz: u32) -> Result<(), SdhciError> {
        self.io.write16(SDHCI_CLOCK_CONTROL, 0);

        if clock_hz == 0 {
            return Ok(());
        }

        let div = clock_divisor(self.max_clock, clock_hz);
        let field = (div >> 1) as u16;

        let mut clk = ClockReg::new(0);
        clk.write(
            CLOCK_CONTROL::DIV_LO.val(field & SDHCI_DIV_MASK)
                + CLOCK_CONTROL::DIV_HI.val((field & SDHCI_DIV_HI_MASK) >> SDHCI_DIV_MASK_LEN)
                + CLOCK_CONTROL::INT_EN::SET,
        );
        self.io.write16(SDHCI_CLOCK_CONTROL, clk.get());

        // Wait max 20 ms
        let io = &self.io;
        let waited = wait_for(io.delay(), 20, 1000, || {
            ClockReg::new(io.read16(SDHCI_CLOCK_CONTROL)).is_set(CLOCK_CONTROL::INT_STABLE)
        });
        match waited {
            Ok(ms) => self.note_stall(ms, CLOCK_STALL_REPORT_MS),
            Err(_) => {
                log::error!("SDHCI: internal clock never stabilised");
                self.dump_regs();
                return Err(SdhciError::ClockUnstable);
            }
        }

        let mut clk = ClockReg::new(self.io.read16(SDHCI_CLOCK_CONTROL));
        clk.modify(CLOCK_CONTROL::CARD_EN::SET);
        self.io.write16(SDHCI_CLOCK_CONTROL, clk.get());

        log::debug!(
            "SDHCI: card clock {} Hz (requested {} Hz, divisor {})",
            self.max_clock / div,
            clock_hz,
            div
        );
        Ok(())
    }

    pub(super) fn configure_bus(&mut self, bus: &BusSettings) -> Result<(), SdhciError> {
        if bus.clock_hz == 0 || bus.clock_hz != self.io.clock_hz() {
            self.set_clock(bus.clock_hz)?;
            self.io.set_clock_hz(bus.clock_hz);
        }

        let power = SDHCI_POWER_330 | SDHCI_POWER_ON;
        if self.pwr != power {
            self.pwr = power;
            self.io.write8(SDHCI_POWER_CONTROL, power);
        }

        let mut ctrl = self.io.read8(SDHCI_HOST_CONTROL);
        ctrl &= !(SDHCI_CTRL_4BITBUS | SDHCI_CTRL_8BITBUS);
        match bus.width {
            DataWidth::One => {}
            DataWidth::Four => ctrl |= SDHCI_CTRL_4BITBUS,
            DataWidth::Eight => ctrl |= SDHCI_CTRL_8BITBUS,
        }
        // No usable high-speed bit on this controller
        ctrl &= !SDHCI_CTRL_HISPD;
        self.io.write8(SDHCI_HOST_CONTROL, ctrl);

        let mut ctrl2 = self.io.read16(SDHCI_HOST_CONTROL2);
        ctrl2 &= !(SDHCI_CTRL_DRV_TYPE_MASK | SDHCI_CTRL_VDD_180);
        ctrl2 |= match bus.driver {
            DriverType::A => SDHCI_CTRL_DRV_TYPE_A,
            DriverType::B => SDHCI_CTRL_DRV_TYPE_B,
            DriverType::C => SDHCI_CTRL_DRV_TYPE_C,
            DriverType::D => SDHCI_CTRL_DRV_TYPE_D,
        };
        if bus.voltage == SignalVoltage::V180 {
            ctrl2 |= SDHCI_CTRL_VDD_180;
        }
        self.io.write16(SDHCI_HOST_CONTROL2, ctrl2);

        // Restart the card clock so the new settings take
        let mut clk = ClockReg::new(self.io.read16(SDHCI_CLOCK_CONTROL));
        clk.modify(CLOCK_CONTROL::CARD_EN::CLEAR);
        self.io.write16(SDHCI_CLOCK_CONTROL, clk.get());

        self.set_clock(self.io.clock_hz())?;
        self.io.write8(SDHCI_HOST_CONTROL, ctrl);

        Ok(())
    }
}
