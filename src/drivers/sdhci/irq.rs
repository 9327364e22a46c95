//! Hard interrupt demultiplexing

use tock_registers::LocalRegisterCopy;

use super::regs::*;
use super::request::{MmcError, RespFlags};
use super::{Backend, HostState, IrqReturn};
use crate::hal::Platform;

/// Status re-reads per hard interrupt before yielding
const MAX_IRQ_LOOPS: u32 = 16;

/// Bits acknowledged up front and dispatched to the command/data handlers
const ACK_MASK: u32 = SDHCI_INT_CMD_MASK | SDHCI_INT_DATA_MASK | SDHCI_INT_BUS_POWER;

/// Bits that are either handled or deliberately ignored
const KNOWN_MASK: u32 = SDHCI_INT_CARD_INSERT
    | SDHCI_INT_CARD_REMOVE
    | SDHCI_INT_CMD_MASK
    | SDHCI_INT_DATA_MASK
    | SDHCI_INT_ERROR
    | SDHCI_INT_BUS_POWER
    | SDHCI_INT_CARD_INT;

impl<P: Platform> HostState<P> {
    pub(super) fn irq(&mut self) -> IrqReturn {
        let mut intmask = self.io.read32(SDHCI_INT_STATUS);
        if intmask == 0 || intmask == u32::MAX {
            return IrqReturn::None;
        }

        let mut result = IrqReturn::None;
        let mut unexpected = 0;

        for _ in 0..MAX_IRQ_LOOPS {
            self.io.write32(SDHCI_INT_STATUS, intmask & ACK_MASK);

            if intmask & SDHCI_INT_CMD_MASK != 0 {
                self.cmd_irq(intmask & SDHCI_INT_CMD_MASK);
            }
            if intmask & SDHCI_INT_DATA_MASK != 0 {
                self.data_irq(intmask & SDHCI_INT_DATA_MASK);
            }
            if intmask & SDHCI_INT_BUS_POWER != 0 {
                log::error!("SDHCI: card is consuming too much power");
            }
            if intmask & SDHCI_INT_CARD_INT != 0 {
                self.enable_sdio_irq_nolock(false);
                self.thread_isr |= SDHCI_INT_CARD_INT;
                result = IrqReturn::WakeThread;
            }

            let stray = intmask & !KNOWN_MASK;
            if stray != 0 {
                unexpected |= stray;
                self.io.write32(SDHCI_INT_STATUS, stray);
            }

            if result == IrqReturn::None {
                result = IrqReturn::Handled;
            }

            intmask = self.io.read32(SDHCI_INT_STATUS);
            if intmask == 0 {
                break;
            }
        }

        if unexpected != 0 {
            log::error!("SDHCI: unexpected interrupt {:#010x}", unexpected);
            self.dump_regs();
        }

        result
    }

    fn cmd_irq(&mut self, intmask: u32) {
        let Some(slot) = self.cmd else {
            log::error!(
                "SDHCI: command interrupt {:#010x} with no command in flight",
                intmask
            );
            self.dump_regs();
            return;
        };

        let error = if intmask & SDHCI_INT_TIMEOUT != 0 {
            Some(MmcError::Timeout)
        } else if intmask & (SDHCI_INT_CRC | SDHCI_INT_END_BIT | SDHCI_INT_INDEX) != 0 {
            Some(MmcError::Protocol)
        } else {
            None
        };

        if let Some(error) = error {
            self.set_command_error(slot, error);
            self.schedule_finish();
            return;
        }

        if intmask & SDHCI_INT_RESPONSE != 0 {
            self.finish_command();
        }
    }

    /// Opcode of the last command written to the controller
    fn last_opcode(&self) -> u8 {
        let reg = LocalRegisterCopy::<u16, COMMAND::Register>::new(self.io.read16(SDHCI_COMMAND));
        reg.read(COMMAND::INDEX) as u8
    }

    fn data_irq(&mut self, intmask: u32) {
        if !self.data_active {
            // DATA_END doubles as the end of a busy signal
            let busy = self
                .cmd
                .and_then(|slot| self.command_flags(slot))
                .is_some_and(|flags| flags.contains(RespFlags::BUSY));
            if busy && intmask & SDHCI_INT_DATA_END != 0 {
                self.finish_command();
                return;
            }

            log::debug!(
                "SDHCI: data interrupt {:#010x} with no transfer in flight",
                intmask
            );
            self.dump_regs();
            return;
        }

        let error = if intmask & SDHCI_INT_DATA_TIMEOUT != 0 {
            Some(MmcError::Timeout)
        } else if intmask & SDHCI_INT_DATA_END_BIT != 0 {
            Some(MmcError::Protocol)
        } else if intmask & SDHCI_INT_DATA_CRC != 0 && self.last_opcode() != MMC_CMD_BUS_TEST_R {
            Some(MmcError::Protocol)
        } else {
            None
        };
        if let Some(error) = error {
            self.set_data_error(error);
        }

        match self.backend {
            Backend::Dma => {
                if error.is_some() {
                    self.abort_dma();
                    self.finish_data();
                } else if !self.data_is_read() && intmask & SDHCI_INT_DATA_END != 0 {
                    self.unmap_dma();
                    self.data_done();
                }
            }
            Backend::Pio => {
                if error.is_some() {
                    self.finish_data();
                    return;
                }
                if intmask & (SDHCI_INT_DATA_AVAIL | SDHCI_INT_SPACE_AVAIL) != 0 {
                    self.transfer_pio();
                }
                if intmask & SDHCI_INT_DATA_END != 0 {
                    self.data_done();
                }
            }
        }
    }
}
