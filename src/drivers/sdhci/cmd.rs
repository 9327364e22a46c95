//! Command dispatch and command/data completion

use tock_registers::LocalRegisterCopy;

use super::regs::*;
use super::request::{CmdSlot, MmcError, RespFlags};
use super::{Backend, HostFlags, HostState, Phase, INHIBIT_STALL_REPORT_MS};
use crate::hal::{Platform, WatchdogTimer};
use crate::time::wait_for;

/// Inhibit wait budget: 1000 polls 10 us apart
const INHIBIT_WAIT_STEPS: u32 = 1000;
const INHIBIT_STEP_US: u32 = 10;

const DEFAULT_WATCHDOG_MS: u64 = 10_000;

/// Busy timeouts above this get their own watchdog period
const LONG_BUSY_TIMEOUT_MS: u32 = 9_000;

/// Watchdog period for a command
pub(super) fn watchdog_ms(has_data: bool, busy_timeout_ms: u32) -> u64 {
    if !has_data && busy_timeout_ms > LONG_BUSY_TIMEOUT_MS {
        busy_timeout_ms.div_ceil(1000) as u64 * 1000 + 1000
    } else {
        DEFAULT_WATCHDOG_MS
    }
}

/// COMMAND register value for `opcode`
pub(super) fn command_word(opcode: u8, flags: RespFlags, has_data: bool) -> u16 {
    let resp = if !flags.contains(RespFlags::PRESENT) {
        COMMAND::RESP::NoResponse
    } else if flags.contains(RespFlags::LONG) {
        COMMAND::RESP::Long
    } else if flags.contains(RespFlags::BUSY) {
        COMMAND::RESP::ShortBusy
    } else {
        COMMAND::RESP::Short
    };

    let mut reg = LocalRegisterCopy::<u16, COMMAND::Register>::new(0);
    reg.write(COMMAND::INDEX.val(opcode as u16) + resp);
    if flags.contains(RespFlags::CRC) {
        reg.modify(COMMAND::CRC::SET);
    }
    if flags.contains(RespFlags::OPCODE) {
        reg.modify(COMMAND::INDEX_CHECK::SET);
    }
    if has_data {
        reg.modify(COMMAND::DATA::SET);
    }
    reg.get()
}

/// Rebuild a 136-bit response from the four RESPONSE words
///
/// The controller strips the CRC byte, so each response word is one
/// register word shifted up by 8 with the top byte of the next lower word
/// shifted in. `words[0]` is the word at RESPONSE+0.
pub(super) fn long_response(words: [u32; 4]) -> [u32; 4] {
    let mut resp = [0u32; 4];
    for (i, out) in resp.iter_mut().enumerate() {
        *out = words[3 - i] << 8;
        if i != 3 {
            *out |= words[2 - i] >> 24;
        }
    }
    resp
}

impl<P: Platform> HostState<P> {
    /// Issue the command in `slot` of the active request
    pub(super) fn send_command(&mut self, slot: CmdSlot) {
        let Some(req) = self.mrq.as_ref() else {
            return;
        };
        let Some(cmd) = req.command(slot) else {
            return;
        };
        let has_data = slot == CmdSlot::Main && req.data.is_some();
        let (opcode, arg, flags) = (cmd.opcode, cmd.arg, cmd.flags);
        let busy_timeout_ms = cmd.busy_timeout_ms;

        if let Some(prev) = self.cmd {
            log::debug!("SDHCI: CMD{} replaces outstanding {:?} command", opcode, prev);
        }

        // A busy stop command must not wait on the busy state of its own data
        let mask = if slot == CmdSlot::Stop && flags.contains(RespFlags::BUSY) {
            SDHCI_CMD_INHIBIT
        } else {
            SDHCI_CMD_INHIBIT | SDHCI_DATA_INHIBIT
        };

        self.phase = Phase::AwaitingInhibitClear;
        let io = &self.io;
        let waited = wait_for(io.delay(), INHIBIT_WAIT_STEPS, INHIBIT_STEP_US, || {
            io.read32(SDHCI_PRESENT_STATE) & mask == 0
        });
        match waited {
            Ok(steps) => self.note_stall(steps / 100, INHIBIT_STALL_REPORT_MS),
            Err(_) => {
                log::error!("SDHCI: controller never released inhibit bit(s)");
                self.dump_regs();
                self.set_command_error(slot, MmcError::Timeout);
                self.schedule_finish();
                return;
            }
        }

        // Nothing of the data phase may be set up for a command never sent
        if flags.contains(RespFlags::LONG) && flags.contains(RespFlags::BUSY) {
            log::error!("SDHCI: unsupported response type for CMD{}", opcode);
            self.set_command_error(slot, MmcError::Invalid);
            self.schedule_finish();
            return;
        }

        self.timer.arm(watchdog_ms(has_data, busy_timeout_ms));

        self.cmd = Some(slot);

        self.prepare_data(slot);

        log::trace!("SDHCI: CMD{} arg={:#010x}", opcode, arg);

        self.io.write32(SDHCI_ARGUMENT, arg);
        self.set_transfer_mode(slot);
        self.io
            .write16(SDHCI_COMMAND, command_word(opcode, flags, has_data));

        self.phase = Phase::CommandDispatched;
    }

    /// Stage TRANSFER_MODE in the shadow for the command in `slot`
    fn set_transfer_mode(&mut self, slot: CmdSlot) {
        let Some(req) = self.mrq.as_ref() else {
            return;
        };
        let data = match slot {
            CmdSlot::Main => req.data.as_ref(),
            _ => None,
        };

        let Some(data) = data else {
            // Clear auto-CMD settings for commands without data
            let mode = self.io.read16(SDHCI_TRANSFER_MODE);
            self.io
                .write16(SDHCI_TRANSFER_MODE, mode & !SDHCI_TRNS_AUTO_CMD_MASK);
            return;
        };

        let mut mode = LocalRegisterCopy::<u16, TRANSFER_MODE::Register>::new(0);
        mode.write(TRANSFER_MODE::BLK_CNT_EN::SET);

        if mmc_op_multi(req.cmd.opcode) || data.blocks > 1 {
            mode.modify(TRANSFER_MODE::MULTI::SET);

            // With CMD23 the card stops on its own, so never auto-CMD12
            match req.sbc.as_ref() {
                None if self.flags.contains(HostFlags::AUTO_CMD12) => {
                    mode.modify(TRANSFER_MODE::AUTO_CMD12::SET);
                }
                Some(sbc) if self.flags.contains(HostFlags::AUTO_CMD23) => {
                    mode.modify(TRANSFER_MODE::AUTO_CMD23::SET);
                    self.io.write32(SDHCI_ARGUMENT2, sbc.arg);
                }
                _ => {}
            }
        }

        if data.is_read() {
            mode.modify(TRANSFER_MODE::READ::SET);
        }
        if self.backend == Backend::Dma {
            mode.modify(TRANSFER_MODE::DMA::SET);
        }

        self.io.write16(SDHCI_TRANSFER_MODE, mode.get());
    }

    fn read_response(&self, flags: RespFlags) -> [u32; 4] {
        if !flags.contains(RespFlags::PRESENT) {
            return [0; 4];
        }
        if flags.contains(RespFlags::LONG) {
            let mut words = [0u32; 4];
            for (i, word) in words.iter_mut().enumerate() {
                *word = self.io.read32(SDHCI_RESPONSE + 4 * i as u16);
            }
            long_response(words)
        } else {
            [self.io.read32(SDHCI_RESPONSE), 0, 0, 0]
        }
    }

    /// The outstanding command got its response
    pub(super) fn finish_command(&mut self) {
        let Some(slot) = self.cmd.take() else {
            return;
        };
        let Some(flags) = self.command_flags(slot) else {
            return;
        };

        let resp = self.read_response(flags);
        if let Some(cmd) = self.mrq.as_mut().and_then(|r| r.command_mut(slot)) {
            cmd.resp = resp;
            cmd.error = None;
        }

        self.phase = Phase::ResponseReceived;

        match slot {
            CmdSlot::Sbc => {
                self.send_command(CmdSlot::Main);
                if self.cmd == Some(CmdSlot::Main) && self.data_active {
                    self.start_transfer();
                }
            }
            CmdSlot::Main | CmdSlot::Stop => {
                let has_data = slot == CmdSlot::Main
                    && self.mrq.as_ref().is_some_and(|r| r.data.is_some());

                if self.data_active {
                    if self.data_early {
                        self.finish_data();
                    } else {
                        self.phase = Phase::DataPending;
                    }
                } else if !has_data {
                    self.schedule_finish();
                }
            }
        }
    }

    /// The data phase ended, successfully or not
    pub(super) fn finish_data(&mut self) {
        if !self.data_active {
            return;
        }
        self.data_active = false;
        self.data_early = false;
        self.release_transfer();

        let Some(req) = self.mrq.as_mut() else {
            return;
        };
        let open_ended = req.sbc.is_none();
        let has_stop = req.stop.is_some();
        let Some(data) = req.data.as_mut() else {
            return;
        };

        let failed = data.error.is_some();
        data.bytes_xfered = if failed { 0 } else { data.blksz * data.blocks };

        // CMD12 ends an open-ended transfer or a failed one
        if has_stop && (failed || open_ended) {
            if failed {
                self.reset_cmd_data();
            }
            self.send_command(CmdSlot::Stop);
        } else {
            self.schedule_finish();
        }
    }
}
