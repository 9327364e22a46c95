//! Request completion, watchdog expiry and controller removal

use super::regs::*;
use super::request::{CmdSlot, MmcError, Request};
use super::{HostFlags, HostState, Phase};
use crate::hal::{Platform, WatchdogTimer};

impl<P: Platform> HostState<P> {
    /// The controller went silent on the active request
    pub(super) fn watchdog_expired(&mut self) {
        if self.mrq.is_none() {
            return;
        }

        log::error!("SDHCI: timeout waiting for hardware interrupt");
        self.dump_regs();

        if self.data_active {
            self.set_data_error(MmcError::Timeout);
            self.finish_data();
        } else {
            let slot = self.cmd.unwrap_or(CmdSlot::Main);
            self.set_command_error(slot, MmcError::Timeout);
            self.schedule_finish();
        }
    }

    /// Retire the active request
    ///
    /// Returns `None` when there is nothing to complete, so a completion
    /// scheduled twice delivers the request once.
    pub(super) fn complete(&mut self) -> Option<Request> {
        let failed = self.mrq.as_ref()?.has_error();

        self.timer.disarm();

        if self.data_active {
            self.data_active = false;
            self.release_transfer();
        }

        // The state machines need a reset after any error
        if failed && !self.flags.contains(HostFlags::DEVICE_DEAD) {
            self.reset_cmd_data();
        }

        self.cmd = None;
        self.data_early = false;
        self.phase = Phase::Idle;

        let mrq = self.mrq.take();
        if let Some(req) = mrq.as_ref() {
            match req.first_error() {
                Some(e) => log::debug!("SDHCI: CMD{} failed: {}", req.cmd.opcode, e),
                None => log::trace!("SDHCI: CMD{} done", req.cmd.opcode),
            }
        }
        mrq
    }

    pub(super) fn remove(&mut self) {
        let dead = self.io.read32(SDHCI_INT_STATUS) == u32::MAX;
        if dead {
            self.flags |= HostFlags::DEVICE_DEAD;
        }
        self.flags |= HostFlags::REMOVED;

        if self.mrq.is_some() {
            log::error!("SDHCI: controller removed during transfer");
            self.set_command_error(CmdSlot::Main, MmcError::NoMedium);
            self.schedule_finish();
        }

        if !dead {
            // Logged by reset; nothing is left to recover on failure
            let _ = self.reset(SDHCI_RESET_ALL);
        }

        self.timer.disarm();
        log::info!("SDHCI: host removed");
    }
}

#[cfg(test)]
mod tests {
    use super::super::fake::{self, Event, Fake};
    use super::super::request::{Command, Data, Direction, RespFlags};
    use super::super::{Phase, SubmitError};
    use super::*;
    use crate::config::HostConfig;

    fn open_ended_read(blocks: u32) -> Request {
        let data = Data::new(Direction::Read, 512, blocks)
            .with_segment(fake::segment(&std::vec![0u8; 512 * blocks as usize]))
            .unwrap();
        Request::new(Command::new(18, 0x10, RespFlags::R1))
            .with_data(data)
            .with_stop(Command::new(12, 0, RespFlags::R1B))
    }

    #[test]
    fn watchdog_mid_transfer_sends_stop() {
        let fake = Fake::new();
        let host = fake.host(HostConfig::default(), false);

        host.submit(open_ended_read(4)).unwrap();
        fake.raise(SDHCI_INT_RESPONSE);
        host.irq();
        assert_eq!(host.phase(), Phase::DataPending);

        host.watchdog_expired();
        assert_eq!(fake.count(&Event::Reset(SDHCI_RESET_CMD)), 1);
        assert_eq!(fake.count(&Event::Reset(SDHCI_RESET_DATA)), 1);
        assert_eq!(fake.count(&Event::ScheduleFinish), 0);
        assert_eq!(host.phase(), Phase::CommandDispatched);

        fake.raise(SDHCI_INT_RESPONSE);
        host.irq();
        assert_eq!(fake.count(&Event::ScheduleFinish), 1);

        host.finish_request();
        let req = fake.take_completed().pop().unwrap();
        let data = req.data.as_ref().unwrap();
        assert_eq!(data.error, Some(MmcError::Timeout));
        assert_eq!(data.bytes_xfered, 0);
        assert_eq!(req.cmd.error, None);
        assert_eq!(req.stop.as_ref().unwrap().error, None);
    }

    #[test]
    fn stop_command_can_time_out_on_its_own() {
        let fake = Fake::new();
        let host = fake.host(HostConfig::default(), false);

        host.submit(open_ended_read(4)).unwrap();
        fake.raise(SDHCI_INT_RESPONSE);
        host.irq();

        // Data times out, the stop goes out and then also never answers
        host.watchdog_expired();
        assert_eq!(fake.count(&Event::Arm(10_000)), 2);
        host.watchdog_expired();
        assert_eq!(fake.count(&Event::ScheduleFinish), 1);

        host.finish_request();
        let req = fake.take_completed().pop().unwrap();
        assert_eq!(req.data.as_ref().unwrap().error, Some(MmcError::Timeout));
        assert_eq!(req.stop.as_ref().unwrap().error, Some(MmcError::Timeout));
        assert_eq!(req.cmd.error, None);
        // Once before the stop, once more at completion
        assert_eq!(fake.count(&Event::Reset(SDHCI_RESET_CMD)), 2);
        assert_eq!(host.phase(), Phase::Idle);
    }

    #[test]
    fn watchdog_without_data_fails_the_command() {
        let fake = Fake::new();
        let host = fake.host(HostConfig::default(), false);

        host.submit(Request::new(Command::new(13, 0x1_0000, RespFlags::R1)))
            .unwrap();
        host.watchdog_expired();
        host.finish_request();

        let req = fake.take_completed().pop().unwrap();
        assert_eq!(req.cmd.error, Some(MmcError::Timeout));
        assert_eq!(host.phase(), Phase::Idle);

        // Idle host: nothing to expire
        fake.clear_events();
        host.watchdog_expired();
        assert!(fake.events().is_empty());
    }

    #[test]
    fn completion_is_delivered_once() {
        let fake = Fake::new();
        let host = fake.host(HostConfig::default(), false);

        host.submit(Request::new(Command::new(0, 0, RespFlags::NONE)))
            .unwrap();
        fake.raise(SDHCI_INT_RESPONSE);
        host.irq();

        host.finish_request();
        host.finish_request();
        assert_eq!(fake.count(&Event::Done), 1);
        assert_eq!(fake.count(&Event::Disarm), 1);
    }

    #[test]
    fn dead_controller_removal_fails_active_request() {
        let fake = Fake::new();
        let host = fake.host(HostConfig::default(), true);

        host.submit(open_ended_read(8)).unwrap();
        fake.clear_events();
        fake.poke(SDHCI_INT_STATUS, u32::MAX);

        host.remove();
        assert_eq!(fake.count(&Event::ScheduleFinish), 1);
        assert_eq!(fake.count(&Event::Reset(SDHCI_RESET_ALL)), 0);

        host.finish_request();
        host.finish_request();

        let done = fake.take_completed();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].cmd.error, Some(MmcError::NoMedium));
        // Dead hardware is not reset, but the DMA mapping is still released
        assert_eq!(fake.count(&Event::Reset(SDHCI_RESET_CMD)), 0);
        assert_eq!(fake.count(&Event::Unmap(crate::drivers::dma::DmaDirection::DevToMem)), 1);

        let rejected = host.submit(open_ended_read(1)).unwrap_err();
        assert_eq!(rejected.error, SubmitError::DeviceDead);

        fake.clear_events();
        host.set_card_interrupt_notifications(true);
        assert!(fake.writes().is_empty());
    }

    #[test]
    fn live_controller_removal_resets() {
        let fake = Fake::new();
        let host = fake.host(HostConfig::default(), false);

        host.remove();
        assert_eq!(fake.count(&Event::Reset(SDHCI_RESET_ALL)), 1);
        assert_eq!(fake.count(&Event::Disarm), 1);
        assert_eq!(fake.count(&Event::ScheduleFinish), 0);

        let req = Request::new(Command::new(13, 0, RespFlags::R1));
        assert_eq!(host.submit(req).unwrap_err().error, SubmitError::DeviceDead);
    }
}
