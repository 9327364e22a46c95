//! In-memory SDHCI register file and recording collaborators for tests

use core::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use super::regs::*;
use super::request::{Request, Segment};
use super::Host;
use crate::config::HostConfig;
use crate::drivers::dma::{DmaChannel, DmaDirection, DmaError, SlaveConfig};
use crate::hal::{
    DeferredWork, DmaChannels, IrqControl, MmcClient, Mmio, Platform, Resources, WatchdogTimer,
};
use crate::time::Delay;

pub const MAX_CLOCK: u32 = 50_000_000;
pub const PHYS_BASE: u32 = 0x2030_0000;

/// Something a collaborator observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Write(u16, u32),
    Reset(u8),
    Arm(u64),
    Disarm,
    ScheduleFinish,
    DmaConfig(DmaDirection, u32),
    Map(DmaDirection, usize),
    Unmap(DmaDirection),
    Prep(DmaDirection),
    Submit(DmaDirection),
    Issue(DmaDirection),
    Terminate(DmaDirection),
    Done,
    SdioIrq,
}

#[derive(Default)]
struct State {
    regs: Vec<u32>,
    events: Vec<Event>,
    delayed_us: u64,
    /// Delay spent with the host interrupt unmasked
    unmasked_delay_us: u64,
    irq_masked: bool,
    sticky_status: bool,
    clock_never_stable: bool,
    /// Software reset bits that never self-clear
    stuck_reset: u8,
    inhibit: u32,
    rx: VecDeque<u32>,
    tx: Vec<u32>,
    space_words: usize,
    dma_config_fails: bool,
    dma_map_fails: bool,
    completed: Vec<Request>,
}

/// Shared handle to the fake controller and its event log
#[derive(Clone)]
pub struct Fake(Rc<RefCell<State>>);

impl Fake {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(State {
            regs: std::vec![0; 64],
            ..State::default()
        })))
    }

    pub fn mmio(&self) -> FakeMmio {
        FakeMmio(self.clone())
    }

    pub fn delay(&self) -> FakeDelay {
        FakeDelay(self.clone())
    }

    pub fn resources(&self, with_dma: bool) -> Resources<FakePlatform> {
        Resources {
            mmio: self.mmio(),
            phys_addr: PHYS_BASE,
            max_clock: MAX_CLOCK,
            delay: self.delay(),
            dma: with_dma.then(|| DmaChannels {
                rx: FakeDma {
                    fake: self.clone(),
                    direction: DmaDirection::DevToMem,
                },
                tx: FakeDma {
                    fake: self.clone(),
                    direction: DmaDirection::MemToDev,
                },
            }),
            timer: FakeTimer(self.clone()),
            deferred: FakeDeferred(self.clone()),
            client: FakeClient(self.clone()),
            irq_ctl: FakeIrq(self.clone()),
        }
    }

    /// Attached host with the attach-time events discarded
    pub fn host(&self, config: HostConfig, with_dma: bool) -> Host<FakePlatform> {
        let host = Host::new(self.resources(with_dma), config).unwrap();
        self.clear_events();
        host
    }

    fn log(&self, event: Event) {
        self.0.borrow_mut().events.push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.0.borrow_mut().events.clear();
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.0.borrow().events.iter().position(|e| e == event)
    }

    pub fn count(&self, event: &Event) -> usize {
        self.0.borrow().events.iter().filter(|e| *e == event).count()
    }

    pub fn writes(&self) -> Vec<(u16, u32)> {
        self.0
            .borrow()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Write(reg, value) => Some((*reg, *value)),
                _ => None,
            })
            .collect()
    }

    pub fn wrote_to(&self, reg: u16) -> bool {
        self.writes().iter().any(|(r, _)| *r == reg)
    }

    pub fn poke(&self, reg: u16, value: u32) {
        self.0.borrow_mut().regs[(reg >> 2) as usize] = value;
    }

    pub fn peek(&self, reg: u16) -> u32 {
        self.0.borrow().regs[(reg >> 2) as usize]
    }

    /// Latch interrupt status bits
    pub fn raise(&self, bits: u32) {
        self.0.borrow_mut().regs[(SDHCI_INT_STATUS >> 2) as usize] |= bits;
    }

    /// Status bits survive acknowledgement
    pub fn set_sticky_status(&self, sticky: bool) {
        self.0.borrow_mut().sticky_status = sticky;
    }

    pub fn set_clock_never_stable(&self, never: bool) {
        self.0.borrow_mut().clock_never_stable = never;
    }

    pub fn set_stuck_reset(&self, bits: u8) {
        self.0.borrow_mut().stuck_reset = bits;
    }

    /// Present-state inhibit bits held asserted
    pub fn set_inhibit(&self, bits: u32) {
        self.0.borrow_mut().inhibit = bits;
    }

    pub fn push_rx(&self, words: &[u32]) {
        self.0.borrow_mut().rx.extend(words.iter().copied());
    }

    pub fn rx_len(&self) -> usize {
        self.0.borrow().rx.len()
    }

    /// Allow `words` more data port writes
    pub fn open_space(&self, words: usize) {
        self.0.borrow_mut().space_words += words;
    }

    pub fn take_tx(&self) -> Vec<u32> {
        core::mem::take(&mut self.0.borrow_mut().tx)
    }

    pub fn delayed_us(&self) -> u64 {
        self.0.borrow().delayed_us
    }

    pub fn unmasked_delay_us(&self) -> u64 {
        self.0.borrow().unmasked_delay_us
    }

    pub fn irq_masked(&self) -> bool {
        self.0.borrow().irq_masked
    }

    pub fn fail_dma_config(&self) {
        self.0.borrow_mut().dma_config_fails = true;
    }

    pub fn fail_dma_map(&self) {
        self.0.borrow_mut().dma_map_fails = true;
    }

    pub fn take_completed(&self) -> Vec<Request> {
        core::mem::take(&mut self.0.borrow_mut().completed)
    }
}

/// Heap buffer handed to the host as one segment
pub fn segment(bytes: &[u8]) -> Segment {
    let buf: &'static mut [u8] = Vec::leak(bytes.to_vec());
    Segment::from_static(buf)
}

/// Words as the data port would deliver `bytes`, least significant first
pub fn words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u32, |w, (i, b)| w | (*b as u32) << (i * 8))
        })
        .collect()
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

pub struct FakeMmio(Fake);

impl Mmio for FakeMmio {
    fn read32(&self, offset: u16) -> u32 {
        let mut st = self.0.0.borrow_mut();
        let index = (offset >> 2) as usize;
        match offset {
            SDHCI_BUFFER => st.rx.pop_front().unwrap_or(0),
            SDHCI_PRESENT_STATE => {
                let mut value = st.regs[index] | st.inhibit | SDHCI_CARD_PRESENT;
                if !st.rx.is_empty() {
                    value |= SDHCI_DATA_AVAILABLE;
                }
                if st.space_words > 0 {
                    value |= SDHCI_SPACE_AVAILABLE;
                }
                value
            }
            SDHCI_CLOCK_CONTROL => {
                let mut value = st.regs[index];
                if value & 1 != 0 && !st.clock_never_stable {
                    value |= 1 << 1;
                }
                value
            }
            _ => st.regs[index],
        }
    }

    fn write32(&self, offset: u16, value: u32) {
        let mut st = self.0.0.borrow_mut();
        st.events.push(Event::Write(offset, value));
        let index = (offset >> 2) as usize;
        match offset {
            SDHCI_INT_STATUS => {
                if !st.sticky_status {
                    st.regs[index] &= !value;
                }
            }
            SDHCI_BUFFER => {
                st.tx.push(value);
                st.space_words = st.space_words.saturating_sub(1);
            }
            SDHCI_CLOCK_CONTROL => {
                // Software reset completes instantly unless stuck
                let reset = (value >> 24) as u8;
                if reset != 0 {
                    st.events.push(Event::Reset(reset));
                }
                let stuck = (reset & st.stuck_reset) as u32;
                st.regs[index] = (value & 0x00FF_FFFF) | stuck << 24;
            }
            _ => st.regs[index] = value,
        }
    }
}

pub struct FakeDelay(Fake);

impl Delay for FakeDelay {
    fn delay_us(&self, us: u32) {
        let mut st = self.0.0.borrow_mut();
        st.delayed_us += us as u64;
        if !st.irq_masked {
            st.unmasked_delay_us += us as u64;
        }
    }
}

pub struct FakeIrq(Fake);

impl IrqControl for FakeIrq {
    fn disable_irq(&self) -> bool {
        let mut st = self.0.0.borrow_mut();
        !core::mem::replace(&mut st.irq_masked, true)
    }

    fn restore_irq(&self, was_enabled: bool) {
        if was_enabled {
            self.0.0.borrow_mut().irq_masked = false;
        }
    }
}

pub struct FakeTimer(Fake);

impl WatchdogTimer for FakeTimer {
    fn arm(&self, timeout_ms: u64) {
        self.0.log(Event::Arm(timeout_ms));
    }

    fn disarm(&self) {
        self.0.log(Event::Disarm);
    }
}

pub struct FakeDeferred(Fake);

impl DeferredWork for FakeDeferred {
    fn schedule_finish(&self) {
        self.0.log(Event::ScheduleFinish);
    }
}

pub struct FakeClient(Fake);

impl MmcClient for FakeClient {
    fn request_done(&self, request: Request) {
        let mut st = self.0.0.borrow_mut();
        st.events.push(Event::Done);
        st.completed.push(request);
    }

    fn signal_sdio_irq(&self) {
        self.0.log(Event::SdioIrq);
    }
}

/// One channel; every event carries the direction it was set up for
pub struct FakeDma {
    fake: Fake,
    direction: DmaDirection,
}

impl DmaChannel for FakeDma {
    type Descriptor = usize;

    fn configure(&mut self, config: &SlaveConfig) -> Result<(), DmaError> {
        if self.fake.0.borrow().dma_config_fails {
            return Err(DmaError::Config);
        }
        self.fake
            .log(Event::DmaConfig(config.direction, config.fifo_addr));
        Ok(())
    }

    fn map_sg(&mut self, segments: &[Segment], direction: DmaDirection) -> usize {
        if self.fake.0.borrow().dma_map_fails {
            return 0;
        }
        self.fake.log(Event::Map(direction, segments.len()));
        segments.len()
    }

    fn unmap_sg(&mut self, _segments: &[Segment], direction: DmaDirection) {
        self.fake.log(Event::Unmap(direction));
    }

    fn prep_slave_sg(&mut self, mapped: usize, direction: DmaDirection) -> Option<usize> {
        self.fake.log(Event::Prep(direction));
        Some(mapped)
    }

    fn submit(&mut self, _descriptor: usize) {
        self.fake.log(Event::Submit(self.direction));
    }

    fn issue_pending(&mut self) {
        self.fake.log(Event::Issue(self.direction));
    }

    fn terminate_all(&mut self) {
        self.fake.log(Event::Terminate(self.direction));
    }
}

pub struct FakePlatform;

impl Platform for FakePlatform {
    type Mmio = FakeMmio;
    type Delay = FakeDelay;
    type Dma = FakeDma;
    type Timer = FakeTimer;
    type Deferred = FakeDeferred;
    type Client = FakeClient;
    type Irq = FakeIrq;
}
