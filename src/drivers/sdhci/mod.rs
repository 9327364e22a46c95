//! BCM2835 SDHCI host driver
//!
//! The Arasan-based EMMC controller found in BCM2835/BCM2836/BCM2837 SoCs
//! speaks the standard SDHCI command protocol but only accepts 32-bit
//! register accesses and has no bus-mastering DMA of its own. Data moves
//! either by PIO through the data port or through a system DMA channel
//! paced by the controller's DREQ line.
//!
//! All mutable host state lives in one [`HostState`] behind a single
//! non-reentrant spin lock. Every entry point (submission, hard interrupt,
//! threaded interrupt, DMA callback, watchdog, deferred completion) takes
//! that lock exactly once and drops it before calling back into the
//! [`MmcClient`].

mod clock;
mod cmd;
mod dma;
mod finish;
mod io;
mod irq;
mod pio;
pub mod regs;
pub mod request;
mod transfer;

#[cfg(test)]
mod fake;

pub use clock::{BusSettings, DataWidth, DriverType, SignalVoltage};
pub use transfer::Backend;

use bitflags::bitflags;
use spin::Mutex;

use crate::config::HostConfig;
use crate::drivers::dma::{BusWidth, DmaChannel, DmaDirection, DmaError, SlaveConfig};
use crate::hal::{DeferredWork, DmaChannels, IrqControl, MmcClient, Platform, Resources};
use crate::time::wait_for;

use io::SdhciIo;
use pio::SgCursor;
use regs::*;
use request::{CmdSlot, MmcError, Request};

/// SDHCI error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdhciError {
    /// Software reset bits never self-cleared
    ResetTimeout,
    /// Internal clock never reported stable
    ClockUnstable,
    /// DMA engine failure
    Dma(DmaError),
}

impl From<DmaError> for SdhciError {
    fn from(e: DmaError) -> Self {
        SdhciError::Dma(e)
    }
}

impl core::fmt::Display for SdhciError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SdhciError::ResetTimeout => f.write_str("software reset never completed"),
            SdhciError::ClockUnstable => f.write_str("internal clock never stabilised"),
            SdhciError::Dma(e) => write!(f, "DMA: {}", e),
        }
    }
}

/// Why a request was refused at submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Another request is still in flight
    Busy,
    /// The controller has been removed
    DeviceDead,
    /// `blksz * blocks` exceeds the maximum request size
    RequestTooLarge,
    BlockTooLarge,
    TooManyBlocks,
    /// No blocks, or zero-sized blocks
    ZeroBlocks,
    /// The scatter list holds fewer bytes than the transfer moves
    ScatterListTooShort,
    /// A stop command only terminates a data transfer
    StopWithoutData,
}

impl core::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            SubmitError::Busy => "a request is already in flight",
            SubmitError::DeviceDead => "controller removed",
            SubmitError::RequestTooLarge => "transfer exceeds maximum request size",
            SubmitError::BlockTooLarge => "block size exceeds maximum",
            SubmitError::TooManyBlocks => "block count exceeds maximum",
            SubmitError::ZeroBlocks => "empty transfer",
            SubmitError::ScatterListTooShort => "scatter list shorter than transfer",
            SubmitError::StopWithoutData => "stop command without data",
        };
        f.write_str(msg)
    }
}

/// A refused request, handed back untouched
#[derive(Debug)]
pub struct Rejected {
    pub error: SubmitError,
    pub request: Request,
}

/// Where the active request is in its life cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingInhibitClear,
    CommandDispatched,
    ResponseReceived,
    /// Response seen, data still moving
    DataPending,
    /// Completion scheduled on the deferred context
    Completing,
}

/// Hard interrupt outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Not ours
    None,
    Handled,
    /// Run [`Host::thread_irq`]
    WakeThread,
}

bitflags! {
    /// Capabilities advertised to the MMC core
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MmcCaps: u32 {
        const BUS_WIDTH_4 = 1 << 0;
        const MMC_HIGHSPEED = 1 << 1;
        const SD_HIGHSPEED = 1 << 2;
        const SDIO_IRQ = 1 << 3;
        const NEEDS_POLL = 1 << 5;
        const ERASE = 1 << 10;
        const CMD23 = 1 << 30;
    }
}

/// Host limits and capabilities derived at attach time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCaps {
    pub f_min: u32,
    pub f_max: u32,
    /// Data timeout clock in kHz
    pub timeout_clk_khz: u32,
    pub max_busy_timeout_ms: u32,
    pub caps: MmcCaps,
    pub max_segs: usize,
    pub max_seg_size: u32,
    pub max_req_size: u32,
    pub max_blk_size: u32,
    pub max_blk_count: u32,
    /// Supported OCR voltage window
    pub ocr_avail: u32,
    /// DMA channels are configured and usable
    pub dma: bool,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct HostFlags: u32 {
        const AUTO_CMD12 = 1 << 6;
        const AUTO_CMD23 = 1 << 7;
        const SDIO_IRQ_ENABLED = 1 << 9;
        /// Status reads all-ones
        const DEVICE_DEAD = 1 << 3;
        const REMOVED = 1 << 4;
        /// The last command/data reset never completed
        const RESET_PENDING = 1 << 5;
    }
}

/// Highest stall a wait may take before it is reported, per wait kind
const INHIBIT_STALL_REPORT_MS: u32 = 1;
const RESET_STALL_REPORT_MS: u32 = 10;

/// Host state, only ever touched under [`Host::state`]
pub(crate) struct HostState<P: Platform> {
    io: SdhciIo<P::Mmio, P::Delay>,
    dma: Option<DmaChannels<P::Dma>>,
    timer: P::Timer,
    deferred: P::Deferred,
    config: HostConfig,

    max_clock: u32,
    /// Current bus power setting
    pwr: u8,
    /// Cached INT_ENABLE/SIGNAL_ENABLE mask
    ier: u32,
    flags: HostFlags,

    mrq: Option<Request>,
    /// Command awaiting its response
    cmd: Option<CmdSlot>,
    /// Data phase in flight
    data_active: bool,
    /// Data finished before the command response
    data_early: bool,
    backend: Backend,
    /// Scatter list currently mapped for DMA
    dma_mapped: bool,
    /// Remaining PIO blocks
    blocks: u32,
    cursor: SgCursor,

    thread_isr: u32,
    /// Longest observed hardware stall in ms
    max_delay: u32,
    phase: Phase,
}

impl<P: Platform> HostState<P> {
    fn schedule_finish(&mut self) {
        self.phase = Phase::Completing;
        self.deferred.schedule_finish();
    }

    fn command_flags(&self, slot: CmdSlot) -> Option<request::RespFlags> {
        self.mrq
            .as_ref()
            .and_then(|r| r.command(slot))
            .map(|c| c.flags)
    }

    fn set_command_error(&mut self, slot: CmdSlot, error: MmcError) {
        if let Some(cmd) = self.mrq.as_mut().and_then(|r| r.command_mut(slot)) {
            cmd.error = Some(error);
        }
    }

    fn set_data_error(&mut self, error: MmcError) {
        if let Some(data) = self.mrq.as_mut().and_then(|r| r.data.as_mut()) {
            data.error = Some(error);
        }
    }

    fn data_is_read(&self) -> bool {
        self.mrq
            .as_ref()
            .and_then(|r| r.data.as_ref())
            .is_some_and(|d| d.is_read())
    }

    /// Record a stall of `ms` if it is notable and the longest so far
    fn note_stall(&mut self, ms: u32, threshold: u32) {
        if ms > threshold && ms > self.max_delay {
            self.max_delay = ms;
            log::warn!("SDHCI: controller hung for {} ms", ms);
        }
    }

    /// Software reset of the lines in `mask`
    fn reset(&mut self, mask: u8) -> Result<(), SdhciError> {
        self.io.write8(SDHCI_SOFTWARE_RESET, mask);

        if mask & SDHCI_RESET_ALL != 0 {
            self.io.set_clock_hz(0);
        }

        let io = &self.io;
        match wait_for(io.delay(), 100, 1000, || {
            io.read8(SDHCI_SOFTWARE_RESET) & mask == 0
        }) {
            Ok(ms) => {
                self.note_stall(ms, RESET_STALL_REPORT_MS);
                Ok(())
            }
            Err(_) => {
                log::error!("SDHCI: reset {:#x} never completed", mask);
                self.dump_regs();
                Err(SdhciError::ResetTimeout)
            }
        }
    }

    /// Reset the command and data state machines after an error
    ///
    /// A reset that never completes is retried before the next command.
    fn reset_cmd_data(&mut self) {
        let cmd = self.reset(SDHCI_RESET_CMD);
        let data = self.reset(SDHCI_RESET_DATA);
        let failed = cmd.is_err() || data.is_err();
        self.flags.set(HostFlags::RESET_PENDING, failed);
    }

    fn init_irqs(&mut self) {
        self.ier = SDHCI_INT_DEFAULT_ENABLE;
        self.io.write32(SDHCI_INT_ENABLE, self.ier);
        self.io.write32(SDHCI_SIGNAL_ENABLE, self.ier);
    }

    fn enable_sdio_irq_nolock(&mut self, enable: bool) {
        if self.flags.contains(HostFlags::DEVICE_DEAD) {
            return;
        }
        if enable {
            self.ier |= SDHCI_INT_CARD_INT;
        } else {
            self.ier &= !SDHCI_INT_CARD_INT;
        }
        self.io.write32(SDHCI_INT_ENABLE, self.ier);
        self.io.write32(SDHCI_SIGNAL_ENABLE, self.ier);
    }

    fn dump_regs(&self) {
        let io = &self.io;
        log::debug!("SDHCI: =========== REGISTER DUMP ===========");
        log::debug!(
            "SDHCI: Sys addr: {:#010x} | Version:  {:#010x}",
            io.read32(SDHCI_DMA_ADDRESS),
            io.read16(SDHCI_HOST_VERSION)
        );
        log::debug!(
            "SDHCI: Blk size: {:#010x} | Blk cnt:  {:#010x}",
            io.read16(SDHCI_BLOCK_SIZE),
            io.read16(SDHCI_BLOCK_COUNT)
        );
        log::debug!(
            "SDHCI: Argument: {:#010x} | Trn mode: {:#010x}",
            io.read32(SDHCI_ARGUMENT),
            io.read16(SDHCI_TRANSFER_MODE)
        );
        log::debug!(
            "SDHCI: Present:  {:#010x} | Host ctl: {:#010x}",
            io.read32(SDHCI_PRESENT_STATE),
            io.read8(SDHCI_HOST_CONTROL)
        );
        log::debug!(
            "SDHCI: Power:    {:#010x} | Blk gap:  {:#010x}",
            io.read8(SDHCI_POWER_CONTROL),
            io.read8(SDHCI_BLOCK_GAP_CONTROL)
        );
        log::debug!(
            "SDHCI: Wake-up:  {:#010x} | Clock:    {:#010x}",
            io.read8(SDHCI_WAKEUP_CONTROL),
            io.read16(SDHCI_CLOCK_CONTROL)
        );
        log::debug!(
            "SDHCI: Timeout:  {:#010x} | Int stat: {:#010x}",
            io.read8(SDHCI_TIMEOUT_CONTROL),
            io.read32(SDHCI_INT_STATUS)
        );
        log::debug!(
            "SDHCI: Int enab: {:#010x} | Sig enab: {:#010x}",
            io.read32(SDHCI_INT_ENABLE),
            io.read32(SDHCI_SIGNAL_ENABLE)
        );
        log::debug!(
            "SDHCI: AC12 err: {:#010x} | Slot int: {:#010x}",
            io.read16(SDHCI_ACMD12_ERR),
            io.read16(SDHCI_SLOT_INT_STATUS)
        );
        log::debug!(
            "SDHCI: Caps:     {:#010x} | Caps_1:   {:#010x}",
            io.read32(SDHCI_CAPABILITIES),
            io.read32(SDHCI_CAPABILITIES_1)
        );
        log::debug!(
            "SDHCI: Cmd:      {:#010x} | Max curr: {:#010x}",
            io.read16(SDHCI_COMMAND),
            io.read32(SDHCI_MAX_CURRENT)
        );
        log::debug!("SDHCI: Host ctl2: {:#010x}", io.read16(SDHCI_HOST_CONTROL2));
        log::debug!("SDHCI: =====================================");
    }

    /// Refuse requests the hardware or the host limits cannot carry
    fn check_request(&self, req: &Request) -> Result<(), SubmitError> {
        if self
            .flags
            .intersects(HostFlags::DEVICE_DEAD | HostFlags::REMOVED)
        {
            return Err(SubmitError::DeviceDead);
        }
        if self.mrq.is_some() {
            return Err(SubmitError::Busy);
        }

        let Some(data) = req.data.as_ref() else {
            if req.stop.is_some() {
                return Err(SubmitError::StopWithoutData);
            }
            return Ok(());
        };

        if data.blocks == 0 || data.blksz == 0 {
            return Err(SubmitError::ZeroBlocks);
        }
        if data.blksz > self.config.max_blk_size {
            return Err(SubmitError::BlockTooLarge);
        }
        if data.blocks > self.config.max_blk_count {
            return Err(SubmitError::TooManyBlocks);
        }
        if data.len() > self.config.max_req_size as u64 {
            return Err(SubmitError::RequestTooLarge);
        }
        if (data.sg_len() as u64) < data.len() {
            return Err(SubmitError::ScatterListTooShort);
        }
        Ok(())
    }

    fn submit(&mut self, req: Request) {
        let slot = if req.sbc.is_some() && !self.flags.contains(HostFlags::AUTO_CMD23) {
            CmdSlot::Sbc
        } else {
            CmdSlot::Main
        };
        self.mrq = Some(req);

        if self.flags.contains(HostFlags::RESET_PENDING) {
            log::warn!("SDHCI: retrying command/data reset");
            self.reset_cmd_data();
        }

        self.send_command(slot);

        // DMA starts now, PIO starts on the first buffer interrupt
        if self.cmd == Some(CmdSlot::Main) && self.data_active {
            self.start_transfer();
        }
    }
}

/// Configure both channels for the data port
fn configure_dma<C: DmaChannel>(
    channels: &mut DmaChannels<C>,
    phys_addr: u32,
    config: &HostConfig,
) -> Result<(), DmaError> {
    let fifo_addr = phys_addr
        .wrapping_add(config.dma_bus_offset)
        .wrapping_add(SDHCI_BUFFER as u32);

    channels.tx.configure(&SlaveConfig {
        direction: DmaDirection::MemToDev,
        fifo_addr,
        width: BusWidth::Bytes4,
        dreq: config.dreq,
    })?;
    channels.rx.configure(&SlaveConfig {
        direction: DmaDirection::DevToMem,
        fifo_addr,
        width: BusWidth::Bytes4,
        dreq: config.dreq,
    })
}

/// Bound the configured limits to what BLOCK_SIZE and BLOCK_COUNT can hold
fn clamp_limits(mut config: HostConfig) -> HostConfig {
    if config.max_blk_size > SDHCI_MAX_BLOCK_SIZE {
        log::warn!(
            "SDHCI: max block size {} clamped to {}",
            config.max_blk_size,
            SDHCI_MAX_BLOCK_SIZE
        );
        config.max_blk_size = SDHCI_MAX_BLOCK_SIZE;
    }
    if config.max_blk_count > SDHCI_MAX_BLOCK_COUNT {
        log::warn!(
            "SDHCI: max block count {} clamped to {}",
            config.max_blk_count,
            SDHCI_MAX_BLOCK_COUNT
        );
        config.max_blk_count = SDHCI_MAX_BLOCK_COUNT;
    }
    config
}

/// One SDHCI host instance
///
/// The host interrupt is kept off the local CPU while the state lock is
/// held, so a hard interrupt can never spin on a lock taken by the code it
/// interrupted.
pub struct Host<P: Platform> {
    state: Mutex<HostState<P>>,
    irq_ctl: P::Irq,
    client: P::Client,
    caps: HostCaps,
}

impl<P: Platform> Host<P> {
    /// Attach to a controller
    ///
    /// Resets the controller, derives the host limits and configures the DMA
    /// channels. Missing or unconfigurable channels leave the host in PIO
    /// mode.
    pub fn new(resources: Resources<P>, config: HostConfig) -> Result<Self, SdhciError> {
        let Resources {
            mmio,
            phys_addr,
            max_clock,
            delay,
            dma,
            timer,
            deferred,
            client,
            irq_ctl,
        } = resources;
        let config = clamp_limits(config);

        let mut flags = HostFlags::empty();
        if config.auto_cmd12 {
            flags |= HostFlags::AUTO_CMD12;
        }
        if config.auto_cmd23 {
            flags |= HostFlags::AUTO_CMD23;
        }

        let mut state = HostState {
            io: SdhciIo::new(mmio, delay, config.debug_flags()),
            dma: None,
            timer,
            deferred,
            config,
            max_clock,
            pwr: 0,
            ier: 0,
            flags,
            mrq: None,
            cmd: None,
            data_active: false,
            data_early: false,
            backend: Backend::Pio,
            dma_mapped: false,
            blocks: 0,
            cursor: SgCursor::default(),
            thread_isr: 0,
            max_delay: 0,
            phase: Phase::Idle,
        };

        state.reset(SDHCI_RESET_ALL)?;

        log::debug!("SDHCI: debug mask {:#x}", config.debug);
        state.dma = if !config.dma_allowed() {
            log::info!("SDHCI: forcing PIO mode");
            None
        } else if let Some(mut channels) = dma {
            match configure_dma(&mut channels, phys_addr, &config) {
                Ok(()) => {
                    log::info!("SDHCI: DMA channels configured");
                    Some(channels)
                }
                Err(e) => {
                    log::error!("SDHCI: {}, falling back to PIO", e);
                    None
                }
            }
        } else {
            log::error!("SDHCI: unable to initialise DMA channels, falling back to PIO");
            None
        };

        // Data timeout counts SD clock cycles on this controller
        let timeout_clk_khz = max_clock / 1000;
        let caps = HostCaps {
            f_min: max_clock / SDHCI_MAX_DIV_SPEC_300,
            f_max: max_clock,
            timeout_clk_khz,
            max_busy_timeout_ms: (1u32 << 27).checked_div(timeout_clk_khz).unwrap_or(0),
            caps: MmcCaps::CMD23
                | MmcCaps::ERASE
                | MmcCaps::NEEDS_POLL
                | MmcCaps::SDIO_IRQ
                | MmcCaps::SD_HIGHSPEED
                | MmcCaps::MMC_HIGHSPEED
                | MmcCaps::BUS_WIDTH_4,
            max_segs: request::MAX_SEGS,
            max_seg_size: config.max_req_size,
            max_req_size: config.max_req_size,
            max_blk_size: config.max_blk_size,
            max_blk_count: config.max_blk_count,
            ocr_avail: MMC_VDD_32_33 | MMC_VDD_33_34,
            dma: state.dma.is_some(),
        };

        state.init_irqs();

        log::info!(
            "SDHCI: host attached, {} Hz max clock, {} mode",
            max_clock,
            if caps.dma { "DMA" } else { "PIO" }
        );

        Ok(Self {
            state: Mutex::new(state),
            irq_ctl,
            client,
            caps,
        })
    }

    /// Run `f` under the state lock with the host interrupt masked
    fn with_state<R>(&self, f: impl FnOnce(&mut HostState<P>) -> R) -> R {
        let was_enabled = self.irq_ctl.disable_irq();
        let result = f(&mut self.state.lock());
        self.irq_ctl.restore_irq(was_enabled);
        result
    }

    pub fn caps(&self) -> &HostCaps {
        &self.caps
    }

    pub fn phase(&self) -> Phase {
        self.with_state(|state| state.phase)
    }

    /// Longest hardware stall seen so far, in milliseconds
    pub fn max_stall_ms(&self) -> u32 {
        self.with_state(|state| state.max_delay)
    }

    /// Start a request; completion is reported through [`MmcClient::request_done`]
    pub fn submit(&self, request: Request) -> Result<(), Rejected> {
        self.with_state(|state| {
            if let Err(error) = state.check_request(&request) {
                log::debug!("SDHCI: rejecting CMD{}: {}", request.cmd.opcode, error);
                return Err(Rejected { error, request });
            }
            state.submit(request);
            Ok(())
        })
    }

    /// Reprogram clock, bus width, driver strength and signalling voltage
    pub fn configure_bus(&self, bus: &BusSettings) -> Result<(), SdhciError> {
        self.with_state(|state| state.configure_bus(bus))
    }

    /// Enable or disable SDIO card interrupt delivery
    pub fn set_card_interrupt_notifications(&self, enabled: bool) {
        self.with_state(|state| {
            state.flags.set(HostFlags::SDIO_IRQ_ENABLED, enabled);
            state.enable_sdio_irq_nolock(enabled);
        })
    }

    /// Hard interrupt handler
    pub fn irq(&self) -> IrqReturn {
        self.with_state(|state| state.irq())
    }

    /// Threaded half of the interrupt handler
    pub fn thread_irq(&self) -> IrqReturn {
        let isr = self.with_state(|state| core::mem::take(&mut state.thread_isr));

        if isr & SDHCI_INT_CARD_INT != 0 {
            self.client.signal_sdio_irq();

            self.with_state(|state| {
                if state.flags.contains(HostFlags::SDIO_IRQ_ENABLED) {
                    state.enable_sdio_irq_nolock(true);
                }
            });
        }

        if isr != 0 {
            IrqReturn::Handled
        } else {
            IrqReturn::None
        }
    }

    /// DMA engine completion callback
    pub fn dma_complete(&self) {
        self.with_state(|state| state.dma_complete());
    }

    /// Watchdog expiry callback
    pub fn watchdog_expired(&self) {
        self.with_state(|state| state.watchdog_expired());
    }

    /// Deferred completion; hands the finished request to the client
    pub fn finish_request(&self) {
        let done = self.with_state(|state| state.complete());
        if let Some(request) = done {
            self.client.request_done(request);
        }
    }

    /// Detach from the controller
    ///
    /// A request still in flight completes with [`MmcError::NoMedium`]
    /// through the usual deferred completion.
    pub fn remove(&self) {
        self.with_state(|state| state.remove());
    }

    pub fn dump_regs(&self) {
        self.with_state(|state| state.dump_regs());
    }
}
