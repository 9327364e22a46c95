//! Platform seams for the host driver
//!
//! The SDHCI register interface is standardized, so the driver itself is
//! portable. Only the parts below are supplied by the platform that attaches
//! the controller:
//! - the MMIO window and (optionally) AXI bus counters
//! - busy-wait delays
//! - a one-shot watchdog timer
//! - a deferred context for request completion
//! - masking of the host interrupt on the local CPU
//! - the upstream MMC core that receives finished requests

use core::ptr;

use crate::drivers::dma::DmaChannel;
use crate::drivers::sdhci::request::Request;
use crate::time::Delay;

/// Outstanding AXI transactions as reported by the interconnect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AxiCounts {
    pub reads: u32,
    pub writes: u32,
}

/// 32-bit register window
///
/// Offsets are byte offsets and always 4-byte aligned; sub-word accesses are
/// synthesized by the driver.
pub trait Mmio {
    fn read32(&self, offset: u16) -> u32;

    fn write32(&self, offset: u16, value: u32);

    /// Outstanding AXI reads/writes, used only by the debug pacing mask
    fn axi_outstanding(&self) -> AxiCounts {
        AxiCounts::default()
    }
}

/// Volatile MMIO window at a fixed virtual address
pub struct MmioWindow {
    base: usize,
}

// Safety: the window is only touched through volatile accesses, serialized
// by the host lock
unsafe impl Send for MmioWindow {}
unsafe impl Sync for MmioWindow {}

impl MmioWindow {
    /// Create a window over an already mapped register block
    ///
    /// # Safety
    ///
    /// `base` must point to a mapped SDHCI register block of at least 256
    /// bytes that stays mapped for the lifetime of the window.
    pub unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    pub fn base(&self) -> usize {
        self.base
    }
}

impl Mmio for MmioWindow {
    fn read32(&self, offset: u16) -> u32 {
        unsafe { ptr::read_volatile((self.base + offset as usize) as *const u32) }
    }

    fn write32(&self, offset: u16, value: u32) {
        unsafe { ptr::write_volatile((self.base + offset as usize) as *mut u32, value) }
    }
}

/// One-shot timer guarding against a silent controller
///
/// On expiry the platform calls [`Host::watchdog_expired`](crate::Host::watchdog_expired).
pub trait WatchdogTimer {
    /// (Re)arm the timer to fire `timeout_ms` from now
    fn arm(&self, timeout_ms: u64);

    /// Cancel a pending expiry
    fn disarm(&self);
}

/// Deferred, schedulable context
///
/// `schedule_finish` must be cheap and callable from interrupt context; the
/// platform later calls [`Host::finish_request`](crate::Host::finish_request)
/// outside the interrupt path. Scheduling twice before it runs is allowed.
pub trait DeferredWork {
    fn schedule_finish(&self);
}

/// Local masking of the host interrupt line
///
/// The host lock is taken from both thread and interrupt context, so the
/// interrupt must stay off on the CPU holding it. Masking the whole CPU, the
/// way `spin_lock_irqsave` does, satisfies this as well.
pub trait IrqControl {
    /// Mask the interrupt, returning whether it was enabled
    fn disable_irq(&self) -> bool;

    /// Put back the state returned by [`disable_irq`](IrqControl::disable_irq)
    fn restore_irq(&self, was_enabled: bool);
}

/// Upstream MMC core
pub trait MmcClient {
    /// A submitted request has been resolved. Called without the host lock.
    fn request_done(&self, request: Request);

    /// The card raised an SDIO interrupt. Called from the threaded handler.
    fn signal_sdio_irq(&self);
}

/// Associated collaborator types of one platform
pub trait Platform {
    type Mmio: Mmio;
    type Delay: Delay;
    type Dma: DmaChannel;
    type Timer: WatchdogTimer;
    type Deferred: DeferredWork;
    type Client: MmcClient;
    type Irq: IrqControl;
}

/// Receive and transmit DMA channels, owned for the life of the host
pub struct DmaChannels<C> {
    pub rx: C,
    pub tx: C,
}

/// Everything the attachment code hands over to the driver
pub struct Resources<P: Platform> {
    pub mmio: P::Mmio,
    /// Physical base of the register window (before bus translation)
    pub phys_addr: u32,
    /// Controller input clock in Hz
    pub max_clock: u32,
    pub delay: P::Delay,
    /// Absent channels are a supported PIO-only mode
    pub dma: Option<DmaChannels<P::Dma>>,
    pub timer: P::Timer,
    pub deferred: P::Deferred,
    pub client: P::Client,
    pub irq_ctl: P::Irq,
}
