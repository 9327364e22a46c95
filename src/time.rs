//! Busy-wait delays and bounded polling
//!
//! The driver never sleeps. Every wait is a bounded number of fixed-length
//! delay steps so that the caller can report how long the hardware stalled.

/// Busy-wait delay provider
pub trait Delay {
    /// Spin for at least `us` microseconds
    fn delay_us(&self, us: u32);

    /// Spin for at least `ms` milliseconds
    fn delay_ms(&self, ms: u32) {
        for _ in 0..ms {
            self.delay_us(1000);
        }
    }
}

impl<D: Delay + ?Sized> Delay for &D {
    fn delay_us(&self, us: u32) {
        (**self).delay_us(us)
    }

    fn delay_ms(&self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

/// The polled condition never became true within the step budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitExpired {
    /// Number of delay steps spent before giving up
    pub steps: u32,
}

/// Poll `done` up to `steps` times, sleeping `step_us` between attempts.
///
/// Returns the number of delay steps that elapsed before `done` returned
/// true. The condition is checked once more than the step budget so that a
/// condition becoming true during the last delay is still observed.
pub fn wait_for<D, F>(delay: &D, steps: u32, step_us: u32, mut done: F) -> Result<u32, WaitExpired>
where
    D: Delay + ?Sized,
    F: FnMut() -> bool,
{
    let mut waited = 0;
    while !done() {
        if waited == steps {
            return Err(WaitExpired { steps: waited });
        }
        waited += 1;
        delay.delay_us(step_us);
    }
    Ok(waited)
}
