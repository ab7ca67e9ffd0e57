//! Poll deadlines on the wrapping millisecond clock

use stkprog_hal::Clock;

use crate::traits::ProtocolError;

/// Point in time after which a poll gives up
///
/// Comparison is done on the wrapped difference, so a deadline set just
/// before the millisecond counter rolls over still expires on time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Deadline {
    at: u32,
}

impl Deadline {
    /// Deadline `timeout_ms` after `now`
    pub const fn at(now: u32, timeout_ms: u32) -> Self {
        Self {
            at: now.wrapping_add(timeout_ms),
        }
    }

    /// Deadline `timeout_ms` from the current time of `clock`
    pub fn after<C: Clock + ?Sized>(clock: &C, timeout_ms: u32) -> Self {
        Self::at(clock.now_ms(), timeout_ms)
    }

    /// Whether `now` lies strictly past the deadline
    pub fn has_passed(&self, now: u32) -> bool {
        (now.wrapping_sub(self.at) as i32) > 0
    }

    /// Whether the deadline has passed on `clock`
    pub fn expired<C: Clock + ?Sized>(&self, clock: &C) -> bool {
        self.has_passed(clock.now_ms())
    }
}

/// Busy-poll `ready` until it holds or `timeout_ms` passes
///
/// `ready` is always sampled at least once, and once more after the
/// deadline check fails, so a target that becomes ready right at the end
/// is not reported as timed out.
pub fn wait_until<H, F>(hw: &mut H, timeout_ms: u32, mut ready: F) -> Result<(), ProtocolError>
where
    H: Clock,
    F: FnMut(&mut H) -> bool,
{
    let deadline = Deadline::after(hw, timeout_ms);
    loop {
        if ready(hw) {
            return Ok(());
        }
        if deadline.expired(hw) {
            return if ready(hw) {
                Ok(())
            } else {
                warn!("ready poll timed out after {} ms", timeout_ms);
                Err(ProtocolError::ReadyTimeout)
            };
        }
    }
}
