//! Time source and target clock abstractions
//!
//! Drivers busy-wait and poll against [`Clock`]; tests substitute a
//! simulated clock that advances on every delay, so no real time passes.

/// Monotonic time source with busy delays
pub trait Clock {
    /// Milliseconds since an arbitrary epoch; wraps at `u32::MAX`
    fn now_ms(&self) -> u32;

    /// Busy-wait for `ms` milliseconds
    fn delay_ms(&mut self, ms: u32);

    /// Busy-wait for `us` microseconds
    fn delay_us(&mut self, us: u32);
}

/// Free-running clock fed to the target's XTAL1 input
///
/// ISP targets fused for an external clock will not answer without one.
pub trait ClockOutput {
    /// Start toggling the clock output at roughly `frequency` Hz
    fn start_clock(&mut self, frequency: u32);

    /// Stop the clock output
    fn stop_clock(&mut self);
}
