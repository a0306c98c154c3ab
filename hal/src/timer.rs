//! # Timer Device
//!
//! Hardware abstraction for the periodic tick that drives the kernel clock.
//!
//! ## Design
//!
//! The device only counts. It does not know the tick period, wall-clock
//! time, or who is sleeping; the kernel converts elapsed ticks into clock
//! time and expires sleepers on its own schedule.
//!
//! 1. **Monotonic**: ticks never go backwards
//! 2. **Non-blocking**: polling always returns immediately
//! 3. **Cumulative**: the count is total ticks since the device started

/// Hardware timer device trait
///
/// # Examples
///
/// ```
/// use hal::TimerDevice;
///
/// struct Fixed(u64);
///
/// impl TimerDevice for Fixed {
///     fn poll_ticks(&mut self) -> u64 {
///         self.0
///     }
/// }
///
/// let mut timer = Fixed(12);
/// assert_eq!(timer.ticks_since(10), 2);
/// ```
pub trait TimerDevice {
    /// Returns the cumulative tick count
    fn poll_ticks(&mut self) -> u64;

    /// Ticks elapsed since an earlier reading
    ///
    /// A reading ahead of the device (which a monotonic device never
    /// produces) counts as zero elapsed ticks.
    fn ticks_since(&mut self, earlier: u64) -> u64 {
        self.poll_ticks().saturating_sub(earlier)
    }
}
