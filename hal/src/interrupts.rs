//! Interrupt line control
//!
//! The kernel never touches the CPU's interrupt flag directly. Its gate
//! counts nested disables and calls into this trait only on the outermost
//! transition, so an implementation sees strictly alternating
//! `disable_interrupts` / `enable_interrupts` calls.

/// Interrupt controller trait
///
/// Implemented by the architecture layer (or by a simulated controller in
/// tests). Nesting is not this trait's concern.
pub trait InterruptHal {
    /// Unmasks interrupts
    fn enable_interrupts(&mut self);

    /// Masks interrupts
    fn disable_interrupts(&mut self);

    /// Returns whether interrupts are currently unmasked
    fn interrupts_enabled(&self) -> bool;
}
