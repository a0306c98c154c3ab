//! # Hardware Abstraction Layer (HAL)
//!
//! The two pieces of hardware the kernel core depends on: an interrupt
//! line it can mask, and a periodic tick counter.
//!
//! ## Philosophy
//!
//! **The kernel core never names a device register.**
//!
//! Everything platform-specific sits behind these traits, so the same
//! scheduler runs against a real controller or a simulated one.

pub mod interrupts;
pub mod timer;

pub use interrupts::InterruptHal;
pub use timer::TimerDevice;
