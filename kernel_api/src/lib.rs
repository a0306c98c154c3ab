//! # Kernel API
//!
//! The interface between processes (and interrupt handlers) and the kernel.
//!
//! ## Philosophy
//!
//! The kernel provides **mechanisms**, not policies:
//! - Process creation, suspension and termination
//! - Priority scheduling with round-robin inside a priority tier
//! - Counting semaphores, baton-pass locks and timed sleep
//! - Bounded per-process mailboxes
//!
//! ## Design Goals
//!
//! 1. **Testability**: the whole surface can be driven from ordinary tests
//! 2. **Explicitness**: every failure is a typed error, never a silent no-op
//! 3. **Return-code compatibility**: [`Status`] maps any result onto the
//!    classic OK / ERROR / NO-MESSAGE codes

pub mod error;
pub mod kernel;
pub mod time;

pub use error::{KernelError, Status};
pub use kernel::{KernelApi, LockCell, ProcessDescriptor, ProcessInfo, DEFAULT_STACK_SIZE};
pub use time::{ClockTime, Duration};
