//! # Core Types
//!
//! The building blocks shared by every kernel layer.
//!
//! ## Philosophy
//!
//! - **Indices, not pointers**: queues link entities by arena index, so an
//!   entity moves between queues without ownership tricks.
//! - **Validated references**: every kernel object is reached through a
//!   generation-checked handle; a stale handle fails instead of aliasing.
//!
//! ## Key Types
//!
//! - [`Arena`] / [`Anchor`]: doubly-linked chains over an entity arena
//! - [`HandleTable`] / [`Handle`]: use-counted indirection with deferred destroy
//! - [`Pid`], [`SemaphoreId`], [`Priority`], [`ProcessState`]

pub mod chain;
pub mod handle;
pub mod ids;

pub use chain::{Anchor, Arena, ChainIter, NodeId};
pub use handle::{Destroyed, Handle, HandleError, HandleTable, MAX_SEGMENTS, MAX_USES, SLOTS_PER_SEGMENT};
pub use ids::{Pid, Priority, ProcessFlags, ProcessState, SemaphoreId};
