//! # Handle Table
//!
//! Validated, use-counted indirection to kernel objects.
//!
//! ## Design
//!
//! A [`Handle`] packs `slot | segment << 8 | generation << 16` into 32 bits.
//! Slots are allocated lazily, 256 to a segment, up to 256 segments. A
//! segment is never released once allocated; free slots are recycled
//! through an index-linked free list.
//!
//! Each slot carries a use count:
//!
//! - `create` sets it to 2: one for "exists", one for the creator's setup
//!   window, which the creator ends with `unprotect`.
//! - `protect` / `unprotect` pin and unpin the resource.
//! - `destroy` drops the "exists" reference. If no protector remains the
//!   slot is retired immediately. Otherwise the destroyer is recorded and
//!   the last `unprotect` hands it back, at which point the generation
//!   moves on and the destroyer reclaims the resource.
//!
//! Every retirement bumps the slot generation, so a stale handle value can
//! never reach the slot's next occupant.

use core::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Slots per segment
pub const SLOTS_PER_SEGMENT: usize = 256;

/// Maximum number of segments per table
pub const MAX_SEGMENTS: usize = 256;

/// Use count ceiling
pub const MAX_USES: u16 = 0xFFFF;

/// Opaque reference to a resource in a [`HandleTable`]
///
/// The raw value 0 is never produced by a table and serves as "no handle".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(u32);

impl Handle {
    /// The null handle
    pub const NULL: Handle = Handle(0);

    fn compose(segment: usize, slot: usize, generation: u16) -> Self {
        Self((slot as u32 & 0xFF) | ((segment as u32 & 0xFF) << 8) | ((generation as u32) << 16))
    }

    /// Rebuilds a handle from its raw value
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw 32-bit encoding
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Returns whether this is the null handle
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn slot(self) -> usize {
        (self.0 & 0xFF) as usize
    }

    pub fn segment(self) -> usize {
        ((self.0 >> 8) & 0xFF) as usize
    }

    pub fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}.{:02x}#{}",
            self.segment(),
            self.slot(),
            self.generation()
        )
    }
}

/// Handle table errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    /// All 256 segments are allocated and no slot is free
    #[error("handle table exhausted")]
    Exhausted,

    /// Wrong generation, free slot, or out-of-range handle
    #[error("invalid handle {0}")]
    Invalid(Handle),

    /// Destroy without a destroyer while protectors remain
    #[error("handle {0} is still protected")]
    InUse(Handle),

    /// Protect would overflow the use count
    #[error("handle {0} use count overflow")]
    UseOverflow(Handle),

    /// Unprotect without a matching protect
    #[error("handle {0} is not protected")]
    NotProtected(Handle),

    /// A destroy is already waiting on this handle
    #[error("handle {0} is already being destroyed")]
    DestroyPending(Handle),
}

/// Outcome of [`HandleTable::destroy`]
#[derive(Debug, PartialEq, Eq)]
pub enum Destroyed<T> {
    /// The slot was retired; here is the resource
    Retired(T),
    /// Protectors remain; the destroyer is handed back by the last `unprotect`
    Pending,
}

#[derive(Debug)]
enum Entry<T> {
    Free {
        next: Option<u16>,
    },
    Occupied {
        resource: T,
        uses: u16,
        destroyer: Option<Handle>,
    },
    /// Generation has moved on; waiting for the destroyer to reclaim
    Retired {
        resource: T,
        from: Handle,
    },
}

#[derive(Debug)]
struct Slot<T> {
    generation: u16,
    entry: Entry<T>,
}

fn next_generation(generation: u16) -> u16 {
    match generation.wrapping_add(1) {
        0 => 1,
        g => g,
    }
}

/// Segmented handle table
#[derive(Debug)]
pub struct HandleTable<T> {
    segments: Vec<Box<[Slot<T>]>>,
    free: Option<u16>,
    live: usize,
}

impl<T> HandleTable<T> {
    /// Creates an empty table; no segment is allocated until first use
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
            free: None,
            live: 0,
        }
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of allocated segments
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn slot(&self, handle: Handle) -> Option<&Slot<T>> {
        let slot = self.segments.get(handle.segment())?.get(handle.slot())?;
        (slot.generation == handle.generation()).then_some(slot)
    }

    fn slot_mut(&mut self, handle: Handle) -> Option<&mut Slot<T>> {
        let slot = self
            .segments
            .get_mut(handle.segment())?
            .get_mut(handle.slot())?;
        (slot.generation == handle.generation()).then_some(slot)
    }

    fn slot_at(&mut self, index: u16) -> &mut Slot<T> {
        let index = index as usize;
        &mut self.segments[index / SLOTS_PER_SEGMENT][index % SLOTS_PER_SEGMENT]
    }

    fn grow(&mut self) -> Result<(), HandleError> {
        if self.segments.len() >= MAX_SEGMENTS {
            return Err(HandleError::Exhausted);
        }
        let base = self.segments.len() * SLOTS_PER_SEGMENT;
        let head = self.free;
        let segment: Vec<Slot<T>> = (0..SLOTS_PER_SEGMENT)
            .map(|i| Slot {
                generation: 1,
                entry: Entry::Free {
                    next: if i + 1 < SLOTS_PER_SEGMENT {
                        Some((base + i + 1) as u16)
                    } else {
                        head
                    },
                },
            })
            .collect();
        self.segments.push(segment.into_boxed_slice());
        self.free = Some(base as u16);
        Ok(())
    }

    fn release(&mut self, index: u16) {
        let head = self.free;
        self.slot_at(index).entry = Entry::Free { next: head };
        self.free = Some(index);
    }

    /// Stores a resource and returns its handle, with a use count of 2
    pub fn create(&mut self, resource: T) -> Result<Handle, HandleError> {
        if self.free.is_none() {
            self.grow()?;
        }
        let index = self.free.ok_or(HandleError::Exhausted)?;
        let slot = self.slot_at(index);
        let next = match slot.entry {
            Entry::Free { next } => next,
            _ => return Err(HandleError::Exhausted),
        };
        slot.entry = Entry::Occupied {
            resource,
            uses: 2,
            destroyer: None,
        };
        let generation = slot.generation;
        self.free = next;
        self.live += 1;

        let index = index as usize;
        Ok(Handle::compose(
            index / SLOTS_PER_SEGMENT,
            index % SLOTS_PER_SEGMENT,
            generation,
        ))
    }

    /// Looks up a resource without touching its use count
    pub fn find(&self, handle: Handle) -> Option<&T> {
        match &self.slot(handle)?.entry {
            Entry::Occupied { resource, uses, .. } if *uses > 0 => Some(resource),
            _ => None,
        }
    }

    pub fn find_mut(&mut self, handle: Handle) -> Option<&mut T> {
        match &mut self.slot_mut(handle)?.entry {
            Entry::Occupied { resource, uses, .. } if *uses > 0 => Some(resource),
            _ => None,
        }
    }

    /// Returns whether `handle` currently names a live resource
    pub fn contains(&self, handle: Handle) -> bool {
        self.find(handle).is_some()
    }

    /// Pins a resource against destruction
    pub fn protect(&mut self, handle: Handle) -> Result<&mut T, HandleError> {
        let slot = self.slot_mut(handle).ok_or(HandleError::Invalid(handle))?;
        match &mut slot.entry {
            Entry::Occupied { destroyer: Some(_), .. } => Err(HandleError::DestroyPending(handle)),
            Entry::Occupied { uses, .. } if *uses == MAX_USES => {
                Err(HandleError::UseOverflow(handle))
            }
            Entry::Occupied {
                resource, uses, ..
            } if *uses > 0 => {
                *uses += 1;
                Ok(resource)
            }
            _ => Err(HandleError::Invalid(handle)),
        }
    }

    /// Releases one pin
    ///
    /// Returns the waiting destroyer when this was the last pin of a
    /// handle being destroyed. The slot is then retired and the destroyer
    /// collects the resource with [`HandleTable::reclaim`].
    pub fn unprotect(&mut self, handle: Handle) -> Result<Option<Handle>, HandleError> {
        let slot = self.slot_mut(handle).ok_or(HandleError::Invalid(handle))?;
        let (uses, destroyer) = match &slot.entry {
            Entry::Occupied {
                uses, destroyer, ..
            } if *uses > 0 => (*uses, *destroyer),
            _ => return Err(HandleError::Invalid(handle)),
        };

        match destroyer {
            None if uses <= 1 => Err(HandleError::NotProtected(handle)),
            Some(destroyer) if uses == 1 => {
                let entry = core::mem::replace(&mut slot.entry, Entry::Free { next: None });
                if let Entry::Occupied { resource, .. } = entry {
                    slot.entry = Entry::Retired {
                        resource,
                        from: handle,
                    };
                }
                slot.generation = next_generation(slot.generation);
                Ok(Some(destroyer))
            }
            _ => {
                if let Entry::Occupied { uses, .. } = &mut slot.entry {
                    *uses -= 1;
                }
                Ok(None)
            }
        }
    }

    /// Drops the "exists" reference of a handle
    ///
    /// With no protectors left the slot is retired at once. Otherwise the
    /// call succeeds only when a `destroyer` is given: it is recorded and
    /// returned by the final `unprotect`. Without a destroyer a protected
    /// handle is left untouched and `InUse` is returned.
    pub fn destroy(
        &mut self,
        handle: Handle,
        destroyer: Option<Handle>,
    ) -> Result<Destroyed<T>, HandleError> {
        let slot = self.slot_mut(handle).ok_or(HandleError::Invalid(handle))?;
        let retire_now = match &mut slot.entry {
            Entry::Occupied {
                destroyer: Some(_),
                ..
            } => return Err(HandleError::DestroyPending(handle)),
            Entry::Occupied { uses, .. } if *uses == 1 => true,
            Entry::Occupied {
                uses,
                destroyer: pending,
                ..
            } if *uses > 1 => match destroyer {
                Some(destroyer) => {
                    *uses -= 1;
                    *pending = Some(destroyer);
                    false
                }
                None => return Err(HandleError::InUse(handle)),
            },
            _ => return Err(HandleError::Invalid(handle)),
        };

        if !retire_now {
            return Ok(Destroyed::Pending);
        }

        slot.generation = next_generation(slot.generation);
        let entry = core::mem::replace(&mut slot.entry, Entry::Free { next: None });
        let index = (handle.segment() * SLOTS_PER_SEGMENT + handle.slot()) as u16;
        self.release(index);
        self.live -= 1;
        match entry {
            Entry::Occupied { resource, .. } => Ok(Destroyed::Retired(resource)),
            _ => Err(HandleError::Invalid(handle)),
        }
    }

    /// Collects the resource of a handle whose pending destroy completed
    pub fn reclaim(&mut self, handle: Handle) -> Option<T> {
        let slot = self
            .segments
            .get_mut(handle.segment())?
            .get_mut(handle.slot())?;
        match &slot.entry {
            Entry::Retired { from, .. } if *from == handle => {}
            _ => return None,
        }
        let entry = core::mem::replace(&mut slot.entry, Entry::Free { next: None });
        let index = (handle.segment() * SLOTS_PER_SEGMENT + handle.slot()) as u16;
        self.release(index);
        self.live -= 1;
        match entry {
            Entry::Retired { resource, .. } => Some(resource),
            _ => None,
        }
    }

    /// Returns whether a destroy is waiting on this handle
    pub fn destroy_pending(&self, handle: Handle) -> bool {
        matches!(
            self.slot(handle).map(|slot| &slot.entry),
            Some(Entry::Occupied {
                destroyer: Some(_),
                ..
            })
        )
    }

    /// Current use count of a live handle
    pub fn uses(&self, handle: Handle) -> Option<u16> {
        match &self.slot(handle)?.entry {
            Entry::Occupied { uses, .. } => Some(*uses),
            _ => None,
        }
    }

    /// Iterates over live handles in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        self.segments
            .iter()
            .enumerate()
            .flat_map(|(segment, slots)| {
                slots.iter().enumerate().filter_map(move |(index, slot)| match &slot.entry {
                    Entry::Occupied { resource, uses, .. } if *uses > 0 => {
                        Some((Handle::compose(segment, index, slot.generation), resource))
                    }
                    _ => None,
                })
            })
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
