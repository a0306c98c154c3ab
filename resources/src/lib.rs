//! # Resources
//!
//! Segregated buffer pools for the kernel's buffer allocator.
//!
//! ## Philosophy
//!
//! - **Pools are finite and explicit**: every size class has a hard cap
//! - **Exhaustion is not failure**: a class at its cap reports
//!   `Exhausted`, which a caller may wait out; only an oversized request
//!   is a hard error
//! - **Accounting is deterministic and testable**
//!
//! ## Core Concepts
//!
//! - [`SizeClass`]: one row of the class table (buffer size, cap)
//! - [`BufferPool`]: per-class free and allocated chains plus counts
//! - [`Buffer`]: an owned buffer carrying a `BUFR` header that is checked
//!   when it comes back
//!
//! This crate only does accounting. Blocking a process until a buffer is
//! released is the kernel's job.

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};
use core_types::{Anchor, Arena, NodeId, Pid};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Header marker of every pool buffer
pub const BUFFER_MAGIC: [u8; 4] = *b"BUFR";

/// One row of the size-class table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeClass {
    /// Bytes per buffer
    pub size: usize,
    /// Maximum number of buffers ever materialized; 0 disables the class
    pub max_allowed: usize,
}

impl SizeClass {
    pub const fn new(size: usize, max_allowed: usize) -> Self {
        Self { size, max_allowed }
    }
}

/// The standard class table
pub const DEFAULT_CLASSES: [SizeClass; 7] = [
    SizeClass::new(256, 200),
    SizeClass::new(512, 100),
    SizeClass::new(1600, 50),
    SizeClass::new(4096, 0),
    SizeClass::new(8192, 5),
    SizeClass::new(16384, 5),
    SizeClass::new(32768, 5),
];

/// Pool errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// No enabled class is large enough
    #[error("Buffer request of {0} bytes exceeds every enabled class")]
    TooLarge(usize),

    /// The class is at its cap and has no free buffer
    #[error("Buffer class {class} ({size} bytes) exhausted")]
    Exhausted { class: usize, size: usize },

    /// Header check failed or the buffer is not out on loan from this pool
    #[error("Buffer failed validation")]
    BadBuffer,
}

/// Per-class counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassStats {
    pub size: usize,
    pub max_allowed: usize,
    /// Buffers currently handed out
    pub allocated: usize,
    /// Buffers parked on the free chain
    pub free: usize,
    /// Callers waiting for this class
    pub waiting: usize,
}

impl fmt::Display for ClassStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}B[alloc={}, free={}, cap={}, waiting={}]",
            self.size, self.allocated, self.free, self.max_allowed, self.waiting
        )
    }
}

#[derive(Debug)]
struct Record {
    class: usize,
    owner: Option<Pid>,
    allocated: bool,
    /// Present while the buffer sits on the free chain
    storage: Option<Vec<u8>>,
}

#[derive(Debug)]
struct ClassState {
    class: SizeClass,
    allocated: usize,
    free_count: usize,
    waiting: usize,
    free: Anchor,
    alloc: Anchor,
}

impl ClassState {
    fn materialized(&self) -> usize {
        self.allocated + self.free_count
    }
}

/// A buffer on loan from a [`BufferPool`]
///
/// Dereferences to its full class-sized byte area.
#[derive(Debug)]
pub struct Buffer {
    magic: [u8; 4],
    pool: u32,
    class: usize,
    record: NodeId,
    owner: Option<Pid>,
    data: Vec<u8>,
}

impl Buffer {
    /// Size class index this buffer belongs to
    pub fn class(&self) -> usize {
        self.class
    }

    /// Process that allocated the buffer, if any
    pub fn owner(&self) -> Option<Pid> {
        self.owner
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Segregated buffer pool
#[derive(Debug)]
pub struct BufferPool {
    id: u32,
    classes: Vec<ClassState>,
    records: Arena<Record>,
}

impl BufferPool {
    /// Creates a pool over a class table, ordered by ascending size
    pub fn new(classes: &[SizeClass]) -> Self {
        let mut table: Vec<SizeClass> = classes.to_vec();
        table.sort_by_key(|class| class.size);
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            classes: table
                .into_iter()
                .map(|class| ClassState {
                    class,
                    allocated: 0,
                    free_count: 0,
                    waiting: 0,
                    free: Anchor::new(),
                    alloc: Anchor::new(),
                })
                .collect(),
            records: Arena::new(),
        }
    }

    /// Number of size classes
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Smallest enabled class that fits `size`
    pub fn select_class(&self, size: usize) -> Result<usize, PoolError> {
        self.classes
            .iter()
            .position(|state| state.class.size >= size && state.class.max_allowed > 0)
            .ok_or(PoolError::TooLarge(size))
    }

    /// Takes a buffer of at least `size` bytes without waiting
    ///
    /// Reuses a freed buffer of the class first, then materializes a new
    /// one while the class is under its cap.
    pub fn try_allocate(&mut self, size: usize, owner: Option<Pid>) -> Result<Buffer, PoolError> {
        let class = self.select_class(size)?;
        let state = &mut self.classes[class];

        let (record, data) = if let Some(node) = self.records.pop(&mut state.free) {
            state.free_count -= 1;
            let data = self
                .records
                .get_mut(node)
                .and_then(|record| record.storage.take())
                .unwrap_or_else(|| vec![0; state.class.size]);
            (node, data)
        } else if state.materialized() < state.class.max_allowed {
            let node = self.records.insert(Record {
                class,
                owner: None,
                allocated: false,
                storage: None,
            });
            (node, vec![0; state.class.size])
        } else {
            return Err(PoolError::Exhausted {
                class,
                size: state.class.size,
            });
        };

        if let Some(entry) = self.records.get_mut(record) {
            entry.owner = owner;
            entry.allocated = true;
        }
        self.records.push(&mut state.alloc, record);
        state.allocated += 1;

        Ok(Buffer {
            magic: BUFFER_MAGIC,
            pool: self.id,
            class,
            record,
            owner,
            data,
        })
    }

    /// Returns a buffer to its class's free chain
    ///
    /// Returns the class index so a caller can hand the buffer's slot to a
    /// waiter of that class.
    pub fn release(&mut self, buffer: Buffer) -> Result<usize, PoolError> {
        if buffer.magic != BUFFER_MAGIC || buffer.pool != self.id {
            return Err(PoolError::BadBuffer);
        }
        let state = self
            .classes
            .get_mut(buffer.class)
            .ok_or(PoolError::BadBuffer)?;
        match self.records.get(buffer.record) {
            Some(record) if record.allocated && record.class == buffer.class => {}
            _ => return Err(PoolError::BadBuffer),
        }

        self.records.unchain(&mut state.alloc, buffer.record);
        if let Some(record) = self.records.get_mut(buffer.record) {
            record.allocated = false;
            record.owner = None;
            record.storage = Some(buffer.data);
        }
        self.records.push(&mut state.free, buffer.record);
        state.allocated -= 1;
        state.free_count += 1;
        Ok(buffer.class)
    }

    /// Records one more caller waiting on `class`
    pub fn add_waiter(&mut self, class: usize) {
        if let Some(state) = self.classes.get_mut(class) {
            state.waiting += 1;
        }
    }

    /// Records that a waiter on `class` stopped waiting
    pub fn remove_waiter(&mut self, class: usize) {
        if let Some(state) = self.classes.get_mut(class) {
            state.waiting = state.waiting.saturating_sub(1);
        }
    }

    /// Counters for one class
    pub fn class_stats(&self, class: usize) -> Option<ClassStats> {
        self.classes.get(class).map(|state| ClassStats {
            size: state.class.size,
            max_allowed: state.class.max_allowed,
            allocated: state.allocated,
            free: state.free_count,
            waiting: state.waiting,
        })
    }

    /// Counters for every class, ascending by size
    pub fn stats(&self) -> Vec<ClassStats> {
        (0..self.classes.len())
            .filter_map(|class| self.class_stats(class))
            .collect()
    }

    /// Owners of buffers currently on loan from `class`, most recent first
    pub fn owners(&self, class: usize) -> Vec<Option<Pid>> {
        self.classes
            .get(class)
            .map(|state| {
                self.records
                    .iter(&state.alloc)
                    .map(|(_, record)| record.owner)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(&DEFAULT_CLASSES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::Handle;

    #[test]
    fn test_select_smallest_fitting_class() {
        let pool = BufferPool::default();
        assert_eq!(pool.select_class(1), Ok(0));
        assert_eq!(pool.select_class(256), Ok(0));
        assert_eq!(pool.select_class(257), Ok(1));
        assert_eq!(pool.select_class(1600), Ok(2));
        assert_eq!(pool.select_class(32768), Ok(6));
    }

    #[test]
    fn test_disabled_class_is_skipped() {
        let pool = BufferPool::default();
        // 4096 has a cap of 0, so the next class up serves it
        assert_eq!(pool.select_class(2000), Ok(4));
        assert_eq!(pool.select_class(4096), Ok(4));
    }

    #[test]
    fn test_oversized_request() {
        let mut pool = BufferPool::default();
        assert_eq!(pool.select_class(32769), Err(PoolError::TooLarge(32769)));
        assert_eq!(
            pool.try_allocate(40_000, None).err(),
            Some(PoolError::TooLarge(40_000))
        );
    }

    #[test]
    fn test_allocate_and_release_counts() {
        let mut pool = BufferPool::default();
        let owner = Pid::from_handle(Handle::from_raw(0x0001_0000));
        let buffer = pool.try_allocate(100, Some(owner)).unwrap();
        assert_eq!(buffer.capacity(), 256);
        assert_eq!(buffer.owner(), Some(owner));
        assert_eq!(pool.owners(0), vec![Some(owner)]);

        let stats = pool.class_stats(0).unwrap();
        assert_eq!((stats.allocated, stats.free), (1, 0));

        assert_eq!(pool.release(buffer), Ok(0));
        let stats = pool.class_stats(0).unwrap();
        assert_eq!((stats.allocated, stats.free), (0, 1));
        assert!(pool.owners(0).is_empty());
    }

    #[test]
    fn test_free_buffer_is_reused() {
        let mut pool = BufferPool::new(&[SizeClass::new(64, 1)]);
        let mut buffer = pool.try_allocate(10, None).unwrap();
        buffer[0] = 0xAB;
        pool.release(buffer).unwrap();

        let again = pool.try_allocate(10, None).unwrap();
        assert_eq!(again[0], 0xAB);
        let stats = pool.class_stats(0).unwrap();
        assert_eq!((stats.allocated, stats.free), (1, 0));
    }

    #[test]
    fn test_cap_reports_exhaustion() {
        let mut pool = BufferPool::new(&[SizeClass::new(64, 2), SizeClass::new(128, 1)]);
        let a = pool.try_allocate(64, None).unwrap();
        let _b = pool.try_allocate(64, None).unwrap();
        assert_eq!(
            pool.try_allocate(64, None).err(),
            Some(PoolError::Exhausted { class: 0, size: 64 })
        );

        pool.release(a).unwrap();
        assert!(pool.try_allocate(64, None).is_ok());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut pool = BufferPool::default();
        let mut buffer = pool.try_allocate(10, None).unwrap();
        buffer.magic = *b"XXXX";
        assert_eq!(pool.release(buffer), Err(PoolError::BadBuffer));
        assert_eq!(pool.class_stats(0).unwrap().allocated, 1);
    }

    #[test]
    fn test_foreign_buffer_rejected() {
        let mut first = BufferPool::default();
        let mut second = BufferPool::default();
        let buffer = first.try_allocate(10, None).unwrap();
        assert_eq!(second.release(buffer), Err(PoolError::BadBuffer));
    }

    #[test]
    fn test_waiter_accounting() {
        let mut pool = BufferPool::default();
        pool.add_waiter(2);
        pool.add_waiter(2);
        pool.remove_waiter(2);
        assert_eq!(pool.class_stats(2).unwrap().waiting, 1);
        pool.remove_waiter(2);
        pool.remove_waiter(2);
        assert_eq!(pool.class_stats(2).unwrap().waiting, 0);
    }

    #[test]
    fn test_stats_serialization() {
        let pool = BufferPool::default();
        let stats = pool.stats();
        assert_eq!(stats.len(), 7);
        let json = serde_json::to_string(&stats).unwrap();
        let back: Vec<ClassStats> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
        assert_eq!(format!("{}", stats[0]), "256B[alloc=0, free=0, cap=200, waiting=0]");
    }
}
