//! Kernel API trait and process management types

use crate::{ClockTime, KernelError};
use core::sync::atomic::{AtomicU32, Ordering};
use core_types::{Pid, Priority, ProcessFlags, ProcessState, SemaphoreId};
use serde::{Deserialize, Serialize};

/// Default requested stack size for a new process, in bytes
pub const DEFAULT_STACK_SIZE: usize = 1024;

/// Descriptor for creating a new process
///
/// The entry point is passed separately to [`KernelApi::spawn`]; anything
/// the process needs is captured by its closure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    /// Human-readable name for debugging (truncated by the kernel)
    pub name: String,
    /// Requested stack size in bytes (rounded up and floored by the kernel)
    pub stack_size: usize,
    /// Scheduling priority, at least 1
    pub priority: Priority,
    pub flags: ProcessFlags,
}

impl ProcessDescriptor {
    /// Creates a descriptor with the default stack and no flags
    pub fn new(name: impl Into<String>, priority: i16) -> Self {
        Self {
            name: name.into(),
            stack_size: DEFAULT_STACK_SIZE,
            priority: Priority::new(priority),
            flags: ProcessFlags::NONE,
        }
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_flags(mut self, flags: ProcessFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Snapshot of one process, for inspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub name: String,
    pub priority: Priority,
    pub state: ProcessState,
    pub flags: ProcessFlags,
    pub stack_size: usize,
    pub pending_messages: usize,
}

/// A baton-pass lock cell
///
/// Zero means unlocked. Otherwise it holds the pid of the last process that
/// asked for the lock: the holder when nobody is waiting, or the most
/// recent waiter. Only the kernel writes it, under its interrupt gate.
#[derive(Debug, Default)]
pub struct LockCell(AtomicU32);

impl LockCell {
    /// Creates an unlocked cell
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn is_locked(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }

    /// The last requester, if the cell is locked
    pub fn last_requester(&self) -> Option<Pid> {
        Pid::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Overwrites the cell; kernel use only
    #[doc(hidden)]
    pub fn set(&self, pid: Option<Pid>) {
        self.0
            .store(pid.map(Pid::as_raw).unwrap_or(0), Ordering::Release);
    }
}

/// The kernel API trait
///
/// The process-facing surface of the kernel. Calls that can block (the
/// ones that may reschedule) are legal only from a process; the
/// non-blocking ones may also be made from interrupt context.
///
/// # Example
///
/// ```no_run
/// use kernel_api::{KernelApi, KernelError, ProcessDescriptor};
///
/// fn start_worker<K: KernelApi>(kernel: &K) -> Result<(), KernelError> {
///     let done = kernel.sem_create(0)?;
///     let pid = kernel.spawn(ProcessDescriptor::new("worker", 5), || {})?;
///     println!("spawned {pid}, will signal {done}");
///     kernel.schedule()
/// }
/// ```
pub trait KernelApi {
    /// Creates a process and makes it ready
    ///
    /// The process runs `entry` and is killed when it returns.
    fn spawn<F>(&self, descriptor: ProcessDescriptor, entry: F) -> Result<Pid, KernelError>
    where
        F: FnOnce() + Send + 'static;

    /// Gives the CPU to the highest-priority ready process
    ///
    /// Returns when the caller is running again.
    fn schedule(&self) -> Result<(), KernelError>;

    /// Pid of the running process
    fn current_pid(&self) -> Pid;

    /// Removes a ready or running process from the ready chain
    fn suspend(&self, pid: Pid) -> Result<(), KernelError>;

    /// Makes a suspended process ready
    fn resume(&self, pid: Pid) -> Result<(), KernelError>;

    /// Terminates a process
    fn kill(&self, pid: Pid) -> Result<(), KernelError>;

    /// Creates a counting semaphore
    fn sem_create(&self, count: u32) -> Result<SemaphoreId, KernelError>;

    /// Deletes a semaphore, unblocking every waiter
    fn sem_delete(&self, sem: SemaphoreId) -> Result<(), KernelError>;

    /// Decrements, blocking while the count is negative
    fn sem_wait(&self, sem: SemaphoreId) -> Result<(), KernelError>;

    /// Increments, releasing the longest waiter
    fn sem_post(&self, sem: SemaphoreId) -> Result<(), KernelError>;

    /// Acquires a baton-pass lock, blocking until handed the baton
    fn lock(&self, cell: &LockCell) -> Result<(), KernelError>;

    /// Releases a baton-pass lock to the recorded successor
    fn unlock(&self, cell: &LockCell) -> Result<(), KernelError>;

    /// Sleeps for `hundredths` of a second
    fn sleep(&self, hundredths: u32) -> Result<(), KernelError>;

    /// Wakes a sleeping process early
    fn awake(&self, pid: Pid) -> Result<(), KernelError>;

    /// Copies `data` into the mailbox of `pid`
    ///
    /// Blocks the sender until the message is consumed when `wait` is set
    /// or the mailbox is over depth.
    fn msg_send(&self, pid: Pid, data: &[u8], wait: bool) -> Result<(), KernelError>;

    /// Takes the oldest message; `Ok(None)` when empty and not waiting
    fn msg_recv(&self, wait: bool) -> Result<Option<Vec<u8>>, KernelError>;

    /// Current kernel clock
    fn now(&self) -> ClockTime;
}
