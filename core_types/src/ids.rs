//! Identifiers and small value types shared by every kernel layer

use crate::handle::Handle;
use core::fmt;
use core::ops::BitOr;
use serde::{Deserialize, Serialize};

/// Process identifier
///
/// A pid *is* the handle of the process record, so a pid that outlives its
/// process fails validation instead of reaching whoever reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pid(Handle);

impl Pid {
    pub const fn from_handle(handle: Handle) -> Self {
        Self(handle)
    }

    pub const fn handle(self) -> Handle {
        self.0
    }

    /// Raw 32-bit value, as stored in a lock cell
    pub const fn as_raw(self) -> u32 {
        self.0.as_raw()
    }

    /// Rebuilds a pid from a raw lock-cell value; 0 means "none"
    pub const fn from_raw(raw: u32) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(Handle::from_raw(raw)))
        }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.0)
    }
}

/// Semaphore identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SemaphoreId(Handle);

impl SemaphoreId {
    pub const fn from_handle(handle: Handle) -> Self {
        Self(handle)
    }

    pub const fn handle(self) -> Handle {
        self.0
    }
}

impl fmt::Display for SemaphoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sem({})", self.0)
    }
}

/// Scheduling priority; higher runs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(i16);

impl Priority {
    /// Priority of the boot process, below anything that can be spawned
    pub const LOWEST: Priority = Priority(-32767);

    /// Smallest priority accepted for a spawned process
    pub const MIN_SPAWN: Priority = Priority(1);

    pub const fn new(value: i16) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i16 {
        self.0
    }
}

impl From<i16> for Priority {
    fn from(value: i16) -> Self {
        Self(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process attribute flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessFlags(u8);

impl ProcessFlags {
    pub const NONE: ProcessFlags = ProcessFlags(0);

    /// Only the process itself may kill it
    pub const NO_KILL: ProcessFlags = ProcessFlags(0x01);

    pub const fn contains(self, other: ProcessFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for ProcessFlags {
    type Output = ProcessFlags;

    fn bitor(self, rhs: ProcessFlags) -> ProcessFlags {
        ProcessFlags(self.0 | rhs.0)
    }
}

/// Process state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    /// Not runnable and not queued anywhere
    Suspended,
    /// On the ready chain
    Ready,
    /// The one process holding the CPU (still on the ready chain)
    Running,
    /// On the sleep queue
    Sleeping,
    /// On a semaphore wait chain
    WaitingOnSemaphore,
    /// Blocked until a recipient consumes the message it sent
    WaitingToSend,
    /// Blocked until a message arrives
    WaitingToReceive,
    /// Between sleep expiry and ready-chain insertion
    Waking,
    /// Terminal; awaiting reclamation
    Killed,
}

impl ProcessState {
    /// Whether the process sits on the ready chain in this state
    pub fn is_runnable(self) -> bool {
        matches!(self, ProcessState::Ready | ProcessState::Running)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Suspended => "suspended",
            ProcessState::Ready => "ready",
            ProcessState::Running => "running",
            ProcessState::Sleeping => "sleeping",
            ProcessState::WaitingOnSemaphore => "waiting-on-semaphore",
            ProcessState::WaitingToSend => "waiting-to-send",
            ProcessState::WaitingToReceive => "waiting-to-receive",
            ProcessState::Waking => "waking",
            ProcessState::Killed => "killed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_raw_round_trip() {
        let pid = Pid::from_handle(Handle::from_raw(0x0003_0102));
        assert_eq!(Pid::from_raw(pid.as_raw()), Some(pid));
        assert_eq!(Pid::from_raw(0), None);
    }

    #[test]
    fn test_pid_display() {
        let pid = Pid::from_handle(Handle::from_raw(0x0001_0002));
        assert_eq!(format!("{}", pid), "Pid(00.02#1)");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::LOWEST < Priority::MIN_SPAWN);
        assert!(Priority::new(10) > Priority::new(5));
        assert_eq!(Priority::from(7).get(), 7);
    }

    #[test]
    fn test_flags() {
        let flags = ProcessFlags::NONE | ProcessFlags::NO_KILL;
        assert!(flags.contains(ProcessFlags::NO_KILL));
        assert!(!ProcessFlags::NONE.contains(ProcessFlags::NO_KILL));
    }

    #[test]
    fn test_state_runnable() {
        assert!(ProcessState::Ready.is_runnable());
        assert!(ProcessState::Running.is_runnable());
        assert!(!ProcessState::Waking.is_runnable());
        assert!(!ProcessState::Killed.is_runnable());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&ProcessState::WaitingOnSemaphore).unwrap();
        let back: ProcessState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ProcessState::WaitingOnSemaphore);
    }
}
