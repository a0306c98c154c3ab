//! Kernel error types and the return-code convention

use core_types::{HandleError, Pid, ProcessState, SemaphoreId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when interacting with the kernel
///
/// Every error is local to the call that produced it: no kernel state is
/// changed when an operation fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// The process table has no free handle
    #[error("Handle table exhausted")]
    HandleExhausted,

    /// The execution context for a new process could not be created
    #[error("Failed to allocate process stack: {0}")]
    StackAllocFailed(String),

    /// Spawn priority below the minimum
    #[error("Invalid priority {0}: must be at least 1")]
    InvalidPriority(i16),

    /// Stale or unknown pid
    #[error("Process not found: {0}")]
    ProcessNotFound(Pid),

    /// Stale or unknown semaphore
    #[error("Semaphore not found: {0}")]
    SemaphoreNotFound(SemaphoreId),

    /// Semaphore initial count out of range
    #[error("Invalid semaphore count: {0}")]
    InvalidCount(u32),

    /// Operation not legal in the target's current state
    #[error("Cannot {operation} {pid} while {state}")]
    InvalidState {
        pid: Pid,
        state: ProcessState,
        operation: &'static str,
    },

    /// Kill of a protected process by someone other than itself
    #[error("Process {0} cannot be killed")]
    NotKillable(Pid),

    /// Unlock by a process that does not hold the lock
    #[error("Process {0} does not hold the lock")]
    NotLockOwner(Pid),

    /// A blocking call was made from interrupt context
    #[error("Operation requires a process context")]
    NotProcessContext,

    /// A process asked to block on a message to itself
    #[error("Blocking send from {0} to itself would never complete")]
    WouldDeadlock(Pid),

    /// Mailbox over depth and the sender cannot block
    #[error("Mailbox of {0} is full")]
    MailboxFull(Pid),

    /// Request larger than the largest enabled buffer class
    #[error("Buffer of {0} bytes is too large")]
    BufferTooLarge(usize),

    /// Buffer class exhausted and the caller cannot block
    #[error("No buffer of {0} bytes available")]
    BufferExhausted(usize),

    /// Released buffer failed validation
    #[error("Buffer failed validation")]
    BadBuffer,

    /// Handle table error from a protect/unprotect/destroy path
    #[error(transparent)]
    Handle(#[from] HandleError),

    /// The kernel is shutting down
    #[error("Kernel is shutting down")]
    ShuttingDown,
}

/// Three-value return code convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Success (0)
    Ok,
    /// Failure (-1)
    Error,
    /// Non-blocking receive found nothing (1)
    NoMessage,
}

impl Status {
    /// Numeric return code
    pub const fn code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Error => -1,
            Status::NoMessage => 1,
        }
    }

    /// Maps any kernel result to `Ok` / `Error`
    pub fn of<T>(result: &Result<T, KernelError>) -> Status {
        match result {
            Ok(_) => Status::Ok,
            Err(_) => Status::Error,
        }
    }

    /// Maps a receive result, distinguishing "no message"
    pub fn of_recv<T>(result: &Result<Option<T>, KernelError>) -> Status {
        match result {
            Ok(Some(_)) => Status::Ok,
            Ok(None) => Status::NoMessage,
            Err(_) => Status::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::Handle;

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::Error.code(), -1);
        assert_eq!(Status::NoMessage.code(), 1);
    }

    #[test]
    fn test_status_mapping() {
        let ok: Result<(), KernelError> = Ok(());
        let err: Result<(), KernelError> = Err(KernelError::NotProcessContext);
        assert_eq!(Status::of(&ok), Status::Ok);
        assert_eq!(Status::of(&err), Status::Error);

        let empty: Result<Option<Vec<u8>>, KernelError> = Ok(None);
        let full: Result<Option<Vec<u8>>, KernelError> = Ok(Some(vec![1]));
        assert_eq!(Status::of_recv(&empty), Status::NoMessage);
        assert_eq!(Status::of_recv(&full), Status::Ok);
    }

    #[test]
    fn test_error_messages() {
        let pid = Pid::from_handle(Handle::from_raw(0x0001_0003));
        let err = KernelError::InvalidState {
            pid,
            state: ProcessState::Sleeping,
            operation: "resume",
        };
        assert_eq!(err.to_string(), "Cannot resume Pid(00.03#1) while sleeping");

        let err: KernelError = HandleError::Exhausted.into();
        assert_eq!(err.to_string(), "handle table exhausted");
    }
}
