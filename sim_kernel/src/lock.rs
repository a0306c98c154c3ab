//! Baton-pass locks
//!
//! A [`LockCell`] holds the pid of the last process that asked for the
//! lock. Each requester records itself as the successor of the one before
//! it, so the waiters form a chain through the processes' `lock_next`
//! fields and unlock hands the lock straight to the next in line.
//!
//! A process can only be the predecessor in one such chain at a time:
//! waiting for a second lock while holding a contended one loses the
//! first lock's successor.

use crate::scheduler::OpError;
use crate::state::KernelState;
use crate::Kernel;
use core_types::{Pid, ProcessState};
use kernel_api::{KernelError, LockCell};
use log::debug;

impl KernelState {
    /// Takes the lock or queues behind the last requester
    ///
    /// Returns true when `pid` must wait for the baton.
    pub(crate) fn lock(&mut self, pid: Pid, cell: &LockCell) -> Result<bool, KernelError> {
        self.process(pid)?;
        let Some(last) = cell.last_requester() else {
            cell.set(Some(pid));
            return Ok(false);
        };
        if last == pid {
            return Err(KernelError::WouldDeadlock(pid));
        }

        match self.procs.find_mut(last.handle()) {
            Some(predecessor) if predecessor.state != ProcessState::Killed => {
                predecessor.lock_next = Some(pid);
            }
            _ => return Err(KernelError::ProcessNotFound(last)),
        }
        self.process_mut(pid)?.lock_next = None;
        cell.set(Some(pid));
        self.block(pid, ProcessState::Suspended);
        Ok(true)
    }

    /// Releases the lock to the recorded successor, or frees the cell
    pub(crate) fn unlock(&mut self, pid: Pid, cell: &LockCell) -> Result<Option<Pid>, KernelError> {
        let successor = self.process_mut(pid)?.lock_next.take();
        let Some(mut next) = successor else {
            if cell.last_requester() != Some(pid) {
                return Err(KernelError::NotLockOwner(pid));
            }
            cell.set(None);
            return Ok(None);
        };

        while self.resume(next).is_err() {
            // A dead waiter still names its successor.
            let skipped = match self.procs.find_mut(next.handle()) {
                Some(dead) if dead.state == ProcessState::Killed => dead.lock_next.take(),
                _ => None,
            };
            match skipped {
                Some(after) => next = after,
                None => {
                    if cell.last_requester() == Some(next) {
                        cell.set(None);
                    }
                    break;
                }
            }
        }
        Ok(Some(next))
    }

    /// Unhooks a killed waiter from whichever lock chain names it
    ///
    /// Its predecessor inherits its successor, so the chain survives the
    /// record being reaped before the holder unlocks.
    pub(crate) fn unlink_lock_waiter(&mut self, pid: Pid) {
        let Some(after) = self.procs.find(pid.handle()).and_then(|dead| dead.lock_next) else {
            return;
        };
        let predecessor = self
            .procs
            .iter()
            .find(|(_, process)| process.lock_next == Some(pid))
            .map(|(handle, _)| Pid::from_handle(handle));
        if let Some(predecessor) = predecessor {
            if let Ok(process) = self.process_mut(predecessor) {
                process.lock_next = Some(after);
            }
            if let Ok(dead) = self.process_mut(pid) {
                dead.lock_next = None;
            }
        }
    }
}

impl Kernel {
    pub(crate) fn lock_op(&self, cell: &LockCell) -> Result<(), OpError> {
        let (mut section, pid) = self.enter_process()?;
        if section.state.lock(pid, cell)? {
            self.reschedule(&mut section)?;
        }
        Ok(())
    }

    pub(crate) fn unlock_op(&self, cell: &LockCell) -> Result<(), OpError> {
        let (mut section, pid) = self.enter_process()?;
        if let Some(next) = section.state.unlock(pid, cell)? {
            debug!("lock handed from {pid} to {next}");
        }
        Ok(())
    }
}
