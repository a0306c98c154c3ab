//! Counting semaphores
//!
//! A negative count is the number of processes on the wait chain. Waiters
//! are released in arrival order.
//!
//! Deleting a semaphore that another party has protected does not free it
//! at once: the deleting process is suspended and resumed by the last
//! unprotect, after every waiter has been released.

use crate::scheduler::{finish, OpError};
use crate::state::KernelState;
use crate::Kernel;
use core_types::{Anchor, Destroyed, HandleError, Pid, ProcessState, SemaphoreId};
use kernel_api::KernelError;
use log::debug;

#[derive(Debug)]
pub(crate) struct Semaphore {
    pub(crate) count: i32,
    pub(crate) waiters: Anchor,
}

/// Outcome of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SemDelete {
    Deleted,
    /// Protected by someone; the deleter must wait for the last unprotect
    Pending,
}

fn semaphore_error(sem: SemaphoreId, err: HandleError) -> KernelError {
    match err {
        HandleError::Invalid(_) => KernelError::SemaphoreNotFound(sem),
        other => other.into(),
    }
}

impl KernelState {
    pub(crate) fn sem_create(&mut self, count: u32) -> Result<SemaphoreId, KernelError> {
        let count = i32::try_from(count).map_err(|_| KernelError::InvalidCount(count))?;
        let handle = self
            .sems
            .create(Semaphore {
                count,
                waiters: Anchor::new(),
            })
            .map_err(|_| KernelError::HandleExhausted)?;
        self.sems.unprotect(handle)?;
        Ok(SemaphoreId::from_handle(handle))
    }

    /// Decrements; returns true when `pid` now waits on the chain
    pub(crate) fn sem_wait(&mut self, pid: Pid, sem: SemaphoreId) -> Result<bool, KernelError> {
        let link = self.process(pid)?.link;
        let semaphore = self
            .sems
            .find_mut(sem.handle())
            .ok_or(KernelError::SemaphoreNotFound(sem))?;
        semaphore.count -= 1;
        if semaphore.count >= 0 {
            return Ok(false);
        }

        self.block(pid, ProcessState::WaitingOnSemaphore);
        if let Some(semaphore) = self.sems.find_mut(sem.handle()) {
            self.links.queue(&mut semaphore.waiters, link);
        }
        self.process_mut(pid)?.waiting_on = Some(sem);
        Ok(true)
    }

    /// Increments, readying the longest waiter if there was one
    pub(crate) fn sem_post(&mut self, sem: SemaphoreId) -> Result<(), KernelError> {
        let semaphore = self
            .sems
            .find_mut(sem.handle())
            .ok_or(KernelError::SemaphoreNotFound(sem))?;
        let before = semaphore.count;
        semaphore.count = before.saturating_add(1);
        if before >= 0 {
            return Ok(());
        }

        let waiter = self
            .links
            .pop(&mut semaphore.waiters)
            .and_then(|node| self.links.get(node))
            .copied();
        if let Some(pid) = waiter {
            self.release_waiter(pid);
        }
        Ok(())
    }

    fn release_waiter(&mut self, pid: Pid) {
        if let Some(process) = self.procs.find_mut(pid.handle()) {
            process.waiting_on = None;
        }
        let _ = self.ready(pid);
    }

    fn release_all(&mut self, mut waiters: Anchor) {
        while let Some(node) = self.links.pop(&mut waiters) {
            if let Some(&pid) = self.links.get(node) {
                self.release_waiter(pid);
            }
        }
    }

    /// Unchains a waiter being killed and gives its count back
    pub(crate) fn abandon_semaphore(&mut self, pid: Pid) {
        let Some(process) = self.procs.find_mut(pid.handle()) else {
            return;
        };
        let link = process.link;
        let Some(sem) = process.waiting_on.take() else {
            return;
        };
        if let Some(semaphore) = self.sems.find_mut(sem.handle()) {
            if self.links.unchain(&mut semaphore.waiters, link).is_some() {
                semaphore.count += 1;
            }
        }
    }

    /// Deletes `sem`, or starts a pending delete on behalf of `deleter`
    pub(crate) fn sem_delete(
        &mut self,
        sem: SemaphoreId,
        deleter: Option<Pid>,
    ) -> Result<SemDelete, KernelError> {
        match self.sems.destroy(sem.handle(), deleter.map(Pid::handle)) {
            Ok(Destroyed::Retired(semaphore)) => {
                self.release_all(semaphore.waiters);
                Ok(SemDelete::Deleted)
            }
            Ok(Destroyed::Pending) => {
                if let Some(pid) = deleter {
                    self.block(pid, ProcessState::Suspended);
                }
                Ok(SemDelete::Pending)
            }
            Err(err) => Err(semaphore_error(sem, err)),
        }
    }

    pub(crate) fn sem_protect(&mut self, sem: SemaphoreId) -> Result<(), KernelError> {
        self.sems
            .protect(sem.handle())
            .map(|_| ())
            .map_err(|err| semaphore_error(sem, err))
    }

    /// Drops a protection; the last one completes a pending delete
    pub(crate) fn sem_unprotect(&mut self, sem: SemaphoreId) -> Result<(), KernelError> {
        let destroyer = self
            .sems
            .unprotect(sem.handle())
            .map_err(|err| semaphore_error(sem, err))?;
        if let Some(destroyer) = destroyer {
            if let Some(semaphore) = self.sems.reclaim(sem.handle()) {
                self.release_all(semaphore.waiters);
            }
            let _ = self.resume(Pid::from_handle(destroyer));
        }
        Ok(())
    }

    pub(crate) fn sem_count(&self, sem: SemaphoreId) -> Option<i32> {
        self.sems.find(sem.handle()).map(|semaphore| semaphore.count)
    }

    pub(crate) fn sem_waiters(&self, sem: SemaphoreId) -> Vec<Pid> {
        match self.sems.find(sem.handle()) {
            Some(semaphore) => self
                .links
                .iter(&semaphore.waiters)
                .map(|(_, pid)| *pid)
                .collect(),
            None => Vec::new(),
        }
    }
}

impl Kernel {
    /// Holds off deletion of `sem` until the matching [`sem_unprotect`](Self::sem_unprotect)
    pub fn sem_protect(&self, sem: SemaphoreId) -> Result<(), KernelError> {
        finish(self.sem_protect_op(sem))
    }

    pub fn sem_unprotect(&self, sem: SemaphoreId) -> Result<(), KernelError> {
        finish(self.sem_unprotect_op(sem))
    }

    /// Current count, negative when processes are waiting
    pub fn sem_count(&self, sem: SemaphoreId) -> Option<i32> {
        self.shared.lock().state.sem_count(sem)
    }

    /// Waiting processes in release order
    pub fn sem_waiters(&self, sem: SemaphoreId) -> Vec<Pid> {
        self.shared.lock().state.sem_waiters(sem)
    }

    fn sem_protect_op(&self, sem: SemaphoreId) -> Result<(), OpError> {
        let mut section = self.enter()?;
        section.state.sem_protect(sem)?;
        Ok(())
    }

    fn sem_unprotect_op(&self, sem: SemaphoreId) -> Result<(), OpError> {
        let mut section = self.enter()?;
        section.state.sem_unprotect(sem)?;
        Ok(())
    }

    pub(crate) fn sem_create_op(&self, count: u32) -> Result<SemaphoreId, OpError> {
        let mut section = self.enter()?;
        Ok(section.state.sem_create(count)?)
    }

    pub(crate) fn sem_wait_op(&self, sem: SemaphoreId) -> Result<(), OpError> {
        let (mut section, pid) = self.enter_process()?;
        if section.state.sem_wait(pid, sem)? {
            self.reschedule(&mut section)?;
        }
        Ok(())
    }

    pub(crate) fn sem_post_op(&self, sem: SemaphoreId) -> Result<(), OpError> {
        let mut section = self.enter()?;
        section.state.sem_post(sem)?;
        Ok(())
    }

    pub(crate) fn sem_delete_op(&self, sem: SemaphoreId) -> Result<(), OpError> {
        let mut section = self.enter()?;
        let deleter = section.caller();
        let outcome = section.state.sem_delete(sem, deleter)?;
        debug!("semaphore {sem} delete: {outcome:?}");

        if let (SemDelete::Pending, Some(pid)) = (outcome, deleter) {
            loop {
                self.reschedule(&mut section)?;
                if !section.state.sems.destroy_pending(sem.handle()) {
                    break;
                }
                // Resumed by someone other than the last unprotect.
                section.state.block(pid, ProcessState::Suspended);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::state::tests::{add, boot, run, state_of};
    use super::*;

    #[test]
    fn test_count_tracks_waiters() {
        let mut state = boot();
        let a = add(&mut state, "a", 3);
        let b = add(&mut state, "b", 3);
        let sem = state.sem_create(1).unwrap();

        run(&mut state, a);
        assert!(!state.sem_wait(a, sem).unwrap());
        assert_eq!(state.sem_count(sem), Some(0));

        run(&mut state, b);
        assert!(state.sem_wait(b, sem).unwrap());
        assert_eq!(state.sem_count(sem), Some(-1));
        assert_eq!(state.sem_waiters(sem), vec![b]);
        assert_eq!(state_of(&state, b), ProcessState::WaitingOnSemaphore);
        assert!(!state.ready_pids().contains(&b));
    }

    #[test]
    fn test_post_releases_in_arrival_order() {
        let mut state = boot();
        let a = add(&mut state, "a", 3);
        let b = add(&mut state, "b", 7);
        let sem = state.sem_create(0).unwrap();

        run(&mut state, a);
        state.sem_wait(a, sem).unwrap();
        run(&mut state, b);
        state.sem_wait(b, sem).unwrap();

        state.sem_post(sem).unwrap();
        assert_eq!(state_of(&state, a), ProcessState::Ready);
        assert_eq!(state_of(&state, b), ProcessState::WaitingOnSemaphore);
        assert_eq!(state.sem_count(sem), Some(-1));

        state.sem_post(sem).unwrap();
        state.sem_post(sem).unwrap();
        assert_eq!(state.sem_count(sem), Some(1));
        assert!(state.sem_waiters(sem).is_empty());
    }

    #[test]
    fn test_count_out_of_range() {
        let mut state = boot();
        assert_eq!(
            state.sem_create(u32::MAX),
            Err(KernelError::InvalidCount(u32::MAX))
        );
    }

    #[test]
    fn test_kill_waiter_restores_count() {
        let mut state = boot();
        let a = add(&mut state, "a", 3);
        let b = add(&mut state, "b", 3);
        let sem = state.sem_create(0).unwrap();

        run(&mut state, a);
        state.sem_wait(a, sem).unwrap();
        run(&mut state, b);
        state.sem_wait(b, sem).unwrap();
        assert_eq!(state.sem_count(sem), Some(-2));

        state.kill(a, None).unwrap();
        assert_eq!(state.sem_count(sem), Some(-1));
        assert_eq!(state.sem_waiters(sem), vec![b]);

        state.sem_post(sem).unwrap();
        assert_eq!(state_of(&state, b), ProcessState::Ready);
    }

    #[test]
    fn test_delete_releases_waiters() {
        let mut state = boot();
        let a = add(&mut state, "a", 3);
        let sem = state.sem_create(0).unwrap();
        run(&mut state, a);
        state.sem_wait(a, sem).unwrap();

        assert_eq!(state.sem_delete(sem, None), Ok(SemDelete::Deleted));
        assert_eq!(state_of(&state, a), ProcessState::Ready);
        assert_eq!(state.sem_count(sem), None);
        assert_eq!(state.sem_post(sem), Err(KernelError::SemaphoreNotFound(sem)));
    }

    #[test]
    fn test_protected_delete_waits_for_unprotect() {
        let mut state = boot();
        let deleter = add(&mut state, "del", 3);
        let waiter = add(&mut state, "wait", 3);
        let sem = state.sem_create(0).unwrap();

        run(&mut state, waiter);
        state.sem_wait(waiter, sem).unwrap();
        state.sem_protect(sem).unwrap();

        run(&mut state, deleter);
        assert_eq!(state.sem_delete(sem, Some(deleter)), Ok(SemDelete::Pending));
        assert_eq!(state_of(&state, deleter), ProcessState::Suspended);
        assert_eq!(state_of(&state, waiter), ProcessState::WaitingOnSemaphore);
        assert!(matches!(
            state.sem_delete(sem, None),
            Err(KernelError::Handle(HandleError::DestroyPending(_)))
        ));

        state.sem_unprotect(sem).unwrap();
        assert_eq!(state_of(&state, deleter), ProcessState::Ready);
        assert_eq!(state_of(&state, waiter), ProcessState::Ready);
        assert!(!state.sems.destroy_pending(sem.handle()));
        assert!(state.sems.is_empty());
    }

    #[test]
    fn test_interrupt_delete_of_protected_fails() {
        let mut state = boot();
        let sem = state.sem_create(0).unwrap();
        state.sem_protect(sem).unwrap();

        assert!(matches!(
            state.sem_delete(sem, None),
            Err(KernelError::Handle(HandleError::InUse(_)))
        ));
        state.sem_unprotect(sem).unwrap();
        assert_eq!(state.sem_delete(sem, None), Ok(SemDelete::Deleted));
    }

    #[test]
    fn test_unbalanced_unprotect() {
        let mut state = boot();
        let sem = state.sem_create(0).unwrap();
        assert!(matches!(
            state.sem_unprotect(sem),
            Err(KernelError::Handle(HandleError::NotProtected(_)))
        ));
    }
}
