//! Process records and the ready chain
//!
//! The ready chain is kept in descending priority order, FIFO inside a
//! tier. The running process stays on it; every blocking transition takes
//! the process off and every wake puts it back through [`KernelState::ready`].

use crate::scheduler::ScheduleEvent;
use crate::state::KernelState;
use core_types::{Anchor, Destroyed, Handle, HandleError, NodeId, Pid, Priority, ProcessFlags, ProcessState, SemaphoreId};
use kernel_api::{KernelError, ProcessInfo};
use log::{debug, warn};
use std::thread::{JoinHandle, ThreadId};

/// One process record
#[derive(Debug)]
pub(crate) struct Process {
    pub(crate) name: String,
    pub(crate) priority: Priority,
    pub(crate) flags: ProcessFlags,
    pub(crate) state: ProcessState,
    pub(crate) stack_size: usize,
    /// Node in the process link arena
    pub(crate) link: NodeId,
    /// Gate depth to restore when switched back in
    pub(crate) saved_depth: u32,
    pub(crate) thread: Option<ThreadId>,
    pub(crate) join: Option<JoinHandle<()>>,
    pub(crate) mailbox: Anchor,
    pub(crate) pending: usize,
    /// Process to hand a held lock to on unlock
    pub(crate) lock_next: Option<Pid>,
    /// Sleep event while sleeping
    pub(crate) event: Option<NodeId>,
    pub(crate) waiting_on: Option<SemaphoreId>,
}

impl KernelState {
    pub(crate) fn process(&self, pid: Pid) -> Result<&Process, KernelError> {
        self.procs
            .find(pid.handle())
            .ok_or(KernelError::ProcessNotFound(pid))
    }

    pub(crate) fn process_mut(&mut self, pid: Pid) -> Result<&mut Process, KernelError> {
        self.procs
            .find_mut(pid.handle())
            .ok_or(KernelError::ProcessNotFound(pid))
    }

    pub(crate) fn state_of(&self, pid: Pid) -> Option<ProcessState> {
        self.procs.find(pid.handle()).map(|process| process.state)
    }

    /// Allocates a suspended record, still protected by its creator
    pub(crate) fn create_process(
        &mut self,
        name: String,
        priority: Priority,
        flags: ProcessFlags,
        stack_size: usize,
    ) -> Result<Pid, KernelError> {
        let link = self.links.insert(Pid::from_handle(Handle::NULL));
        let process = Process {
            name,
            priority,
            flags,
            state: ProcessState::Suspended,
            stack_size,
            link,
            saved_depth: 1,
            thread: None,
            join: None,
            mailbox: Anchor::new(),
            pending: 0,
            lock_next: None,
            event: None,
            waiting_on: None,
        };
        let handle = match self.procs.create(process) {
            Ok(handle) => handle,
            Err(_) => {
                self.links.remove(link);
                return Err(KernelError::HandleExhausted);
            }
        };
        let pid = Pid::from_handle(handle);
        if let Some(slot) = self.links.get_mut(link) {
            *slot = pid;
        }
        Ok(pid)
    }

    /// Attaches the host thread and drops the creator's protection
    pub(crate) fn commit_process(
        &mut self,
        pid: Pid,
        thread: Option<ThreadId>,
        join: Option<JoinHandle<()>>,
    ) {
        if let Some(process) = self.procs.find_mut(pid.handle()) {
            process.thread = thread;
            process.join = join;
        }
        let _ = self.procs.unprotect(pid.handle());
        self.live += 1;
    }

    /// Undoes a [`create_process`](Self::create_process) that never ran
    pub(crate) fn discard_process(&mut self, pid: Pid) {
        let _ = self.procs.unprotect(pid.handle());
        if let Ok(Destroyed::Retired(process)) = self.procs.destroy(pid.handle(), None) {
            self.links.remove(process.link);
        }
    }

    /// Makes a process eligible to run
    pub(crate) fn ready(&mut self, pid: Pid) -> Result<(), KernelError> {
        let state = self.process(pid)?.state;
        match state {
            ProcessState::Ready | ProcessState::Running => Ok(()),
            ProcessState::Killed => Err(KernelError::InvalidState {
                pid,
                state,
                operation: "ready",
            }),
            ProcessState::Sleeping => {
                self.process_mut(pid)?.state = ProcessState::Waking;
                self.awake(pid)
            }
            _ => {
                self.process_mut(pid)?.state = ProcessState::Ready;
                self.insert_ready(pid);
                Ok(())
            }
        }
    }

    /// Links behind every process of equal or higher priority
    fn insert_ready(&mut self, pid: Pid) {
        let Some(process) = self.procs.find(pid.handle()) else {
            return;
        };
        let (link, priority) = (process.link, process.priority);

        let mut after = None;
        for (node, other) in self.links.iter(&self.ready) {
            let other_priority = self
                .procs
                .find(other.handle())
                .map_or(Priority::LOWEST, |other| other.priority);
            if priority > other_priority {
                break;
            }
            after = Some(node);
        }
        self.links.chain(&mut self.ready, after, link);
    }

    /// Takes a runnable process off the ready chain and parks it in `state`
    pub(crate) fn block(&mut self, pid: Pid, state: ProcessState) {
        let Some(process) = self.procs.find_mut(pid.handle()) else {
            return;
        };
        if process.state.is_runnable() {
            self.links.unchain(&mut self.ready, process.link);
        }
        process.state = state;
    }

    pub(crate) fn suspend(&mut self, pid: Pid) -> Result<(), KernelError> {
        let state = self.process(pid)?.state;
        if !state.is_runnable() {
            return Err(KernelError::InvalidState {
                pid,
                state,
                operation: "suspend",
            });
        }
        self.block(pid, ProcessState::Suspended);
        Ok(())
    }

    pub(crate) fn resume(&mut self, pid: Pid) -> Result<(), KernelError> {
        let state = self.process(pid)?.state;
        if state != ProcessState::Suspended {
            return Err(KernelError::InvalidState {
                pid,
                state,
                operation: "resume",
            });
        }
        self.ready(pid)
    }

    /// Marks a process killed and queues its record for reaping
    ///
    /// `caller` is the running process when called from process context.
    /// A non-killable process may only kill itself.
    pub(crate) fn kill(&mut self, pid: Pid, caller: Option<Pid>) -> Result<(), KernelError> {
        let process = self.process(pid)?;
        let (state, link) = (process.state, process.link);
        if state == ProcessState::Killed {
            return Err(KernelError::InvalidState {
                pid,
                state,
                operation: "kill",
            });
        }
        if process.flags.contains(ProcessFlags::NO_KILL) && caller != Some(pid) {
            return Err(KernelError::NotKillable(pid));
        }

        match state {
            ProcessState::Ready | ProcessState::Running | ProcessState::Waking => {
                self.links.unchain(&mut self.ready, link);
            }
            ProcessState::Sleeping => self.discard_sleep_event(pid),
            ProcessState::WaitingOnSemaphore => self.abandon_semaphore(pid),
            _ => {}
        }

        self.unlink_lock_waiter(pid);
        let senders = self.drain_mailbox(pid);
        if let Ok(process) = self.process_mut(pid) {
            process.state = ProcessState::Killed;
        }
        self.links.push(&mut self.killed, link);
        self.live = self.live.saturating_sub(1);
        for sender in senders {
            let _ = self.ready(sender);
        }

        debug!("killed {pid} (was {state})");
        self.record(ScheduleEvent::Killed { pid });
        Ok(())
    }

    /// Frees every killed record nobody is using any more
    pub(crate) fn reap(&mut self) {
        let mut cursor = self.killed.first();
        while let Some(node) = cursor {
            cursor = self.links.next(node);
            let Some(&pid) = self.links.get(node) else {
                continue;
            };
            match self.procs.destroy(pid.handle(), None) {
                Err(HandleError::InUse(_)) => continue,
                Ok(Destroyed::Retired(process)) => {
                    self.graveyard.extend(process.join);
                    debug!("reaped {pid}");
                    self.record(ScheduleEvent::Reaped { pid });
                }
                Ok(Destroyed::Pending) | Err(_) => {}
            }
            self.links.unchain(&mut self.killed, node);
            self.links.remove(node);
        }
        self.join_finished();
    }

    /// Joins the reaped host threads that have already returned
    fn join_finished(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = self
            .graveyard
            .drain(..)
            .partition(|handle| handle.is_finished());
        self.graveyard = running;
        for handle in finished {
            if handle.join().is_err() {
                warn!("process thread ended in a panic");
            }
        }
    }

    /// Round-robin: sends the running head behind its equal-priority peers
    pub(crate) fn rotate(&mut self) -> bool {
        let Some(head) = self.ready.first() else {
            return false;
        };
        let Some(next) = self.links.next(head) else {
            return false;
        };
        let priority_of = |node| {
            self.links
                .get(node)
                .and_then(|pid| self.procs.find(pid.handle()))
                .map(|process| process.priority)
        };
        let rotate = self.links.get(head) == Some(&self.current) && priority_of(head) == priority_of(next);
        if !rotate {
            return false;
        }

        let pid = self.current;
        self.links.unchain(&mut self.ready, head);
        self.insert_ready(pid);
        self.record(ScheduleEvent::Rotated { pid });
        true
    }

    /// Head of the ready chain
    pub(crate) fn next_to_run(&self) -> Option<Pid> {
        self.ready
            .first()
            .and_then(|node| self.links.get(node))
            .copied()
    }

    /// Makes `next` current; returns its thread and the gate depth to restore
    pub(crate) fn switch_to(&mut self, next: Pid, depth: u32) -> Option<(ThreadId, u32)> {
        let incoming = self.procs.find(next.handle())?;
        let resume = (incoming.thread?, incoming.saved_depth.max(1));

        let from = self.current;
        if let Some(outgoing) = self.procs.find_mut(from.handle()) {
            outgoing.saved_depth = depth;
            if outgoing.state == ProcessState::Running {
                outgoing.state = ProcessState::Ready;
            }
        }
        if let Some(incoming) = self.procs.find_mut(next.handle()) {
            incoming.state = ProcessState::Running;
        }
        self.current = next;
        self.record(ScheduleEvent::Switched { from, to: next });
        Some(resume)
    }

    pub(crate) fn ready_pids(&self) -> Vec<Pid> {
        self.links.iter(&self.ready).map(|(_, pid)| *pid).collect()
    }

    pub(crate) fn info(&self, pid: Pid) -> Option<ProcessInfo> {
        let process = self.procs.find(pid.handle())?;
        Some(ProcessInfo {
            pid,
            name: process.name.clone(),
            priority: process.priority,
            state: process.state,
            flags: process.flags,
            stack_size: process.stack_size,
            pending_messages: process.pending,
        })
    }
}
