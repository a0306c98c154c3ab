//! Scheduler: context switch, idle, and the process thread trampoline
//!
//! ## Switching
//!
//! `reschedule` runs on the thread of the process giving up the CPU, inside
//! the gate. It expires sleepers, rotates equal-priority peers, and, if the
//! head of the ready chain is somebody else, hands the gate to that
//! process's thread and parks until the gate comes back.
//!
//! ## Exit
//!
//! A parked thread whose process was killed (or whose kernel shut down)
//! never gets the gate back. It leaves the kernel with [`OpError::Exit`],
//! which becomes an unwind carrying [`ProcessExit`] once the kernel
//! mutex is released; the trampoline catches it and the thread ends.

use crate::gate::Section;
use crate::Kernel;
use core_types::{Pid, ProcessState};
use kernel_api::{KernelApi, KernelError};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// One entry of the scheduler audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleEvent {
    /// The CPU moved from one process to another
    Switched { from: Pid, to: Pid },
    /// A running process went behind its equal-priority peers
    Rotated { pid: Pid },
    Killed { pid: Pid },
    /// A killed process's record was freed
    Reaped { pid: Pid },
    /// Nothing was ready; `pid` waited for an interrupt
    Idle { pid: Pid },
}

/// Unwind payload that ends a process thread
pub(crate) struct ProcessExit;

pub(crate) enum OpError {
    Kernel(KernelError),
    /// The calling process no longer exists
    Exit,
}

impl From<KernelError> for OpError {
    fn from(err: KernelError) -> Self {
        OpError::Kernel(err)
    }
}

/// Converts an operation result at the API boundary
///
/// Must be called after the operation's section is dropped.
pub(crate) fn finish<T>(result: Result<T, OpError>) -> Result<T, KernelError> {
    match result {
        Ok(value) => Ok(value),
        Err(OpError::Kernel(err)) => Err(err),
        Err(OpError::Exit) => panic::resume_unwind(Box::new(ProcessExit)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

impl Kernel {
    /// Gives the CPU to the head of the ready chain
    ///
    /// Returns once the calling process runs again.
    pub(crate) fn reschedule(&self, section: &mut Section<'_>) -> Result<(), OpError> {
        let outgoing = section.state.current;
        let mut idled = false;
        loop {
            if section.state.shutdown {
                return Err(self.shutdown_exit(section));
            }
            section.state.check_expired();
            if !section.state.ready.is_empty() {
                break;
            }
            if !idled {
                section.state.record(ScheduleEvent::Idle { pid: outgoing });
                idled = true;
            }
            self.idle(section);
        }

        section.state.rotate();
        let Some(next) = section.state.next_to_run() else {
            return Ok(());
        };
        if next == outgoing {
            if let Ok(process) = section.state.process_mut(next) {
                process.state = ProcessState::Running;
            }
            return Ok(());
        }

        let depth = section.gate.depth();
        let Some((thread, resume_depth)) = section.state.switch_to(next, depth) else {
            return Err(KernelError::ProcessNotFound(next).into());
        };
        section.gate.hand_to(thread, resume_depth);
        debug!("switch {outgoing} -> {next}");
        section.notify();

        self.park(section, outgoing)?;
        section.state.reap();
        Ok(())
    }

    fn shutdown_exit(&self, section: &Section<'_>) -> OpError {
        if section.state.current == section.state.init {
            OpError::Kernel(KernelError::ShuttingDown)
        } else {
            OpError::Exit
        }
    }

    /// Opens the gate until some other thread has been through it
    fn idle(&self, section: &mut Section<'_>) {
        let me = section.me();
        let depth = section.gate.open();
        section.notify();
        loop {
            section.wait();
            if section.gate.holder().is_none() {
                break;
            }
        }
        section.gate.reclaim(me, depth);
    }

    /// Waits for the gate to come back to `pid`
    fn park(&self, section: &mut Section<'_>, pid: Pid) -> Result<(), OpError> {
        let me = section.me();
        loop {
            section.wait();
            if section.gate.holder() == Some(me) && section.state.current == pid {
                return Ok(());
            }
            let alive = matches!(section.state.state_of(pid), Some(state) if state != ProcessState::Killed);
            if section.state.shutdown || !alive {
                return Err(OpError::Exit);
            }
        }
    }

    /// Waits for a new process's first turn; false if it never comes
    fn first_turn(&self, pid: Pid) -> bool {
        let mut section = Section::attach(&self.shared);
        let me = section.me();
        loop {
            if section.gate.holder() == Some(me) && section.state.current == pid {
                break;
            }
            let alive = matches!(section.state.state_of(pid), Some(state) if state != ProcessState::Killed);
            if section.state.shutdown || !alive {
                return false;
            }
            section.wait();
        }
        section.mark_entered();
        section.state.reap();
        true
    }

    /// Body of every process thread
    pub(crate) fn process_main(self, pid: Pid, entry: Box<dyn FnOnce() + Send + 'static>) {
        if !self.first_turn(pid) {
            return;
        }

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
            if payload.is::<ProcessExit>() {
                return;
            }
            error!("process {pid} panicked: {}", panic_message(&*payload));
        }

        // Returning from the entry point is a self-kill.
        let exit = panic::catch_unwind(AssertUnwindSafe(|| self.kill(pid)));
        if let Ok(Err(err)) = exit {
            debug!("process {pid} exit: {err}");
        }
    }
}
