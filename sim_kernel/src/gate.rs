//! Interrupt gate
//!
//! The gate is the kernel's only mutual-exclusion mechanism. A thread that
//! holds it may touch any kernel structure; everybody else (process threads
//! waiting for their turn, interrupt threads) waits on the kernel condvar.
//!
//! ## Nesting
//!
//! Entering is reentrant for the holding thread. The depth counter is what
//! a real kernel keeps as its interrupt-disable count: the line is masked on
//! the 0 -> 1 transition and unmasked on 1 -> 0. A context switch hands the
//! gate to the incoming thread together with that thread's saved depth, so
//! the line stays masked across the switch.

use crate::{Inner, Shared};
use core_types::Pid;
use hal::InterruptHal;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::{MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Simulated interrupt line
#[derive(Debug)]
pub struct SimInterruptController {
    enabled: bool,
    masked: u64,
}

impl SimInterruptController {
    pub fn new() -> Self {
        Self {
            enabled: true,
            masked: 0,
        }
    }

    /// Number of times the line has been masked
    pub fn mask_count(&self) -> u64 {
        self.masked
    }
}

impl Default for SimInterruptController {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptHal for SimInterruptController {
    fn enable_interrupts(&mut self) {
        self.enabled = true;
    }

    fn disable_interrupts(&mut self) {
        self.enabled = false;
        self.masked += 1;
    }

    fn interrupts_enabled(&self) -> bool {
        self.enabled
    }
}

/// Ownership and nesting depth of the interrupt gate
#[derive(Debug)]
pub(crate) struct Gate {
    holder: Option<ThreadId>,
    depth: u32,
    line: SimInterruptController,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            holder: None,
            depth: 0,
            line: SimInterruptController::new(),
        }
    }

    pub(crate) fn holder(&self) -> Option<ThreadId> {
        self.holder
    }

    pub(crate) fn depth(&self) -> u32 {
        self.depth
    }

    pub(crate) fn interrupts_enabled(&self) -> bool {
        self.line.interrupts_enabled()
    }

    pub(crate) fn mask_count(&self) -> u64 {
        self.line.mask_count()
    }

    /// Enters if the gate is free or already ours
    pub(crate) fn try_enter(&mut self, me: ThreadId) -> bool {
        match self.holder {
            None => {
                self.holder = Some(me);
                self.depth = 1;
                self.line.disable_interrupts();
                true
            }
            Some(holder) if holder == me => {
                self.depth += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Leaves one level; returns true when the gate became free
    pub(crate) fn leave(&mut self, me: ThreadId) -> bool {
        if self.holder != Some(me) || self.depth == 0 {
            return false;
        }
        self.depth -= 1;
        if self.depth > 0 {
            return false;
        }
        self.holder = None;
        self.line.enable_interrupts();
        true
    }

    /// Context switch: the line stays masked, only the owner changes
    pub(crate) fn hand_to(&mut self, thread: ThreadId, depth: u32) {
        self.holder = Some(thread);
        self.depth = depth;
    }

    /// Opens the gate completely so an interrupt can get in; returns the depth
    pub(crate) fn open(&mut self) -> u32 {
        let depth = self.depth;
        self.holder = None;
        self.depth = 0;
        self.line.enable_interrupts();
        depth
    }

    /// Takes a free gate back at a previously saved depth
    pub(crate) fn reclaim(&mut self, me: ThreadId, depth: u32) {
        self.holder = Some(me);
        self.depth = depth.max(1);
        self.line.disable_interrupts();
    }
}

/// The kernel mutex, held for the duration of one kernel operation
///
/// A section may or may not have entered the gate. One that did leaves it
/// on drop. Waiting on the condvar releases the mutex but not the gate.
pub(crate) struct Section<'a> {
    shared: &'a Shared,
    guard: Option<MutexGuard<'a, Inner>>,
    me: ThreadId,
    entered: bool,
}

impl<'a> Section<'a> {
    /// Locks kernel memory without touching the gate
    pub(crate) fn attach(shared: &'a Shared) -> Self {
        Self {
            shared,
            guard: Some(shared.lock()),
            me: thread::current().id(),
            entered: false,
        }
    }

    /// Waits until the gate is free (or ours) and enters it
    pub(crate) fn enter(shared: &'a Shared) -> Self {
        let mut section = Self::attach(shared);
        loop {
            let me = section.me;
            if section.gate.try_enter(me) {
                break;
            }
            section.wait();
        }
        section.entered = true;
        section
    }

    pub(crate) fn me(&self) -> ThreadId {
        self.me
    }

    /// Records that this thread owns one gate level released on drop
    pub(crate) fn mark_entered(&mut self) {
        self.entered = true;
    }

    /// Keeps the gate level past the end of this section
    pub(crate) fn detach_gate(&mut self) {
        self.entered = false;
    }

    /// Blocks on the kernel condvar
    pub(crate) fn wait(&mut self) {
        if let Some(guard) = self.guard.take() {
            let guard = self
                .shared
                .cv
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
            self.guard = Some(guard);
        }
    }

    pub(crate) fn notify(&self) {
        self.shared.cv.notify_all();
    }

    /// The running process, if this thread is it
    pub(crate) fn caller(&self) -> Option<Pid> {
        self.state.caller(self.me)
    }
}

impl Deref for Section<'_> {
    type Target = Inner;

    fn deref(&self) -> &Inner {
        match &self.guard {
            Some(guard) => &**guard,
            None => unreachable!("kernel section used while waiting"),
        }
    }
}

impl DerefMut for Section<'_> {
    fn deref_mut(&mut self) -> &mut Inner {
        match &mut self.guard {
            Some(guard) => &mut **guard,
            None => unreachable!("kernel section used while waiting"),
        }
    }
}

impl Drop for Section<'_> {
    fn drop(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            if self.entered && guard.gate.leave(self.me) {
                drop(guard);
                self.shared.cv.notify_all();
            }
        }
    }
}

/// Guard returned by [`Kernel::disable`](crate::Kernel::disable)
///
/// Holds one level of the interrupt gate until dropped. Bound to the
/// thread that created it.
pub struct CriticalSection<'a> {
    shared: &'a Shared,
    _thread_bound: PhantomData<*const ()>,
}

impl<'a> CriticalSection<'a> {
    pub(crate) fn new(shared: &'a Shared) -> Self {
        let mut section = Section::enter(shared);
        section.detach_gate();
        drop(section);
        Self {
            shared,
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        let mut section = Section::attach(self.shared);
        section.mark_entered();
    }
}
