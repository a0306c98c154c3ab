//! # Simulated Kernel
//!
//! A preemptible multitasking kernel hosted on ordinary threads.
//!
//! ## Model
//!
//! Every process is backed by one host thread, but only the thread of the
//! *current* process ever runs process code. A context switch hands the
//! interrupt gate to the incoming thread and parks the outgoing one, so
//! at any instant exactly one process is executing, as on the single CPU
//! the kernel was written for. Host threads that are not processes act
//! as interrupt handlers: they may enter the gate between kernel
//! operations and ready, post, resume or tick, but never block.
//!
//! ## Philosophy
//!
//! **Testability is a first-class design constraint.**
//!
//! The thread that calls [`Kernel::init`] becomes the lowest-priority
//! process `INIT`, so a test drives the whole system from its own body:
//! spawn, then `schedule()` to let everybody else run until they block.
//! All kernel state is inspectable between steps.

mod buffer;
pub mod config;
pub mod gate;
mod lock;
mod mailbox;
mod process;
pub mod scheduler;
mod semaphore;
mod sleep;
mod state;
pub mod test_utils;
pub mod timer;

pub use config::KernelConfig;
pub use gate::{CriticalSection, SimInterruptController};
pub use resources::{Buffer, ClassStats};
pub use scheduler::ScheduleEvent;
pub use state::INIT_NAME;
pub use timer::{ManualTimer, Ticker};

use core_types::{Pid, Priority, SemaphoreId};
use gate::{Gate, Section};
use kernel_api::{ClockTime, KernelApi, KernelError, LockCell, ProcessDescriptor, ProcessInfo};
use log::{debug, info};
use scheduler::{finish, OpError};
use state::KernelState;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

pub(crate) struct Inner {
    pub(crate) gate: Gate,
    pub(crate) state: KernelState,
}

pub(crate) struct Shared {
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a running kernel
///
/// Cheap to clone; processes capture clones to make kernel calls.
#[derive(Clone)]
pub struct Kernel {
    shared: Arc<Shared>,
}

impl Kernel {
    /// Boots a kernel; the calling thread becomes the running `INIT` process
    pub fn init(config: KernelConfig) -> Result<Kernel, KernelError> {
        let state = KernelState::new(config, thread::current().id())?;
        info!(
            "kernel booted: init {} at {}, {} buffer classes",
            state.init,
            state.clock,
            state.buffers.class_count()
        );
        Ok(Kernel {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    gate: Gate::new(),
                    state,
                }),
                cv: Condvar::new(),
            }),
        })
    }

    /// Stops every process and joins their host threads
    ///
    /// Must be called from `INIT` or a non-process thread. Kernel calls
    /// made afterwards fail with [`KernelError::ShuttingDown`].
    pub fn shutdown(&self) {
        let threads = {
            let mut inner = self.shared.lock();
            if inner.state.shutdown && inner.state.graveyard.is_empty() {
                return;
            }
            inner.state.shutdown = true;
            inner.state.take_threads()
        };
        self.shared.cv.notify_all();

        let me = thread::current().id();
        let count = threads.len();
        for handle in threads {
            if handle.thread().id() != me {
                let _ = handle.join();
            }
        }
        info!("kernel shut down, joined {count} process threads");
    }

    /// Enters the gate for a kernel operation
    ///
    /// A process whose state was changed under it by an interrupt handler
    /// (killed or suspended while running) gives up the CPU here first.
    fn enter(&self) -> Result<Section<'_>, OpError> {
        let mut section = Section::enter(&self.shared);
        if section.state.shutdown {
            let me = section.me();
            let is_process = section
                .state
                .procs
                .iter()
                .any(|(_, process)| process.thread == Some(me));
            let is_init = section.state.caller(me) == Some(section.state.init);
            if is_process && !is_init {
                return Err(OpError::Exit);
            }
            return Err(KernelError::ShuttingDown.into());
        }

        if section.gate.depth() == 1 {
            let current = section.state.current;
            let me = section.me();
            let preempted = section
                .state
                .procs
                .find(current.handle())
                .is_some_and(|process| {
                    process.thread == Some(me) && process.state != core_types::ProcessState::Running
                });
            if preempted {
                self.reschedule(&mut section)?;
            }
        }
        Ok(section)
    }

    /// Enters the gate and requires a process caller
    fn enter_process(&self) -> Result<(Section<'_>, Pid), OpError> {
        let section = self.enter()?;
        match section.caller() {
            Some(pid) => Ok((section, pid)),
            None => Err(KernelError::NotProcessContext.into()),
        }
    }

    /// Masks interrupts until the guard drops
    ///
    /// Nests; the depth is saved and restored across context switches.
    pub fn disable(&self) -> CriticalSection<'_> {
        CriticalSection::new(&self.shared)
    }

    /// Runs `handler` as one uninterruptible interrupt handler
    ///
    /// Called from a thread that is not a process, the handler may only
    /// use non-blocking operations.
    pub fn interrupt<R>(&self, handler: impl FnOnce(&Kernel) -> R) -> R {
        let _masked = self.disable();
        handler(self)
    }

    /// Pid of the boot process
    pub fn init_pid(&self) -> Pid {
        self.shared.lock().state.init
    }

    /// Snapshot of one process
    pub fn process_info(&self, pid: Pid) -> Option<ProcessInfo> {
        self.shared.lock().state.info(pid)
    }

    /// Snapshots of every process, in table order
    pub fn processes(&self) -> Vec<ProcessInfo> {
        let inner = self.shared.lock();
        inner
            .state
            .procs
            .iter()
            .filter_map(|(handle, _)| inner.state.info(Pid::from_handle(handle)))
            .collect()
    }

    /// Ready chain from head to tail; the running process is on it
    pub fn ready_queue(&self) -> Vec<Pid> {
        self.shared.lock().state.ready_pids()
    }

    /// Number of processes not yet killed
    pub fn process_count(&self) -> usize {
        self.shared.lock().state.live
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.shared.lock().gate.interrupts_enabled()
    }

    /// Number of times the interrupt line has been masked since boot
    pub fn interrupt_mask_count(&self) -> u64 {
        self.shared.lock().gate.mask_count()
    }

    pub fn config(&self) -> KernelConfig {
        self.shared.lock().state.config.clone()
    }

    /// Scheduler audit trail since boot or the last clear
    pub fn audit_log(&self) -> Vec<ScheduleEvent> {
        self.shared.lock().state.audit.clone()
    }

    pub fn clear_audit_log(&self) {
        self.shared.lock().state.audit.clear();
    }

    fn spawn_op(
        &self,
        descriptor: ProcessDescriptor,
        entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<Pid, OpError> {
        let mut section = self.enter()?;
        if descriptor.priority < Priority::MIN_SPAWN {
            return Err(KernelError::InvalidPriority(descriptor.priority.get()).into());
        }

        let config = &section.state.config;
        let stack_size = config.stack_size_for(descriptor.stack_size);
        let host_stack = config.host_stack_for(stack_size);
        let name = config.process_name(&descriptor.name);
        let pid = section.state.create_process(
            name.clone(),
            descriptor.priority,
            descriptor.flags,
            stack_size,
        )?;

        let kernel = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("proc-{name}"))
            .stack_size(host_stack)
            .spawn(move || kernel.process_main(pid, entry));
        match spawned {
            Ok(handle) => {
                let thread = handle.thread().id();
                section.state.commit_process(pid, Some(thread), Some(handle));
            }
            Err(err) => {
                section.state.discard_process(pid);
                return Err(KernelError::StackAllocFailed(err.to_string()).into());
            }
        }

        section.state.ready(pid)?;
        debug!(
            "spawned {pid} '{name}' priority {} stack {stack_size}",
            descriptor.priority
        );
        Ok(pid)
    }

    fn schedule_op(&self) -> Result<(), OpError> {
        let (mut section, _) = self.enter_process()?;
        self.reschedule(&mut section)
    }

    fn suspend_op(&self, pid: Pid) -> Result<(), OpError> {
        let mut section = self.enter()?;
        let caller = section.caller();
        section.state.suspend(pid)?;
        if caller == Some(pid) {
            self.reschedule(&mut section)?;
        }
        Ok(())
    }

    fn resume_op(&self, pid: Pid) -> Result<(), OpError> {
        let mut section = self.enter()?;
        section.state.resume(pid)?;
        Ok(())
    }

    fn kill_op(&self, pid: Pid) -> Result<(), OpError> {
        let mut section = self.enter()?;
        let caller = section.caller();
        section.state.kill(pid, caller)?;
        section.notify();
        if caller == Some(pid) {
            self.reschedule(&mut section)?;
        }
        Ok(())
    }
}

impl KernelApi for Kernel {
    fn spawn<F>(&self, descriptor: ProcessDescriptor, entry: F) -> Result<Pid, KernelError>
    where
        F: FnOnce() + Send + 'static,
    {
        finish(self.spawn_op(descriptor, Box::new(entry)))
    }

    fn schedule(&self) -> Result<(), KernelError> {
        finish(self.schedule_op())
    }

    fn current_pid(&self) -> Pid {
        self.shared.lock().state.current
    }

    fn suspend(&self, pid: Pid) -> Result<(), KernelError> {
        finish(self.suspend_op(pid))
    }

    fn resume(&self, pid: Pid) -> Result<(), KernelError> {
        finish(self.resume_op(pid))
    }

    fn kill(&self, pid: Pid) -> Result<(), KernelError> {
        finish(self.kill_op(pid))
    }

    fn sem_create(&self, count: u32) -> Result<SemaphoreId, KernelError> {
        finish(self.sem_create_op(count))
    }

    fn sem_delete(&self, sem: SemaphoreId) -> Result<(), KernelError> {
        finish(self.sem_delete_op(sem))
    }

    fn sem_wait(&self, sem: SemaphoreId) -> Result<(), KernelError> {
        finish(self.sem_wait_op(sem))
    }

    fn sem_post(&self, sem: SemaphoreId) -> Result<(), KernelError> {
        finish(self.sem_post_op(sem))
    }

    fn lock(&self, cell: &LockCell) -> Result<(), KernelError> {
        finish(self.lock_op(cell))
    }

    fn unlock(&self, cell: &LockCell) -> Result<(), KernelError> {
        finish(self.unlock_op(cell))
    }

    fn sleep(&self, hundredths: u32) -> Result<(), KernelError> {
        finish(self.sleep_op(hundredths))
    }

    fn awake(&self, pid: Pid) -> Result<(), KernelError> {
        finish(self.awake_op(pid))
    }

    fn msg_send(&self, pid: Pid, data: &[u8], wait: bool) -> Result<(), KernelError> {
        finish(self.msg_send_op(pid, data, wait))
    }

    fn msg_recv(&self, wait: bool) -> Result<Option<Vec<u8>>, KernelError> {
        finish(self.msg_recv_op(wait))
    }

    fn now(&self) -> ClockTime {
        self.shared.lock().state.clock
    }
}
