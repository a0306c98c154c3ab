//! Kernel state
//!
//! Everything the gate protects lives in one [`KernelState`]. Its methods
//! are plain state transitions: none of them block or switch threads. The
//! threaded shell in the crate root decides when a transition requires a
//! reschedule.

use crate::config::KernelConfig;
use crate::mailbox::Message;
use crate::process::Process;
use crate::scheduler::ScheduleEvent;
use crate::semaphore::Semaphore;
use crate::sleep::SleepEvent;
use core_types::{Anchor, Arena, Handle, HandleTable, Pid, Priority, ProcessFlags, ProcessState, SemaphoreId};
use kernel_api::{ClockTime, KernelError};
use resources::BufferPool;
use std::thread::{JoinHandle, ThreadId};

/// Name of the boot process
pub const INIT_NAME: &str = "INIT";

#[derive(Debug)]
pub(crate) struct KernelState {
    pub(crate) config: KernelConfig,
    pub(crate) procs: HandleTable<Process>,
    /// Chain links of processes: ready chain, semaphore waiters, kill list
    pub(crate) links: Arena<Pid>,
    pub(crate) ready: Anchor,
    pub(crate) killed: Anchor,
    pub(crate) current: Pid,
    pub(crate) init: Pid,
    pub(crate) live: usize,
    pub(crate) sems: HandleTable<Semaphore>,
    pub(crate) events: Arena<SleepEvent>,
    pub(crate) sleepers: Anchor,
    pub(crate) clock: ClockTime,
    pub(crate) timer_mark: u64,
    pub(crate) messages: Arena<Message>,
    pub(crate) buffers: BufferPool,
    pub(crate) buffer_sems: Vec<Option<SemaphoreId>>,
    pub(crate) audit: Vec<ScheduleEvent>,
    pub(crate) graveyard: Vec<JoinHandle<()>>,
    pub(crate) shutdown: bool,
}

impl KernelState {
    /// Boots the state with `init_thread` as the running INIT process
    pub(crate) fn new(config: KernelConfig, init_thread: ThreadId) -> Result<Self, KernelError> {
        let buffers = BufferPool::new(&config.buffer_classes);
        let placeholder = Pid::from_handle(Handle::NULL);
        let mut state = Self {
            clock: config.start_time,
            buffer_sems: vec![None; buffers.class_count()],
            buffers,
            config,
            procs: HandleTable::new(),
            links: Arena::new(),
            ready: Anchor::new(),
            killed: Anchor::new(),
            current: placeholder,
            init: placeholder,
            live: 0,
            sems: HandleTable::new(),
            events: Arena::new(),
            sleepers: Anchor::new(),
            timer_mark: 0,
            messages: Arena::new(),
            audit: Vec::new(),
            graveyard: Vec::new(),
            shutdown: false,
        };

        let stack_size = state.config.stack_size_for(0);
        let init = state.create_process(
            INIT_NAME.to_string(),
            Priority::LOWEST,
            ProcessFlags::NO_KILL,
            stack_size,
        )?;
        state.commit_process(init, Some(init_thread), None);
        state.current = init;
        state.init = init;
        state.ready(init)?;
        if let Some(process) = state.procs.find_mut(init.handle()) {
            process.state = ProcessState::Running;
        }
        Ok(state)
    }

    pub(crate) fn record(&mut self, event: ScheduleEvent) {
        self.audit.push(event);
    }

    /// The running process, if `thread` is the host thread behind it
    pub(crate) fn caller(&self, thread: ThreadId) -> Option<Pid> {
        let current = self.current;
        self.procs
            .find(current.handle())
            .filter(|process| process.thread == Some(thread) && process.state != ProcessState::Killed)
            .map(|_| current)
    }

    /// Takes every host thread that still needs joining
    pub(crate) fn take_threads(&mut self) -> Vec<JoinHandle<()>> {
        let mut threads: Vec<JoinHandle<()>> = self.graveyard.drain(..).collect();
        let pids: Vec<Pid> = self.procs.iter().map(|(handle, _)| Pid::from_handle(handle)).collect();
        for pid in pids {
            if let Some(process) = self.procs.find_mut(pid.handle()) {
                if pid != self.init {
                    process.state = ProcessState::Killed;
                }
                threads.extend(process.join.take());
            }
        }
        threads
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::thread;

    /// A state with only INIT, owned by the calling thread
    pub(crate) fn boot() -> KernelState {
        KernelState::new(KernelConfig::default(), thread::current().id()).unwrap()
    }

    /// Adds a ready process without a host thread
    pub(crate) fn add(state: &mut KernelState, name: &str, priority: i16) -> Pid {
        let pid = state
            .create_process(name.to_string(), Priority::new(priority), ProcessFlags::NONE, 1024)
            .unwrap();
        state.commit_process(pid, None, None);
        state.ready(pid).unwrap();
        pid
    }

    /// Makes `pid` the running process, as a switch would
    pub(crate) fn run(state: &mut KernelState, pid: Pid) {
        let current = state.current;
        if let Some(process) = state.procs.find_mut(current.handle()) {
            if process.state == ProcessState::Running {
                process.state = ProcessState::Ready;
            }
        }
        state.current = pid;
        state.procs.find_mut(pid.handle()).unwrap().state = ProcessState::Running;
    }

    pub(crate) fn state_of(state: &KernelState, pid: Pid) -> ProcessState {
        state.procs.find(pid.handle()).unwrap().state
    }

    #[test]
    fn test_boot_state() {
        let state = boot();
        let init = state.procs.find(state.init.handle()).unwrap();
        assert_eq!(init.name, "INIT");
        assert_eq!(init.priority, Priority::LOWEST);
        assert!(init.flags.contains(ProcessFlags::NO_KILL));
        assert_eq!(init.state, ProcessState::Running);
        assert_eq!(state.current, state.init);
        assert_eq!(state.ready_pids(), vec![state.init]);
        assert_eq!(state.live, 1);
    }

    #[test]
    fn test_caller_matches_thread() {
        let state = boot();
        assert_eq!(state.caller(thread::current().id()), Some(state.init));
        let other = thread::spawn(|| thread::current().id()).join().unwrap();
        assert_eq!(state.caller(other), None);
    }

    #[test]
    fn test_take_threads_marks_processes_killed() {
        let mut state = boot();
        let pid = add(&mut state, "worker", 3);
        let threads = state.take_threads();
        assert!(threads.is_empty());
        assert_eq!(state_of(&state, pid), ProcessState::Killed);
        assert_eq!(state_of(&state, state.init), ProcessState::Running);
    }
}
