//! Sleep queue and kernel clock
//!
//! Sleepers wait on a chain of events ordered by wake time. Events with the
//! same wake time expire in the order they were queued.

use crate::gate::Section;
use crate::scheduler::OpError;
use crate::state::KernelState;
use crate::Kernel;
use core_types::{Pid, ProcessState};
use hal::TimerDevice;
use kernel_api::{ClockTime, Duration, KernelError};
use log::trace;

#[derive(Debug)]
pub(crate) struct SleepEvent {
    pub(crate) wake: ClockTime,
    pub(crate) pid: Pid,
}

impl KernelState {
    /// Queues a wake event and takes `pid` off the ready chain
    pub(crate) fn sleep(&mut self, pid: Pid, hundredths: u32) -> Result<ClockTime, KernelError> {
        self.process(pid)?;
        let wake = self.clock + Duration::from_hundredths(u64::from(hundredths));
        let node = self.events.insert(SleepEvent { wake, pid });

        let mut after = None;
        for (id, event) in self.events.iter(&self.sleepers) {
            if event.wake > wake {
                break;
            }
            after = Some(id);
        }
        self.events.chain(&mut self.sleepers, after, node);

        self.block(pid, ProcessState::Sleeping);
        self.process_mut(pid)?.event = Some(node);
        Ok(wake)
    }

    /// Wakes a sleeping process before its time
    pub(crate) fn awake(&mut self, pid: Pid) -> Result<(), KernelError> {
        let state = self.process(pid)?.state;
        if !matches!(state, ProcessState::Sleeping | ProcessState::Waking) {
            return Err(KernelError::InvalidState {
                pid,
                state,
                operation: "awake",
            });
        }
        self.discard_sleep_event(pid);
        self.process_mut(pid)?.state = ProcessState::Waking;
        self.ready(pid)
    }

    /// Drops the pending wake event of `pid`, if any
    pub(crate) fn discard_sleep_event(&mut self, pid: Pid) {
        let Some(node) = self
            .procs
            .find_mut(pid.handle())
            .and_then(|process| process.event.take())
        else {
            return;
        };
        self.events.unchain(&mut self.sleepers, node);
        self.events.remove(node);
    }

    /// Wakes every sleeper whose time has come
    pub(crate) fn check_expired(&mut self) {
        while let Some(node) = self.sleepers.first() {
            let Some(event) = self.events.get(node) else {
                break;
            };
            if event.wake > self.clock {
                break;
            }
            let pid = event.pid;
            self.events.unchain(&mut self.sleepers, node);
            self.events.remove(node);

            let sleeping = match self.procs.find_mut(pid.handle()) {
                Some(process) if process.event == Some(node) => {
                    process.event = None;
                    process.state == ProcessState::Sleeping
                }
                _ => false,
            };
            if sleeping {
                let _ = self.ready(pid);
            }
        }
    }

    pub(crate) fn advance_clock(&mut self, ticks: u64) {
        let step = Duration::from_millis(self.config.tick_millis.saturating_mul(ticks));
        self.clock = self.clock + step;
    }

    pub(crate) fn sleep_queue(&self) -> Vec<(Pid, ClockTime)> {
        self.events
            .iter(&self.sleepers)
            .map(|(_, event)| (event.pid, event.wake))
            .collect()
    }
}

impl Kernel {
    /// One timer interrupt: advances the clock by one tick
    ///
    /// Safe to call from any thread. Expired sleepers become ready at the
    /// next reschedule.
    pub fn tick(&self) {
        self.advance(1);
    }

    /// Advances the clock by several ticks at once
    pub fn advance(&self, ticks: u64) {
        let mut section = Section::enter(&self.shared);
        section.state.advance_clock(ticks);
    }

    /// Catches the clock up with a hardware tick counter
    ///
    /// Returns the number of ticks applied.
    pub fn poll_timer(&self, timer: &mut dyn TimerDevice) -> u64 {
        let mut section = Section::enter(&self.shared);
        let mark = section.state.timer_mark;
        let elapsed = timer.ticks_since(mark);
        section.state.timer_mark = mark + elapsed;
        section.state.advance_clock(elapsed);
        elapsed
    }

    /// Pending wake events, earliest first
    pub fn sleep_queue(&self) -> Vec<(Pid, ClockTime)> {
        self.shared.lock().state.sleep_queue()
    }

    pub(crate) fn sleep_op(&self, hundredths: u32) -> Result<(), OpError> {
        let (mut section, pid) = self.enter_process()?;
        let wake = section.state.sleep(pid, hundredths)?;
        trace!("{pid} sleeps until {wake}");
        self.reschedule(&mut section)
    }

    pub(crate) fn awake_op(&self, pid: Pid) -> Result<(), OpError> {
        let mut section = self.enter()?;
        section.state.awake(pid)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::state::tests::{add, boot, run, state_of};
    use super::*;

    #[test]
    fn test_sleep_queue_is_time_ordered() {
        let mut state = boot();
        let a = add(&mut state, "a", 3);
        let b = add(&mut state, "b", 3);
        let c = add(&mut state, "c", 3);

        run(&mut state, a);
        state.sleep(a, 50).unwrap();
        run(&mut state, b);
        state.sleep(b, 10).unwrap();
        run(&mut state, c);
        state.sleep(c, 30).unwrap();

        let order: Vec<Pid> = state.sleep_queue().into_iter().map(|(pid, _)| pid).collect();
        assert_eq!(order, vec![b, c, a]);
        assert_eq!(state_of(&state, a), ProcessState::Sleeping);
        assert_eq!(state.ready_pids(), vec![state.init]);
    }

    #[test]
    fn test_equal_wake_times_are_fifo() {
        let mut state = boot();
        let a = add(&mut state, "a", 3);
        let b = add(&mut state, "b", 3);

        run(&mut state, a);
        state.sleep(a, 20).unwrap();
        run(&mut state, b);
        state.sleep(b, 20).unwrap();

        state.advance_clock(20);
        state.check_expired();
        assert_eq!(state.ready_pids(), vec![a, b, state.init]);
    }

    #[test]
    fn test_expiry_stops_at_first_future_event() {
        let mut state = boot();
        let a = add(&mut state, "a", 3);
        let b = add(&mut state, "b", 3);

        run(&mut state, a);
        state.sleep(a, 10).unwrap();
        run(&mut state, b);
        state.sleep(b, 100).unwrap();

        state.advance_clock(9);
        state.check_expired();
        assert_eq!(state.sleep_queue().len(), 2);

        state.advance_clock(1);
        state.check_expired();
        assert_eq!(state_of(&state, a), ProcessState::Ready);
        assert_eq!(state_of(&state, b), ProcessState::Sleeping);
        assert_eq!(state.sleep_queue().len(), 1);
    }

    #[test]
    fn test_wake_time_carries_into_seconds() {
        let mut state = boot();
        let a = add(&mut state, "a", 3);
        state.clock = ClockTime::new(2, 950);

        run(&mut state, a);
        let wake = state.sleep(a, 10).unwrap();
        assert_eq!(wake, ClockTime::new(3, 50));
    }

    #[test]
    fn test_awake_requires_sleeper() {
        let mut state = boot();
        let a = add(&mut state, "a", 3);
        assert!(matches!(
            state.awake(a),
            Err(KernelError::InvalidState { operation: "awake", .. })
        ));

        run(&mut state, a);
        state.sleep(a, 500).unwrap();
        state.awake(a).unwrap();
        assert_eq!(state_of(&state, a), ProcessState::Ready);
        assert!(state.sleep_queue().is_empty());
    }

    #[test]
    fn test_ready_on_sleeper_goes_through_wake_path() {
        let mut state = boot();
        let a = add(&mut state, "a", 3);
        run(&mut state, a);
        state.sleep(a, 500).unwrap();

        state.ready(a).unwrap();
        assert!(state.sleep_queue().is_empty());
        assert_eq!(state.ready_pids(), vec![a, state.init]);
    }

    #[test]
    fn test_kill_discards_sleep_event() {
        let mut state = boot();
        let a = add(&mut state, "a", 3);
        run(&mut state, a);
        state.sleep(a, 500).unwrap();

        state.kill(a, None).unwrap();
        assert!(state.sleep_queue().is_empty());
        assert!(state.events.is_empty());
    }
}
