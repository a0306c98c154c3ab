//! # Timer Sources
//!
//! Two ways to drive the kernel clock:
//!
//! - [`ManualTimer`]: a [`TimerDevice`] whose count only moves when a test
//!   says so, fed to [`Kernel::poll_timer`]
//! - [`Ticker`]: a host thread that plays the periodic timer interrupt,
//!   calling [`Kernel::tick`] once per configured tick period

use crate::Kernel;
use hal::TimerDevice;
use log::trace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time;

/// Deterministic tick counter
///
/// ```
/// use sim_kernel::ManualTimer;
/// use hal::TimerDevice;
///
/// let mut timer = ManualTimer::new();
/// timer.advance_ticks(3);
/// assert_eq!(timer.poll_ticks(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    ticks: u64,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the count forward; saturates at `u64::MAX`
    pub fn advance_ticks(&mut self, ticks: u64) {
        self.ticks = self.ticks.saturating_add(ticks);
    }
}

impl TimerDevice for ManualTimer {
    fn poll_ticks(&mut self) -> u64 {
        self.ticks
    }
}

/// Background timer interrupt
///
/// Stops and joins its thread when dropped.
#[derive(Debug)]
pub struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Stops the ticking thread and waits for it
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.halt();
    }
}

impl Kernel {
    /// Starts a thread that calls [`Kernel::tick`] every tick period
    pub fn start_ticker(&self) -> Ticker {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let kernel = self.clone();
        let period = time::Duration::from_millis(self.config().tick_millis.max(1));

        let handle = thread::Builder::new()
            .name("ticker".into())
            .spawn(move || {
                trace!("ticker started, period {period:?}");
                while !flag.load(Ordering::SeqCst) {
                    thread::sleep(period);
                    kernel.tick();
                }
            })
            .ok();

        Ticker { stop, handle }
    }
}
