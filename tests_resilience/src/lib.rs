//! Scenario Test Utilities
//!
//! Helpers for the multi-process scenarios under `tests/`. Every scenario
//! runs on the test thread as `INIT` and lets the other processes run by
//! scheduling or sleeping.
//!
//! ## Test Philosophy
//!
//! - **Observable order**: processes append to a shared [`Recorder`] and
//!   the test asserts the exact interleaving
//! - **No stray threads**: [`BootedKernel`] shuts the kernel down and
//!   joins every process thread when the test ends

use core_types::Pid;
use kernel_api::{KernelApi, KernelError, ProcessDescriptor};
use log::debug;
use sim_kernel::Kernel;

pub use sim_kernel::test_utils::{BootedKernel, Recorder};

/// Spawns a process that records `"{name} start"` and `"{name} end"`
/// around `body`
pub fn spawn_traced<F>(
    kernel: &Kernel,
    recorder: &Recorder,
    name: &'static str,
    priority: i16,
    body: F,
) -> Result<Pid, KernelError>
where
    F: FnOnce(&Kernel, &Recorder) + Send + 'static,
{
    let k = kernel.clone();
    let log = recorder.clone();
    kernel.spawn(ProcessDescriptor::new(name, priority), move || {
        log.push(format!("{name} start"));
        body(&k, &log);
        log.push(format!("{name} end"));
    })
}

/// Lets `INIT` sleep one tick at a time until it is the only process left
///
/// Needs a running [`sim_kernel::Ticker`] so sleeps expire. Returns the
/// number of sleeps taken, or `None` if `max_rounds` ran out first.
pub fn settle(kernel: &Kernel, max_rounds: usize) -> Option<usize> {
    for round in 0..max_rounds {
        if kernel.process_count() == 1 {
            debug!("settled after {round} rounds");
            return Some(round);
        }
        if kernel.sleep(1).is_err() {
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_traced_brackets_body() {
        let kernel = BootedKernel::new();
        let recorder = Recorder::new();
        spawn_traced(&kernel, &recorder, "t", 3, |_, log| log.push("body")).unwrap();

        kernel.schedule().unwrap();
        assert_eq!(recorder.entries(), vec!["t start", "body", "t end"]);
    }

    #[test]
    fn test_settle_returns_immediately_when_alone() {
        let kernel = BootedKernel::new();
        assert_eq!(settle(&kernel, 5), Some(0));
    }
}
