//! Test utilities
//!
//! Helpers shared by the unit tests and the scenario tests in
//! `tests_resilience`.

use crate::{Kernel, KernelConfig};
use std::ops::Deref;
use std::sync::{Arc, Mutex};

/// A kernel booted on the calling thread, shut down on drop
///
/// The thread that creates it becomes INIT.
pub struct BootedKernel {
    kernel: Kernel,
}

impl BootedKernel {
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> Self {
        match Kernel::init(config) {
            Ok(kernel) => Self { kernel },
            Err(err) => panic!("kernel failed to boot: {err}"),
        }
    }

    /// A handle to move into process closures
    pub fn handle(&self) -> Kernel {
        self.kernel.clone()
    }
}

impl Default for BootedKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for BootedKernel {
    type Target = Kernel;

    fn deref(&self) -> &Kernel {
        &self.kernel
    }
}

impl Drop for BootedKernel {
    fn drop(&mut self) {
        self.kernel.shutdown();
    }
}

/// Ordered log that processes append to
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_api::KernelApi;

    #[test]
    fn test_booted_kernel_runs_on_calling_thread() {
        let kernel = BootedKernel::new();
        assert_eq!(kernel.current_pid(), kernel.init_pid());
        assert_eq!(kernel.config(), KernelConfig::default());
    }

    #[test]
    fn test_recorder_clones_share_entries() {
        let recorder = Recorder::new();
        let other = recorder.clone();
        recorder.push("a");
        other.push(String::from("b"));
        assert_eq!(recorder.entries(), vec!["a", "b"]);
    }
}
