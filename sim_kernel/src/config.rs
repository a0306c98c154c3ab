//! Kernel configuration

use kernel_api::ClockTime;
use resources::{SizeClass, DEFAULT_CLASSES};
use serde::{Deserialize, Serialize};

/// Tunables fixed at [`Kernel::init`](crate::Kernel::init)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Clock advance per timer tick, in milliseconds
    pub tick_millis: u64,
    /// Smallest stack a process is given, after rounding
    pub min_stack_size: usize,
    /// Stack sizes are rounded up to a multiple of this
    pub stack_align: usize,
    /// A sender blocks once the recipient holds more than this many messages
    pub mailbox_depth: usize,
    /// Process names are truncated to this many characters
    pub name_len: usize,
    /// Minimum host thread stack backing a process
    pub host_stack_reserve: usize,
    /// Kernel clock at boot
    pub start_time: ClockTime,
    /// Buffer pool size classes
    pub buffer_classes: Vec<SizeClass>,
}

impl KernelConfig {
    /// Applies alignment and the floor to a requested stack size
    pub fn stack_size_for(&self, requested: usize) -> usize {
        let align = self.stack_align.max(1);
        let rounded = requested.div_ceil(align).saturating_mul(align);
        rounded.max(self.min_stack_size)
    }

    /// Host stack reserved for a process with the given kernel stack
    pub fn host_stack_for(&self, stack_size: usize) -> usize {
        stack_size.max(self.host_stack_reserve)
    }

    /// Truncates a process name on a character boundary
    pub fn process_name(&self, name: &str) -> String {
        name.chars().take(self.name_len).collect()
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tick_millis: 10,
            min_stack_size: 256,
            stack_align: 4,
            mailbox_depth: 12,
            name_len: 8,
            host_stack_reserve: 256 * 1024,
            start_time: ClockTime::ZERO,
            buffer_classes: DEFAULT_CLASSES.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_rounding() {
        let config = KernelConfig::default();
        assert_eq!(config.stack_size_for(0), 256);
        assert_eq!(config.stack_size_for(255), 256);
        assert_eq!(config.stack_size_for(1021), 1024);
        assert_eq!(config.stack_size_for(1024), 1024);
    }

    #[test]
    fn test_host_stack_floor() {
        let config = KernelConfig::default();
        assert_eq!(config.host_stack_for(1024), 256 * 1024);
        assert_eq!(config.host_stack_for(1024 * 1024), 1024 * 1024);
    }

    #[test]
    fn test_name_truncation() {
        let config = KernelConfig::default();
        assert_eq!(config.process_name("scheduler"), "schedule");
        assert_eq!(config.process_name("net"), "net");
    }

    #[test]
    fn test_config_serialization() {
        let config = KernelConfig {
            tick_millis: 1,
            ..KernelConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: KernelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
