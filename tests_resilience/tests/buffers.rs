//! Buffer Pool Scenarios

use kernel_api::{KernelApi, KernelError};
use resources::SizeClass;
use sim_kernel::KernelConfig;
use std::sync::{Arc, Mutex};
use tests_resilience::{spawn_traced, BootedKernel, Recorder};

fn tight_kernel() -> BootedKernel {
    BootedKernel::with_config(KernelConfig {
        buffer_classes: vec![SizeClass::new(128, 1), SizeClass::new(1024, 2)],
        ..KernelConfig::default()
    })
}

#[test]
fn test_allocation_picks_smallest_fitting_class() {
    let kernel = tight_kernel();
    let small = kernel.buffer_alloc(100).unwrap();
    let large = kernel.buffer_alloc(129).unwrap();
    assert_eq!(small.len(), 128);
    assert_eq!(large.len(), 1024);

    let stats = kernel.buffer_stats();
    assert_eq!(stats[0].allocated, 1);
    assert_eq!(stats[1].allocated, 1);

    kernel.buffer_free(small).unwrap();
    kernel.buffer_free(large).unwrap();
    assert!(kernel.buffer_stats().iter().all(|class| class.allocated == 0));
}

#[test]
fn test_oversized_request_is_rejected() {
    let kernel = tight_kernel();
    assert_eq!(
        kernel.buffer_alloc(4096).err(),
        Some(KernelError::BufferTooLarge(4096))
    );
}

#[test]
fn test_exhausted_class_blocks_until_free() {
    let kernel = tight_kernel();
    let recorder = Recorder::new();
    let held = kernel.buffer_alloc(64).unwrap();

    spawn_traced(&kernel, &recorder, "hungry", 3, |k, log| {
        let buffer = k.buffer_alloc(64).unwrap();
        log.push(format!("got {}", buffer.len()));
        k.buffer_free(buffer).unwrap();
    })
    .unwrap();
    kernel.schedule().unwrap();

    assert_eq!(recorder.entries(), vec!["hungry start"]);
    assert_eq!(kernel.buffer_stats()[0].waiting, 1);

    kernel.buffer_free(held).unwrap();
    kernel.schedule().unwrap();
    assert_eq!(
        recorder.entries(),
        vec!["hungry start", "got 128", "hungry end"]
    );
    let stats = kernel.buffer_stats()[0];
    assert_eq!((stats.allocated, stats.free, stats.waiting), (0, 1, 0));
}

#[test]
fn test_interrupt_context_gets_exhausted_error() {
    let kernel = tight_kernel();
    let held = kernel.buffer_alloc(64).unwrap();

    let handle = kernel.handle();
    let result = std::thread::spawn(move || handle.buffer_alloc(64).map(|buffer| buffer.len()))
        .join()
        .unwrap();
    assert_eq!(result, Err(KernelError::BufferExhausted(64)));
    kernel.buffer_free(held).unwrap();
}

#[test]
fn test_buffers_pass_between_processes() {
    let kernel = tight_kernel();
    let recorder = Recorder::new();
    let slot = Arc::new(Mutex::new(None));

    let put = Arc::clone(&slot);
    spawn_traced(&kernel, &recorder, "filler", 4, move |k, _| {
        let mut buffer = k.buffer_alloc(16).unwrap();
        buffer[..5].copy_from_slice(b"hello");
        *put.lock().unwrap() = Some(buffer);
    })
    .unwrap();
    let take = Arc::clone(&slot);
    spawn_traced(&kernel, &recorder, "drainer", 2, move |k, log| {
        let buffer = take.lock().unwrap().take().unwrap();
        log.push(String::from_utf8_lossy(&buffer[..5]).into_owned());
        k.buffer_free(buffer).unwrap();
    })
    .unwrap();

    kernel.schedule().unwrap();
    assert!(recorder.entries().contains(&"hello".to_string()));
    assert_eq!(kernel.buffer_stats()[0].free, 1);
}
