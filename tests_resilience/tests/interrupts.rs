//! Interrupt Handler Scenarios
//!
//! A host thread that is not a process plays the interrupt: it enters the
//! gate, makes non-blocking kernel calls, and leaves.

use hal::TimerDevice;
use kernel_api::{KernelApi, KernelError};
use sim_kernel::ManualTimer;
use std::thread;
use tests_resilience::{spawn_traced, BootedKernel, Recorder};

#[test]
fn test_handler_post_wakes_blocked_process() {
    let kernel = BootedKernel::new();
    let recorder = Recorder::new();
    let irq = kernel.sem_create(0).unwrap();

    spawn_traced(&kernel, &recorder, "driver", 5, move |k, log| {
        k.sem_wait(irq).unwrap();
        log.push("serviced");
    })
    .unwrap();
    kernel.schedule().unwrap();

    let isr = kernel.handle();
    thread::spawn(move || isr.interrupt(|k| k.sem_post(irq)))
        .join()
        .unwrap()
        .unwrap();

    kernel.schedule().unwrap();
    assert_eq!(
        recorder.entries(),
        vec!["driver start", "serviced", "driver end"]
    );
}

#[test]
fn test_handler_wakes_idle_init() {
    let kernel = BootedKernel::new();
    let isr = kernel.handle();
    let init = kernel.init_pid();

    let helper = thread::spawn(move || {
        // Give INIT time to go idle inside sleep().
        thread::sleep(std::time::Duration::from_millis(50));
        isr.interrupt(|k| k.awake(init))
    });

    kernel.sleep(60_000).unwrap();
    assert_eq!(helper.join().unwrap(), Ok(()));
}

#[test]
fn test_handler_cannot_block() {
    let kernel = BootedKernel::new();
    let sem = kernel.sem_create(0).unwrap();
    let isr = kernel.handle();

    let (wait, recv, schedule) = thread::spawn(move || {
        isr.interrupt(|k| (k.sem_wait(sem), k.msg_recv(true), k.schedule()))
    })
    .join()
    .unwrap();
    assert_eq!(wait, Err(KernelError::NotProcessContext));
    assert_eq!(recv, Err(KernelError::NotProcessContext));
    assert_eq!(schedule, Err(KernelError::NotProcessContext));
    assert_eq!(kernel.sem_count(sem), Some(0));
}

#[test]
fn test_handler_send_queues_without_blocking() {
    let kernel = BootedKernel::new();
    let init = kernel.init_pid();
    let isr = kernel.handle();

    thread::spawn(move || isr.interrupt(|k| k.msg_send(init, b"irq", false)))
        .join()
        .unwrap()
        .unwrap();
    assert_eq!(kernel.msg_recv(false), Ok(Some(b"irq".to_vec())));
}

#[test]
fn test_timer_interrupt_from_device() {
    let kernel = BootedKernel::new();
    let isr = kernel.handle();
    let before = kernel.now();

    let applied = thread::spawn(move || {
        let mut timer = ManualTimer::new();
        timer.advance_ticks(4);
        let polled = timer.poll_ticks();
        (polled, isr.interrupt(|k| k.poll_timer(&mut timer)))
    })
    .join()
    .unwrap();

    assert_eq!(applied, (4, 4));
    assert!(kernel.now() > before);
    assert!(kernel.interrupts_enabled());
}
