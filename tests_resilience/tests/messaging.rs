//! Mailbox Scenarios

use kernel_api::{KernelApi, KernelError, Status};
use tests_resilience::{spawn_traced, BootedKernel, Recorder};

#[test]
fn test_request_reply_between_processes() {
    let kernel = BootedKernel::new();
    let recorder = Recorder::new();
    let init = kernel.init_pid();

    let server = spawn_traced(&kernel, &recorder, "server", 4, move |k, log| {
        while let Ok(Some(request)) = k.msg_recv(true) {
            if request == b"stop" {
                break;
            }
            let reply: Vec<u8> = request.iter().rev().copied().collect();
            log.push(format!("served {}", String::from_utf8_lossy(&request)));
            k.msg_send(init, &reply, false).unwrap();
        }
    })
    .unwrap();
    kernel.schedule().unwrap();

    kernel.msg_send(server, b"abc", false).unwrap();
    kernel.schedule().unwrap();
    assert_eq!(kernel.msg_recv(false), Ok(Some(b"cba".to_vec())));

    kernel.msg_send(server, b"stop", false).unwrap();
    kernel.schedule().unwrap();
    assert_eq!(
        recorder.entries(),
        vec!["server start", "served abc", "server end"]
    );
}

#[test]
fn test_synchronous_send_returns_after_receipt() {
    let kernel = BootedKernel::new();
    let recorder = Recorder::new();

    let reader = spawn_traced(&kernel, &recorder, "reader", 2, |k, log| {
        let message = k.msg_recv(true).unwrap().unwrap_or_default();
        log.push(format!("read {}", String::from_utf8_lossy(&message)));
    })
    .unwrap();
    spawn_traced(&kernel, &recorder, "writer", 6, move |k, log| {
        k.msg_send(reader, b"hello", true).unwrap();
        log.push("send returned");
    })
    .unwrap();

    kernel.schedule().unwrap();
    assert_eq!(
        recorder.entries(),
        vec![
            "writer start",
            "reader start",
            "read hello",
            "reader end",
            "send returned",
            "writer end",
        ]
    );
}

#[test]
fn test_empty_mailbox_status_codes() {
    let kernel = BootedKernel::new();
    let result = kernel.msg_recv(false);
    assert_eq!(result, Ok(None));
    assert_eq!(Status::of_recv(&result), Status::NoMessage);
    assert_eq!(Status::of_recv(&result).code(), 1);
}

#[test]
fn test_init_blocking_send_to_itself_is_refused() {
    let kernel = BootedKernel::new();
    let init = kernel.init_pid();
    assert_eq!(
        kernel.msg_send(init, b"loop", true),
        Err(KernelError::WouldDeadlock(init))
    );
    kernel.msg_send(init, b"note", false).unwrap();
    assert_eq!(kernel.mailbox_len(init), Some(1));
    assert_eq!(kernel.msg_recv(false), Ok(Some(b"note".to_vec())));
}

#[test]
fn test_messages_to_killed_process_are_discarded() {
    let kernel = BootedKernel::new();
    let recorder = Recorder::new();

    let idle = spawn_traced(&kernel, &recorder, "idle", 3, |k, _| {
        k.suspend(k.current_pid()).unwrap();
    })
    .unwrap();
    kernel.schedule().unwrap();

    kernel.msg_send(idle, b"one", false).unwrap();
    kernel.msg_send(idle, b"two", false).unwrap();
    assert_eq!(kernel.mailbox_len(idle), Some(2));

    kernel.kill(idle).unwrap();
    assert!(kernel.msg_send(idle, b"three", false).is_err());
    assert_eq!(kernel.process_count(), 1);
}
