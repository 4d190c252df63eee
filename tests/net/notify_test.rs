/*!
 * Readiness Notification Tests
 * Poll checks, edge/level triggering, and registry limits
 */

use super::common::*;
use kernel_netsock::net::engine::{EngineError, SimEngine};
use kernel_netsock::{
    Errno, EventHandler, LevelZeroMask, PollOutcome, Readiness, ReadyEvent, ReadySender, SocketConfig,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn drain(rx: &flume::Receiver<ReadyEvent>) -> Vec<Readiness> {
    rx.try_iter().map(|event| event.events).collect()
}

/// Level-triggered handler recording every delivery
fn recorder() -> (Arc<Mutex<Vec<Readiness>>>, Arc<dyn EventHandler>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: Arc<dyn EventHandler> = Arc::new(move |events: Readiness| {
        sink.lock().push(events);
        false
    });
    (seen, handler)
}

#[test]
fn test_check_delivers_immediately_when_ready() {
    let (engine, sys) = setup();
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9300);
    engine.deliver(pcb_of(&sys, fd), &b"x"[..]).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let outcome = sys
        .poll_check(
            &ctx(1),
            fd,
            Readiness::IN,
            Readiness::empty(),
            Arc::new(move |_events: Readiness| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }),
        )
        .unwrap();

    assert_eq!(
        outcome,
        PollOutcome::Delivered {
            events: Readiness::IN,
            done: true
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(socket_of(&sys, fd).notify_len(), 0);
}

#[test]
fn test_edge_triggered_fires_once_per_rising_edge() {
    let (engine, sys) = setup();
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9301);
    let pcb = pcb_of(&sys, fd);

    let (sender, rx) = ReadySender::channel(fd);
    let outcome = sys
        .poll_check(&ctx(1), fd, Readiness::IN | Readiness::ET, Readiness::empty(), Arc::new(sender))
        .unwrap();
    assert!(matches!(outcome, PollOutcome::Registered(_)));

    engine.deliver(pcb, &b"one"[..]).unwrap();
    engine.deliver(pcb, &b"two"[..]).unwrap();
    assert_eq!(drain(&rx), vec![Readiness::IN]);

    // Draining the queue re-arms the edge
    let mut buf = [0u8; 8];
    assert_eq!(sys.read(&ctx(1), fd, &mut buf), 3);
    assert_eq!(sys.read(&ctx(1), fd, &mut buf), 3);
    assert!(drain(&rx).is_empty());

    engine.deliver(pcb, &b"three"[..]).unwrap();
    assert_eq!(drain(&rx), vec![Readiness::IN]);
    assert_eq!(socket_of(&sys, fd).notify_len(), 1);
}

#[test]
fn test_level_triggered_fires_on_every_dispatch() {
    let (engine, sys) = setup();
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9302);
    let pcb = pcb_of(&sys, fd);

    let (seen, handler) = recorder();
    sys.poll_check(&ctx(1), fd, Readiness::IN, Readiness::empty(), handler)
        .unwrap();

    engine.deliver(pcb, &b"a"[..]).unwrap();
    engine.deliver(pcb, &b"b"[..]).unwrap();
    let mut buf = [0u8; 1];
    sys.read(&ctx(1), fd, &mut buf);
    sys.read(&ctx(1), fd, &mut buf);

    // Emptying the queue dispatches once more with nothing in the mask
    assert_eq!(
        *seen.lock(),
        vec![Readiness::IN, Readiness::IN, Readiness::empty()]
    );
}

#[test]
fn test_level_zero_mask_skip_policy() {
    let config = SocketConfig::default().with_level_zero_mask(LevelZeroMask::Skip);
    let (engine, sys) = setup_with(SimEngine::default(), config);
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9303);

    let (seen, handler) = recorder();
    sys.poll_check(&ctx(1), fd, Readiness::IN, Readiness::empty(), handler)
        .unwrap();
    engine.deliver(pcb_of(&sys, fd), &b"a"[..]).unwrap();
    sys.read(&ctx(1), fd, &mut [0u8; 1]);

    assert_eq!(*seen.lock(), vec![Readiness::IN]);
}

#[test]
fn test_remote_close_signals_hangup() {
    let (engine, sys) = setup();
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9304);

    let (sender, rx) = ReadySender::channel(fd);
    let mask = Readiness::IN | Readiness::HUP | Readiness::ET;
    sys.poll_check(&ctx(1), fd, mask, Readiness::empty(), Arc::new(sender))
        .unwrap();
    engine.remote_close(pcb_of(&sys, fd));

    assert_eq!(drain(&rx), vec![Readiness::IN | Readiness::HUP]);
    assert!(socket_of(&sys, fd).readiness().contains(Readiness::RDHUP));
}

#[test]
fn test_engine_error_without_waiter_dispatches() {
    let (engine, sys) = setup();
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9305);

    let (seen, handler) = recorder();
    sys.poll_check(&ctx(1), fd, Readiness::IN | Readiness::HUP, Readiness::empty(), handler)
        .unwrap();
    engine.fail(pcb_of(&sys, fd), EngineError::Abrt);

    assert_eq!(*seen.lock(), vec![Readiness::IN | Readiness::HUP]);
}

#[test]
fn test_oneshot_sender_is_removed_after_delivery() {
    let (engine, sys) = setup();
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9306);
    let pcb = pcb_of(&sys, fd);

    let (sender, rx) = ReadySender::channel(fd);
    sys.poll_check(&ctx(1), fd, Readiness::IN, Readiness::empty(), Arc::new(sender.oneshot()))
        .unwrap();
    engine.deliver(pcb, &b"a"[..]).unwrap();
    engine.deliver(pcb, &b"b"[..]).unwrap();

    assert_eq!(drain(&rx).len(), 1);
    assert_eq!(socket_of(&sys, fd).notify_len(), 0);
}

#[test]
fn test_poll_cancel_removes_registration() {
    let (engine, sys) = setup();
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9307);

    let (sender, rx) = ReadySender::channel(fd);
    let key = match sys
        .poll_check(&ctx(1), fd, Readiness::IN, Readiness::empty(), Arc::new(sender))
        .unwrap()
    {
        PollOutcome::Registered(key) => key,
        other => panic!("expected registration, got {:?}", other),
    };

    assert!(sys.poll_cancel(&ctx(1), fd, key).unwrap());
    assert!(!sys.poll_cancel(&ctx(1), fd, key).unwrap());
    engine.deliver(pcb_of(&sys, fd), &b"a"[..]).unwrap();
    assert!(drain(&rx).is_empty());
}

#[test]
fn test_registry_capacity_is_enomem() {
    let config = SocketConfig {
        notify_capacity: 2,
        ..SocketConfig::default()
    };
    let (engine, sys) = setup_with(SimEngine::default(), config);
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9308);

    for _ in 0..2 {
        let (_seen, handler) = recorder();
        sys.poll_check(&ctx(1), fd, Readiness::IN, Readiness::empty(), handler)
            .unwrap();
    }
    let (_seen, handler) = recorder();
    let err = sys
        .poll_check(&ctx(1), fd, Readiness::IN, Readiness::empty(), handler)
        .unwrap_err();
    assert_eq!(err.errno(), Errno::Enomem);
}

#[test]
fn test_listener_readable_while_connections_pending() {
    let (engine, sys) = setup();
    let listen_fd = listener(&sys, 9309);
    assert_eq!(socket_of(&sys, listen_fd).readiness(), Readiness::empty());

    let (sender, rx) = ReadySender::channel(listen_fd);
    sys.poll_check(
        &ctx(1),
        listen_fd,
        Readiness::IN | Readiness::ET,
        Readiness::empty(),
        Arc::new(sender),
    )
    .unwrap();

    engine.inbound(pcb_of(&sys, listen_fd), remote(50300)).unwrap();
    let events: Vec<ReadyEvent> = rx.try_iter().collect();
    assert_eq!(
        events,
        vec![ReadyEvent {
            fd: listen_fd,
            events: Readiness::IN
        }]
    );

    accept_with_peer(&sys, listen_fd);
    assert_eq!(socket_of(&sys, listen_fd).readiness(), Readiness::empty());
    engine.inbound(pcb_of(&sys, listen_fd), remote(50301)).unwrap();
    assert_eq!(drain(&rx), vec![Readiness::IN]);
}
