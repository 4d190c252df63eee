/*!
 * Wait/Wake Tests
 * Parking, interruption, timeouts, and close while blocked
 */

use super::common::*;
use kernel_netsock::{Errno, SocketConfig, ThreadContext};
use kernel_netsock::net::engine::SimEngine;
use std::net::Ipv4Addr;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_cancelled_read_returns_eintr() {
    let (engine, sys) = setup();
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9200);

    let reader_ctx = ThreadContext::new(PID, 7);
    let token = reader_ctx.cancel_token().clone();
    let reader = {
        let sys = sys.clone();
        thread::spawn(move || sys.read(&reader_ctx, fd, &mut [0u8; 8]))
    };
    wait_for_waiter(&sys, fd);
    token.cancel();

    assert_eq!(reader.join().unwrap(), Errno::Eintr.as_sysreturn());
    assert!(!socket_of(&sys, fd).has_waiter());

    // The withdrawn read must not swallow data that arrives afterwards
    engine.deliver(pcb_of(&sys, fd), &b"late"[..]).unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(sys.read(&ctx(1), fd, &mut buf), 4);
}

#[test]
fn test_cancellation_is_sticky_until_reset() {
    let (engine, sys) = setup();
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9201);

    let cancelled = ctx(3);
    cancelled.cancel_token().cancel();
    assert_eq!(
        sys.read(&cancelled, fd, &mut [0u8; 4]),
        Errno::Eintr.as_sysreturn()
    );
    assert!(cancelled.cancel_token().is_cancelled());

    cancelled.cancel_token().reset();
    engine.deliver(pcb_of(&sys, fd), &b"ok"[..]).unwrap();
    assert_eq!(sys.read(&cancelled, fd, &mut [0u8; 4]), 2);
}

#[test]
fn test_cancelled_accept_leaves_listener_usable() {
    let (engine, sys) = setup();
    let listen_fd = listener(&sys, 9202);

    let acceptor_ctx = ThreadContext::new(PID, 8);
    let token = acceptor_ctx.cancel_token().clone();
    let acceptor = {
        let sys = sys.clone();
        thread::spawn(move || sys.accept(&acceptor_ctx, listen_fd, None))
    };
    wait_for_waiter(&sys, listen_fd);
    token.cancel();
    assert_eq!(acceptor.join().unwrap(), Errno::Eintr.as_sysreturn());

    engine.inbound(pcb_of(&sys, listen_fd), remote(50200)).unwrap();
    let (fd, _) = accept_with_peer(&sys, listen_fd);
    assert!(fd >= 1000);
}

#[test]
fn test_park_timeout_returns_eagain() {
    let config = SocketConfig::default().with_park_timeout(Duration::from_millis(30));
    let (engine, sys) = setup_with(SimEngine::default(), config);
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9203);

    let started = Instant::now();
    assert_eq!(sys.read(&ctx(1), fd, &mut [0u8; 4]), Errno::Eagain.as_sysreturn());
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert!(!socket_of(&sys, fd).has_waiter());
}

#[test]
fn test_interrupted_connect_stays_in_connection() {
    let (engine, sys) = setup();
    let fd = new_socket(&sys);

    let connector_ctx = ThreadContext::new(PID, 9);
    let token = connector_ctx.cancel_token().clone();
    let connector = {
        let sys = sys.clone();
        let target = sockaddr(Ipv4Addr::LOCALHOST, 80);
        thread::spawn(move || sys.connect(&connector_ctx, fd, &target))
    };
    wait_for_waiter(&sys, fd);
    token.cancel();
    assert_eq!(connector.join().unwrap(), Errno::Eintr.as_sysreturn());

    let socket = socket_of(&sys, fd);
    assert_eq!(socket.state(), kernel_netsock::SocketState::InConnection);

    // The engine may still finish the handshake later
    engine.complete_connect(socket.pcb().unwrap(), Ok(()));
    assert_eq!(socket.state(), kernel_netsock::SocketState::Open);
}

#[test]
fn test_close_resumes_parked_reader_with_ebadf() {
    let (engine, sys) = setup();
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9204);

    let reader = {
        let sys = sys.clone();
        thread::spawn(move || sys.read(&ctx(2), fd, &mut [0u8; 8]))
    };
    wait_for_waiter(&sys, fd);
    assert_eq!(sys.close(&ctx(1), fd), 0);

    assert_eq!(reader.join().unwrap(), Errno::Ebadf.as_sysreturn());
}

#[test]
fn test_close_resumes_parked_acceptor_with_ebadf() {
    let (_engine, sys) = setup();
    let listen_fd = listener(&sys, 9205);

    let acceptor = {
        let sys = sys.clone();
        thread::spawn(move || sys.accept(&ctx(2), listen_fd, None))
    };
    wait_for_waiter(&sys, listen_fd);
    assert_eq!(sys.close(&ctx(1), listen_fd), 0);

    assert_eq!(acceptor.join().unwrap(), Errno::Ebadf.as_sysreturn());
}

#[test]
fn test_second_blocking_call_is_ebusy() {
    let (engine, sys) = setup();
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9206);

    let reader = {
        let sys = sys.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 8];
            let n = sys.read(&ctx(2), fd, &mut buf);
            (n, buf)
        })
    };
    wait_for_waiter(&sys, fd);

    assert_eq!(sys.read(&ctx(3), fd, &mut [0u8; 8]), Errno::Ebusy.as_sysreturn());

    engine.deliver(pcb_of(&sys, fd), &b"first"[..]).unwrap();
    let (n, buf) = reader.join().unwrap();
    assert_eq!(n, 5);
    assert_eq!(&buf[..5], b"first");
}

#[test]
fn test_read_racing_delivery_never_loses_a_wakeup() {
    // A lost wakeup parks the reader until the timeout and surfaces as EAGAIN
    let config = SocketConfig::default().with_park_timeout(Duration::from_secs(2));
    let (engine, sys) = setup_with(SimEngine::default(), config);
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9207);
    let pcb = pcb_of(&sys, fd);

    for round in 0..500u32 {
        let payload = round.to_be_bytes();
        let start = Arc::new(Barrier::new(2));
        let reader = {
            let sys = sys.clone();
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let mut buf = [0u8; 8];
                start.wait();
                let n = sys.read(&ctx(2), fd, &mut buf);
                (n, buf)
            })
        };
        start.wait();
        engine.deliver(pcb, payload.to_vec()).unwrap();

        let (n, buf) = reader.join().unwrap();
        assert_eq!(n, 4, "round {}", round);
        assert_eq!(&buf[..4], &payload[..], "round {}", round);
        assert!(!socket_of(&sys, fd).has_waiter());
    }
    assert_eq!(socket_of(&sys, fd).queued(), 0);
    assert_eq!(engine.credited(pcb), 500 * 4);
}
