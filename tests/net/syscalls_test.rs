/*!
 * Syscall Surface Tests
 * Argument validation, descriptor checks, and raw address handling
 */

use super::common::*;
use kernel_netsock::net::engine::SimEngine;
use kernel_netsock::syscalls::{IPPROTO_TCP, SOCK_CLOEXEC, SOCK_NONBLOCK};
use kernel_netsock::{AddrOut, Errno, SockAddrIn, SocketConfig, Sysno, ThreadContext};
use pretty_assertions::assert_eq;
use std::net::Ipv4Addr;

#[test]
fn test_socket_argument_validation() {
    let (_engine, sys) = setup();
    let c = ctx(1);
    assert_eq!(sys.socket(&c, 10, SOCK_STREAM, 0), Errno::Eafnosupport.as_sysreturn());
    assert_eq!(sys.socket(&c, AF_INET, 2, 0), Errno::Eprotonosupport.as_sysreturn());
    assert_eq!(sys.socket(&c, AF_INET, SOCK_STREAM, 17), Errno::Eprotonosupport.as_sysreturn());

    let flagged = SOCK_STREAM | SOCK_NONBLOCK | SOCK_CLOEXEC;
    assert_eq!(sys.socket(&c, AF_INET, flagged, IPPROTO_TCP), 1000);
    assert_eq!(sys.socket(&c, AF_INET, SOCK_STREAM, 0), 1001);
}

#[test]
fn test_bind_validates_address() {
    let (_engine, sys) = setup();
    let fd = new_socket(&sys);
    let full = sockaddr(Ipv4Addr::UNSPECIFIED, 7000);

    assert_eq!(sys.bind(&ctx(1), fd, &full[..8]), Errno::Einval.as_sysreturn());
    let mut inet6 = full;
    inet6[0..2].copy_from_slice(&10u16.to_ne_bytes());
    assert_eq!(sys.bind(&ctx(1), fd, &inet6), Errno::Eafnosupport.as_sysreturn());

    assert_eq!(sys.bind(&ctx(1), fd, &full), 0);
    let other = new_socket(&sys);
    assert_eq!(sys.bind(&ctx(1), other, &full), Errno::Ebusy.as_sysreturn());
}

#[test]
fn test_descriptor_checks() {
    let (_engine, sys) = setup();
    let fd = new_socket(&sys);
    let mut buf = [0u8; 4];

    assert_eq!(sys.read(&ctx(1), 3, &mut buf), Errno::Enotsock.as_sysreturn());
    assert_eq!(sys.read(&ctx(1), 5000, &mut buf), Errno::Ebadf.as_sysreturn());

    let stranger = ThreadContext::new(PID + 1, 1);
    assert_eq!(sys.write(&stranger, fd, b"x"), Errno::Ebadf.as_sysreturn());
    assert_eq!(sys.close(&stranger, fd), Errno::Ebadf.as_sysreturn());

    assert_eq!(sys.close(&ctx(1), fd), 0);
    assert_eq!(sys.close(&ctx(1), fd), Errno::Ebadf.as_sysreturn());
    assert_eq!(sys.setsockopt(&ctx(1), fd, 1, 2, &[1, 0, 0, 0]), Errno::Ebadf.as_sysreturn());
}

#[test]
fn test_setsockopt_is_accepted_and_ignored() {
    let (_engine, sys) = setup();
    let fd = new_socket(&sys);
    // SOL_SOCKET / SO_REUSEADDR
    assert_eq!(sys.setsockopt(&ctx(1), fd, 1, 2, &1i32.to_ne_bytes()), 0);
    assert_eq!(
        socket_of(&sys, fd).state(),
        kernel_netsock::SocketState::Created
    );
}

#[test]
fn test_listen_backlog_reaches_engine() {
    let (engine, sys) = setup();
    let defaulted = new_socket(&sys);
    assert_eq!(sys.listen(&ctx(1), defaulted, 0), 0);
    assert_eq!(engine.backlog(pcb_of(&sys, defaulted)), Some(5));

    let clamped = new_socket(&sys);
    assert_eq!(sys.listen(&ctx(1), clamped, 4096), 0);
    assert_eq!(engine.backlog(pcb_of(&sys, clamped)), Some(255));
}

#[test]
fn test_accept4_ignores_flags() {
    let (engine, sys) = setup();
    let listen_fd = listener(&sys, 9500);
    engine.inbound(pcb_of(&sys, listen_fd), remote(50500)).unwrap();

    let fd = sys.accept4(&ctx(1), listen_fd, None, SOCK_NONBLOCK | SOCK_CLOEXEC);
    assert!(fd >= 1000);
    assert_eq!(
        socket_of(&sys, fd as u32).state(),
        kernel_netsock::SocketState::Open
    );
}

#[test]
fn test_address_output_is_truncated() {
    let (engine, sys) = setup();
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9501);

    let mut short = [0xffu8; 8];
    let mut len = 6u32;
    let ret = sys.getpeername(
        &ctx(1),
        fd,
        AddrOut {
            buf: &mut short,
            len: &mut len,
        },
    );
    assert_eq!(ret, 0);
    assert_eq!(len, 16);
    let full = SockAddrIn::from(remote(40501)).to_bytes();
    assert_eq!(&short[..6], &full[..6]);
    assert_eq!(&short[6..], &[0xff, 0xff]);

    let mut name = [0u8; 16];
    let mut len = 16u32;
    let ret = sys.getsockname(
        &ctx(1),
        fd,
        AddrOut {
            buf: &mut name,
            len: &mut len,
        },
    );
    assert_eq!(ret, 0);
    let local = SockAddrIn::from_bytes(&name).unwrap();
    assert_eq!(local.port(), 9501);
    assert_eq!(local.ip(), Ipv4Addr::new(10, 0, 2, 15));
}

#[test]
fn test_getpeername_requires_connection() {
    let (_engine, sys) = setup();
    let fd = new_socket(&sys);
    let mut name = [0u8; 16];
    let mut len = 16u32;
    let ret = sys.getpeername(
        &ctx(1),
        fd,
        AddrOut {
            buf: &mut name,
            len: &mut len,
        },
    );
    assert_eq!(ret, Errno::Enotconn.as_sysreturn());
}

#[test]
fn test_write_after_remote_close_is_epipe() {
    let (engine, sys) = setup();
    let (_listen_fd, fd) = connected_pair(&engine, &sys, 9502);
    engine.remote_close(pcb_of(&sys, fd));
    assert_eq!(sys.write(&ctx(1), fd, b"late"), Errno::Epipe.as_sysreturn());
    assert_eq!(sys.read(&ctx(1), fd, &mut [0u8; 4]), Errno::Enotconn.as_sysreturn());
}

#[test]
fn test_per_process_socket_limit() {
    let config = SocketConfig {
        max_sockets_per_process: 2,
        ..SocketConfig::default()
    };
    let (engine, sys) = setup_with(SimEngine::default(), config);
    let listen_fd = listener(&sys, 9503);
    let pcb = pcb_of(&sys, listen_fd);

    // The accepted child counts against the listener's owner
    engine.inbound(pcb, remote(1)).unwrap();
    assert_eq!(
        engine.inbound(pcb, remote(2)),
        Err(kernel_netsock::EngineError::Mem)
    );
    assert_eq!(
        sys.socket(&ctx(1), AF_INET, SOCK_STREAM, 0),
        Errno::Emfile.as_sysreturn()
    );

    let other = ThreadContext::new(PID + 1, 1);
    assert!(sys.socket(&other, AF_INET, SOCK_STREAM, 0) >= 1000);
}

#[test]
fn test_sysno_table() {
    assert_eq!(Sysno::from_raw(41), Some(Sysno::Socket));
    assert_eq!(Sysno::from_raw(288), Some(Sysno::Accept4));
    assert_eq!(Sysno::from_raw(9999), None);
    assert_eq!(Sysno::Getpeername.number(), 52);
    assert_eq!(serde_json::to_string(&Sysno::Accept4).unwrap(), "\"accept4\"");
    for sysno in Sysno::ALL {
        assert_eq!(Sysno::from_raw(sysno.number()), Some(sysno));
    }
}
