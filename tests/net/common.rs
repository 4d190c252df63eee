/*!
 * Shared fixtures for socket layer tests
 */

#![allow(dead_code)]

use kernel_netsock::net::engine::{PcbId, SimEngine};
use kernel_netsock::{AddrOut, Fd, NetSyscalls, SockAddrIn, Socket, SocketConfig, ThreadContext};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const PID: u32 = 1;
pub const AF_INET: i32 = 2;
pub const SOCK_STREAM: i32 = 1;

pub fn setup() -> (Arc<SimEngine>, NetSyscalls) {
    setup_with(SimEngine::default(), SocketConfig::default())
}

pub fn setup_with(engine: SimEngine, config: SocketConfig) -> (Arc<SimEngine>, NetSyscalls) {
    let engine = Arc::new(engine);
    let sys = NetSyscalls::new(engine.clone(), config);
    (engine, sys)
}

pub fn ctx(tid: u32) -> ThreadContext {
    ThreadContext::new(PID, tid)
}

pub fn sockaddr(ip: Ipv4Addr, port: u16) -> [u8; 16] {
    SockAddrIn::new(ip, port).to_bytes()
}

pub fn socket_of(sys: &NetSyscalls, fd: Fd) -> Arc<Socket> {
    sys.socket_manager().resolve(PID, fd).unwrap()
}

pub fn pcb_of(sys: &NetSyscalls, fd: Fd) -> PcbId {
    socket_of(sys, fd).pcb().unwrap()
}

pub fn new_socket(sys: &NetSyscalls) -> Fd {
    let fd = sys.socket(&ctx(1), AF_INET, SOCK_STREAM, 0);
    assert!(fd >= 1000, "socket failed: {}", fd);
    fd as Fd
}

/// Socket bound to `port` and listening
pub fn listener(sys: &NetSyscalls, port: u16) -> Fd {
    let fd = new_socket(sys);
    assert_eq!(sys.bind(&ctx(1), fd, &sockaddr(Ipv4Addr::UNSPECIFIED, port)), 0);
    assert_eq!(sys.listen(&ctx(1), fd, 5), 0);
    fd
}

pub fn remote(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(10, 0, 2, 2), port)
}

/// Accept one connection; returns the new descriptor and peer address bytes
pub fn accept_with_peer(sys: &NetSyscalls, listen_fd: Fd) -> (i64, [u8; 16]) {
    let mut peer = [0u8; 16];
    let mut len = 16u32;
    let fd = sys.accept(
        &ctx(1),
        listen_fd,
        Some(AddrOut {
            buf: &mut peer,
            len: &mut len,
        }),
    );
    (fd, peer)
}

/// Listener plus one accepted connection from `remote(peer_port)`
pub fn connected_pair(engine: &SimEngine, sys: &NetSyscalls, port: u16) -> (Fd, Fd) {
    let listen_fd = listener(sys, port);
    engine
        .inbound(pcb_of(sys, listen_fd), remote(40000 + port % 1000))
        .unwrap();
    let (fd, _) = accept_with_peer(sys, listen_fd);
    assert!(fd >= 1000, "accept failed: {}", fd);
    (listen_fd, fd as Fd)
}

/// Block until a thread is parked on `fd`
pub fn wait_for_waiter(sys: &NetSyscalls, fd: Fd) {
    let socket = socket_of(sys, fd);
    let deadline = Instant::now() + Duration::from_secs(5);
    while !socket.has_waiter() {
        assert!(Instant::now() < deadline, "no thread parked on fd {}", fd);
        thread::sleep(Duration::from_millis(1));
    }
}
