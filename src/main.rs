/*!
 * Socket Layer Demo
 *
 * Drives a listener through one accepted connection against the simulated
 * protocol engine and prints the final socket statistics as JSON.
 */

use anyhow::{bail, Context, Result};
use kernel_netsock::net::engine::SimEngine;
use kernel_netsock::{
    init_tracing, AddrOut, Errno, NetSyscalls, Readiness, ReadySender, SockAddrIn, SocketConfig,
    SysReturn, ThreadContext,
};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

const DEMO_PID: u32 = 1;
const DEMO_PORT: u16 = 8080;

fn check(ret: SysReturn, what: &str) -> Result<SysReturn> {
    if ret < 0 {
        let errno = i32::try_from(-ret).unwrap_or(i32::MAX);
        bail!("{} failed with errno {}", what, errno);
    }
    Ok(ret)
}

fn main() -> Result<()> {
    init_tracing();

    let engine = Arc::new(SimEngine::default());
    let sys = NetSyscalls::new(engine.clone(), SocketConfig::from_env());
    let ctx = ThreadContext::new(DEMO_PID, 1);

    info!("Socket layer demo starting");
    let listen_fd = check(sys.socket(&ctx, 2, 1, 0), "socket")? as u32;
    let local = SockAddrIn::new(Ipv4Addr::UNSPECIFIED, DEMO_PORT).to_bytes();
    check(sys.bind(&ctx, listen_fd, &local), "bind")?;
    check(sys.listen(&ctx, listen_fd, 5), "listen")?;

    let listener = sys.socket_manager().resolve(DEMO_PID, listen_fd)?;
    let (ready, events) = ReadySender::channel(listen_fd);
    listener.check(Readiness::IN | Readiness::ET, Readiness::empty(), Arc::new(ready))?;

    let listener_pcb = listener.pcb().context("listener has no engine handle")?;
    let remote = SocketAddrV4::new(Ipv4Addr::new(10, 0, 2, 2), 51000);
    engine.inbound(listener_pcb, remote)?;
    if let Ok(event) = events.try_recv() {
        info!(fd = event.fd, events = ?event.events, "listener became readable");
    }

    let mut peer = [0u8; 16];
    let mut peer_len = peer.len() as u32;
    let conn_fd = check(
        sys.accept(
            &ctx,
            listen_fd,
            Some(AddrOut {
                buf: &mut peer,
                len: &mut peer_len,
            }),
        ),
        "accept",
    )? as u32;
    info!(fd = conn_fd, peer = %SockAddrIn::from_bytes(&peer)?, "accepted connection");

    let written = check(sys.write(&ctx, conn_fd, b"hello"), "write")?;
    let conn_pcb = sys
        .socket_manager()
        .resolve(DEMO_PID, conn_fd)?
        .pcb()
        .context("connection has no engine handle")?;
    info!(written, sent = ?String::from_utf8_lossy(&engine.sent(conn_pcb)), "wrote to peer");

    // A blocked reader is woken by the arrival callback
    let reader = {
        let sys = sys.clone();
        let ctx = ThreadContext::new(DEMO_PID, 2);
        thread::spawn(move || {
            let mut buf = [0u8; 5];
            let n = sys.read(&ctx, conn_fd, &mut buf);
            (n, buf)
        })
    };
    while !sys.socket_manager().resolve(DEMO_PID, conn_fd)?.has_waiter() {
        thread::sleep(Duration::from_millis(1));
    }
    engine.deliver(conn_pcb, &b"world"[..])?;
    let (n, buf) = reader
        .join()
        .map_err(|_| anyhow::anyhow!("reader thread panicked"))?;
    check(n, "read")?;
    info!(bytes = n, data = %String::from_utf8_lossy(&buf), "read from peer");

    drop(listener);
    check(sys.close(&ctx, conn_fd), "close")?;
    check(sys.close(&ctx, listen_fd), "close")?;
    let again = sys.close(&ctx, listen_fd);
    info!(ret = again, ebadf = again == Errno::Ebadf.as_sysreturn(), "double close");

    println!("{}", serde_json::to_string_pretty(&sys.stats())?);
    Ok(())
}
