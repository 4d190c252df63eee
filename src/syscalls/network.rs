/*!
 * Network Syscalls
 * Stream socket operations against the socket layer
 *
 * Each handler returns the raw syscall value: a non-negative result or a
 * negated errno. Address arguments are raw `sockaddr_in` bytes.
 */

use super::executor::NetSyscalls;
use super::types::{Sysno, AF_INET, IPPROTO_TCP, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_STREAM};
use crate::core::context::ThreadContext;
use crate::core::errors::SocketError;
use crate::core::limits::{DEFAULT_LISTEN_BACKLOG, MAX_LISTEN_BACKLOG};
use crate::core::types::{Fd, KernelResult, SysReturn};
use crate::net::addr::SockAddrIn;
use crate::net::notify::{EventHandler, NotifyKey};
use crate::net::readiness::Readiness;
use crate::net::socket::PollOutcome;
use log::{info, trace};
use std::net::SocketAddrV4;
use std::sync::Arc;

/// Caller-supplied address output for accept-style calls
pub struct AddrOut<'a> {
    pub buf: &'a mut [u8],
    pub len: &'a mut u32,
}

impl AddrOut<'_> {
    fn fill(self, addr: SocketAddrV4) {
        SockAddrIn::from(addr).write_to(self.buf, self.len);
    }
}

fn listen_backlog(backlog: i32) -> u8 {
    if backlog <= 0 {
        DEFAULT_LISTEN_BACKLOG
    } else {
        backlog.min(i32::from(MAX_LISTEN_BACKLOG)) as u8
    }
}

impl NetSyscalls {
    /// socket(AF_INET, SOCK_STREAM, 0)
    pub fn socket(&self, ctx: &ThreadContext, domain: i32, kind: i32, protocol: i32) -> SysReturn {
        self.traced(Sysno::Socket.name(), ctx, None, || {
            if domain != AF_INET {
                return Err(SocketError::AddressFamily(domain as u16));
            }
            if kind & !(SOCK_NONBLOCK | SOCK_CLOEXEC) != SOCK_STREAM {
                return Err(SocketError::UnsupportedType(kind));
            }
            if protocol != 0 && protocol != IPPROTO_TCP {
                return Err(SocketError::UnsupportedType(protocol));
            }
            let socket = self.socket_manager().open(ctx.pid())?;
            Ok(SysReturn::from(socket.fd()))
        })
    }

    pub fn bind(&self, ctx: &ThreadContext, fd: Fd, addr: &[u8]) -> SysReturn {
        self.traced(Sysno::Bind.name(), ctx, Some(fd), || {
            let socket = self.socket_manager().resolve(ctx.pid(), fd)?;
            let local = SockAddrIn::from_bytes(addr)?;
            socket.bind(local.port())?;
            Ok(0)
        })
    }

    pub fn listen(&self, ctx: &ThreadContext, fd: Fd, backlog: i32) -> SysReturn {
        self.traced(Sysno::Listen.name(), ctx, Some(fd), || {
            let socket = self.socket_manager().resolve(ctx.pid(), fd)?;
            socket.listen(listen_backlog(backlog))?;
            Ok(0)
        })
    }

    /// Blocks until the connection completes or fails
    pub fn connect(&self, ctx: &ThreadContext, fd: Fd, addr: &[u8]) -> SysReturn {
        self.traced(Sysno::Connect.name(), ctx, Some(fd), || {
            let socket = self.socket_manager().resolve(ctx.pid(), fd)?;
            let remote = SockAddrIn::from_bytes(addr)?;
            socket.connect(ctx, remote.as_socket_addr())?;
            info!("PID {} connected fd {} to {}", ctx.pid(), fd, remote);
            Ok(0)
        })
    }

    /// Returns the accepted descriptor; blocks while no connection is queued
    pub fn accept(&self, ctx: &ThreadContext, fd: Fd, addr: Option<AddrOut<'_>>) -> SysReturn {
        self.traced(Sysno::Accept.name(), ctx, Some(fd), || self.do_accept(ctx, fd, addr))
    }

    /// `accept` with flags; SOCK_NONBLOCK and SOCK_CLOEXEC are not honoured
    pub fn accept4(
        &self,
        ctx: &ThreadContext,
        fd: Fd,
        addr: Option<AddrOut<'_>>,
        flags: i32,
    ) -> SysReturn {
        self.traced(Sysno::Accept4.name(), ctx, Some(fd), || {
            if flags != 0 {
                trace!("accept4 on fd {}: ignoring flags {:#x}", fd, flags);
            }
            self.do_accept(ctx, fd, addr)
        })
    }

    fn do_accept(
        &self,
        ctx: &ThreadContext,
        fd: Fd,
        addr: Option<AddrOut<'_>>,
    ) -> KernelResult<SysReturn> {
        let socket = self.socket_manager().resolve(ctx.pid(), fd)?;
        let accepted = socket.accept(ctx)?;
        if let Some(out) = addr {
            out.fill(accepted.peer);
        }
        trace!("fd {} accepted fd {} from {}", fd, accepted.fd, accepted.peer);
        Ok(SysReturn::from(accepted.fd))
    }

    /// Copies up to `buf.len()` bytes; blocks while nothing is queued
    pub fn read(&self, ctx: &ThreadContext, fd: Fd, buf: &mut [u8]) -> SysReturn {
        self.traced(Sysno::Read.name(), ctx, Some(fd), || {
            let socket = self.socket_manager().resolve(ctx.pid(), fd)?;
            let data = socket.read(ctx, buf.len())?;
            buf[..data.len()].copy_from_slice(&data);
            Ok(data.len() as SysReturn)
        })
    }

    pub fn write(&self, ctx: &ThreadContext, fd: Fd, buf: &[u8]) -> SysReturn {
        self.traced(Sysno::Write.name(), ctx, Some(fd), || {
            let socket = self.socket_manager().resolve(ctx.pid(), fd)?;
            Ok(socket.write(buf)? as SysReturn)
        })
    }

    pub fn close(&self, ctx: &ThreadContext, fd: Fd) -> SysReturn {
        self.traced(Sysno::Close.name(), ctx, Some(fd), || {
            self.socket_manager().close(ctx.pid(), fd)?;
            Ok(0)
        })
    }

    pub fn getsockname(&self, ctx: &ThreadContext, fd: Fd, addr: AddrOut<'_>) -> SysReturn {
        self.traced(Sysno::Getsockname.name(), ctx, Some(fd), || {
            let socket = self.socket_manager().resolve(ctx.pid(), fd)?;
            addr.fill(socket.local_name()?);
            Ok(0)
        })
    }

    pub fn getpeername(&self, ctx: &ThreadContext, fd: Fd, addr: AddrOut<'_>) -> SysReturn {
        self.traced(Sysno::Getpeername.name(), ctx, Some(fd), || {
            let socket = self.socket_manager().resolve(ctx.pid(), fd)?;
            addr.fill(socket.peer_name()?);
            Ok(0)
        })
    }

    /// Options are accepted and ignored
    pub fn setsockopt(
        &self,
        ctx: &ThreadContext,
        fd: Fd,
        level: i32,
        optname: i32,
        optval: &[u8],
    ) -> SysReturn {
        self.traced(Sysno::Setsockopt.name(), ctx, Some(fd), || {
            self.socket_manager().resolve(ctx.pid(), fd)?;
            trace!(
                "setsockopt fd {}: level {} option {} ({} bytes) ignored",
                fd,
                level,
                optname,
                optval.len()
            );
            Ok(0)
        })
    }

    /// File-level poll check used by an epoll-style layer
    pub fn poll_check(
        &self,
        ctx: &ThreadContext,
        fd: Fd,
        eventmask: Readiness,
        last: Readiness,
        handler: Arc<dyn EventHandler>,
    ) -> KernelResult<PollOutcome> {
        self.socket_manager()
            .resolve(ctx.pid(), fd)?
            .check(eventmask, last, handler)
    }

    /// Withdraw an interest registered by `poll_check`
    pub fn poll_cancel(&self, ctx: &ThreadContext, fd: Fd, key: NotifyKey) -> KernelResult<bool> {
        Ok(self.socket_manager().resolve(ctx.pid(), fd)?.deregister(key))
    }
}
