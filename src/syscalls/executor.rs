/*!
 * Socket Syscall Executor
 * Owns the socket manager and wraps every handler in a traced span
 */

use crate::core::context::ThreadContext;
use crate::core::errors::sysreturn;
use crate::core::types::{Fd, KernelResult, Pid, SysReturn};
use crate::monitoring::span_syscall;
use crate::net::config::SocketConfig;
use crate::net::engine::TcpEngine;
use crate::net::manager::{SocketManager, SocketStats};
use log::debug;
use std::sync::Arc;

/// Executor for the socket syscall surface
#[derive(Clone)]
pub struct NetSyscalls {
    sockets: SocketManager,
}

impl NetSyscalls {
    pub fn new(engine: Arc<dyn TcpEngine>, config: SocketConfig) -> Self {
        Self {
            sockets: SocketManager::new(engine, config),
        }
    }

    pub fn socket_manager(&self) -> &SocketManager {
        &self.sockets
    }

    pub fn stats(&self) -> SocketStats {
        self.sockets.stats()
    }

    /// Release everything a terminated process left open
    pub fn cleanup_process(&self, pid: Pid) -> usize {
        self.sockets.cleanup_process_sockets(pid)
    }

    /// Run a handler inside a syscall span and convert to the raw ABI value
    pub(super) fn traced<F>(
        &self,
        name: &'static str,
        ctx: &ThreadContext,
        fd: Option<Fd>,
        handler: F,
    ) -> SysReturn
    where
        F: FnOnce() -> KernelResult<SysReturn>,
    {
        let span = span_syscall(name, ctx.pid());
        let _guard = span.enter();
        if let Some(fd) = fd {
            span.record_fd(fd);
        }

        let result = handler();
        if let Err(err) = &result {
            debug!(
                "PID {} tid {}: {} failed: {} ({})",
                ctx.pid(),
                ctx.tid(),
                name,
                err,
                err.errno()
            );
            span.record_error(err.errno(), &err.to_string());
        }
        let ret = sysreturn(result);
        span.record_return(ret);
        ret
    }
}
