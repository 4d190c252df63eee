/*!
 * Socket Manager
 * Descriptor table glue: fd allocation, per-process ownership, cleanup
 */

use super::config::SocketConfig;
use super::engine::TcpEngine;
use super::socket::{Socket, SocketEnv, SocketState};
use crate::core::errors::SocketError;
use crate::core::limits::SOCKET_FD_BASE;
use crate::core::types::{Fd, KernelResult, Pid};
use crate::monitoring::span_operation;
use ahash::RandomState;
use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use log::{info, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared descriptor table
///
/// Sockets keep a weak reference so the accept callback can install child
/// sockets and a closing listener can release queued children.
#[repr(C, align(64))]
pub(crate) struct SocketTable {
    next_fd: AtomicU32,
    sockets: DashMap<Fd, Arc<Socket>, RandomState>,
    /// Which descriptors each process owns
    process_sockets: DashMap<Pid, HashSet<Fd>, RandomState>,
    /// Lock-free queue for fd recycling
    free_fds: SegQueue<Fd>,
    limit: usize,
    census: Arc<AtomicUsize>,
    engine: Arc<dyn TcpEngine>,
    config: Arc<SocketConfig>,
}

impl SocketTable {
    fn allocate_fd(&self) -> Fd {
        if let Some(recycled) = self.free_fds.pop() {
            trace!("Recycled FD {} for socket", recycled);
            recycled
        } else {
            let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
            trace!("Allocated new FD {} for socket", fd);
            fd
        }
    }

    fn count(&self, pid: Pid) -> usize {
        self.process_sockets
            .get(&pid)
            .map(|fds| fds.len())
            .unwrap_or(0)
    }

    /// Allocate a descriptor for `pid` and install the socket `build` returns
    pub(crate) fn install<F>(&self, pid: Pid, build: F) -> KernelResult<Arc<Socket>>
    where
        F: FnOnce(Fd) -> KernelResult<Arc<Socket>>,
    {
        let count = self.count(pid);
        if count >= self.limit {
            warn!("PID {} exceeded socket limit: {}/{}", pid, count, self.limit);
            return Err(SocketError::TooManyFiles {
                pid,
                limit: self.limit,
            });
        }

        let fd = self.allocate_fd();
        match build(fd) {
            Ok(socket) => {
                self.sockets.insert(fd, Arc::clone(&socket));
                self.process_sockets
                    .entry(pid)
                    .or_insert_with(HashSet::new)
                    .insert(fd);
                Ok(socket)
            }
            Err(err) => {
                self.free_fds.push(fd);
                Err(err)
            }
        }
    }

    /// Detach a descriptor from the table and recycle it
    pub(crate) fn remove(&self, pid: Pid, fd: Fd) -> Option<Arc<Socket>> {
        let (_, socket) = self.sockets.remove_if(&fd, |_, socket| socket.pid() == pid)?;
        if let Some(mut fds) = self.process_sockets.get_mut(&pid) {
            fds.remove(&fd);
        }
        self.free_fds.push(fd);
        trace!("Recycled FD {} for reuse", fd);
        Some(socket)
    }

    fn env(self: &Arc<Self>) -> SocketEnv {
        SocketEnv {
            engine: Arc::clone(&self.engine),
            config: Arc::clone(&self.config),
            table: Arc::downgrade(self),
            census: Arc::clone(&self.census),
        }
    }
}

/// Socket manager for tracking open sockets
#[derive(Clone)]
pub struct SocketManager {
    table: Arc<SocketTable>,
}

impl SocketManager {
    pub fn new(engine: Arc<dyn TcpEngine>, config: SocketConfig) -> Self {
        let span = span_operation("socket_manager_init");
        let _guard = span.enter();
        info!(
            "Socket manager initialized (fd base {}, {} sockets per process)",
            SOCKET_FD_BASE, config.max_sockets_per_process
        );
        span.record_result(true);
        Self {
            table: Arc::new(SocketTable {
                next_fd: AtomicU32::new(SOCKET_FD_BASE),
                sockets: DashMap::with_hasher(RandomState::new()),
                process_sockets: DashMap::with_hasher(RandomState::new()),
                free_fds: SegQueue::new(),
                limit: config.max_sockets_per_process,
                census: Arc::new(AtomicUsize::new(0)),
                engine,
                config: Arc::new(config),
            }),
        }
    }

    pub fn config(&self) -> &SocketConfig {
        &self.table.config
    }

    pub fn engine(&self) -> &Arc<dyn TcpEngine> {
        &self.table.engine
    }

    /// Create a socket in CREATED state and give it a descriptor
    pub fn open(&self, pid: Pid) -> KernelResult<Arc<Socket>> {
        let env = self.table.env();
        let socket = self
            .table
            .install(pid, |fd| Socket::create(fd, pid, env))?;
        info!("PID {} allocated socket FD {}", pid, socket.fd());
        Ok(socket)
    }

    /// Look up a descriptor owned by `pid`
    pub fn resolve(&self, pid: Pid, fd: Fd) -> KernelResult<Arc<Socket>> {
        if fd < SOCKET_FD_BASE {
            return Err(SocketError::NotSocket(fd));
        }
        let socket = self
            .table
            .sockets
            .get(&fd)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(SocketError::BadDescriptor(fd))?;
        if socket.pid() != pid {
            return Err(SocketError::BadDescriptor(fd));
        }
        Ok(socket)
    }

    /// Close a descriptor; the number is free for reuse on return
    pub fn close(&self, pid: Pid, fd: Fd) -> KernelResult<()> {
        let socket = self
            .table
            .remove(pid, fd)
            .ok_or(SocketError::BadDescriptor(fd))?;
        socket.close();
        Ok(())
    }

    /// Get current socket count for a process
    pub fn get_socket_count(&self, pid: Pid) -> usize {
        self.table.count(pid)
    }

    /// Check if process has any open sockets
    pub fn has_process_sockets(&self, pid: Pid) -> bool {
        self.table
            .process_sockets
            .get(&pid)
            .map(|fds| !fds.is_empty())
            .unwrap_or(false)
    }

    /// Close all sockets for a terminated process
    pub fn cleanup_process_sockets(&self, pid: Pid) -> usize {
        let span = span_operation("socket_cleanup_process");
        let _guard = span.enter();
        span.record("pid", &pid.to_string());

        let Some((_, fds)) = self.table.process_sockets.remove(&pid) else {
            trace!("No sockets to cleanup for PID {}", pid);
            span.record("closed_count", "0");
            span.record_result(true);
            return 0;
        };

        let owned = fds.len();
        let mut closed = 0;
        for fd in fds {
            // Children closed along with their listener are already gone
            if let Some((_, socket)) = self.table.sockets.remove(&fd) {
                self.table.free_fds.push(fd);
                socket.close();
                closed += 1;
            }
        }

        info!("Cleaned up {}/{} sockets for PID {}", closed, owned, pid);
        span.record("closed_count", &closed.to_string());
        span.record_result(true);
        closed
    }

    /// Get socket statistics
    pub fn stats(&self) -> SocketStats {
        let sockets: Vec<Arc<Socket>> = self
            .table
            .sockets
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut stats = SocketStats {
            open_descriptors: sockets.len(),
            recycled_fds_available: self.table.free_fds.len(),
            live_objects: self.table.census.load(Ordering::SeqCst),
            processes: self.table.process_sockets.len(),
            ..SocketStats::default()
        };
        for socket in sockets {
            match socket.state() {
                SocketState::Listening => stats.listening += 1,
                SocketState::Open => stats.open += 1,
                SocketState::InConnection => stats.connecting += 1,
                SocketState::Created => stats.created += 1,
                SocketState::Closed | SocketState::Undefined => stats.defunct += 1,
            }
        }
        stats
    }
}

/// Socket statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketStats {
    pub open_descriptors: usize,
    pub created: usize,
    pub open: usize,
    pub connecting: usize,
    pub listening: usize,
    /// Remote-closed or failed sockets still holding a descriptor
    pub defunct: usize,
    /// Socket objects alive, including closed ones awaiting engine teardown
    pub live_objects: usize,
    pub recycled_fds_available: usize,
    pub processes: usize,
}
