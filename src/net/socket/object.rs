/*!
 * Socket Object
 * Syscall-side operations on a single stream socket
 */

use super::state::SocketState;
use crate::core::context::ThreadContext;
use crate::core::errors::SocketError;
use crate::core::types::{Fd, KernelResult, Pid};
use crate::net::config::SocketConfig;
use crate::net::engine::{EngineError, EngineResult, PcbId, Segment, TcpEngine, WriteFlags};
use crate::net::manager::SocketTable;
use crate::net::notify::{deliver_all, Delivery, EventHandler, NotifyKey, NotifyRegistry};
use crate::net::readiness::{self, Readiness};
use crate::net::wait::{Accepted, Completed, Completion, Parked, PendingOp, WaitEnd, WaitSlot};
use log::{info, trace, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Collaborators every socket needs
#[derive(Clone)]
pub(crate) struct SocketEnv {
    pub(crate) engine: Arc<dyn TcpEngine>,
    pub(crate) config: Arc<SocketConfig>,
    pub(crate) table: Weak<SocketTable>,
    /// Live socket objects, including ones the engine still references
    pub(crate) census: Arc<AtomicUsize>,
}

/// Queued incoming entries; the variant follows the socket's role
pub(super) enum Incoming {
    Segments(VecDeque<Segment>),
    Connections(VecDeque<(Arc<Socket>, SocketAddrV4)>),
}

impl Incoming {
    pub(super) fn len(&self) -> usize {
        match self {
            Self::Segments(queue) => queue.len(),
            Self::Connections(queue) => queue.len(),
        }
    }

    /// Empty the queue, handing back any child sockets still waiting for accept
    fn drain(&mut self) -> Vec<Arc<Socket>> {
        match self {
            Self::Segments(queue) => {
                queue.clear();
                Vec::new()
            }
            Self::Connections(queue) => queue.drain(..).map(|(child, _)| child).collect(),
        }
    }
}

pub(super) struct SocketInner {
    pub(super) state: SocketState,
    pub(super) pcb: Option<PcbId>,
    pub(super) incoming: Incoming,
    pub(super) waiting: WaitSlot,
    pub(super) notify: NotifyRegistry,
    pub(super) last_error: Option<EngineError>,
    /// Set once an active or passive open completed
    pub(super) connected: bool,
    /// Logical close done; late callbacks are ignored
    pub(super) released: bool,
}

/// Work deferred until the socket lock is released
#[derive(Default)]
pub(super) struct Effects {
    pub(super) resume: Option<(Parked, KernelResult<Completed>)>,
    pub(super) notify: Vec<Delivery>,
    pub(super) credit: Option<(PcbId, usize)>,
}

impl Effects {
    pub(super) fn run(self, socket: &Socket) {
        if let Some((pcb, len)) = self.credit {
            socket.env.engine.recv_credit(pcb, len);
        }
        if let Some((parked, result)) = self.resume {
            trace!(
                "fd {}: resuming tid {} ({})",
                socket.fd,
                parked.tid,
                parked.op.name()
            );
            parked.resume(result);
        }
        if !self.notify.is_empty() {
            let done = deliver_all(self.notify);
            if !done.is_empty() {
                socket.inner.lock().notify.retire(&done);
            }
        }
    }
}

/// Result of a poll check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Readiness matched; the handler ran and returned `done`
    Delivered { events: Readiness, done: bool },
    /// Nothing matched; the interest is registered for later dispatch
    Registered(NotifyKey),
}

/// A stream socket
pub struct Socket {
    fd: Fd,
    pid: Pid,
    pub(super) env: SocketEnv,
    me: Weak<Socket>,
    pub(super) inner: Mutex<SocketInner>,
}

impl Socket {
    /// New socket in CREATED with a fresh engine handle
    pub(crate) fn create(fd: Fd, pid: Pid, env: SocketEnv) -> KernelResult<Arc<Self>> {
        let pcb = env
            .engine
            .create()
            .ok_or(SocketError::OutOfMemory("protocol control block"))?;
        let socket = Self::build(fd, pid, env, pcb, SocketState::Created, false);
        socket.attach(pcb);
        Ok(socket)
    }

    /// Child socket for a connection accepted by a listener
    pub(crate) fn adopt(fd: Fd, pid: Pid, env: SocketEnv, pcb: PcbId) -> Arc<Self> {
        let socket = Self::build(fd, pid, env, pcb, SocketState::Open, true);
        socket.attach(pcb);
        socket
    }

    fn build(
        fd: Fd,
        pid: Pid,
        env: SocketEnv,
        pcb: PcbId,
        state: SocketState,
        connected: bool,
    ) -> Arc<Self> {
        env.census.fetch_add(1, Ordering::SeqCst);
        let notify = NotifyRegistry::new(env.config.notify_capacity, env.config.level_zero_mask);
        Arc::new_cyclic(|me| Self {
            fd,
            pid,
            env,
            me: me.clone(),
            inner: Mutex::new(SocketInner {
                state,
                pcb: Some(pcb),
                incoming: Incoming::Segments(VecDeque::new()),
                waiting: WaitSlot::new(),
                notify,
                last_error: None,
                connected,
                released: false,
            }),
        })
    }

    /// Register this socket as the callback target for `pcb`
    fn attach(&self, pcb: PcbId) {
        if let Some(me) = self.me.upgrade() {
            self.env.engine.register(pcb, me);
        }
    }

    #[inline]
    pub fn fd(&self) -> Fd {
        self.fd
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> SocketState {
        self.inner.lock().state
    }

    pub fn pcb(&self) -> Option<PcbId> {
        self.inner.lock().pcb
    }

    /// Incoming entries waiting to be read or accepted
    pub fn queued(&self) -> usize {
        self.inner.lock().incoming.len()
    }

    pub fn notify_len(&self) -> usize {
        self.inner.lock().notify.len()
    }

    pub fn has_waiter(&self) -> bool {
        self.inner.lock().waiting.is_occupied()
    }

    /// Last error status the engine reported alongside received data
    pub fn last_error(&self) -> Option<EngineError> {
        self.inner.lock().last_error
    }

    pub fn readiness(&self) -> Readiness {
        Self::readiness_of(&self.inner.lock())
    }

    pub(super) fn readiness_of(inner: &SocketInner) -> Readiness {
        readiness::compute(inner.state, inner.incoming.len())
    }

    fn invalid_state(&self, state: SocketState, op: &'static str) -> SocketError {
        SocketError::InvalidState {
            fd: self.fd,
            state,
            op,
        }
    }

    // =========================================================================
    // Wait/wake
    // =========================================================================

    /// Hand the parked continuation its outcome, or broadcast readiness if
    /// nobody is parked
    pub(super) fn resume_one_waiter(
        &self,
        inner: &mut SocketInner,
        status: EngineResult,
        fx: &mut Effects,
    ) {
        match inner.waiting.take() {
            Some(parked) => match self.finish(inner, parked.op, status, fx) {
                Some(result) => fx.resume = Some((parked, result)),
                None => inner.waiting.restore(parked),
            },
            None => {
                let events = Self::readiness_of(inner);
                fx.notify.extend(inner.notify.plan(events));
            }
        }
    }

    /// Run a continuation; `None` means it cannot finish yet and stays parked
    fn finish(
        &self,
        inner: &mut SocketInner,
        op: PendingOp,
        status: EngineResult,
        fx: &mut Effects,
    ) -> Option<KernelResult<Completed>> {
        if let Err(err) = status {
            return Some(Err(err.into()));
        }
        match op {
            PendingOp::Read { max_len } => {
                if inner.state != SocketState::Open {
                    return Some(Err(SocketError::NotConnected(self.fd)));
                }
                self.take_data(inner, max_len, fx)
                    .map(|data| Ok(Completed::Data(data)))
            }
            PendingOp::Accept => {
                if inner.state != SocketState::Listening {
                    return Some(Err(self.invalid_state(inner.state, "accept")));
                }
                self.take_connection(inner, fx)
                    .map(|accepted| Ok(Completed::Accepted(accepted)))
            }
            // Only the connect-completion outcome finishes an active open
            PendingOp::Connect => match inner.state {
                SocketState::Open => Some(Ok(Completed::Connected)),
                SocketState::InConnection => None,
                _ => Some(Err(SocketError::NotConnected(self.fd))),
            },
        }
    }

    /// Copy up to `max_len` bytes from the head segment
    fn take_data(
        &self,
        inner: &mut SocketInner,
        max_len: usize,
        fx: &mut Effects,
    ) -> Option<Vec<u8>> {
        let Incoming::Segments(queue) = &mut inner.incoming else {
            return None;
        };
        let head = queue.front_mut()?;
        let mut data = vec![0u8; max_len.min(head.remaining())];
        let copied = head.consume_into(&mut data);
        data.truncate(copied);

        if head.is_empty() {
            queue.pop_front();
            // Re-arm a previously signalled readable condition
            if queue.is_empty() {
                let events = readiness::compute(inner.state, 0);
                fx.notify.extend(inner.notify.plan(events));
            }
        }
        if let Some(pcb) = inner.pcb {
            fx.credit = Some((pcb, copied));
        }
        Some(data)
    }

    fn take_connection(&self, inner: &mut SocketInner, fx: &mut Effects) -> Option<Accepted> {
        let Incoming::Connections(queue) = &mut inner.incoming else {
            return None;
        };
        let (child, peer) = queue.pop_front()?;
        if queue.is_empty() {
            let events = readiness::compute(inner.state, 0);
            fx.notify.extend(inner.notify.plan(events));
        }
        Some(Accepted {
            fd: child.fd,
            peer,
        })
    }

    /// Sleep on a parked continuation until a callback resumes it
    fn sleep(
        &self,
        ctx: &ThreadContext,
        ticket: u64,
        completion: &Arc<Completion>,
    ) -> KernelResult<Completed> {
        let token = ctx.cancel_token();
        token.arm(completion);
        let end = completion.wait(self.env.config.park_timeout);
        token.disarm();

        let err = match end {
            WaitEnd::Completed(result) => return result,
            WaitEnd::Interrupted => SocketError::Interrupted(self.fd),
            WaitEnd::TimedOut => SocketError::WouldBlock(self.fd),
        };
        let withdrawn = self.inner.lock().waiting.cancel(ticket);
        match withdrawn {
            Some(parked) => {
                trace!(
                    "fd {}: tid {} withdrew {} ({})",
                    self.fd,
                    ctx.tid(),
                    parked.op.name(),
                    err
                );
                Err(err)
            }
            // A callback already owns the continuation; its outcome wins
            None => completion.wait_outcome(),
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Bind to the wildcard address; the socket becomes OPEN
    pub fn bind(&self, port: u16) -> KernelResult<()> {
        let pcb = {
            let inner = self.inner.lock();
            match (inner.state, inner.pcb) {
                (SocketState::Created, Some(pcb)) => pcb,
                (state, _) => return Err(self.invalid_state(state, "bind")),
            }
        };
        self.env.engine.bind(pcb, port)?;

        let mut inner = self.inner.lock();
        if !inner.released && inner.pcb == Some(pcb) {
            inner.state = SocketState::Open;
        }
        info!("fd {} bound to port {}", self.fd, port);
        Ok(())
    }

    /// Turn the socket into a listener
    pub fn listen(&self, backlog: u8) -> KernelResult<()> {
        let pcb = {
            let inner = self.inner.lock();
            match (inner.state, inner.pcb) {
                (SocketState::Created | SocketState::Open, Some(pcb)) if !inner.connected => pcb,
                (state, _) => return Err(self.invalid_state(state, "listen")),
            }
        };
        let listener = self.env.engine.listen(pcb, backlog)?;

        let orphaned = {
            let mut inner = self.inner.lock();
            if inner.released {
                true
            } else {
                inner.pcb = Some(listener);
                inner.state = SocketState::Listening;
                inner.incoming = Incoming::Connections(VecDeque::new());
                false
            }
        };
        if orphaned {
            // Closed while the engine was converting the handle
            if let Err(err) = self.env.engine.close(listener) {
                warn!("fd {}: closing orphaned listener failed: {}", self.fd, err);
            }
            return Err(SocketError::BadDescriptor(self.fd));
        }
        self.attach(listener);
        info!("fd {} listening (backlog {})", self.fd, backlog);
        Ok(())
    }

    /// Active open; blocks until the engine reports completion
    pub fn connect(&self, ctx: &ThreadContext, remote: SocketAddrV4) -> KernelResult<()> {
        let (pcb, prior, ticket, completion) = {
            let mut inner = self.inner.lock();
            match inner.state {
                SocketState::InConnection => return Err(EngineError::Already.into()),
                SocketState::Open => return Err(EngineError::IsConn.into()),
                SocketState::Created => {}
                state => return Err(self.invalid_state(state, "connect")),
            }
            let pcb = inner
                .pcb
                .ok_or_else(|| self.invalid_state(inner.state, "connect"))?;
            let (ticket, completion) =
                inner
                    .waiting
                    .park(self.fd, ctx.tid(), PendingOp::Connect)?;
            let prior = inner.state;
            inner.state = SocketState::InConnection;
            (pcb, prior, ticket, completion)
        };

        trace!("fd {} connecting to {}", self.fd, remote);
        if let Err(err) = self.env.engine.connect(pcb, *remote.ip(), remote.port()) {
            let withdrawn = {
                let mut inner = self.inner.lock();
                let withdrawn = inner.waiting.cancel(ticket).is_some();
                if withdrawn && inner.state == SocketState::InConnection {
                    inner.state = prior;
                }
                withdrawn
            };
            if withdrawn {
                return Err(err.into());
            }
            return completion.wait_outcome().map(|_| ());
        }

        self.sleep(ctx, ticket, &completion).map(|_| ())
    }

    /// Take the next completed connection, blocking while none is queued
    pub fn accept(&self, ctx: &ThreadContext) -> KernelResult<Accepted> {
        let mut fx = Effects::default();
        let (ticket, completion) = {
            let mut inner = self.inner.lock();
            if inner.state != SocketState::Listening {
                return Err(self.invalid_state(inner.state, "accept"));
            }
            if let Some(accepted) = self.take_connection(&mut inner, &mut fx) {
                drop(inner);
                fx.run(self);
                return Ok(accepted);
            }
            inner.waiting.park(self.fd, ctx.tid(), PendingOp::Accept)?
        };

        match self.sleep(ctx, ticket, &completion)? {
            Completed::Accepted(accepted) => Ok(accepted),
            _ => Err(self.invalid_state(self.state(), "accept")),
        }
    }

    /// Read up to `max_len` bytes from the head segment, blocking while empty
    pub fn read(&self, ctx: &ThreadContext, max_len: usize) -> KernelResult<Vec<u8>> {
        let mut fx = Effects::default();
        let (ticket, completion) = {
            let mut inner = self.inner.lock();
            if inner.state != SocketState::Open {
                return Err(SocketError::NotConnected(self.fd));
            }
            if max_len == 0 {
                return Ok(Vec::new());
            }
            if let Some(data) = self.take_data(&mut inner, max_len, &mut fx) {
                drop(inner);
                fx.run(self);
                return Ok(data);
            }
            inner
                .waiting
                .park(self.fd, ctx.tid(), PendingOp::Read { max_len })?
        };

        match self.sleep(ctx, ticket, &completion)? {
            Completed::Data(data) => Ok(data),
            _ => Err(SocketError::NotConnected(self.fd)),
        }
    }

    /// Submit and flush; never blocks on transmission
    pub fn write(&self, data: &[u8]) -> KernelResult<usize> {
        let pcb = {
            let inner = self.inner.lock();
            match (inner.state, inner.pcb) {
                (SocketState::Open, Some(pcb)) => pcb,
                _ => return Err(SocketError::BrokenPipe(self.fd)),
            }
        };
        if data.is_empty() {
            return Ok(0);
        }
        self.env.engine.write(pcb, data, WriteFlags::COPY)?;
        self.env.engine.flush(pcb)?;
        Ok(data.len())
    }

    /// Logical close
    ///
    /// Drains queues, frees notify entries, resumes a parked thread with
    /// `EBADF` and closes the engine handle. Children still queued for accept
    /// are closed and their descriptors released. The object itself lives on
    /// until the engine drops its callback registration.
    pub(crate) fn close(&self) {
        let (pcb, parked, children, freed) = {
            let mut inner = self.inner.lock();
            if inner.released {
                return;
            }
            inner.released = true;
            inner.state = SocketState::Closed;
            let children = inner.incoming.drain();
            let freed = inner.notify.clear();
            (inner.pcb.take(), inner.waiting.take(), children, freed)
        };

        if let Some(parked) = parked {
            parked.resume(Err(SocketError::BadDescriptor(self.fd)));
        }
        if let Some(pcb) = pcb {
            if let Err(err) = self.env.engine.close(pcb) {
                warn!("fd {}: engine close of {} failed: {}", self.fd, pcb, err);
            }
        }
        let table = self.env.table.upgrade();
        for child in &children {
            if let Some(table) = &table {
                table.remove(child.pid, child.fd);
            }
            child.close();
        }
        trace!(
            "fd {} closed ({} notify entries, {} pending children freed)",
            self.fd,
            freed,
            children.len()
        );
    }

    /// Drop a child that never reached its listener's queue
    ///
    /// The engine aborts the handle itself, so no close command is issued.
    pub(super) fn abandon(&self) {
        let mut inner = self.inner.lock();
        inner.released = true;
        inner.state = SocketState::Closed;
        inner.pcb = None;
    }

    /// Local address of the engine handle
    pub fn local_name(&self) -> KernelResult<SocketAddrV4> {
        let (state, pcb) = {
            let inner = self.inner.lock();
            (inner.state, inner.pcb)
        };
        pcb.and_then(|pcb| self.env.engine.local_endpoint(pcb))
            .ok_or_else(|| self.invalid_state(state, "getsockname"))
    }

    /// Remote address; requires an open or opening connection
    pub fn peer_name(&self) -> KernelResult<SocketAddrV4> {
        let pcb = {
            let inner = self.inner.lock();
            match (inner.state, inner.pcb) {
                (SocketState::Open | SocketState::InConnection, Some(pcb)) => pcb,
                _ => return Err(SocketError::NotConnected(self.fd)),
            }
        };
        self.env
            .engine
            .remote_endpoint(pcb)
            .filter(|addr| *addr.ip() != Ipv4Addr::UNSPECIFIED || addr.port() != 0)
            .ok_or(SocketError::NotConnected(self.fd))
    }

    // =========================================================================
    // Notification
    // =========================================================================

    /// Poll check: deliver immediately if `eventmask` matches, else register
    pub fn check(
        &self,
        eventmask: Readiness,
        last: Readiness,
        handler: Arc<dyn EventHandler>,
    ) -> KernelResult<PollOutcome> {
        let matched = {
            let mut inner = self.inner.lock();
            let matched = Self::readiness_of(&inner) & eventmask;
            if matched.is_empty() {
                let capacity = inner.notify.capacity();
                let key = inner.notify.register(eventmask, last, handler).ok_or_else(|| {
                    warn!("fd {}: notify registry full ({})", self.fd, capacity);
                    SocketError::NotifyFull {
                        fd: self.fd,
                        capacity,
                    }
                })?;
                return Ok(PollOutcome::Registered(key));
            }
            matched
        };
        let done = handler.handle(matched);
        Ok(PollOutcome::Delivered {
            events: matched,
            done,
        })
    }

    /// Remove a registered interest
    pub fn deregister(&self, key: NotifyKey) -> bool {
        self.inner.lock().notify.deregister(key)
    }

    /// Dispatch the notification registry against current readiness
    pub fn dispatch(&self) {
        let deliveries = {
            let mut inner = self.inner.lock();
            let events = Self::readiness_of(&inner);
            inner.notify.plan(events)
        };
        Effects {
            notify: deliveries,
            ..Effects::default()
        }
        .run(self);
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.env.census.fetch_sub(1, Ordering::SeqCst);
        trace!("fd {} reclaimed", self.fd);
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("fd", &self.fd)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}
