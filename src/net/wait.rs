/*!
 * Wait/Wake Bridge
 *
 * Single-slot parking of a syscall-issuing thread, resumed from engine
 * callback context with a typed completion.
 *
 * # Protocol
 *
 * 1. Under the socket lock, the caller checks for an immediate result and,
 *    failing that, parks a `PendingOp` in the socket's `WaitSlot`. The slot
 *    hands back a ticket and a shared `Completion`.
 * 2. The caller releases the socket lock and sleeps on the `Completion`.
 * 3. A callback takes the parked op under the socket lock, finishes it, and
 *    fills the `Completion` after releasing the lock.
 *
 * An interrupted or timed-out sleeper re-takes the socket lock and withdraws
 * its ticket. If the ticket is gone, a callback already owns the op and the
 * sleeper waits for that outcome instead, so results are never lost.
 */

use crate::core::errors::SocketError;
use crate::core::types::{Fd, KernelResult, Tid};
use log::error;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Operation a parked thread is waiting to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    Read { max_len: usize },
    Accept,
    Connect,
}

impl PendingOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Read { .. } => "read",
            Self::Accept => "accept",
            Self::Connect => "connect",
        }
    }
}

/// Accepted child connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub fd: Fd,
    pub peer: SocketAddrV4,
}

/// Successful outcome of a pending operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completed {
    Data(Vec<u8>),
    Accepted(Accepted),
    Connected,
}

/// How a sleep on a `Completion` ended
#[derive(Debug)]
pub enum WaitEnd {
    Completed(KernelResult<Completed>),
    Interrupted,
    TimedOut,
}

#[derive(Default)]
struct CompletionState {
    outcome: Option<KernelResult<Completed>>,
    interrupted: bool,
}

/// One-shot rendezvous between a parked thread and the callback resuming it
#[derive(Default)]
pub struct Completion {
    state: Mutex<CompletionState>,
    ready: Condvar,
}

impl Completion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish the outcome and wake the sleeper
    pub fn complete(&self, result: KernelResult<Completed>) {
        let mut state = self.state.lock();
        state.outcome = Some(result);
        self.ready.notify_one();
    }

    /// Wake the sleeper without an outcome
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.ready.notify_one();
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().outcome.is_some()
    }

    /// Sleep until completed, interrupted, or `timeout` elapses
    pub fn wait(&self, timeout: Option<Duration>) -> WaitEnd {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if let Some(result) = state.outcome.take() {
                return WaitEnd::Completed(result);
            }
            if state.interrupted {
                return WaitEnd::Interrupted;
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out()
                        && state.outcome.is_none()
                        && !state.interrupted
                    {
                        return WaitEnd::TimedOut;
                    }
                }
                None => self.ready.wait(&mut state),
            }
        }
    }

    /// Sleep until an outcome is published, ignoring interruption
    ///
    /// Only valid once a callback is known to own the pending op.
    pub fn wait_outcome(&self) -> KernelResult<Completed> {
        let mut state = self.state.lock();
        loop {
            if let Some(result) = state.outcome.take() {
                return result;
            }
            self.ready.wait(&mut state);
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Completion")
            .field("complete", &state.outcome.is_some())
            .field("interrupted", &state.interrupted)
            .finish()
    }
}

/// A continuation parked on a socket
#[derive(Debug)]
pub struct Parked {
    pub ticket: u64,
    pub tid: Tid,
    pub op: PendingOp,
    pub completion: Arc<Completion>,
}

impl Parked {
    /// Resume the parked thread with `result`
    pub fn resume(self, result: KernelResult<Completed>) {
        self.completion.complete(result);
    }
}

/// Per-socket slot holding at most one parked continuation
#[derive(Debug, Default)]
pub struct WaitSlot {
    parked: Option<Parked>,
    next_ticket: u64,
}

impl WaitSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `op` for thread `tid`
    ///
    /// Fails with `WaitSlotBusy` when another continuation is already parked.
    pub fn park(
        &mut self,
        fd: Fd,
        tid: Tid,
        op: PendingOp,
    ) -> KernelResult<(u64, Arc<Completion>)> {
        if let Some(existing) = &self.parked {
            error!(
                "fd {}: wait slot full, {} from tid {} while tid {} waits on {}",
                fd,
                op.name(),
                tid,
                existing.tid,
                existing.op.name()
            );
            return Err(SocketError::WaitSlotBusy(fd));
        }
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        let completion = Completion::new();
        self.parked = Some(Parked {
            ticket,
            tid,
            op,
            completion: Arc::clone(&completion),
        });
        Ok((ticket, completion))
    }

    /// Dequeue the parked continuation, if any
    pub fn take(&mut self) -> Option<Parked> {
        self.parked.take()
    }

    /// Put back a continuation a callback could not finish yet
    pub fn restore(&mut self, parked: Parked) {
        debug_assert!(self.parked.is_none());
        self.parked = Some(parked);
    }

    /// Withdraw the continuation for `ticket`; `None` if a callback took it
    pub fn cancel(&mut self, ticket: u64) -> Option<Parked> {
        match &self.parked {
            Some(parked) if parked.ticket == ticket => self.parked.take(),
            _ => None,
        }
    }

    pub fn pending_op(&self) -> Option<PendingOp> {
        self.parked.as_ref().map(|parked| parked.op)
    }

    #[inline]
    pub fn is_occupied(&self) -> bool {
        self.parked.is_some()
    }
}

struct CancelInner {
    cancelled: AtomicBool,
    armed: Mutex<Option<Weak<Completion>>>,
}

/// Thread-level cancellation handle
///
/// Cancellation is sticky until `reset`. Cancelling while the owning thread is
/// parked interrupts the sleep; a thread that parks after cancellation is
/// interrupted as soon as it arms the token.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                armed: Mutex::new(None),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let armed = self.inner.armed.lock().as_ref().and_then(Weak::upgrade);
        if let Some(completion) = armed {
            completion.interrupt();
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
    }

    /// Attach the completion the owning thread is about to sleep on
    pub(crate) fn arm(&self, completion: &Arc<Completion>) {
        *self.inner.armed.lock() = Some(Arc::downgrade(completion));
        if self.is_cancelled() {
            completion.interrupt();
        }
    }

    pub(crate) fn disarm(&self) {
        *self.inner.armed.lock() = None;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
