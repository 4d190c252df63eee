/*!
 * Thread Context
 * Explicit acting thread/process passed to every socket operation
 */

use super::types::{Pid, Tid};
use crate::net::wait::CancelToken;

/// The kernel thread issuing a syscall
///
/// Handlers never consult an ambient "current thread"; the caller hands this in.
#[derive(Debug, Clone)]
pub struct ThreadContext {
    pid: Pid,
    tid: Tid,
    cancel: CancelToken,
}

impl ThreadContext {
    pub fn new(pid: Pid, tid: Tid) -> Self {
        Self {
            pid,
            tid,
            cancel: CancelToken::new(),
        }
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[inline]
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Token another thread can use to interrupt this thread's blocking call
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}
