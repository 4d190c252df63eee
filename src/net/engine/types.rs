/*!
 * Protocol Engine Types
 * Handles, error codes, and buffers exchanged with the TCP engine
 */

use bitflags::bitflags;
use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque handle to an engine connection object (a PCB)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PcbId(pub u64);

impl fmt::Display for PcbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pcb#{}", self.0)
    }
}

/// Errors reported by the protocol engine
///
/// Discriminants are the engine's raw codes; `0` is success and has no variant.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum EngineError {
    #[error("out of memory")]
    Mem = -1,
    #[error("buffer error")]
    Buf = -2,
    #[error("timeout")]
    Timeout = -3,
    #[error("routing problem")]
    Rte = -4,
    #[error("operation in progress")]
    InProgress = -5,
    #[error("illegal value")]
    Val = -6,
    #[error("operation would block")]
    WouldBlock = -7,
    #[error("address in use")]
    Use = -8,
    #[error("already connecting")]
    Already = -9,
    #[error("already connected")]
    IsConn = -10,
    #[error("not connected")]
    Conn = -11,
    #[error("low-level netif error")]
    If = -12,
    #[error("connection aborted")]
    Abrt = -13,
    #[error("connection reset")]
    Rst = -14,
    #[error("connection closed")]
    Clsd = -15,
    #[error("illegal argument")]
    Arg = -16,
}

impl EngineError {
    const ALL: [EngineError; 16] = [
        Self::Mem,
        Self::Buf,
        Self::Timeout,
        Self::Rte,
        Self::InProgress,
        Self::Val,
        Self::WouldBlock,
        Self::Use,
        Self::Already,
        Self::IsConn,
        Self::Conn,
        Self::If,
        Self::Abrt,
        Self::Rst,
        Self::Clsd,
        Self::Arg,
    ];

    /// Raw engine code
    #[inline]
    pub const fn code(self) -> i8 {
        self as i8
    }

    /// Decode a raw engine code; `None` for success or an unknown value
    pub fn from_code(code: i8) -> Option<Self> {
        Self::ALL.iter().copied().find(|err| err.code() == code)
    }
}

/// Result of an engine command
pub type EngineResult<T = ()> = Result<T, EngineError>;

bitflags! {
    /// Flags for `TcpEngine::write`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WriteFlags: u8 {
        /// Engine copies the payload instead of referencing caller memory
        const COPY = 0x01;
        /// More data follows; engine may delay the push
        const MORE = 0x02;
    }
}

/// Received data buffer owned by the engine until handed to a socket
///
/// Reads consume it incrementally; a fully consumed segment is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct Segment {
    payload: Bytes,
}

impl Segment {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Bytes not yet consumed
    #[inline]
    pub fn remaining(&self) -> usize {
        self.payload.remaining()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Unconsumed payload
    #[inline]
    pub fn chunk(&self) -> &[u8] {
        self.payload.chunk()
    }

    /// Copy up to `dest.len()` bytes out and advance past them
    pub fn consume_into(&mut self, dest: &mut [u8]) -> usize {
        let xfer = dest.len().min(self.payload.remaining());
        self.payload.copy_to_slice(&mut dest[..xfer]);
        xfer
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("remaining", &self.remaining())
            .finish()
    }
}
