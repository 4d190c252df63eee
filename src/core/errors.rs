/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use super::types::{Fd, Pid, SysReturn};
use crate::net::engine::EngineError;
use crate::net::errors::map_engine_error;
use crate::net::socket::SocketState;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Host error numbers returned through the syscall ABI (Linux numbering)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(i32)]
pub enum Errno {
    #[error("EINTR")]
    Eintr = 4,
    #[error("EBADF")]
    Ebadf = 9,
    #[error("EAGAIN")]
    Eagain = 11,
    #[error("ENOMEM")]
    Enomem = 12,
    #[error("EBUSY")]
    Ebusy = 16,
    #[error("EINVAL")]
    Einval = 22,
    #[error("EMFILE")]
    Emfile = 24,
    #[error("EPIPE")]
    Epipe = 32,
    #[error("ENOTSOCK")]
    Enotsock = 88,
    #[error("EPROTONOSUPPORT")]
    Eprotonosupport = 93,
    #[error("EAFNOSUPPORT")]
    Eafnosupport = 97,
    #[error("ENOTCONN")]
    Enotconn = 107,
}

impl Errno {
    /// Positive error number
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Negative value as returned from a syscall
    #[inline]
    pub const fn as_sysreturn(self) -> SysReturn {
        -(self as i32 as SysReturn)
    }
}

/// Socket layer errors with diagnostics
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
#[non_exhaustive]
pub enum SocketError {
    #[error("Protocol engine error: {0}")]
    #[diagnostic(
        code(net::engine),
        help("The TCP engine rejected the operation. The errno follows the engine error table.")
    )]
    Engine(#[from] EngineError),

    #[error("Bad socket descriptor {0}")]
    #[diagnostic(
        code(net::bad_descriptor),
        help("The descriptor is closed, never existed, or belongs to another process.")
    )]
    BadDescriptor(Fd),

    #[error("Descriptor {0} is not a socket")]
    #[diagnostic(code(net::not_socket))]
    NotSocket(Fd),

    #[error("Socket {0} is not connected")]
    #[diagnostic(code(net::not_connected))]
    NotConnected(Fd),

    #[error("Broken pipe on socket {0}")]
    #[diagnostic(code(net::broken_pipe))]
    BrokenPipe(Fd),

    #[error("Socket {fd} cannot {op} in state {state}")]
    #[diagnostic(
        code(net::invalid_state),
        help("The operation is not valid for the socket's current lifecycle state.")
    )]
    InvalidState {
        fd: Fd,
        state: SocketState,
        op: &'static str,
    },

    #[error("Unsupported address family {0}")]
    #[diagnostic(code(net::address_family), help("Only AF_INET (2) is supported."))]
    AddressFamily(u16),

    #[error("Invalid socket address length {0}")]
    #[diagnostic(code(net::invalid_address), help("An IPv4 socket address is 16 bytes."))]
    InvalidAddress(usize),

    #[error("Unsupported socket type {0}")]
    #[diagnostic(code(net::socket_type), help("Only SOCK_STREAM sockets are implemented."))]
    UnsupportedType(i32),

    #[error("Out of memory: {0}")]
    #[diagnostic(code(net::out_of_memory))]
    OutOfMemory(&'static str),

    #[error("Process {pid} reached its socket limit ({limit})")]
    #[diagnostic(
        code(net::too_many_files),
        help("Close unused sockets or raise max_sockets_per_process.")
    )]
    TooManyFiles { pid: Pid, limit: usize },

    #[error("Socket {0} already has a parked thread")]
    #[diagnostic(
        code(net::wait_slot_busy),
        help("Only one blocking call may be outstanding per socket.")
    )]
    WaitSlotBusy(Fd),

    #[error("Socket {fd} notification registry full ({capacity} entries)")]
    #[diagnostic(code(net::notify_full))]
    NotifyFull { fd: Fd, capacity: usize },

    #[error("Blocking call on socket {0} was interrupted")]
    #[diagnostic(code(net::interrupted))]
    Interrupted(Fd),

    #[error("Blocking call on socket {0} timed out")]
    #[diagnostic(code(net::would_block))]
    WouldBlock(Fd),
}

impl SocketError {
    /// Host error number for this error
    pub fn errno(&self) -> Errno {
        match self {
            Self::Engine(err) => map_engine_error(*err),
            Self::BadDescriptor(_) => Errno::Ebadf,
            Self::NotSocket(_) => Errno::Enotsock,
            Self::NotConnected(_) => Errno::Enotconn,
            Self::BrokenPipe(_) => Errno::Epipe,
            Self::InvalidState { .. } | Self::InvalidAddress(_) => Errno::Einval,
            Self::AddressFamily(_) => Errno::Eafnosupport,
            Self::UnsupportedType(_) => Errno::Eprotonosupport,
            Self::OutOfMemory(_) | Self::NotifyFull { .. } => Errno::Enomem,
            Self::TooManyFiles { .. } => Errno::Emfile,
            Self::WaitSlotBusy(_) => Errno::Ebusy,
            Self::Interrupted(_) => Errno::Eintr,
            Self::WouldBlock(_) => Errno::Eagain,
        }
    }
}

/// Convert a handler result into the raw syscall return convention
pub fn sysreturn<T: Into<SysReturn>>(result: Result<T, SocketError>) -> SysReturn {
    match result {
        Ok(value) => value.into(),
        Err(err) => err.errno().as_sysreturn(),
    }
}
