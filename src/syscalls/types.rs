/*!
 * Syscall Types
 * Numbers and ABI constants for the socket syscall surface
 */

use serde::{Deserialize, Serialize};

/// IPv4 protocol family
pub const AF_INET: i32 = 2;
/// Stream socket type
pub const SOCK_STREAM: i32 = 1;
/// Type flag: non-blocking descriptor (accepted, not honoured)
pub const SOCK_NONBLOCK: i32 = 0o4000;
/// Type flag: close-on-exec (accepted, not honoured)
pub const SOCK_CLOEXEC: i32 = 0o2000000;
/// TCP protocol number
pub const IPPROTO_TCP: i32 = 6;

/// Linux x86-64 syscall numbers handled by the socket layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u64)]
pub enum Sysno {
    Read = 0,
    Write = 1,
    Close = 3,
    Socket = 41,
    Connect = 42,
    Accept = 43,
    Bind = 49,
    Listen = 50,
    Getsockname = 51,
    Getpeername = 52,
    Setsockopt = 54,
    Accept4 = 288,
}

impl Sysno {
    pub const ALL: [Sysno; 12] = [
        Self::Read,
        Self::Write,
        Self::Close,
        Self::Socket,
        Self::Connect,
        Self::Accept,
        Self::Bind,
        Self::Listen,
        Self::Getsockname,
        Self::Getpeername,
        Self::Setsockopt,
        Self::Accept4,
    ];

    pub fn from_raw(number: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|sysno| *sysno as u64 == number)
    }

    #[inline]
    pub const fn number(self) -> u64 {
        self as u64
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Close => "close",
            Self::Socket => "socket",
            Self::Connect => "connect",
            Self::Accept => "accept",
            Self::Bind => "bind",
            Self::Listen => "listen",
            Self::Getsockname => "getsockname",
            Self::Getpeername => "getpeername",
            Self::Setsockopt => "setsockopt",
            Self::Accept4 => "accept4",
        }
    }
}
