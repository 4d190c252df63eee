/*!
 * IPv4 Socket Address
 * Codec for the 16-byte `sockaddr_in` passed through the syscall ABI
 *
 * Layout: family (u16, host order), port (u16, network order),
 * address (u32, network order), 8 bytes of zero padding.
 */

use crate::core::errors::SocketError;
use crate::core::limits::SOCKADDR_IN_LEN;
use crate::core::types::KernelResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// IPv4 address family
pub const AF_INET: u16 = 2;

/// Decoded `sockaddr_in`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SockAddrIn(SocketAddrV4);

impl SockAddrIn {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self(SocketAddrV4::new(ip, port))
    }

    /// Decode from raw bytes
    ///
    /// Short buffers are `EINVAL`, other families `EAFNOSUPPORT`.
    pub fn from_bytes(raw: &[u8]) -> KernelResult<Self> {
        if raw.len() < SOCKADDR_IN_LEN {
            return Err(SocketError::InvalidAddress(raw.len()));
        }
        let family = u16::from_ne_bytes([raw[0], raw[1]]);
        if family != AF_INET {
            return Err(SocketError::AddressFamily(family));
        }
        let port = u16::from_be_bytes([raw[2], raw[3]]);
        let ip = Ipv4Addr::new(raw[4], raw[5], raw[6], raw[7]);
        Ok(Self::new(ip, port))
    }

    pub fn to_bytes(&self) -> [u8; SOCKADDR_IN_LEN] {
        let mut raw = [0u8; SOCKADDR_IN_LEN];
        raw[0..2].copy_from_slice(&AF_INET.to_ne_bytes());
        raw[2..4].copy_from_slice(&self.0.port().to_be_bytes());
        raw[4..8].copy_from_slice(&self.0.ip().octets());
        raw
    }

    /// Write into a caller buffer with POSIX truncation
    ///
    /// Copies `min(*addrlen, 16, out.len())` bytes and reports the full size
    /// back through `addrlen`.
    pub fn write_to(&self, out: &mut [u8], addrlen: &mut u32) {
        let raw = self.to_bytes();
        let n = (*addrlen as usize).min(SOCKADDR_IN_LEN).min(out.len());
        out[..n].copy_from_slice(&raw[..n]);
        *addrlen = SOCKADDR_IN_LEN as u32;
    }

    #[inline]
    pub fn ip(&self) -> Ipv4Addr {
        *self.0.ip()
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.0.port()
    }

    #[inline]
    pub fn as_socket_addr(&self) -> SocketAddrV4 {
        self.0
    }
}

impl From<SocketAddrV4> for SockAddrIn {
    fn from(addr: SocketAddrV4) -> Self {
        Self(addr)
    }
}

impl From<SockAddrIn> for SocketAddrV4 {
    fn from(addr: SockAddrIn) -> Self {
        addr.0
    }
}

impl fmt::Display for SockAddrIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
