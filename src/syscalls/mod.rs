/*!
 * Syscalls Module
 * Socket system call surface
 */

mod executor;
mod network;
mod types;

pub use executor::NetSyscalls;
pub use network::AddrOut;
pub use types::{Sysno, AF_INET, IPPROTO_TCP, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_STREAM};
