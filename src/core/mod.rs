/*!
 * Core Module
 * Shared types, limits, errors, and call context for the socket layer
 */

pub mod context;
pub mod errors;
pub mod limits;
pub mod types;

pub use context::ThreadContext;
pub use errors::{sysreturn, Errno, SocketError};
pub use types::{Fd, KernelResult, Pid, SysReturn, Tid};
