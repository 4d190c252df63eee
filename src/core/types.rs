/*!
 * Core Types
 * Common types used across the socket layer
 */

/// Process ID type
pub type Pid = u32;

/// Kernel thread ID type
pub type Tid = u32;

/// File descriptor type
pub type Fd = u32;

/// Raw syscall return value (negative = errno, non-negative = result)
pub type SysReturn = i64;

/// Common result type for socket operations
pub type KernelResult<T> = Result<T, super::errors::SocketError>;
