/*!
 * Kernel Socket Layer Library
 * Stream sockets over a callback-driven TCP protocol engine
 */

pub mod core;
pub mod monitoring;
pub mod net;
pub mod syscalls;

// Re-exports
pub use crate::core::{sysreturn, Errno, Fd, KernelResult, Pid, SocketError, SysReturn, ThreadContext, Tid};
pub use monitoring::{init_tracing, span_operation, span_syscall};
pub use net::{
    EngineError, EventHandler, LevelZeroMask, NotifyKey, NotifyRegistry, PcbEvents, PcbId,
    PollOutcome, Readiness, ReadyEvent, ReadySender, SimEngine, SockAddrIn, Socket, SocketConfig,
    SocketManager, SocketState, SocketStats, TcpEngine,
};
pub use syscalls::{AddrOut, NetSyscalls, Sysno};
