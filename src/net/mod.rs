/*!
 * Network Socket Layer
 *
 * Maps stream socket operations onto a callback-driven TCP engine and bridges
 * engine callbacks back to parked kernel threads and readiness pollers.
 */

pub mod addr;
pub mod config;
pub mod engine;
pub mod errors;
pub mod manager;
pub mod notify;
pub mod readiness;
pub mod socket;
pub mod wait;

pub use addr::{SockAddrIn, AF_INET};
pub use config::SocketConfig;
pub use engine::{EngineError, PcbEvents, PcbId, Segment, SimEngine, TcpEngine};
pub use errors::{map_engine_code, map_engine_error};
pub use manager::{SocketManager, SocketStats};
pub use notify::{EventHandler, LevelZeroMask, NotifyKey, NotifyRegistry, ReadyEvent, ReadySender};
pub use readiness::Readiness;
pub use socket::{PollOutcome, Socket, SocketState};
pub use wait::{Accepted, CancelToken, Completed, PendingOp, WaitSlot};
