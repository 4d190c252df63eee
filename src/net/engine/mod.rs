/*!
 * Protocol Engine Interface
 * Command/callback boundary to the TCP engine plus an in-memory simulation
 */

pub mod simulation;
pub mod traits;
pub mod types;

pub use simulation::{PcbPhase, SimEngine, SimOp};
pub use traits::{PcbEvents, TcpEngine};
pub use types::{EngineError, EngineResult, PcbId, Segment, WriteFlags};
