/*!
 * Socket Object & State Machine
 *
 * A `Socket` ties a protocol engine handle to its incoming queue, wait slot
 * and notification registry.
 *
 * # Locking
 *
 * All shared fields sit behind one `parking_lot::Mutex` per socket. Syscall
 * paths (`object.rs`) and engine callbacks (`events.rs`) both take it before
 * touching socket state. Work that must not run under the lock (engine
 * commands, resuming a parked thread, notification handlers) is collected
 * into `Effects` and run after the guard is dropped.
 *
 * # Lock order
 *
 * listener socket -> engine. A socket never takes another socket's lock
 * while holding its own.
 */

mod events;
mod object;
mod state;

pub use object::{PollOutcome, Socket};
pub use state::SocketState;

pub(crate) use object::SocketEnv;
