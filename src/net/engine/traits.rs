/*!
 * Protocol Engine Traits
 *
 * The socket layer consumes the TCP engine through two seams:
 * - `TcpEngine`: commands issued from syscall context
 * - `PcbEvents`: callbacks the engine raises from its own context
 *
 * # Contract
 *
 * The socket layer never holds a socket lock while issuing a command, so an
 * engine may raise callbacks synchronously from inside a command.
 * An engine holds the `PcbEvents` registered for a handle until the handle is
 * torn down; dropping that registration is the teardown confirmation that
 * lets the socket object be reclaimed.
 */

use super::types::{EngineResult, PcbId, Segment, WriteFlags};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

/// Commands consumed from the protocol engine
pub trait TcpEngine: Send + Sync {
    /// Allocate a fresh connection handle; `None` on exhaustion
    fn create(&self) -> Option<PcbId>;

    /// Bind to the wildcard address on `port`
    fn bind(&self, pcb: PcbId, port: u16) -> EngineResult;

    /// Start an active open; completion arrives via `PcbEvents::on_connected`
    fn connect(&self, pcb: PcbId, addr: Ipv4Addr, port: u16) -> EngineResult;

    /// Convert into a listening handle; the original handle is consumed
    fn listen(&self, pcb: PcbId, backlog: u8) -> EngineResult<PcbId>;

    /// Queue data for transmission
    fn write(&self, pcb: PcbId, data: &[u8], flags: WriteFlags) -> EngineResult;

    /// Push queued data onto the wire
    fn flush(&self, pcb: PcbId) -> EngineResult;

    /// Acknowledge `len` consumed bytes (receive window credit)
    fn recv_credit(&self, pcb: PcbId, len: usize);

    /// Begin an orderly close; teardown may complete later
    fn close(&self, pcb: PcbId) -> EngineResult;

    /// Register the callback target for a handle (arg/err/recv/accept)
    fn register(&self, pcb: PcbId, events: Arc<dyn PcbEvents>);

    fn local_endpoint(&self, pcb: PcbId) -> Option<SocketAddrV4>;

    fn remote_endpoint(&self, pcb: PcbId) -> Option<SocketAddrV4>;
}

/// Callbacks raised by the protocol engine
pub trait PcbEvents: Send + Sync {
    /// Data arrived (`Some`) or the remote closed its side (`None`)
    ///
    /// Returning `Err(EngineError::Mem)` asks the engine to keep the segment
    /// and deliver it again later.
    fn on_recv(&self, segment: Option<Segment>, status: EngineResult) -> EngineResult;

    /// Active open finished
    fn on_connected(&self, status: EngineResult);

    /// A listening handle produced a new connection (or failed to)
    ///
    /// An error return tells the engine to abort the new handle.
    fn on_accept(&self, pcb: Option<PcbId>, status: EngineResult) -> EngineResult;

    /// Fatal error; the engine has already released the handle
    fn on_error(&self, err: super::types::EngineError);
}
