/*!
 * Simulation Protocol Engine
 * In-memory TCP engine used when no real stack is attached
 *
 * Commands update a table of simulated connection handles. Network-side events
 * (handshake completion, inbound connections, arriving data, resets) are driven
 * explicitly through the `SimEngine` hooks, which raise the registered
 * callbacks on the calling thread with no engine lock held.
 */

use super::traits::{PcbEvents, TcpEngine};
use super::types::{EngineError, EngineResult, PcbId, Segment, WriteFlags};
use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use bytes::Bytes;
use log::{info, trace, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// First port handed out for implicit binds
const EPHEMERAL_PORT_BASE: u16 = 49152;

/// Lifecycle of a simulated handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcbPhase {
    Fresh,
    Bound,
    Connecting,
    Connected,
    Listening,
    /// Closed by the socket layer, teardown not yet confirmed
    Closing,
}

/// Engine command that can have a fault injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    Create,
    Bind,
    Connect,
    Listen,
    Write,
    Flush,
    Close,
}

struct SimPcb {
    phase: PcbPhase,
    local: SocketAddrV4,
    remote: Option<SocketAddrV4>,
    backlog: u8,
    events: Option<Arc<dyn PcbEvents>>,
    queued: Vec<u8>,
    sent: Vec<u8>,
    credited: usize,
    refused: VecDeque<Option<Segment>>,
}

impl SimPcb {
    fn fresh() -> Self {
        Self {
            phase: PcbPhase::Fresh,
            local: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            remote: None,
            backlog: 0,
            events: None,
            queued: Vec::new(),
            sent: Vec::new(),
            credited: 0,
            refused: VecDeque::new(),
        }
    }
}

struct SimState {
    pcbs: HashMap<PcbId, SimPcb>,
    ports: HashSet<u16>,
    next_ephemeral: u16,
    faults: HashMap<SimOp, EngineError>,
}

impl SimState {
    fn take_fault(&mut self, op: SimOp) -> EngineResult {
        match self.faults.remove(&op) {
            Some(err) => {
                trace!("Injected fault {:?} on {:?}", err, op);
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn ephemeral_port(&mut self) -> u16 {
        loop {
            let port = self.next_ephemeral;
            self.next_ephemeral = self.next_ephemeral.checked_add(1).unwrap_or(EPHEMERAL_PORT_BASE);
            if !self.ports.contains(&port) {
                return port;
            }
        }
    }

    fn release(&mut self, pcb: PcbId) -> Option<SimPcb> {
        let removed = self.pcbs.remove(&pcb)?;
        let port = removed.local.port();
        let shared = self
            .pcbs
            .values()
            .any(|other| other.local.port() == port && other.phase != PcbPhase::Closing);
        if port != 0 && !shared {
            self.ports.remove(&port);
        }
        Some(removed)
    }
}

/// In-memory TCP engine with fault injection
pub struct SimEngine {
    state: Mutex<SimState>,
    next_id: AtomicU64,
    local_ip: Ipv4Addr,
    auto_establish: bool,
    deferred_teardown: bool,
}

impl SimEngine {
    /// Engine whose handles report `local_ip` once connected
    pub fn new(local_ip: Ipv4Addr) -> Self {
        info!("Protocol engine initialized (simulation mode, local {})", local_ip);
        Self {
            state: Mutex::new(SimState {
                pcbs: HashMap::new(),
                ports: HashSet::new(),
                next_ephemeral: EPHEMERAL_PORT_BASE,
                faults: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            local_ip,
            auto_establish: false,
            deferred_teardown: false,
        }
    }

    /// Complete active opens immediately from inside `connect`
    pub fn with_auto_establish(mut self) -> Self {
        self.auto_establish = true;
        self
    }

    /// Keep closed handles (and their callbacks) until `confirm_teardown`
    pub fn with_deferred_teardown(mut self) -> Self {
        self.deferred_teardown = true;
        self
    }

    /// Fail the next `op` command with `err`
    pub fn inject_fault(&self, op: SimOp, err: EngineError) {
        self.state.lock().faults.insert(op, err);
    }

    fn events_of(&self, pcb: PcbId) -> Option<Arc<dyn PcbEvents>> {
        self.state
            .lock()
            .pcbs
            .get(&pcb)
            .and_then(|entry| entry.events.clone())
    }

    /// Finish a pending active open with `status`
    pub fn complete_connect(&self, pcb: PcbId, status: EngineResult) -> bool {
        let events = {
            let mut state = self.state.lock();
            let Some(entry) = state.pcbs.get_mut(&pcb) else {
                return false;
            };
            if entry.phase != PcbPhase::Connecting {
                return false;
            }
            if status.is_ok() {
                entry.phase = PcbPhase::Connected;
            }
            entry.events.clone()
        };
        if let Some(events) = events {
            events.on_connected(status);
        }
        true
    }

    /// Simulate a remote peer completing a handshake against a listener
    pub fn inbound(&self, listener: PcbId, remote: SocketAddrV4) -> EngineResult<PcbId> {
        let child = PcbId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let events = {
            let mut state = self.state.lock();
            let entry = state.pcbs.get(&listener).ok_or(EngineError::Conn)?;
            if entry.phase != PcbPhase::Listening {
                return Err(EngineError::Conn);
            }
            let events = entry.events.clone().ok_or(EngineError::Conn)?;
            let mut pcb = SimPcb::fresh();
            pcb.phase = PcbPhase::Connected;
            pcb.local = SocketAddrV4::new(self.local_ip, entry.local.port());
            pcb.remote = Some(remote);
            state.pcbs.insert(child, pcb);
            events
        };

        trace!("Inbound connection {} on listener {} from {}", child, listener, remote);
        match events.on_accept(Some(child), Ok(())) {
            Ok(()) => Ok(child),
            Err(err) => {
                warn!("Listener {} refused {}: {}", listener, child, err);
                let released = self.state.lock().release(child);
                drop(released);
                Err(err)
            }
        }
    }

    /// Report a failed inbound connection to a listener
    pub fn accept_error(&self, listener: PcbId, err: EngineError) -> bool {
        match self.events_of(listener) {
            Some(events) => {
                let _ = events.on_accept(None, Err(err));
                true
            }
            None => false,
        }
    }

    /// Deliver payload to a connected handle
    ///
    /// A refused segment is kept and retried by `redeliver`.
    pub fn deliver(&self, pcb: PcbId, data: impl Into<Bytes>) -> EngineResult {
        let segment = Segment::new(data);
        let events = self.events_of(pcb).ok_or(EngineError::Conn)?;
        let result = events.on_recv(Some(segment.clone()), Ok(()));
        if result.is_err() {
            if let Some(entry) = self.state.lock().pcbs.get_mut(&pcb) {
                entry.refused.push_back(Some(segment));
            }
        }
        result
    }

    /// Retry refused deliveries in order; returns how many were accepted
    pub fn redeliver(&self, pcb: PcbId) -> usize {
        let mut accepted = 0;
        loop {
            let (events, next) = {
                let mut state = self.state.lock();
                let Some(entry) = state.pcbs.get_mut(&pcb) else {
                    return accepted;
                };
                let Some(next) = entry.refused.pop_front() else {
                    return accepted;
                };
                match entry.events.clone() {
                    Some(events) => (events, next),
                    None => return accepted,
                }
            };
            if events.on_recv(next.clone(), Ok(())).is_err() {
                if let Some(entry) = self.state.lock().pcbs.get_mut(&pcb) {
                    entry.refused.push_front(next);
                }
                return accepted;
            }
            accepted += 1;
        }
    }

    /// Remote side closed its half of the connection
    pub fn remote_close(&self, pcb: PcbId) -> bool {
        match self.events_of(pcb) {
            Some(events) => {
                let _ = events.on_recv(None, Ok(()));
                true
            }
            None => false,
        }
    }

    /// Fatal error on a handle (reset, abort); the handle is released first
    pub fn fail(&self, pcb: PcbId, err: EngineError) -> bool {
        let removed = self.state.lock().release(pcb);
        match removed.and_then(|entry| entry.events) {
            Some(events) => {
                events.on_error(err);
                true
            }
            None => false,
        }
    }

    /// Finish a deferred close, dropping the callback registration
    pub fn confirm_teardown(&self, pcb: PcbId) -> bool {
        let mut state = self.state.lock();
        match state.pcbs.get(&pcb).map(|entry| entry.phase) {
            Some(PcbPhase::Closing) => state.release(pcb).is_some(),
            _ => false,
        }
    }

    /// Every handle currently closing
    pub fn closing_handles(&self) -> Vec<PcbId> {
        self.state
            .lock()
            .pcbs
            .iter()
            .filter(|(_, entry)| entry.phase == PcbPhase::Closing)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Backlog a listener was created with
    pub fn backlog(&self, pcb: PcbId) -> Option<u8> {
        self.state.lock().pcbs.get(&pcb).map(|entry| entry.backlog)
    }

    pub fn phase(&self, pcb: PcbId) -> Option<PcbPhase> {
        self.state.lock().pcbs.get(&pcb).map(|entry| entry.phase)
    }

    /// Bytes flushed onto the simulated wire
    pub fn sent(&self, pcb: PcbId) -> Vec<u8> {
        self.state
            .lock()
            .pcbs
            .get(&pcb)
            .map(|entry| entry.sent.clone())
            .unwrap_or_default()
    }

    /// Total receive-window credit returned by the socket layer
    pub fn credited(&self, pcb: PcbId) -> usize {
        self.state
            .lock()
            .pcbs
            .get(&pcb)
            .map(|entry| entry.credited)
            .unwrap_or(0)
    }

    /// Segments waiting for redelivery
    pub fn refused(&self, pcb: PcbId) -> usize {
        self.state
            .lock()
            .pcbs
            .get(&pcb)
            .map(|entry| entry.refused.len())
            .unwrap_or(0)
    }

    pub fn live_handles(&self) -> usize {
        self.state.lock().pcbs.len()
    }
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new(Ipv4Addr::new(10, 0, 2, 15))
    }
}

impl TcpEngine for SimEngine {
    fn create(&self) -> Option<PcbId> {
        let mut state = self.state.lock();
        if state.take_fault(SimOp::Create).is_err() {
            return None;
        }
        let id = PcbId(self.next_id.fetch_add(1, Ordering::SeqCst));
        state.pcbs.insert(id, SimPcb::fresh());
        Some(id)
    }

    fn bind(&self, pcb: PcbId, port: u16) -> EngineResult {
        let mut state = self.state.lock();
        state.take_fault(SimOp::Bind)?;
        match state.pcbs.get(&pcb).map(|entry| entry.phase) {
            Some(PcbPhase::Fresh) => {}
            Some(_) => return Err(EngineError::Val),
            None => return Err(EngineError::Arg),
        }
        let port = if port == 0 {
            state.ephemeral_port()
        } else if state.ports.contains(&port) {
            return Err(EngineError::Use);
        } else {
            port
        };
        state.ports.insert(port);
        if let Some(entry) = state.pcbs.get_mut(&pcb) {
            entry.local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
            entry.phase = PcbPhase::Bound;
        }
        trace!("{} bound to port {}", pcb, port);
        Ok(())
    }

    fn connect(&self, pcb: PcbId, addr: Ipv4Addr, port: u16) -> EngineResult {
        let events = {
            let mut state = self.state.lock();
            state.take_fault(SimOp::Connect)?;
            let phase = state.pcbs.get(&pcb).map(|entry| entry.phase);
            match phase {
                Some(PcbPhase::Fresh) | Some(PcbPhase::Bound) => {}
                Some(PcbPhase::Connecting) => return Err(EngineError::Already),
                Some(PcbPhase::Connected) => return Err(EngineError::IsConn),
                Some(_) => return Err(EngineError::Val),
                None => return Err(EngineError::Arg),
            }
            let local_port = match state.pcbs.get(&pcb).map(|entry| entry.local.port()) {
                Some(0) | None => {
                    let port = state.ephemeral_port();
                    state.ports.insert(port);
                    port
                }
                Some(port) => port,
            };
            let local = SocketAddrV4::new(self.local_ip, local_port);
            let Some(entry) = state.pcbs.get_mut(&pcb) else {
                return Err(EngineError::Arg);
            };
            entry.local = local;
            entry.remote = Some(SocketAddrV4::new(addr, port));
            entry.phase = if self.auto_establish {
                PcbPhase::Connected
            } else {
                PcbPhase::Connecting
            };
            entry.events.clone()
        };

        trace!("{} connecting to {}:{}", pcb, addr, port);
        if self.auto_establish {
            if let Some(events) = events {
                events.on_connected(Ok(()));
            }
        }
        Ok(())
    }

    fn listen(&self, pcb: PcbId, backlog: u8) -> EngineResult<PcbId> {
        let mut state = self.state.lock();
        state.take_fault(SimOp::Listen)?;
        match state.pcbs.get(&pcb).map(|entry| entry.phase) {
            Some(PcbPhase::Fresh) | Some(PcbPhase::Bound) => {}
            Some(_) => return Err(EngineError::Val),
            None => return Err(EngineError::Arg),
        }
        let mut entry = state.pcbs.remove(&pcb).ok_or(EngineError::Arg)?;
        entry.phase = PcbPhase::Listening;
        entry.backlog = backlog;
        entry.events = None;
        let id = PcbId(self.next_id.fetch_add(1, Ordering::SeqCst));
        trace!("{} became listener {} (backlog {})", pcb, id, backlog);
        state.pcbs.insert(id, entry);
        Ok(id)
    }

    fn write(&self, pcb: PcbId, data: &[u8], _flags: WriteFlags) -> EngineResult {
        let mut state = self.state.lock();
        state.take_fault(SimOp::Write)?;
        let entry = state.pcbs.get_mut(&pcb).ok_or(EngineError::Clsd)?;
        if entry.phase != PcbPhase::Connected {
            return Err(EngineError::Conn);
        }
        entry.queued.extend_from_slice(data);
        Ok(())
    }

    fn flush(&self, pcb: PcbId) -> EngineResult {
        let mut state = self.state.lock();
        state.take_fault(SimOp::Flush)?;
        let entry = state.pcbs.get_mut(&pcb).ok_or(EngineError::Clsd)?;
        let queued = std::mem::take(&mut entry.queued);
        entry.sent.extend_from_slice(&queued);
        Ok(())
    }

    fn recv_credit(&self, pcb: PcbId, len: usize) {
        if let Some(entry) = self.state.lock().pcbs.get_mut(&pcb) {
            entry.credited += len;
        }
    }

    fn close(&self, pcb: PcbId) -> EngineResult {
        // The removed registration is dropped only after the lock is released
        let released = {
            let mut state = self.state.lock();
            state.take_fault(SimOp::Close)?;
            if !state.pcbs.contains_key(&pcb) {
                return Err(EngineError::Arg);
            }
            if self.deferred_teardown {
                if let Some(entry) = state.pcbs.get_mut(&pcb) {
                    entry.phase = PcbPhase::Closing;
                }
                None
            } else {
                state.release(pcb)
            }
        };
        trace!("{} closed (teardown deferred: {})", pcb, released.is_none());
        drop(released);
        Ok(())
    }

    fn register(&self, pcb: PcbId, events: Arc<dyn PcbEvents>) {
        if let Some(entry) = self.state.lock().pcbs.get_mut(&pcb) {
            entry.events = Some(events);
        }
    }

    fn local_endpoint(&self, pcb: PcbId) -> Option<SocketAddrV4> {
        self.state.lock().pcbs.get(&pcb).map(|entry| entry.local)
    }

    fn remote_endpoint(&self, pcb: PcbId) -> Option<SocketAddrV4> {
        self.state.lock().pcbs.get(&pcb).and_then(|entry| entry.remote)
    }
}
