/*!
 * Engine Callbacks
 * Protocol engine events applied to socket state
 *
 * Every callback takes the socket lock, updates state, picks a parked
 * continuation (or plans a notification dispatch) and runs the resulting
 * effects after unlocking.
 */

use super::object::{Effects, Incoming, Socket};
use super::state::SocketState;
use crate::net::engine::{EngineError, EngineResult, PcbEvents, PcbId, Segment};
use crate::net::errors::log_connection_error;
use log::{trace, warn};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

impl Socket {
    fn adopt_child(&self, pcb: PcbId) -> EngineResult {
        {
            let inner = self.inner.lock();
            if inner.released || inner.state != SocketState::Listening {
                return Err(EngineError::Abrt);
            }
            if inner.incoming.len() >= self.env.config.incoming_capacity {
                warn!("fd {}: incoming connection queue full", self.fd());
                return Err(EngineError::Mem);
            }
        }

        let table = self.env.table.upgrade().ok_or(EngineError::Abrt)?;
        let peer = self
            .env
            .engine
            .remote_endpoint(pcb)
            .unwrap_or_else(|| SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        let env = self.env.clone();
        let child = table
            .install(self.pid(), |fd| Ok(Socket::adopt(fd, self.pid(), env, pcb)))
            .map_err(|err| {
                warn!("fd {}: cannot allocate accepted socket: {}", self.fd(), err);
                EngineError::Mem
            })?;

        let mut fx = Effects::default();
        let refused = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let capacity = self.env.config.incoming_capacity;
            let refused = if inner.released {
                Some(EngineError::Abrt)
            } else {
                match &mut inner.incoming {
                    Incoming::Connections(queue) if queue.len() < capacity => {
                        queue.push_back((Arc::clone(&child), peer));
                        None
                    }
                    _ => Some(EngineError::Mem),
                }
            };
            if refused.is_none() {
                self.resume_one_waiter(inner, Ok(()), &mut fx);
            }
            refused
        };

        if let Some(err) = refused {
            // Lost a race with close or another inbound connection
            table.remove(child.pid(), child.fd());
            child.abandon();
            return Err(err);
        }
        trace!("fd {}: queued child fd {} from {}", self.fd(), child.fd(), peer);
        fx.run(self);
        Ok(())
    }
}

impl PcbEvents for Socket {
    fn on_recv(&self, segment: Option<Segment>, status: EngineResult) -> EngineResult {
        let mut fx = Effects::default();
        {
            let mut inner = self.inner.lock();
            if inner.released {
                trace!("fd {}: dropping data for closed socket", self.fd());
                return Ok(());
            }
            if let Err(err) = status {
                inner.last_error = Some(err);
            }
            match segment {
                Some(segment) if segment.is_empty() => return Ok(()),
                Some(segment) => {
                    let capacity = self.env.config.incoming_capacity;
                    match &mut inner.incoming {
                        Incoming::Segments(queue) if queue.len() < capacity => {
                            queue.push_back(segment)
                        }
                        Incoming::Segments(_) => {
                            warn!("fd {}: incoming queue full, deferring segment", self.fd());
                            return Err(EngineError::Mem);
                        }
                        Incoming::Connections(_) => return Err(EngineError::Val),
                    }
                }
                None => {
                    trace!("fd {}: remote closed", self.fd());
                    inner.state = SocketState::Closed;
                }
            }
            self.resume_one_waiter(&mut inner, Ok(()), &mut fx);
        }
        fx.run(self);
        Ok(())
    }

    fn on_connected(&self, status: EngineResult) {
        let mut fx = Effects::default();
        {
            let mut inner = self.inner.lock();
            if inner.released {
                return;
            }
            match status {
                Ok(()) => {
                    inner.state = SocketState::Open;
                    inner.connected = true;
                }
                Err(err) => {
                    inner.state = SocketState::Undefined;
                    inner.last_error = Some(err);
                }
            }
            trace!("fd {}: connect finished ({:?})", self.fd(), status);
            self.resume_one_waiter(&mut inner, status, &mut fx);
        }
        fx.run(self);
    }

    fn on_accept(&self, pcb: Option<PcbId>, status: EngineResult) -> EngineResult {
        match (pcb, status) {
            (Some(pcb), Ok(())) => self.adopt_child(pcb),
            (_, Err(err)) => {
                let mut fx = Effects::default();
                {
                    let mut inner = self.inner.lock();
                    if inner.released {
                        return Ok(());
                    }
                    warn!("fd {}: accept failed in engine: {}", self.fd(), err);
                    self.resume_one_waiter(&mut inner, Err(err), &mut fx);
                }
                fx.run(self);
                Ok(())
            }
            (None, Ok(())) => Err(EngineError::Val),
        }
    }

    fn on_error(&self, err: EngineError) {
        log_connection_error(self.fd(), err);
        let mut fx = Effects::default();
        {
            let mut inner = self.inner.lock();
            if inner.released {
                return;
            }
            inner.pcb = None;
            inner.last_error = Some(err);
            inner.state = SocketState::Undefined;
            match inner.waiting.take() {
                Some(parked) => fx.resume = Some((parked, Err(err.into()))),
                None => {
                    let events = Socket::readiness_of(&inner);
                    fx.notify = inner.notify.plan(events);
                }
            }
        }
        fx.run(self);
    }
}
