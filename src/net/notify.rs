/*!
 * Notification Registry
 *
 * Per-socket ordered list of readiness interests. Each entry carries an event
 * mask, the last masked snapshot it was shown (for edge triggering), and a
 * handler that decides whether the registration survives a delivery.
 *
 * # Design
 *
 * Entries live in a socket-owned `Slab`; keys carry a generation so a stale
 * key can never retire a newer entry that reused the same slot. Registration
 * order is kept in a separate list, which is the traversal order.
 *
 * Dispatch is split in two so handlers run without the socket lock:
 * `plan` (under the lock) computes what each entry should receive and updates
 * edge snapshots, `deliver_all` invokes handlers, `retire` removes entries
 * whose handler asked to be removed. One-shot and exclusive delivery are the
 * handler's business; the registry only honours the removal signal.
 */

use super::readiness::Readiness;
use crate::core::types::Fd;
use log::trace;
use serde::{Deserialize, Serialize};
use slab::Slab;
use std::fmt;
use std::sync::Arc;

/// Consumer of readiness events
pub trait EventHandler: Send + Sync {
    /// Handle `events`; returning `true` removes the registration
    fn handle(&self, events: Readiness) -> bool;
}

impl<F> EventHandler for F
where
    F: Fn(Readiness) -> bool + Send + Sync,
{
    fn handle(&self, events: Readiness) -> bool {
        self(events)
    }
}

/// Handle to a registered interest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifyKey {
    index: usize,
    generation: u64,
}

/// Whether a level-triggered entry is invoked when its masked readiness is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelZeroMask {
    /// Invoke with an empty mask (handlers must tolerate it)
    #[default]
    Deliver,
    /// Skip the entry until something in its mask is ready
    Skip,
}

struct NotifyEntry {
    eventmask: Readiness,
    last: Readiness,
    generation: u64,
    handler: Arc<dyn EventHandler>,
}

/// A handler invocation computed by `plan`
pub(crate) struct Delivery {
    key: NotifyKey,
    events: Readiness,
    handler: Arc<dyn EventHandler>,
}

/// Ordered readiness registrations for one socket
pub struct NotifyRegistry {
    entries: Slab<NotifyEntry>,
    order: Vec<NotifyKey>,
    capacity: usize,
    next_generation: u64,
    zero_mask: LevelZeroMask,
}

impl NotifyRegistry {
    pub fn new(capacity: usize, zero_mask: LevelZeroMask) -> Self {
        Self {
            entries: Slab::new(),
            order: Vec::new(),
            capacity,
            next_generation: 0,
            zero_mask,
        }
    }

    /// Append an interest; `None` when the registry is at capacity
    pub fn register(
        &mut self,
        eventmask: Readiness,
        last: Readiness,
        handler: Arc<dyn EventHandler>,
    ) -> Option<NotifyKey> {
        if self.entries.len() >= self.capacity {
            return None;
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        let index = self.entries.insert(NotifyEntry {
            eventmask,
            last,
            generation,
            handler,
        });
        let key = NotifyKey { index, generation };
        self.order.push(key);
        Some(key)
    }

    /// Remove an interest; `false` if it was already gone
    pub fn deregister(&mut self, key: NotifyKey) -> bool {
        if !self.contains(key) {
            return false;
        }
        self.entries.remove(key.index);
        self.order.retain(|k| *k != key);
        true
    }

    pub fn contains(&self, key: NotifyKey) -> bool {
        self.entries
            .get(key.index)
            .map(|entry| entry.generation == key.generation)
            .unwrap_or(false)
    }

    /// Last masked snapshot shown to an entry
    pub fn last_snapshot(&self, key: NotifyKey) -> Option<Readiness> {
        self.entries
            .get(key.index)
            .filter(|entry| entry.generation == key.generation)
            .map(|entry| entry.last)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every registration, returning how many were freed
    pub fn clear(&mut self) -> usize {
        let freed = self.entries.len();
        self.entries.clear();
        self.order.clear();
        freed
    }

    /// Decide which handlers fire for `readiness`, in registration order
    pub(crate) fn plan(&mut self, readiness: Readiness) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for key in self.order.iter().copied() {
            let Some(entry) = self.entries.get_mut(key.index) else {
                continue;
            };
            let masked = readiness & entry.eventmask;

            if entry.eventmask.is_edge_triggered() {
                if masked == entry.last {
                    continue;
                }
                let rising = (masked ^ entry.last) & masked;
                entry.last = masked;
                if rising.is_empty() {
                    continue;
                }
                deliveries.push(Delivery {
                    key,
                    events: rising,
                    handler: Arc::clone(&entry.handler),
                });
            } else {
                if masked.is_empty() && self.zero_mask == LevelZeroMask::Skip {
                    continue;
                }
                deliveries.push(Delivery {
                    key,
                    events: masked,
                    handler: Arc::clone(&entry.handler),
                });
            }
        }
        deliveries
    }

    /// Remove entries whose handlers signalled completion
    pub(crate) fn retire(&mut self, keys: &[NotifyKey]) -> usize {
        keys.iter().filter(|key| self.deregister(**key)).count()
    }

    /// Plan, invoke, and retire in one step; returns how many entries were removed
    ///
    /// Handlers run while `self` is borrowed, so they must not reach back into
    /// the owning socket. Sockets use the split form instead.
    pub fn dispatch(&mut self, readiness: Readiness) -> usize {
        let deliveries = self.plan(readiness);
        let done = deliver_all(deliveries);
        self.retire(&done)
    }
}

impl fmt::Debug for NotifyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyRegistry")
            .field("entries", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("zero_mask", &self.zero_mask)
            .finish()
    }
}

/// Invoke planned handlers, returning the keys that asked to be removed
pub(crate) fn deliver_all(deliveries: Vec<Delivery>) -> Vec<NotifyKey> {
    let mut done = Vec::new();
    for delivery in deliveries {
        if delivery.handler.handle(delivery.events) {
            trace!("notify entry {:?} completed", delivery.key);
            done.push(delivery.key);
        }
    }
    done
}

/// Readiness event forwarded to an upstream poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    pub fd: Fd,
    pub events: Readiness,
}

/// Handler that forwards non-empty readiness into a channel
///
/// A one-shot sender asks for removal after its first delivery. A sender whose
/// receiver is gone also removes itself.
#[derive(Debug, Clone)]
pub struct ReadySender {
    fd: Fd,
    tx: flume::Sender<ReadyEvent>,
    oneshot: bool,
}

impl ReadySender {
    pub fn new(fd: Fd, tx: flume::Sender<ReadyEvent>) -> Self {
        Self {
            fd,
            tx,
            oneshot: false,
        }
    }

    /// Sender plus an unbounded receiver
    pub fn channel(fd: Fd) -> (Self, flume::Receiver<ReadyEvent>) {
        let (tx, rx) = flume::unbounded();
        (Self::new(fd, tx), rx)
    }

    pub fn oneshot(mut self) -> Self {
        self.oneshot = true;
        self
    }
}

impl EventHandler for ReadySender {
    fn handle(&self, events: Readiness) -> bool {
        if events.is_empty() {
            return false;
        }
        match self.tx.send(ReadyEvent {
            fd: self.fd,
            events,
        }) {
            Ok(()) => self.oneshot,
            Err(_) => true,
        }
    }
}
