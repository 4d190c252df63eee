/*!
 * Readiness Evaluation
 * Event bitmask a socket reports to pollers
 *
 * Bit values match epoll so registration masks pass through untouched.
 */

use super::socket::SocketState;
use bitflags::bitflags;

bitflags! {
    /// Readiness and registration flags (epoll-compatible)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Readiness: u32 {
        const IN = 0x001;
        const PRI = 0x002;
        const OUT = 0x004;
        const ERR = 0x008;
        const HUP = 0x010;
        const RDNORM = 0x040;
        const RDBAND = 0x080;
        const WRNORM = 0x100;
        const RDHUP = 0x2000;
        const EXCLUSIVE = 1 << 28;
        const WAKEUP = 1 << 29;
        const ONESHOT = 1 << 30;
        /// Edge-triggered registration
        const ET = 1 << 31;
    }
}

impl Readiness {
    /// Reported when a socket can no longer deliver fresh data
    pub const CLOSED: Self = Self::IN
        .union(Self::HUP)
        .union(Self::RDHUP)
        .union(Self::RDNORM);

    /// Registration-only flags that never appear in a readiness snapshot
    pub const MODIFIERS: Self = Self::EXCLUSIVE
        .union(Self::WAKEUP)
        .union(Self::ONESHOT)
        .union(Self::ET);

    #[inline]
    pub fn is_edge_triggered(self) -> bool {
        self.contains(Self::ET)
    }
}

/// Current readiness for a socket in `state` with `queued` incoming entries
///
/// Listening sockets only report pending connections; errors on a listener
/// are not surfaced here. Any non-OPEN state reads as closed in both
/// directions since per-direction shutdown is not tracked.
pub fn compute(state: SocketState, queued: usize) -> Readiness {
    let pending = queued > 0;
    if state == SocketState::Listening {
        return if pending {
            Readiness::IN
        } else {
            Readiness::empty()
        };
    }

    let mut events = Readiness::empty();
    if pending {
        events |= Readiness::IN | Readiness::RDNORM;
    }
    if state != SocketState::Open {
        events |= Readiness::CLOSED;
    }
    events
}
