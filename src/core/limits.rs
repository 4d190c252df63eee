/*!
 * System Limits and Constants
 *
 * Centralized location for socket-layer limits, thresholds, and magic numbers.
 * Linux-compatible values are marked with [LINUX-COMPAT].
 */

use std::time::Duration;

// =============================================================================
// SOCKET QUEUES
// =============================================================================

/// Depth of a socket's incoming queue (data segments or accepted children)
pub const SOCK_QUEUE_LEN: usize = 32;

/// Default number of readiness registrations a single socket accepts
pub const DEFAULT_NOTIFY_CAPACITY: usize = 64;

// =============================================================================
// DESCRIPTORS
// =============================================================================

/// First descriptor handed out by the socket table
pub const SOCKET_FD_BASE: u32 = 1000;

/// Max sockets per process
pub const MAX_SOCKETS_PER_PROCESS: usize = 100;

// =============================================================================
// ADDRESSES
// =============================================================================

/// Size of an IPv4 socket address on the wire [LINUX-COMPAT]
pub const SOCKADDR_IN_LEN: usize = 16;

/// Default listen backlog when the caller passes a non-positive value
pub const DEFAULT_LISTEN_BACKLOG: u8 = 5;

/// Largest backlog the protocol engine accepts
pub const MAX_LISTEN_BACKLOG: u8 = 0xff;

// =============================================================================
// TIMING
// =============================================================================

/// Syscalls slower than this are logged as slow
pub const SLOW_SYSCALL_THRESHOLD: Duration = Duration::from_millis(10);

/// Operations slower than this are logged as slow
pub const SLOW_OPERATION_THRESHOLD: Duration = Duration::from_millis(100);
