/*!
 * Socket Layer Configuration
 * Runtime tunables with compile-time defaults from `core::limits`
 */

use super::notify::LevelZeroMask;
use crate::core::limits::{DEFAULT_NOTIFY_CAPACITY, MAX_SOCKETS_PER_PROCESS, SOCK_QUEUE_LEN};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable holding a JSON `SocketConfig`
pub const CONFIG_ENV: &str = "NETSOCK_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Segments (or pending connections) a socket buffers before backpressure
    pub incoming_capacity: usize,
    /// Notification registrations per socket
    pub notify_capacity: usize,
    pub max_sockets_per_process: usize,
    /// Upper bound on any blocking call; `None` waits indefinitely
    pub park_timeout: Option<Duration>,
    pub level_zero_mask: LevelZeroMask,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            incoming_capacity: SOCK_QUEUE_LEN,
            notify_capacity: DEFAULT_NOTIFY_CAPACITY,
            max_sockets_per_process: MAX_SOCKETS_PER_PROCESS,
            park_timeout: None,
            level_zero_mask: LevelZeroMask::default(),
        }
    }
}

impl SocketConfig {
    /// Load from `NETSOCK_CONFIG`, falling back to defaults
    pub fn from_env() -> Self {
        match std::env::var(CONFIG_ENV) {
            Ok(raw) => Self::from_json(&raw).unwrap_or_else(|e| {
                warn!("Ignoring invalid {}: {}", CONFIG_ENV, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let config: Self = serde_json::from_str(raw)?;
        info!(
            "Socket config: incoming={}, notify={}, per-process={}, timeout={:?}",
            config.incoming_capacity,
            config.notify_capacity,
            config.max_sockets_per_process,
            config.park_timeout
        );
        Ok(config)
    }

    pub fn with_park_timeout(mut self, timeout: Duration) -> Self {
        self.park_timeout = Some(timeout);
        self
    }

    pub fn with_incoming_capacity(mut self, capacity: usize) -> Self {
        self.incoming_capacity = capacity;
        self
    }

    pub fn with_level_zero_mask(mut self, policy: LevelZeroMask) -> Self {
        self.level_zero_mask = policy;
        self
    }
}
