/*!
 * Socket Lifecycle States
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a stream socket
///
/// Numeric values are stable and appear in logs and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum SocketState {
    /// Initial or failed state
    Undefined = 0,
    Created = 1,
    InConnection = 2,
    Open = 3,
    Closed = 4,
    Listening = 5,
}

impl SocketState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Undefined => "UNDEFINED",
            Self::Created => "CREATED",
            Self::InConnection => "IN_CONNECTION",
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::Listening => "LISTENING",
        }
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
