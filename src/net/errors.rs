/*!
 * Engine Error Mapping
 * Translates protocol engine codes into the host errno taxonomy
 */

use super::engine::EngineError;
use crate::core::errors::Errno;
use crate::core::types::Fd;
use log::error;

/// Map an engine error to the host error number
pub const fn map_engine_error(err: EngineError) -> Errno {
    match err {
        EngineError::Mem | EngineError::Buf | EngineError::Timeout | EngineError::Rte => {
            Errno::Enomem
        }
        EngineError::InProgress | EngineError::WouldBlock => Errno::Eagain,
        EngineError::Val
        | EngineError::IsConn
        | EngineError::Conn
        | EngineError::If
        | EngineError::Abrt
        | EngineError::Rst
        | EngineError::Arg => Errno::Einval,
        EngineError::Use | EngineError::Already => Errno::Ebusy,
        EngineError::Clsd => Errno::Epipe,
    }
}

/// Map a raw engine code; `None` means success
///
/// Codes the engine does not define map to `EINVAL`.
pub fn map_engine_code(code: i8) -> Option<Errno> {
    if code == 0 {
        return None;
    }
    Some(
        EngineError::from_code(code)
            .map(map_engine_error)
            .unwrap_or(Errno::Einval),
    )
}

/// Log a connection-fatal engine error with a classified message
pub(crate) fn log_connection_error(fd: Fd, err: EngineError) {
    match err {
        EngineError::Abrt => error!("connection closed on fd {} due to abort or timer", fd),
        EngineError::Rst => error!("connection closed on fd {} due to remote reset", fd),
        other => error!("fd {}: unknown error {} ({})", fd, other.code(), other),
    }
}
