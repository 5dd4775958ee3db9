//! Device session error types.

use thiserror::Error;
use xcvr_protocol::{BusFamily, FrameError, Opcode, Permission, SafetyMode, Status};

use crate::transport::TransportError;

/// Errors that can occur while driving the transceiver.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Transport timed out or dropped. Retried inside the channel only.
    #[error("device unreachable after {attempts} attempt(s): {reason}")]
    DeviceUnreachable { attempts: u32, reason: String },

    /// Malformed or short response. The session is unusable afterwards.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("safety gate closed: {permission} is not permitted in mode {mode}")]
    SafetyGateClosed {
        permission: Permission,
        mode: SafetyMode,
    },

    #[error("mode change to {requested} rejected, device reports {reported}")]
    ModeRejected {
        requested: SafetyMode,
        reported: SafetyMode,
    },

    #[error("mode {requested} is disabled by session policy")]
    ModeNotPermitted { requested: SafetyMode },

    #[error("unsupported bus variant {family}:{variant}")]
    UnsupportedBusVariant { family: BusFamily, variant: u8 },

    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{opcode} refused by device with status {status:?}")]
    CommandRefused { opcode: Opcode, status: Status },

    /// A mutating exchange was lost; run a health check before gated calls.
    #[error("device state unknown after an interrupted command; query health first")]
    StateUnknown,

    #[error("session closed")]
    SessionClosed,
}

impl DeviceError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DeviceError::DeviceUnreachable { .. })
    }
}

impl From<TransportError> for DeviceError {
    fn from(err: TransportError) -> Self {
        DeviceError::DeviceUnreachable {
            attempts: 1,
            reason: err.to_string(),
        }
    }
}

/// Convenience alias for device results.
pub type DeviceResult<T> = Result<T, DeviceError>;
