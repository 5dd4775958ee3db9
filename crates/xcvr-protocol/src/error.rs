//! Wire-level error types.

use thiserror::Error;

/// Errors raised while encoding or decoding command frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("bad sync byte 0x{found:02X} (expected 0x{expected:02X})")]
    BadSync { expected: u8, found: u8 },

    #[error("checksum mismatch: computed 0x{computed:02X}, received 0x{received:02X}")]
    BadChecksum { computed: u8, received: u8 },

    #[error("unknown status code 0x{0:02X}")]
    UnknownStatus(u8),

    #[error("unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),

    #[error("parameter block too long: {len} bytes (max 255)")]
    ParamsTooLong { len: usize },

    #[error("unexpected payload length for {what}: expected {expected}, got {actual}")]
    Length {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid field {field}: {value}")]
    InvalidField { field: &'static str, value: u32 },

    #[error("{0}")]
    Other(String),
}

/// Convenience alias for wire results.
pub type WireResult<T> = Result<T, WireError>;
