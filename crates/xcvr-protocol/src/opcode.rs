//! Command opcodes and response status codes.

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// Control-plane command opcodes understood by the transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Opcode {
    /// Change the active safety mode (u16 LE mode code).
    SetSafetyMode = 0xDC,
    /// Route a bus family onto a lane (family, variant).
    SetBusSelector = 0xDB,
    /// Drop pending transmit frames on one lane (bus index).
    ClearQueue = 0xF1,
    /// Submit one 16-byte frame record for transmission.
    SendFrame = 0xE0,
    /// Read the fixed-layout health snapshot.
    QueryHealth = 0xD2,
    /// Read firmware version and serial.
    QueryVersion = 0xD6,
    /// Set a lane's bitrate (bus index, kbps × 10 as u16 LE).
    SetBitrate = 0xDE,
    /// Drain received frame records.
    ReceiveFrames = 0xE1,
}

impl Opcode {
    /// Whether the command changes device state.
    pub fn is_mutating(self) -> bool {
        !matches!(
            self,
            Opcode::QueryHealth | Opcode::QueryVersion | Opcode::ReceiveFrames
        )
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0xDC => Ok(Opcode::SetSafetyMode),
            0xDB => Ok(Opcode::SetBusSelector),
            0xF1 => Ok(Opcode::ClearQueue),
            0xE0 => Ok(Opcode::SendFrame),
            0xD2 => Ok(Opcode::QueryHealth),
            0xD6 => Ok(Opcode::QueryVersion),
            0xDE => Ok(Opcode::SetBitrate),
            0xE1 => Ok(Opcode::ReceiveFrames),
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Opcode::SetSafetyMode => "set_safety_mode",
            Opcode::SetBusSelector => "set_bus_selector",
            Opcode::ClearQueue => "clear_queue",
            Opcode::SendFrame => "send_frame",
            Opcode::QueryHealth => "query_health",
            Opcode::QueryVersion => "query_version",
            Opcode::SetBitrate => "set_bitrate",
            Opcode::ReceiveFrames => "receive_frames",
        };
        f.write_str(name)
    }
}

/// Response status reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    /// The device vetoed the requested configuration.
    Rejected = 0x01,
    /// The requested bus variant is not available on this hardware.
    UnsupportedVariant = 0x02,
    InvalidParameter = 0x03,
    /// The firmware refused to act (e.g. its own safety hook blocked a frame).
    Refused = 0x04,
}

impl From<Status> for u8 {
    fn from(status: Status) -> u8 {
        status as u8
    }
}

impl TryFrom<u8> for Status {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Status::Ok),
            0x01 => Ok(Status::Rejected),
            0x02 => Ok(Status::UnsupportedVariant),
            0x03 => Ok(Status::InvalidParameter),
            0x04 => Ok(Status::Refused),
            other => Err(WireError::UnknownStatus(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_byte_values() {
        assert_eq!(u8::from(Opcode::SetSafetyMode), 0xDC);
        assert_eq!(u8::from(Opcode::SetBusSelector), 0xDB);
        assert_eq!(u8::from(Opcode::ClearQueue), 0xF1);
        assert_eq!(u8::from(Opcode::QueryHealth), 0xD2);
        assert_eq!(Opcode::try_from(0xE0).unwrap(), Opcode::SendFrame);
        assert!(matches!(
            Opcode::try_from(0x00),
            Err(WireError::UnknownOpcode(0x00))
        ));
    }

    #[test]
    fn read_only_opcodes() {
        assert!(!Opcode::QueryHealth.is_mutating());
        assert!(!Opcode::ReceiveFrames.is_mutating());
        assert!(Opcode::SendFrame.is_mutating());
        assert!(Opcode::ClearQueue.is_mutating());
    }

    #[test]
    fn unknown_status_is_an_error() {
        assert_eq!(Status::try_from(0x02).unwrap(), Status::UnsupportedVariant);
        assert!(matches!(
            Status::try_from(0x7F),
            Err(WireError::UnknownStatus(0x7F))
        ));
    }
}
