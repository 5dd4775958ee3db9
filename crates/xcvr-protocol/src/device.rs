//! Device identity: firmware version, hardware revision and serial number
//! as reported by the version query.

use serde::{Deserialize, Serialize};

use crate::error::{WireError, WireResult};

/// Transceiver hardware revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareType {
    White,
    Grey,
    Black,
    Unknown(u8),
}

impl HardwareType {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => HardwareType::White,
            2 => HardwareType::Grey,
            3 => HardwareType::Black,
            other => HardwareType::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            HardwareType::White => 1,
            HardwareType::Grey => 2,
            HardwareType::Black => 3,
            HardwareType::Unknown(code) => code,
        }
    }
}

/// Identity reported by `QueryVersion`.
///
/// Layout: `major, minor, patch, hardware, serial (ASCII, rest of block)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub firmware_version: String,
    pub hardware: HardwareType,
    pub serial: String,
}

impl DeviceInfo {
    pub fn decode(block: &[u8]) -> WireResult<Self> {
        if block.len() < 4 {
            return Err(WireError::Length {
                what: "version block",
                expected: 4,
                actual: block.len(),
            });
        }
        let serial = std::str::from_utf8(&block[4..])
            .map_err(|e| WireError::Other(format!("serial is not valid ASCII: {e}")))?
            .to_string();
        Ok(Self {
            firmware_version: format!("{}.{}.{}", block[0], block[1], block[2]),
            hardware: HardwareType::from_code(block[3]),
            serial,
        })
    }

    /// Encode into the device layout. Non-numeric version parts encode as 0.
    pub fn encode(&self) -> Vec<u8> {
        let mut parts = self
            .firmware_version
            .split('.')
            .map(|p| p.parse::<u8>().unwrap_or(0));
        let mut out = vec![
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
            self.hardware.code(),
        ];
        out.extend_from_slice(self.serial.as_bytes());
        out
    }
}
