//! Health snapshot layout.
//!
//! All multi-byte fields are little-endian.
//!
//! | off | size | field                          |
//! |-----|------|--------------------------------|
//! | 0   | 2    | safety mode code               |
//! | 2   | 1    | bus family                     |
//! | 3   | 1    | bus variant                    |
//! | 4   | 4    | supply voltage (mV)            |
//! | 8   | 4    | supply current (mA)            |
//! | 12  | 4    | uptime (s)                     |
//! | 16  | 4    | frames transmitted             |
//! | 20  | 4    | frames received                |
//! | 24  | 2    | fault flags                    |
//! | 26  | 1    | ignition detected              |
//! | 27  | 1    | controls allowed               |
//! | 28  | 6    | pending tx frames, one u16/lane |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::{BusFamily, BusSelector, LANE_COUNT};
use crate::error::{WireError, WireResult};
use crate::mode::SafetyMode;

/// Exact size of the health result block.
pub const HEALTH_LEN: usize = 34;

/// Device fault bitfield. Unknown bits are kept as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaultFlags(pub u16);

impl FaultFlags {
    pub const RELAY_MALFUNCTION: u16 = 1 << 0;
    pub const CAN_BUS_OFF: u16 = 1 << 1;
    pub const OVERVOLTAGE: u16 = 1 << 2;
    pub const UNDERVOLTAGE: u16 = 1 << 3;
    pub const TX_OVERFLOW: u16 = 1 << 4;
    pub const RX_OVERFLOW: u16 = 1 << 5;
    pub const HEARTBEAT_LOST: u16 = 1 << 6;

    pub fn contains(self, flag: u16) -> bool {
        self.0 & flag == flag
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Names of the set flags this host recognises.
    pub fn names(self) -> Vec<&'static str> {
        const NAMES: &[(u16, &str)] = &[
            (FaultFlags::RELAY_MALFUNCTION, "relay_malfunction"),
            (FaultFlags::CAN_BUS_OFF, "can_bus_off"),
            (FaultFlags::OVERVOLTAGE, "overvoltage"),
            (FaultFlags::UNDERVOLTAGE, "undervoltage"),
            (FaultFlags::TX_OVERFLOW, "tx_overflow"),
            (FaultFlags::RX_OVERFLOW, "rx_overflow"),
            (FaultFlags::HEARTBEAT_LOST, "heartbeat_lost"),
        ];
        NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

/// Point-in-time device status. Never cached past the call that read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub safety_mode: SafetyMode,
    pub bus_selector: BusSelector,
    pub voltage_mv: u32,
    pub current_ma: u32,
    pub uptime_secs: u32,
    pub tx_frames: u32,
    pub rx_frames: u32,
    pub faults: FaultFlags,
    pub ignition: bool,
    pub controls_allowed: bool,
    /// Frames waiting to leave the transceiver, indexed by lane.
    pub tx_pending: [u16; LANE_COUNT as usize],
    /// Host clock when the snapshot was decoded.
    pub captured_at: DateTime<Utc>,
}

impl HealthSnapshot {
    /// Decode the fixed-layout result block of a `QueryHealth` response.
    pub fn decode(block: &[u8], captured_at: DateTime<Utc>) -> WireResult<Self> {
        if block.len() != HEALTH_LEN {
            return Err(WireError::Length {
                what: "health snapshot",
                expected: HEALTH_LEN,
                actual: block.len(),
            });
        }
        let u16_at = |off: usize| u16::from_le_bytes([block[off], block[off + 1]]);
        let u32_at = |off: usize| {
            u32::from_le_bytes([block[off], block[off + 1], block[off + 2], block[off + 3]])
        };

        let family = BusFamily::from_code(block[2])?;
        Ok(Self {
            safety_mode: SafetyMode::from_code(u16_at(0)),
            bus_selector: BusSelector::new(family, block[3]),
            voltage_mv: u32_at(4),
            current_ma: u32_at(8),
            uptime_secs: u32_at(12),
            tx_frames: u32_at(16),
            rx_frames: u32_at(20),
            faults: FaultFlags(u16_at(24)),
            ignition: block[26] != 0,
            controls_allowed: block[27] != 0,
            tx_pending: [u16_at(28), u16_at(30), u16_at(32)],
            captured_at,
        })
    }

    /// Encode into the device layout. `captured_at` is host-only and dropped.
    pub fn encode(&self) -> [u8; HEALTH_LEN] {
        let mut out = [0u8; HEALTH_LEN];
        out[0..2].copy_from_slice(&self.safety_mode.code().to_le_bytes());
        out[2] = self.bus_selector.family.code();
        out[3] = self.bus_selector.variant;
        out[4..8].copy_from_slice(&self.voltage_mv.to_le_bytes());
        out[8..12].copy_from_slice(&self.current_ma.to_le_bytes());
        out[12..16].copy_from_slice(&self.uptime_secs.to_le_bytes());
        out[16..20].copy_from_slice(&self.tx_frames.to_le_bytes());
        out[20..24].copy_from_slice(&self.rx_frames.to_le_bytes());
        out[24..26].copy_from_slice(&self.faults.0.to_le_bytes());
        out[26] = self.ignition as u8;
        out[27] = self.controls_allowed as u8;
        for (lane, pending) in self.tx_pending.iter().enumerate() {
            let off = 28 + lane * 2;
            out[off..off + 2].copy_from_slice(&pending.to_le_bytes());
        }
        out
    }

    /// Supply voltage in volts.
    pub fn voltage(&self) -> f64 {
        self.voltage_mv as f64 / 1000.0
    }

    /// Total frames pending across all lanes.
    pub fn total_pending(&self) -> u32 {
        self.tx_pending.iter().map(|p| *p as u32).sum()
    }
}
