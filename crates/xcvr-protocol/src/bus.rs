//! Physical lanes and bus-family routing.

use serde::{Deserialize, Serialize};

use crate::error::{WireError, WireResult};

/// Number of physical CAN lanes on the transceiver.
pub const LANE_COUNT: u8 = 3;

/// Bitrates (kbps) the CAN controllers can be configured for.
pub const SUPPORTED_BITRATES_KBPS: &[u16] = &[10, 20, 50, 100, 125, 250, 500, 1000];

/// Electrical bus family a lane can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusFamily {
    /// High-speed CAN on every lane.
    Can,
    /// GM single-wire low-speed CAN, routed onto one lane.
    Gmlan,
}

impl BusFamily {
    pub fn code(self) -> u8 {
        match self {
            BusFamily::Can => 0,
            BusFamily::Gmlan => 1,
        }
    }

    pub fn from_code(code: u8) -> WireResult<Self> {
        match code {
            0 => Ok(BusFamily::Can),
            1 => Ok(BusFamily::Gmlan),
            other => Err(WireError::InvalidField {
                field: "bus_family",
                value: other as u32,
            }),
        }
    }
}

impl std::fmt::Display for BusFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BusFamily::Can => "can",
            BusFamily::Gmlan => "gmlan",
        })
    }
}

/// A bus family paired with a variant index.
///
/// For `Gmlan` the variant is the lane the GMLAN transceiver is switched
/// onto; the other lanes stay on plain CAN. `(Can, 0)` switches GMLAN off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusSelector {
    pub family: BusFamily,
    pub variant: u8,
}

impl BusSelector {
    pub const fn new(family: BusFamily, variant: u8) -> Self {
        Self { family, variant }
    }

    /// Plain CAN on every lane.
    pub const fn can() -> Self {
        Self::new(BusFamily::Can, 0)
    }

    pub const fn gmlan(lane: u8) -> Self {
        Self::new(BusFamily::Gmlan, lane)
    }

    /// Whether the host knows this combination to exist on the hardware.
    pub fn is_supported(&self) -> bool {
        match self.family {
            BusFamily::Can => self.variant == 0,
            BusFamily::Gmlan => matches!(self.variant, 1 | 2),
        }
    }

    /// The lane whose routing this selector changes, if any.
    pub fn lane(&self) -> Option<u8> {
        match self.family {
            BusFamily::Can => None,
            BusFamily::Gmlan => Some(self.variant),
        }
    }

    pub fn to_params(&self) -> Vec<u8> {
        vec![self.family.code(), self.variant]
    }

    pub fn from_params(params: &[u8]) -> WireResult<Self> {
        if params.len() != 2 {
            return Err(WireError::Length {
                what: "bus selector",
                expected: 2,
                actual: params.len(),
            });
        }
        Ok(Self::new(BusFamily::from_code(params[0])?, params[1]))
    }
}

impl Default for BusSelector {
    fn default() -> Self {
        Self::can()
    }
}

impl std::fmt::Display for BusSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.family, self.variant)
    }
}

/// Whether `bus` addresses an existing lane.
pub fn is_valid_lane(bus: u8) -> bool {
    bus < LANE_COUNT
}

/// Whether `kbps` is a bitrate the controllers accept.
pub fn is_supported_bitrate(kbps: u16) -> bool {
    SUPPORTED_BITRATES_KBPS.contains(&kbps)
}
