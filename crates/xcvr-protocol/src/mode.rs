//! Safety modes and the operations each one permits.
//!
//! The transceiver boots in `NoOutput`. Vehicle modes arm the transmit
//! path under that vehicle's firmware safety hooks; `AllOutput` disables
//! them and is meant for bench debugging only.

use serde::{Deserialize, Serialize};

/// Device safety mode, carried on the wire as a `u16` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyMode {
    NoOutput,
    Honda,
    Toyota,
    /// GM vehicles, including GMLAN chimes on the low-speed bus.
    Gm,
    HondaBosch,
    Ford,
    Cadillac,
    /// Listen-only: the controller does not ACK or transmit.
    Silent,
    Elm327,
    AllOutput,
    /// A code this host does not recognise. Grants nothing.
    Other(u16),
}

impl SafetyMode {
    pub fn code(self) -> u16 {
        match self {
            SafetyMode::NoOutput => 0x0000,
            SafetyMode::Honda => 0x0001,
            SafetyMode::Toyota => 0x0002,
            SafetyMode::Gm => 0x0003,
            SafetyMode::HondaBosch => 0x0004,
            SafetyMode::Ford => 0x0005,
            SafetyMode::Cadillac => 0x0006,
            SafetyMode::Silent => 0x0013,
            SafetyMode::Elm327 => 0xE327,
            SafetyMode::AllOutput => 0x1337,
            SafetyMode::Other(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => SafetyMode::NoOutput,
            0x0001 => SafetyMode::Honda,
            0x0002 => SafetyMode::Toyota,
            0x0003 => SafetyMode::Gm,
            0x0004 => SafetyMode::HondaBosch,
            0x0005 => SafetyMode::Ford,
            0x0006 => SafetyMode::Cadillac,
            0x0013 => SafetyMode::Silent,
            0xE327 => SafetyMode::Elm327,
            0x1337 => SafetyMode::AllOutput,
            other => SafetyMode::Other(other),
        }
    }

    pub fn permissions(self) -> Permissions {
        match self {
            SafetyMode::NoOutput | SafetyMode::Silent => Permissions {
                may_transmit: false,
                may_clear_queue: true,
                may_change_bus: false,
            },
            SafetyMode::Honda
            | SafetyMode::Toyota
            | SafetyMode::Gm
            | SafetyMode::HondaBosch
            | SafetyMode::Ford
            | SafetyMode::Cadillac
            | SafetyMode::AllOutput => Permissions::all(),
            SafetyMode::Elm327 => Permissions {
                may_transmit: true,
                may_clear_queue: true,
                may_change_bus: false,
            },
            SafetyMode::Other(_) => Permissions::none(),
        }
    }

    /// Whether this mode disables the firmware's vehicle safety hooks.
    pub fn is_debug(self) -> bool {
        matches!(self, SafetyMode::AllOutput)
    }
}

impl std::fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SafetyMode::NoOutput => "no_output",
            SafetyMode::Honda => "honda",
            SafetyMode::Toyota => "toyota",
            SafetyMode::Gm => "gm",
            SafetyMode::HondaBosch => "honda_bosch",
            SafetyMode::Ford => "ford",
            SafetyMode::Cadillac => "cadillac",
            SafetyMode::Silent => "silent",
            SafetyMode::Elm327 => "elm327",
            SafetyMode::AllOutput => "all_output",
            SafetyMode::Other(code) => return write!(f, "other(0x{code:04X})"),
        };
        f.write_str(name)
    }
}

/// Bus-affecting operations, each gated by one permission bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Transmit,
    ClearQueue,
    ChangeBus,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Permission::Transmit => "transmit",
            Permission::ClearQueue => "clear_queue",
            Permission::ChangeBus => "change_bus",
        })
    }
}

/// The permission set attached to a safety mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub may_transmit: bool,
    pub may_clear_queue: bool,
    pub may_change_bus: bool,
}

impl Permissions {
    pub const fn all() -> Self {
        Self {
            may_transmit: true,
            may_clear_queue: true,
            may_change_bus: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            may_transmit: false,
            may_clear_queue: false,
            may_change_bus: false,
        }
    }

    pub fn allows(&self, permission: Permission) -> bool {
        match permission {
            Permission::Transmit => self.may_transmit,
            Permission::ClearQueue => self.may_clear_queue,
            Permission::ChangeBus => self.may_change_bus,
        }
    }
}
