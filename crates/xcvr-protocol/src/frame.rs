//! CAN frames and their 16-byte wire record.
//!
//! ```text
//! word0 (u32 LE): standard  id << 21
//!                 extended  (id << 3) | EXTENDED
//!                 plus TX_REQUEST on host->device, RETURNED on tx echoes
//! word1 (u32 LE): dlc | (bus << 4)
//! data[8]:        payload, zero padded
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::{LANE_COUNT, is_valid_lane};
use crate::error::{WireError, WireResult};

/// Largest classic CAN payload.
pub const MAX_PAYLOAD: usize = 8;

/// Size of one frame record on the wire.
pub const RECORD_LEN: usize = 16;

pub const MAX_STANDARD_ID: u16 = 0x7FF;
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

const TX_REQUEST: u32 = 0x1;
const RETURNED: u32 = 0x2;
const EXTENDED: u32 = 0x4;

/// Arbitration identifier, tagged with its addressing width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanId {
    /// 11-bit identifier.
    Standard(u16),
    /// 29-bit identifier.
    Extended(u32),
}

impl CanId {
    pub fn raw(self) -> u32 {
        match self {
            CanId::Standard(id) => id as u32,
            CanId::Extended(id) => id,
        }
    }

    pub fn is_extended(self) -> bool {
        matches!(self, CanId::Extended(_))
    }

    pub fn validate(self) -> Result<(), FrameError> {
        match self {
            CanId::Standard(id) if id > MAX_STANDARD_ID => {
                Err(FrameError::StandardIdOutOfRange(id))
            }
            CanId::Extended(id) if id > MAX_EXTENDED_ID => {
                Err(FrameError::ExtendedIdOutOfRange(id))
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for CanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CanId::Standard(id) => write!(f, "0x{id:03X}"),
            CanId::Extended(id) => write!(f, "0x{id:08X}x"),
        }
    }
}

/// Local frame validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("standard id 0x{0:X} exceeds 11 bits")]
    StandardIdOutOfRange(u16),

    #[error("extended id 0x{0:X} exceeds 29 bits")]
    ExtendedIdOutOfRange(u32),

    #[error("payload of {len} bytes exceeds the {max}-byte limit")]
    PayloadTooLong { len: usize, max: usize },

    #[error("bus index {bus} out of range (lanes 0..{lanes})")]
    InvalidBus { bus: u8, lanes: u8 },
}

/// A validated classic CAN frame bound to a lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub id: CanId,
    pub payload: Vec<u8>,
    pub bus: u8,
}

impl Frame {
    /// Build a frame, rejecting anything the device could not encode.
    pub fn new(id: CanId, payload: &[u8], bus: u8) -> Result<Self, FrameError> {
        id.validate()?;
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLong {
                len: payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        if !is_valid_lane(bus) {
            return Err(FrameError::InvalidBus {
                bus,
                lanes: LANE_COUNT,
            });
        }
        Ok(Self {
            id,
            payload: payload.to_vec(),
            bus,
        })
    }

    /// Data length code. Classic CAN maps 0..=8 bytes one-to-one.
    pub fn dlc(&self) -> u8 {
        self.payload.len() as u8
    }

    /// Encode as a host-to-device transmit record.
    pub fn to_record(&self) -> [u8; RECORD_LEN] {
        encode_record(self, TX_REQUEST)
    }
}

/// A frame drained from the device's receive buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedFrame {
    pub frame: Frame,
    /// True when this is the echo of a frame the host transmitted.
    pub returned: bool,
}

impl ReceivedFrame {
    /// Encode as a device-to-host record.
    pub fn to_record(&self) -> [u8; RECORD_LEN] {
        encode_record(&self.frame, if self.returned { RETURNED } else { 0 })
    }
}

fn encode_record(frame: &Frame, flags: u32) -> [u8; RECORD_LEN] {
    let word0 = match frame.id {
        CanId::Standard(id) => ((id as u32) << 21) | flags,
        CanId::Extended(id) => (id << 3) | EXTENDED | flags,
    };
    let word1 = frame.dlc() as u32 | ((frame.bus as u32) << 4);

    let mut record = [0u8; RECORD_LEN];
    record[0..4].copy_from_slice(&word0.to_le_bytes());
    record[4..8].copy_from_slice(&word1.to_le_bytes());
    record[8..8 + frame.payload.len()].copy_from_slice(&frame.payload);
    record
}

/// Decode one 16-byte record.
pub fn decode_record(record: &[u8]) -> WireResult<ReceivedFrame> {
    if record.len() != RECORD_LEN {
        return Err(WireError::Length {
            what: "frame record",
            expected: RECORD_LEN,
            actual: record.len(),
        });
    }
    let word0 = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
    let word1 = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);

    let id = if word0 & EXTENDED != 0 {
        CanId::Extended(word0 >> 3)
    } else {
        CanId::Standard((word0 >> 21) as u16)
    };
    let len = (word1 & 0xF) as usize;
    if len > MAX_PAYLOAD {
        return Err(WireError::InvalidField {
            field: "dlc",
            value: len as u32,
        });
    }
    let bus = ((word1 >> 4) & 0xFF) as u8;
    let frame = Frame::new(id, &record[8..8 + len], bus).map_err(|_| WireError::InvalidField {
        field: "bus",
        value: bus as u32,
    })?;

    Ok(ReceivedFrame {
        frame,
        returned: word0 & RETURNED != 0,
    })
}

/// Decode a block of back-to-back records.
pub fn decode_records(block: &[u8]) -> WireResult<Vec<ReceivedFrame>> {
    if block.len() % RECORD_LEN != 0 {
        return Err(WireError::Length {
            what: "frame record block",
            expected: block.len() - block.len() % RECORD_LEN,
            actual: block.len(),
        });
    }
    block.chunks_exact(RECORD_LEN).map(decode_record).collect()
}

/// Whether a raw record asks the device to transmit.
pub fn is_tx_request(record: &[u8]) -> bool {
    record.first().is_some_and(|b| (*b as u32) & TX_REQUEST != 0)
}
