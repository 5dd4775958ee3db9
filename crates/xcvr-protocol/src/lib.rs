//! Wire protocol for the xcvr CAN transceiver control plane.
//!
//! Pure encode/decode, no I/O:
//! - `wire`: request/response framing (sync, sequence, checksum)
//! - `opcode`: command opcodes and status codes
//! - `mode`: safety modes and their permission sets
//! - `bus`: lanes and bus-family selectors
//! - `frame`: tagged CAN ids, frames, 16-byte frame records
//! - `health`: fixed-layout health snapshot
//! - `device`: firmware identity

pub mod bus;
pub mod device;
pub mod error;
pub mod frame;
pub mod health;
pub mod mode;
pub mod opcode;
pub mod wire;

pub use bus::*;
pub use device::*;
pub use error::{WireError, WireResult};
pub use frame::*;
pub use health::*;
pub use mode::*;
pub use opcode::*;
pub use wire::*;
