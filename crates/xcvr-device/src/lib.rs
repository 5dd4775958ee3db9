//! Host-side driver for the xcvr CAN transceiver.
//!
//! [`DeviceSession`] is the entry point: it owns the command channel and
//! gates every bus-affecting call on the device's confirmed safety mode.

pub mod bus;
pub mod channel;
pub mod config;
pub mod error;
pub mod health;
pub mod injector;
pub mod mock;
pub mod queue;
pub mod safety;
pub mod session;
pub mod transport;

pub use config::{ChannelConfig, SessionConfig};
pub use error::{DeviceError, DeviceResult};
pub use mock::{Fault, MockConnector, MockTransport, SimDevice, Veto};
pub use session::DeviceSession;
pub use transport::{Connector, StreamTransport, TcpConnector, Transport, TransportError};
