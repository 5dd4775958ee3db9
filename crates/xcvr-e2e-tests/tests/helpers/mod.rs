//! Shared test harness for E2E integration tests.
//!
//! Wires a `DeviceSession` to the simulated transceiver, either in-process
//! through `MockTransport` or over a loopback TCP socket.

#![allow(dead_code)]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use xcvr_agent::config::Step;
use xcvr_agent::runner::{ScriptReport, ScriptRunner};
use xcvr_device::{
    ChannelConfig, DeviceSession, MockConnector, MockTransport, SessionConfig, SimDevice,
};
use xcvr_protocol::{BusFamily, Request, SafetyMode};

/// Short timeouts so fault tests finish quickly.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        channel: ChannelConfig {
            timeout_ms: 20,
            max_retries: 2,
        },
        allow_all_output: false,
    }
}

/// A session bound to an in-process simulated device.
pub struct TestHarness {
    /// Handle on the simulated device, shared with the session's transport.
    pub mock: MockTransport,
    pub session: DeviceSession,
}

impl TestHarness {
    /// Device booted in `NoOutput` on plain CAN.
    pub async fn new() -> Self {
        Self::with_mock(MockTransport::new(), fast_config()).await
    }

    /// Device already reporting `mode` when the session opens.
    pub async fn with_mode(mode: SafetyMode) -> Self {
        Self::with_mock(MockTransport::with_mode(mode), fast_config()).await
    }

    pub async fn with_mock(mock: MockTransport, config: SessionConfig) -> Self {
        let session = DeviceSession::open(&MockConnector::new(mock.clone()), config)
            .await
            .expect("session should open against the simulated device");
        Self { mock, session }
    }

    /// Run a script through the agent's runner.
    pub async fn run(&self, steps: &[Step]) -> ScriptReport {
        ScriptRunner::new(&self.session).run(steps).await
    }
}

/// Arm GM, route GMLAN to lane 2, clear lane 0, send the chime frame.
pub fn chime_steps() -> Vec<Step> {
    vec![
        Step::SetMode {
            mode: SafetyMode::Gm,
        },
        Step::SelectBus {
            family: BusFamily::Gmlan,
            variant: 2,
        },
        Step::ClearQueue { bus: 0 },
        Step::SendFrame {
            id: 0x1040_0060,
            extended: true,
            data: "873c01ff".into(),
            bus: 2,
        },
        Step::Health,
    ]
}

/// Serve `device` on a loopback socket for one connection.
///
/// The task returns the device once the client disconnects, so tests can
/// inspect its final state.
pub async fn spawn_tcp_device(mut device: SimDevice) -> (String, JoinHandle<SimDevice>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut inbound = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            inbound.extend_from_slice(&buf[..n]);
            while let Ok(Some((request, used))) = Request::decode(&inbound) {
                inbound.drain(..used);
                let response = device.handle(&request);
                if stream.write_all(&response.encode().unwrap()).await.is_err() {
                    return device;
                }
            }
        }
        device
    });

    (addr, handle)
}

/// Connect timeout for loopback tests.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
