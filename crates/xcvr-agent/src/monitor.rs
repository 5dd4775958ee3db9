//! Periodic health monitor.
//!
//! Runs `health_check` at a fixed interval and logs the snapshot, so an
//! armed device stays observable after the script has finished.

use std::time::Duration;

use tokio::time;

use xcvr_device::{DeviceError, DeviceSession};

/// Poll health every `interval` until the session closes.
///
/// Transient failures are logged and the loop keeps going. Returns once
/// the session is closed, poisoned or disconnected.
pub async fn run(session: &DeviceSession, interval: Duration) {
    let mut ticker = time::interval(interval);
    // Skip the first tick (fires immediately).
    ticker.tick().await;

    loop {
        ticker.tick().await;

        match session.health_check().await {
            Ok(snapshot) => {
                tracing::info!(
                    session_id = %session.session_id(),
                    mode = %snapshot.safety_mode,
                    bus = %snapshot.bus_selector,
                    voltage_mv = snapshot.voltage_mv,
                    tx_frames = snapshot.tx_frames,
                    rx_frames = snapshot.rx_frames,
                    tx_pending = snapshot.total_pending(),
                    "health"
                );
            }
            Err(DeviceError::SessionClosed) => {
                tracing::warn!("session closed, health monitor stopping");
                return;
            }
            Err(e @ DeviceError::ProtocolViolation(_)) => {
                tracing::error!(error = %e, "health monitor stopping");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "health check failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xcvr_device::{Fault, MockConnector, MockTransport, SessionConfig};
    use xcvr_protocol::Opcode;

    async fn session(mock: &MockTransport) -> DeviceSession {
        DeviceSession::open(&MockConnector::new(mock.clone()), SessionConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_session_closes() {
        let mock = MockTransport::new();
        let session = session(&mock).await;

        tokio::select! {
            () = run(&session, Duration::from_secs(1)) => panic!("monitor exited early"),
            () = time::sleep(Duration::from_millis(3_500)) => {}
        }
        // One health at open plus three polls.
        assert_eq!(mock.requests_for(Opcode::QueryHealth).len(), 4);

        session.close().await.unwrap();
        run(&session, Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_protocol_violation() {
        let mock = MockTransport::new();
        let session = session(&mock).await;
        mock.inject(Fault::Garbage(vec![0x00, 0x01]));

        run(&session, Duration::from_secs(1)).await;
        assert!(!session.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_disconnect() {
        let mock = MockTransport::new();
        let session = session(&mock).await;
        mock.disconnect();

        tokio::select! {
            () = run(&session, Duration::from_secs(1)) => {}
            () = time::sleep(Duration::from_secs(60)) => panic!("monitor kept polling a dead link"),
        }
        assert!(!session.is_open());
        // Only the health read at open reached the device.
        assert_eq!(mock.requests_for(Opcode::QueryHealth).len(), 1);
    }
}
