//! Health monitor: read-only status queries.
//!
//! Safe in every safety mode and alongside gated calls, since nothing here
//! mutates the device. Snapshots are decoded fresh per call.

use chrono::Utc;

use xcvr_protocol::{DeviceInfo, HealthSnapshot, Opcode};

use crate::channel::{CommandChannel, status_error};
use crate::error::DeviceResult;

/// Query and decode one health snapshot.
///
/// Also returns the exchange serial, so callers can order it against
/// other confirmations.
pub async fn query(channel: &CommandChannel) -> DeviceResult<(HealthSnapshot, u64)> {
    let reply = channel.send(Opcode::QueryHealth, Vec::new()).await?;
    if !reply.response.is_ok() {
        return Err(status_error(Opcode::QueryHealth, reply.response.status));
    }
    let snapshot = HealthSnapshot::decode(&reply.response.result, Utc::now())
        .map_err(|e| channel.violation(e))?;

    if !snapshot.faults.is_empty() {
        tracing::warn!(faults = ?snapshot.faults.names(), "device reports faults");
    }
    tracing::debug!(
        mode = %snapshot.safety_mode,
        bus = %snapshot.bus_selector,
        voltage_mv = snapshot.voltage_mv,
        "health snapshot"
    );
    Ok((snapshot, reply.serial))
}

/// Query firmware identity.
pub async fn query_version(channel: &CommandChannel) -> DeviceResult<DeviceInfo> {
    let reply = channel.send(Opcode::QueryVersion, Vec::new()).await?;
    if !reply.response.is_ok() {
        return Err(status_error(Opcode::QueryVersion, reply.response.status));
    }
    DeviceInfo::decode(&reply.response.result).map_err(|e| channel.violation(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::error::DeviceError;
    use crate::mock::{Fault, MockTransport};
    use xcvr_protocol::{FaultFlags, HardwareType, SafetyMode, Status};

    fn channel(mock: &MockTransport) -> CommandChannel {
        CommandChannel::new(Box::new(mock.clone()), ChannelConfig::default())
    }

    #[tokio::test]
    async fn decodes_telemetry() {
        let mock = MockTransport::with_mode(SafetyMode::Toyota);
        mock.with_device(|d| {
            d.voltage_mv = 13_800;
            d.faults = FaultFlags(FaultFlags::CAN_BUS_OFF);
            d.ignition = true;
        });

        let (snap, serial) = query(&channel(&mock)).await.unwrap();
        assert_eq!(serial, 1);
        assert_eq!(snap.safety_mode, SafetyMode::Toyota);
        assert_eq!(snap.voltage_mv, 13_800);
        assert!(snap.faults.contains(FaultFlags::CAN_BUS_OFF));
        assert!(snap.ignition);
    }

    #[tokio::test]
    async fn never_mutates() {
        let mock = MockTransport::new();
        let ch = channel(&mock);
        for _ in 0..3 {
            query(&ch).await.unwrap();
        }
        assert!(mock.requests().iter().all(|r| !r.opcode.is_mutating()));
        assert_eq!(mock.mode(), SafetyMode::NoOutput);
    }

    #[tokio::test]
    async fn wrong_length_poisons_channel() {
        let mock = MockTransport::new();
        let ch = channel(&mock);

        // A device answering health with an empty block is broken.
        mock.inject(Fault::Status(Status::Ok));
        let err = query(&ch).await.unwrap_err();
        assert!(matches!(err, DeviceError::ProtocolViolation(_)));
        assert!(!ch.is_open());
    }

    #[tokio::test]
    async fn version_block() {
        let mock = MockTransport::new();
        let info = query_version(&channel(&mock)).await.unwrap();
        assert_eq!(info.firmware_version, "1.4.0");
        assert_eq!(info.hardware, HardwareType::Black);
        assert_eq!(info.serial, "SIM0001");
    }

    #[tokio::test]
    async fn refused_health_is_reported() {
        let mock = MockTransport::new();
        mock.inject(Fault::Status(Status::Refused));
        let err = query(&channel(&mock)).await.unwrap_err();
        assert!(matches!(
            err,
            DeviceError::CommandRefused {
                opcode: Opcode::QueryHealth,
                status: Status::Refused
            }
        ));
    }
}
