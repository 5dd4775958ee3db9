//! Transmit queue manager.
//!
//! A clear drops frames still waiting in the transceiver for one lane.
//! Frames that already left are unaffected, and frames submitted after the
//! acknowledgement queue normally. Lanes are independent of each other and
//! of the bus selector.

use xcvr_protocol::{LANE_COUNT, Opcode, Permission, is_valid_lane};

use crate::channel::{CommandChannel, status_error};
use crate::error::{DeviceError, DeviceResult};
use crate::safety::SafetyController;

/// Drop all pending transmit frames on `bus`.
pub async fn clear_queue(
    channel: &CommandChannel,
    safety: &SafetyController,
    bus: u8,
) -> DeviceResult<()> {
    safety.require(Permission::ClearQueue)?;
    if !is_valid_lane(bus) {
        return Err(DeviceError::InvalidParameter(format!(
            "bus {bus} out of range (lanes 0..{LANE_COUNT})"
        )));
    }

    let pending = safety.begin(channel);
    let reply = pending.settle(channel.send(Opcode::ClearQueue, vec![bus]).await)?;
    if !reply.response.is_ok() {
        return Err(status_error(Opcode::ClearQueue, reply.response.status));
    }
    tracing::debug!(bus, "transmit queue cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::health;
    use crate::mock::MockTransport;
    use xcvr_protocol::{CanId, Frame, SafetyMode};

    async fn setup(mock: &MockTransport) -> (CommandChannel, SafetyController) {
        let channel = CommandChannel::new(Box::new(mock.clone()), ChannelConfig::default());
        let (snapshot, serial) = health::query(&channel).await.unwrap();
        (channel, SafetyController::from_snapshot(&snapshot, serial))
    }

    fn frame(id: u16, bus: u8) -> Frame {
        Frame::new(CanId::Standard(id), &[0xAA], bus).unwrap()
    }

    #[tokio::test]
    async fn clears_only_the_named_lane() {
        let mock = MockTransport::with_mode(SafetyMode::Gm);
        mock.with_device(|d| {
            d.queues[0].push_back(frame(0x100, 0));
            d.queues[1].push_back(frame(0x101, 1));
        });
        let (channel, safety) = setup(&mock).await;

        clear_queue(&channel, &safety, 0).await.unwrap();
        assert!(mock.queued(0).is_empty());
        assert_eq!(mock.queued(1), vec![frame(0x101, 1)]);
    }

    #[tokio::test]
    async fn clear_is_not_retroactive() {
        let mock = MockTransport::with_mode(SafetyMode::Gm);
        mock.with_device(|d| d.queues[2].push_back(frame(0x200, 2)));
        let (channel, safety) = setup(&mock).await;

        // The frame leaves before the clear arrives.
        mock.with_device(|d| d.transmit_pending(2));
        clear_queue(&channel, &safety, 2).await.unwrap();
        assert_eq!(mock.with_device(|d| d.tx_frames), 1);
    }

    #[tokio::test]
    async fn allowed_while_disarmed() {
        let mock = MockTransport::new();
        let (channel, safety) = setup(&mock).await;
        clear_queue(&channel, &safety, 1).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_bad_lane_locally() {
        let mock = MockTransport::new();
        let (channel, safety) = setup(&mock).await;
        let err = clear_queue(&channel, &safety, LANE_COUNT).await.unwrap_err();
        assert!(matches!(err, DeviceError::InvalidParameter(_)));
        assert!(mock.requests_for(Opcode::ClearQueue).is_empty());
    }

    #[tokio::test]
    async fn gated_in_unknown_mode() {
        let mock = MockTransport::with_mode(SafetyMode::Other(0x77));
        let (channel, safety) = setup(&mock).await;
        let err = clear_queue(&channel, &safety, 0).await.unwrap_err();
        assert!(matches!(err, DeviceError::SafetyGateClosed { .. }));
    }
}
