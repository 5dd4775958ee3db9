//! Bus selector: routes a bus family onto a lane.

use xcvr_protocol::{
    BusSelector, LANE_COUNT, Opcode, Permission, Status, is_supported_bitrate, is_valid_lane,
};

use crate::channel::{CommandChannel, status_error};
use crate::error::{DeviceError, DeviceResult};
use crate::safety::SafetyController;

/// Select `selector` on the device. Selecting the active selector is a no-op.
pub async fn select_bus(
    channel: &CommandChannel,
    safety: &SafetyController,
    selector: BusSelector,
) -> DeviceResult<()> {
    safety.require(Permission::ChangeBus)?;
    if !selector.is_supported() {
        return Err(DeviceError::UnsupportedBusVariant {
            family: selector.family,
            variant: selector.variant,
        });
    }
    if safety.current_bus() == selector {
        tracing::debug!(bus = %selector, "bus selector already active");
        return Ok(());
    }

    let pending = safety.begin(channel);
    let sent = channel
        .send(Opcode::SetBusSelector, selector.to_params())
        .await;
    let reply = pending.settle(sent)?;
    match reply.response.status {
        Status::Ok => {
            safety.confirm_bus(selector, reply.serial);
            tracing::info!(bus = %selector, lane = ?selector.lane(), "bus selector applied");
            Ok(())
        }
        Status::UnsupportedVariant => Err(DeviceError::UnsupportedBusVariant {
            family: selector.family,
            variant: selector.variant,
        }),
        status => Err(status_error(Opcode::SetBusSelector, status)),
    }
}

/// Set the CAN bitrate of one lane.
pub async fn set_bitrate(
    channel: &CommandChannel,
    safety: &SafetyController,
    bus: u8,
    kbps: u16,
) -> DeviceResult<()> {
    safety.require(Permission::ChangeBus)?;
    if !is_valid_lane(bus) {
        return Err(DeviceError::InvalidParameter(format!(
            "bus {bus} out of range (lanes 0..{LANE_COUNT})"
        )));
    }
    if !is_supported_bitrate(kbps) {
        return Err(DeviceError::InvalidParameter(format!(
            "unsupported bitrate {kbps} kbps"
        )));
    }

    let mut params = vec![bus];
    params.extend_from_slice(&(kbps * 10).to_le_bytes());
    let pending = safety.begin(channel);
    let reply = pending.settle(channel.send(Opcode::SetBitrate, params).await)?;
    if !reply.response.is_ok() {
        return Err(status_error(Opcode::SetBitrate, reply.response.status));
    }
    tracing::info!(bus, kbps, "bitrate set");
    Ok(())
}
