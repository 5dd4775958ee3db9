//! Frame injector: submits single frames to a lane's transmit queue.

use xcvr_protocol::{CanId, Frame, Opcode, Permission, ReceivedFrame, Status, decode_records};

use crate::channel::{CommandChannel, status_error};
use crate::error::{DeviceError, DeviceResult};
use crate::safety::SafetyController;

/// Validate and submit one frame.
///
/// The gate is checked before the frame is built, so a disarmed session
/// reports `SafetyGateClosed` even for a malformed frame. Nothing is
/// written to the transport unless both checks pass. Returns the frame as
/// queued.
pub async fn send_frame(
    channel: &CommandChannel,
    safety: &SafetyController,
    id: CanId,
    payload: &[u8],
    bus: u8,
) -> DeviceResult<Frame> {
    safety.require(Permission::Transmit)?;
    let frame = Frame::new(id, payload, bus)?;

    let pending = safety.begin(channel);
    let reply = pending.settle(
        channel
            .send(Opcode::SendFrame, frame.to_record().to_vec())
            .await,
    )?;
    match reply.response.status {
        Status::Ok => {
            tracing::debug!(id = %frame.id, bus, len = frame.payload.len(), "frame queued");
            Ok(frame)
        }
        Status::Refused => {
            tracing::warn!(id = %frame.id, bus, "device refused frame");
            Err(DeviceError::CommandRefused {
                opcode: Opcode::SendFrame,
                status: Status::Refused,
            })
        }
        status => Err(status_error(Opcode::SendFrame, status)),
    }
}

/// Drain one batch of frames from the device's receive buffer.
pub async fn recv_frames(channel: &CommandChannel) -> DeviceResult<Vec<ReceivedFrame>> {
    let reply = channel.send(Opcode::ReceiveFrames, Vec::new()).await?;
    if !reply.response.is_ok() {
        return Err(status_error(Opcode::ReceiveFrames, reply.response.status));
    }
    decode_records(&reply.response.result).map_err(|e| channel.violation(e))
}
