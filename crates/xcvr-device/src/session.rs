//! Device session: the caller-facing handle to one connected transceiver.
//!
//! Mutating calls (mode, bus, bitrate, queue, frames) hold the session
//! writer lock for their full duration, including any confirmation query,
//! so they never interleave. Health and receive calls only take the channel
//! lock and may run alongside them.

use tokio::sync::Mutex;
use uuid::Uuid;

use xcvr_protocol::{
    BusSelector, CanId, DeviceInfo, Frame, HealthSnapshot, ReceivedFrame, SafetyMode,
};

use crate::bus;
use crate::channel::CommandChannel;
use crate::config::SessionConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::health;
use crate::injector;
use crate::queue;
use crate::safety::SafetyController;
use crate::transport::Connector;

/// One open connection to a transceiver.
pub struct DeviceSession {
    id: Uuid,
    channel: CommandChannel,
    safety: SafetyController,
    writer: Mutex<()>,
    info: DeviceInfo,
    config: SessionConfig,
}

impl DeviceSession {
    /// Open a transport, read the firmware identity and the current mode.
    pub async fn open(connector: &dyn Connector, config: SessionConfig) -> DeviceResult<Self> {
        let transport = connector.open().await?;
        let channel = CommandChannel::new(transport, config.channel.clone());

        let (info, snapshot, serial) = match Self::handshake(&channel).await {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(close_err) = channel.close().await {
                    tracing::debug!(error = %close_err, "close after failed handshake");
                }
                return Err(e);
            }
        };

        let id = Uuid::now_v7();
        tracing::info!(
            session_id = %id,
            firmware = %info.firmware_version,
            hardware = ?info.hardware,
            serial = %info.serial,
            mode = %snapshot.safety_mode,
            bus = %snapshot.bus_selector,
            "session opened"
        );

        Ok(Self {
            id,
            channel,
            safety: SafetyController::from_snapshot(&snapshot, serial),
            writer: Mutex::new(()),
            info,
            config,
        })
    }

    async fn handshake(
        channel: &CommandChannel,
    ) -> DeviceResult<(DeviceInfo, HealthSnapshot, u64)> {
        let info = health::query_version(channel).await?;
        let (snapshot, serial) = health::query(channel).await?;
        Ok((info, snapshot, serial))
    }

    pub fn session_id(&self) -> Uuid {
        self.id
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// False once the session was closed, poisoned or disconnected.
    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    fn ensure_open(&self) -> DeviceResult<()> {
        if self.channel.is_open() {
            Ok(())
        } else {
            Err(DeviceError::SessionClosed)
        }
    }

    /// Close the transport. Waits for any in-flight mutating call.
    pub async fn close(&self) -> DeviceResult<()> {
        let _guard = self.writer.lock().await;
        self.channel.close().await?;
        tracing::info!(session_id = %self.id, "session closed");
        Ok(())
    }

    // ── Safety mode ────────────────────────────────────────────

    /// Last mode the device confirmed.
    pub fn current_mode(&self) -> SafetyMode {
        self.safety.current_mode()
    }

    /// Whether gated calls are blocked until the next `health_check`.
    pub fn is_state_unknown(&self) -> bool {
        self.safety.is_state_unknown()
    }

    /// Request a safety mode and wait for the device to confirm it.
    pub async fn set_mode(&self, mode: SafetyMode) -> DeviceResult<()> {
        let _guard = self.writer.lock().await;
        self.ensure_open()?;
        tracing::info!(session_id = %self.id, %mode, "requesting safety mode");
        self.safety
            .set_mode(&self.channel, mode, self.config.allow_all_output)
            .await
    }

    // ── Bus routing ────────────────────────────────────────────

    /// Last bus selector the device confirmed.
    pub fn current_bus(&self) -> BusSelector {
        self.safety.current_bus()
    }

    pub async fn select_bus(&self, selector: BusSelector) -> DeviceResult<()> {
        let _guard = self.writer.lock().await;
        self.ensure_open()?;
        bus::select_bus(&self.channel, &self.safety, selector).await
    }

    pub async fn set_bitrate(&self, bus: u8, kbps: u16) -> DeviceResult<()> {
        let _guard = self.writer.lock().await;
        self.ensure_open()?;
        bus::set_bitrate(&self.channel, &self.safety, bus, kbps).await
    }

    // ── Transmit path ──────────────────────────────────────────

    pub async fn clear_queue(&self, bus: u8) -> DeviceResult<()> {
        let _guard = self.writer.lock().await;
        self.ensure_open()?;
        queue::clear_queue(&self.channel, &self.safety, bus).await
    }

    /// Submit one frame. Success means the device accepted it into the
    /// transmit path, not that it reached the wire.
    pub async fn send_frame(&self, id: CanId, payload: &[u8], bus: u8) -> DeviceResult<Frame> {
        let _guard = self.writer.lock().await;
        self.ensure_open()?;
        injector::send_frame(&self.channel, &self.safety, id, payload, bus).await
    }

    pub async fn recv_frames(&self) -> DeviceResult<Vec<ReceivedFrame>> {
        self.ensure_open()?;
        injector::recv_frames(&self.channel).await
    }

    // ── Health ─────────────────────────────────────────────────

    /// Read one health snapshot without touching cached state.
    pub async fn query(&self) -> DeviceResult<HealthSnapshot> {
        self.ensure_open()?;
        health::query(&self.channel).await.map(|(snapshot, _)| snapshot)
    }

    /// Read health and adopt the reported mode and bus selector. Clears
    /// the unknown-state flag.
    pub async fn health_check(&self) -> DeviceResult<HealthSnapshot> {
        self.ensure_open()?;
        let (snapshot, serial) = health::query(&self.channel).await?;
        self.safety.confirm(&snapshot, serial);
        Ok(snapshot)
    }
}
