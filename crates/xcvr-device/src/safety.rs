//! Safety mode controller: the confirmed-state cache and the permission gate.
//!
//! The cached mode and bus selector only ever change to values the device
//! itself reported (health read-back) or acknowledged. Each update carries
//! the serial of the exchange it came from, and older serials never
//! overwrite newer ones, so a health query that raced a mode change cannot
//! resurrect the pre-change mode.
//!
//! A mutating call that fails without a definite answer, or is cancelled
//! while its exchange is in flight, leaves the state unknown: gated calls
//! fail with `StateUnknown` until a newer health snapshot is confirmed.

use std::sync::{PoisonError, RwLock};

use xcvr_protocol::{BusSelector, HealthSnapshot, Opcode, Permission, SafetyMode, Status};

use crate::channel::{CommandChannel, status_error};
use crate::error::{DeviceError, DeviceResult};
use crate::health;

#[derive(Debug, Clone, Copy)]
struct Confirmed {
    mode: SafetyMode,
    bus: BusSelector,
    serial: u64,
    unknown: bool,
}

/// Tracks the device's confirmed safety mode and gates bus-affecting calls.
#[derive(Debug)]
pub struct SafetyController {
    state: RwLock<Confirmed>,
}

impl SafetyController {
    /// Seed from the health snapshot read at session start.
    pub fn from_snapshot(snapshot: &HealthSnapshot, serial: u64) -> Self {
        Self {
            state: RwLock::new(Confirmed {
                mode: snapshot.safety_mode,
                bus: snapshot.bus_selector,
                serial,
                unknown: false,
            }),
        }
    }

    fn read(&self) -> Confirmed {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, serial: u64, f: impl FnOnce(&mut Confirmed)) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if serial <= state.serial {
            return false;
        }
        state.serial = serial;
        f(&mut state);
        true
    }

    /// Last confirmed safety mode.
    pub fn current_mode(&self) -> SafetyMode {
        self.read().mode
    }

    /// Last confirmed bus selector.
    pub fn current_bus(&self) -> BusSelector {
        self.read().bus
    }

    /// Whether a lost mutating exchange left the device state unknown.
    pub fn is_state_unknown(&self) -> bool {
        self.read().unknown
    }

    /// Fail fast unless the confirmed mode grants `permission`.
    pub fn require(&self, permission: Permission) -> DeviceResult<SafetyMode> {
        let state = self.read();
        if state.unknown {
            return Err(DeviceError::StateUnknown);
        }
        if !state.mode.permissions().allows(permission) {
            tracing::warn!(%permission, mode = %state.mode, "safety gate closed");
            return Err(DeviceError::SafetyGateClosed {
                permission,
                mode: state.mode,
            });
        }
        Ok(state.mode)
    }

    /// Adopt the mode and selector reported by a health snapshot.
    pub fn confirm(&self, snapshot: &HealthSnapshot, serial: u64) {
        let applied = self.update(serial, |state| {
            state.mode = snapshot.safety_mode;
            state.bus = snapshot.bus_selector;
            state.unknown = false;
        });
        if !applied {
            tracing::debug!(serial, "ignoring health snapshot older than confirmed state");
        }
    }

    /// Record a bus selector the device acknowledged.
    pub fn confirm_bus(&self, selector: BusSelector, serial: u64) {
        self.update(serial, |state| state.bus = selector);
    }

    /// Distrust the cached state until a health snapshot newer than
    /// `serial` arrives.
    fn mark_unknown(&self, serial: u64, reason: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.unknown {
            tracing::warn!(serial, reason, "device state now unknown");
        }
        state.serial = state.serial.max(serial);
        state.unknown = true;
    }

    /// Arm a guard for one mutating exchange on `channel`.
    ///
    /// If the guard is dropped before it is settled (the calling future
    /// was cancelled mid-exchange), the command may or may not have been
    /// applied and the state is marked unknown.
    pub fn begin<'a>(&'a self, channel: &'a CommandChannel) -> PendingChange<'a> {
        PendingChange {
            safety: self,
            channel,
            armed: true,
        }
    }

    /// Request `target`, then read health back to confirm it.
    pub async fn set_mode(
        &self,
        channel: &CommandChannel,
        target: SafetyMode,
        allow_all_output: bool,
    ) -> DeviceResult<()> {
        if let SafetyMode::Other(code) = target {
            return Err(DeviceError::InvalidParameter(format!(
                "unknown safety mode code 0x{code:04X}"
            )));
        }
        if target.is_debug() && !allow_all_output {
            return Err(DeviceError::ModeNotPermitted { requested: target });
        }

        let prior = self.current_mode();
        // Held across the set and the read-back.
        let pending = self.begin(channel);
        let reply = match channel
            .send(Opcode::SetSafetyMode, target.code().to_le_bytes().to_vec())
            .await
        {
            Ok(reply) => reply,
            Err(e) => return Err(pending.fail(e)),
        };
        match reply.response.status {
            Status::Ok => {}
            Status::Rejected => {
                pending.complete();
                tracing::warn!(requested = %target, current = %prior, "mode change rejected");
                return Err(DeviceError::ModeRejected {
                    requested: target,
                    reported: prior,
                });
            }
            status => {
                pending.complete();
                return Err(status_error(Opcode::SetSafetyMode, status));
            }
        }

        let (snapshot, serial) = pending.settle(health::query(channel).await)?;

        if snapshot.safety_mode != target {
            if snapshot.safety_mode != prior {
                // Neither what we asked for nor what we had: distrust both.
                self.mark_unknown(serial, "unexpected mode after change");
            }
            tracing::warn!(
                requested = %target,
                reported = %snapshot.safety_mode,
                "device did not confirm mode change"
            );
            return Err(DeviceError::ModeRejected {
                requested: target,
                reported: snapshot.safety_mode,
            });
        }

        self.confirm(&snapshot, serial);
        tracing::info!(from = %prior, to = %target, "safety mode confirmed");
        Ok(())
    }
}

/// An in-flight mutating exchange. See [`SafetyController::begin`].
#[must_use = "dropping an unsettled change marks the device state unknown"]
pub struct PendingChange<'a> {
    safety: &'a SafetyController,
    channel: &'a CommandChannel,
    armed: bool,
}

impl PendingChange<'_> {
    /// The exchange finished with a definite answer.
    pub fn complete(mut self) {
        self.armed = false;
    }

    /// The exchange failed. An unreachable device may or may not have
    /// applied the command, so gated calls stay blocked until a health
    /// snapshot newer than the failed exchange is confirmed.
    pub fn fail(mut self, err: DeviceError) -> DeviceError {
        self.armed = false;
        if err.is_unreachable() {
            self.safety
                .mark_unknown(self.channel.last_serial(), "mutating exchange lost");
        }
        err
    }

    /// Settle with the result of the exchange.
    pub fn settle<T>(self, result: DeviceResult<T>) -> DeviceResult<T> {
        match result {
            Ok(value) => {
                self.complete();
                Ok(value)
            }
            Err(e) => Err(self.fail(e)),
        }
    }
}

impl Drop for PendingChange<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.safety
                .mark_unknown(self.channel.last_serial(), "mutating call abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::mock::{Fault, MockTransport, Veto};

    async fn setup(mock: &MockTransport) -> (CommandChannel, SafetyController) {
        let channel = CommandChannel::new(
            Box::new(mock.clone()),
            ChannelConfig {
                timeout_ms: 20,
                max_retries: 1,
            },
        );
        let (snapshot, serial) = health::query(&channel).await.unwrap();
        (channel, SafetyController::from_snapshot(&snapshot, serial))
    }

    #[tokio::test]
    async fn initial_mode_comes_from_device() {
        let mock = MockTransport::with_mode(SafetyMode::Honda);
        let (_, safety) = setup(&mock).await;
        assert_eq!(safety.current_mode(), SafetyMode::Honda);
    }

    #[tokio::test]
    async fn confirmed_transition() {
        let mock = MockTransport::new();
        let (channel, safety) = setup(&mock).await;

        safety.set_mode(&channel, SafetyMode::Gm, false).await.unwrap();
        assert_eq!(safety.current_mode(), SafetyMode::Gm);
        assert_eq!(mock.mode(), SafetyMode::Gm);
        // One set + one read-back.
        assert_eq!(mock.requests_for(Opcode::SetSafetyMode).len(), 1);
        assert_eq!(mock.requests_for(Opcode::QueryHealth).len(), 2);
    }

    #[tokio::test]
    async fn status_rejection_keeps_prior_mode() {
        let mock = MockTransport::new();
        mock.veto_mode(SafetyMode::Ford, Veto::Status);
        let (channel, safety) = setup(&mock).await;

        let err = safety.set_mode(&channel, SafetyMode::Ford, false).await.unwrap_err();
        assert!(matches!(
            err,
            DeviceError::ModeRejected {
                requested: SafetyMode::Ford,
                reported: SafetyMode::NoOutput
            }
        ));
        assert_eq!(safety.current_mode(), SafetyMode::NoOutput);
    }

    #[tokio::test]
    async fn silent_veto_caught_by_read_back() {
        let mock = MockTransport::new();
        mock.veto_mode(SafetyMode::Cadillac, Veto::Silent);
        let (channel, safety) = setup(&mock).await;

        let err = safety
            .set_mode(&channel, SafetyMode::Cadillac, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::ModeRejected { .. }));
        assert_eq!(safety.current_mode(), SafetyMode::NoOutput);
        assert!(!safety.is_state_unknown());
    }

    #[tokio::test]
    async fn all_output_needs_policy() {
        let mock = MockTransport::new();
        let (channel, safety) = setup(&mock).await;

        let err = safety
            .set_mode(&channel, SafetyMode::AllOutput, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::ModeNotPermitted { .. }));
        assert!(mock.requests_for(Opcode::SetSafetyMode).is_empty());

        safety
            .set_mode(&channel, SafetyMode::AllOutput, true)
            .await
            .unwrap();
        assert_eq!(safety.current_mode(), SafetyMode::AllOutput);
    }

    #[tokio::test]
    async fn lost_exchange_marks_state_unknown() {
        let mock = MockTransport::new();
        let (channel, safety) = setup(&mock).await;
        mock.inject(Fault::DropResponse);
        mock.inject(Fault::DropResponse);

        let err = safety.set_mode(&channel, SafetyMode::Gm, false).await.unwrap_err();
        assert!(err.is_unreachable());
        assert_eq!(safety.current_mode(), SafetyMode::NoOutput);
        assert!(matches!(
            safety.require(Permission::ClearQueue),
            Err(DeviceError::StateUnknown)
        ));

        // A fresh health read restores gating against the real mode.
        let (snapshot, serial) = health::query(&channel).await.unwrap();
        safety.confirm(&snapshot, serial);
        assert_eq!(safety.current_mode(), SafetyMode::Gm);
        assert!(safety.require(Permission::Transmit).is_ok());
    }

    #[tokio::test]
    async fn snapshot_older_than_lost_exchange_keeps_state_unknown() {
        let mock = MockTransport::new();
        let (channel, safety) = setup(&mock).await;

        // Read before the mode change goes out, confirmed only afterwards.
        let (early, early_serial) = health::query(&channel).await.unwrap();
        mock.inject(Fault::DropResponse);
        mock.inject(Fault::DropResponse);
        safety.set_mode(&channel, SafetyMode::Gm, false).await.unwrap_err();
        assert!(safety.is_state_unknown());

        safety.confirm(&early, early_serial);
        assert!(safety.is_state_unknown());
        assert!(matches!(
            safety.require(Permission::ClearQueue),
            Err(DeviceError::StateUnknown)
        ));

        let (fresh, serial) = health::query(&channel).await.unwrap();
        safety.confirm(&fresh, serial);
        assert!(!safety.is_state_unknown());
        assert_eq!(safety.current_mode(), SafetyMode::Gm);
    }

    #[tokio::test]
    async fn dropped_guard_marks_state_unknown() {
        let mock = MockTransport::new();
        let (channel, safety) = setup(&mock).await;

        safety.begin(&channel).complete();
        assert!(!safety.is_state_unknown());

        drop(safety.begin(&channel));
        assert!(safety.is_state_unknown());
    }

    #[test]
    fn stale_snapshot_never_overwrites() {
        let mut snap = HealthSnapshot::decode(&[0u8; 34], chrono::Utc::now()).unwrap();
        let safety = SafetyController::from_snapshot(&snap, 5);

        snap.safety_mode = SafetyMode::Gm;
        safety.confirm(&snap, 7);
        assert_eq!(safety.current_mode(), SafetyMode::Gm);

        snap.safety_mode = SafetyMode::NoOutput;
        safety.confirm(&snap, 6);
        assert_eq!(safety.current_mode(), SafetyMode::Gm);
    }

    #[test]
    fn gate_reports_mode() {
        let snap = HealthSnapshot::decode(&[0u8; 34], chrono::Utc::now()).unwrap();
        let safety = SafetyController::from_snapshot(&snap, 1);
        assert!(matches!(
            safety.require(Permission::Transmit),
            Err(DeviceError::SafetyGateClosed {
                permission: Permission::Transmit,
                mode: SafetyMode::NoOutput
            })
        ));
        assert!(safety.require(Permission::ClearQueue).is_ok());
    }
}
