//! Script runner: executes configured steps against a device session.
//!
//! Steps run strictly in order and the script stops at the first failure,
//! so a rejected mode change never falls through to a frame send.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

use xcvr_device::{DeviceError, DeviceSession};
use xcvr_protocol::{BusSelector, CanId};

use crate::config::Step;

/// Why a step could not complete.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("invalid step: {0}")]
    Invalid(String),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
}

/// Outcome of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub step: &'static str,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
}

/// Outcomes of a whole script run.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptReport {
    pub session_id: String,
    pub outcomes: Vec<StepOutcome>,
    pub finished_at: DateTime<Utc>,
}

impl ScriptReport {
    pub fn succeeded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == StepStatus::Completed)
    }

    pub fn failed_step(&self) -> Option<&StepOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.status == StepStatus::Failed)
    }
}

/// Runs steps against one session.
pub struct ScriptRunner<'a> {
    session: &'a DeviceSession,
}

impl<'a> ScriptRunner<'a> {
    pub fn new(session: &'a DeviceSession) -> Self {
        Self { session }
    }

    /// Run every step in order, skipping the rest after a failure.
    pub async fn run(&self, steps: &[Step]) -> ScriptReport {
        let mut outcomes = Vec::with_capacity(steps.len());
        let mut failed = false;

        for (index, step) in steps.iter().enumerate() {
            if failed {
                outcomes.push(StepOutcome {
                    index,
                    step: step.name(),
                    status: StepStatus::Skipped,
                    data: None,
                    error: None,
                    latency_ms: 0,
                });
                continue;
            }

            let start = Instant::now();
            let result = self.execute(step).await;
            let latency_ms = start.elapsed().as_millis() as u64;

            let outcome = match result {
                Ok(data) => {
                    tracing::info!(index, step = step.name(), latency_ms, "step completed");
                    StepOutcome {
                        index,
                        step: step.name(),
                        status: StepStatus::Completed,
                        data,
                        error: None,
                        latency_ms,
                    }
                }
                Err(err) => {
                    tracing::error!(index, step = step.name(), error = %err, "step failed");
                    failed = true;
                    StepOutcome {
                        index,
                        step: step.name(),
                        status: StepStatus::Failed,
                        data: None,
                        error: Some(err.to_string()),
                        latency_ms,
                    }
                }
            };
            outcomes.push(outcome);
        }

        ScriptReport {
            session_id: self.session.session_id().to_string(),
            outcomes,
            finished_at: Utc::now(),
        }
    }

    /// Execute one step. Returns optional data for the report.
    pub async fn execute(&self, step: &Step) -> Result<Option<serde_json::Value>, StepError> {
        match step {
            Step::SetMode { mode } => {
                self.session.set_mode(*mode).await?;
                Ok(None)
            }
            Step::SelectBus { family, variant } => {
                self.session
                    .select_bus(BusSelector::new(*family, *variant))
                    .await?;
                Ok(None)
            }
            Step::ClearQueue { bus } => {
                self.session.clear_queue(*bus).await?;
                Ok(None)
            }
            Step::SendFrame {
                id,
                extended,
                data,
                bus,
            } => {
                let payload = hex::decode(data)
                    .map_err(|e| StepError::Invalid(format!("payload '{data}': {e}")))?;
                let id = can_id(*id, *extended)?;
                let frame = self.session.send_frame(id, &payload, *bus).await?;
                Ok(Some(to_value(&frame)?))
            }
            Step::SetBitrate { bus, kbps } => {
                self.session.set_bitrate(*bus, *kbps).await?;
                Ok(None)
            }
            Step::Health => {
                let snapshot = self.session.health_check().await?;
                Ok(Some(to_value(&snapshot)?))
            }
        }
    }
}

fn can_id(raw: u32, extended: bool) -> Result<CanId, StepError> {
    if extended {
        return Ok(CanId::Extended(raw));
    }
    u16::try_from(raw)
        .map(CanId::Standard)
        .map_err(|_| StepError::Invalid(format!("standard id 0x{raw:X} does not fit 11 bits")))
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, StepError> {
    serde_json::to_value(value).map_err(|e| StepError::Invalid(e.to_string()))
}
