//! Agent configuration, loadable from TOML.

use serde::Deserialize;

use xcvr_device::SessionConfig;
use xcvr_protocol::{BusFamily, SafetyMode};

/// Top-level configuration for the agent binary.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// `host:port` of the transceiver's command endpoint.
    pub device_addr: String,
    /// TCP connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub session: SessionConfig,
    /// Health poll interval after the script finishes. 0 disables it.
    #[serde(default)]
    pub health_interval_secs: u64,
    /// Commands run in order once the session is open.
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

/// One scripted command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    SetMode {
        mode: SafetyMode,
    },
    SelectBus {
        family: BusFamily,
        #[serde(default)]
        variant: u8,
    },
    ClearQueue {
        bus: u8,
    },
    SendFrame {
        id: u32,
        #[serde(default)]
        extended: bool,
        /// Payload as a hex string, e.g. `"873c01ff"`.
        #[serde(default)]
        data: String,
        bus: u8,
    },
    SetBitrate {
        bus: u8,
        kbps: u16,
    },
    Health,
}

impl Step {
    /// Short name used in logs and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Step::SetMode { .. } => "set_mode",
            Step::SelectBus { .. } => "select_bus",
            Step::ClearQueue { .. } => "clear_queue",
            Step::SendFrame { .. } => "send_frame",
            Step::SetBitrate { .. } => "set_bitrate",
            Step::Health => "health",
        }
    }
}

impl AgentConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal_config() {
        let config: AgentConfig = toml::from_str(r#"device_addr = "192.168.0.10:1337""#).unwrap();
        assert_eq!(config.device_addr, "192.168.0.10:1337");
        assert_eq!(config.connect_timeout_ms, 2_000);
        assert_eq!(config.health_interval_secs, 0);
        assert_eq!(config.session.channel.timeout_ms, 250);
        assert!(!config.session.allow_all_output);
        assert!(config.steps.is_empty());
    }

    #[test]
    fn deserialize_chime_script() {
        let toml = r#"
device_addr = "127.0.0.1:1337"
health_interval_secs = 5

[session]
allow_all_output = false

[session.channel]
timeout_ms = 100

[[steps]]
op = "set_mode"
mode = "gm"

[[steps]]
op = "select_bus"
family = "gmlan"
variant = 2

[[steps]]
op = "clear_queue"
bus = 0

[[steps]]
op = "send_frame"
id = 0x10400060
extended = true
data = "873c01ff"
bus = 2

[[steps]]
op = "health"
"#;
        let config: AgentConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.health_interval_secs, 5);
        assert_eq!(config.session.channel.timeout_ms, 100);
        assert_eq!(config.session.channel.max_retries, 3);
        assert_eq!(
            config.steps,
            vec![
                Step::SetMode {
                    mode: SafetyMode::Gm
                },
                Step::SelectBus {
                    family: BusFamily::Gmlan,
                    variant: 2
                },
                Step::ClearQueue { bus: 0 },
                Step::SendFrame {
                    id: 0x1040_0060,
                    extended: true,
                    data: "873c01ff".into(),
                    bus: 2
                },
                Step::Health,
            ]
        );
    }

    #[test]
    fn unknown_step_is_rejected() {
        let toml = r#"
device_addr = "127.0.0.1:1337"

[[steps]]
op = "reflash"
"#;
        assert!(toml::from_str::<AgentConfig>(toml).is_err());
    }

    #[test]
    fn step_names() {
        assert_eq!(Step::Health.name(), "health");
        assert_eq!(Step::ClearQueue { bus: 1 }.name(), "clear_queue");
    }
}
