use serde::Deserialize;
use std::time::Duration;

/// Command channel timing, loadable from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Per-attempt response timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra attempts after a transport timeout (0 = no retry).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_ms() -> u64 {
    250
}

fn default_max_retries() -> u32 {
    3
}

impl ChannelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

/// Per-session policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Permit arming `AllOutput`, which disables firmware safety hooks.
    #[serde(default)]
    pub allow_all_output: bool,
}

impl SessionConfig {
    /// Load a session config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }
}
