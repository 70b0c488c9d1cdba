//! Sandbox configuration.
//!
//! Plain data, deserializable from the `[sandbox]` table of an
//! `otter-sandbox.toml`:
//!
//! ```toml
//! [sandbox]
//! timeout_ms = 2000
//! max_timeouts = 50
//! memory_limit = 67108864
//! ```

use crate::error::SandboxResult;
use otter_bridge::JsonFuturePolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Limits and knobs for one sandbox evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock budget for the evaluation. `None` runs until the default
    /// export settles.
    pub timeout_ms: Option<u64>,

    /// Concurrently pending `setTimeout` timers.
    /// Default: 100
    pub max_timeouts: usize,

    /// Concurrently active `setInterval` timers.
    /// Default: 100
    pub max_intervals: usize,

    /// Concurrently pending `setImmediate` callbacks.
    /// Default: 100
    pub max_immediates: usize,

    /// Upper bound on how long the pump sleeps between ticks.
    /// Default: 5
    pub pump_interval_ms: u64,

    /// How long a timed-out teardown waits for aborted host calls.
    /// Default: 50
    pub teardown_grace_ms: u64,

    /// Guest heap limit in bytes.
    pub memory_limit: Option<usize>,

    /// Guest stack limit in bytes.
    pub max_stack_size: Option<usize>,

    /// Module name the evaluated source is registered under. Relative
    /// imports resolve against it.
    /// Default: "main.js"
    pub module_name: String,

    /// What a future inside a JSON-mode marshal becomes.
    pub json_futures: JsonFuturePolicy,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            max_timeouts: 100,
            max_intervals: 100,
            max_immediates: 100,
            pump_interval_ms: 5,
            teardown_grace_ms: 50,
            memory_limit: None,
            max_stack_size: None,
            module_name: "main.js".to_string(),
            json_futures: JsonFuturePolicy::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    sandbox: SandboxConfig,
}

impl SandboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the evaluation timeout.
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Set all three timer ceilings at once.
    pub fn timer_limit(mut self, limit: usize) -> Self {
        self.max_timeouts = limit;
        self.max_intervals = limit;
        self.max_immediates = limit;
        self
    }

    pub fn max_timeouts(mut self, limit: usize) -> Self {
        self.max_timeouts = limit;
        self
    }

    pub fn max_intervals(mut self, limit: usize) -> Self {
        self.max_intervals = limit;
        self
    }

    pub fn max_immediates(mut self, limit: usize) -> Self {
        self.max_immediates = limit;
        self
    }

    pub fn pump_interval_ms(mut self, ms: u64) -> Self {
        self.pump_interval_ms = ms;
        self
    }

    pub fn teardown_grace_ms(mut self, ms: u64) -> Self {
        self.teardown_grace_ms = ms;
        self
    }

    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = Some(bytes);
        self
    }

    pub fn module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = name.into();
        self
    }

    pub fn json_futures(mut self, policy: JsonFuturePolicy) -> Self {
        self.json_futures = policy;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Pump tick, never below one millisecond.
    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms.max(1))
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    /// Parse the `[sandbox]` table of a TOML document. A document without
    /// one yields the defaults.
    pub fn from_toml_str(content: &str) -> SandboxResult<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.sandbox)
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SandboxResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.timeout_ms, None);
        assert_eq!(config.max_timeouts, 100);
        assert_eq!(config.pump_interval(), Duration::from_millis(5));
        assert_eq!(config.teardown_grace(), Duration::from_millis(50));
        assert_eq!(config.module_name, "main.js");
        assert_eq!(config.json_futures, JsonFuturePolicy::Null);
    }

    #[test]
    fn test_builder() {
        let config = SandboxConfig::new()
            .timeout_ms(250)
            .timer_limit(3)
            .memory_limit(1 << 20)
            .module_name("job.js");
        assert_eq!(config.timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.max_intervals, 3);
        assert_eq!(config.memory_limit, Some(1 << 20));
        assert_eq!(config.module_name, "job.js");
    }

    #[test]
    fn test_parse_sandbox_table() {
        let toml = r#"
[sandbox]
timeout_ms = 1500
max_timeouts = 10
json_futures = "error"
"#;
        let config = SandboxConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.timeout_ms, Some(1500));
        assert_eq!(config.max_timeouts, 10);
        assert_eq!(config.max_intervals, 100);
        assert_eq!(config.json_futures, JsonFuturePolicy::Error);
    }

    #[test]
    fn test_missing_table_yields_defaults() {
        let config = SandboxConfig::from_toml_str("[other]\nkey = 1\n").unwrap();
        assert_eq!(config, SandboxConfig::default());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = SandboxConfig::from_toml_str("[sandbox]\ntimeout_ms = \"soon\"\n").unwrap_err();
        assert!(matches!(err, crate::SandboxError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sandbox]\npump_interval_ms = 0").unwrap();
        let config = SandboxConfig::load(file.path()).unwrap();
        assert_eq!(config.pump_interval(), Duration::from_millis(1));
    }
}
