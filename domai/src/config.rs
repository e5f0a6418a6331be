//! Runtime configuration
//!
//! All numeric limits (grace periods, queue capacities, retry caps, window
//! sizes) are tunable defaults rather than fixed contracts. They can be
//! supplied as a JSON file and overridden individually from the command line.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use domai_common::Severity;
use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub runner: RunnerConfig,
    pub dispatch: DispatchConfig,
    pub context: ContextConfig,
    pub parser: ParserConfig,
    pub tools: ToolsConfig,
}

impl MonitorConfig {
    /// Load a JSON config file; missing sections fall back to defaults
    ///
    /// # Errors
    /// Returns an error if the file can't be read, isn't valid JSON, or
    /// fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a component unusable
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context.capacity == 0 {
            return Err(ConfigError::Invalid("context.capacity must be at least 1".into()));
        }
        if self.dispatch.crisis_capacity == 0 || self.dispatch.knowledge_capacity == 0 {
            return Err(ConfigError::Invalid("dispatch capacities must be at least 1".into()));
        }
        if self.runner.backoff_initial_ms == 0 {
            return Err(ConfigError::Invalid("runner.backoff_initial_ms must be positive".into()));
        }
        if self.runner.backoff_max_ms < self.runner.backoff_initial_ms {
            return Err(ConfigError::Invalid(
                "runner.backoff_max_ms must not be below runner.backoff_initial_ms".into(),
            ));
        }
        if self.context.correlation_window_secs > MAX_CORRELATION_WINDOW_SECS {
            return Err(ConfigError::Invalid(format!(
                "context.correlation_window_secs must not exceed {MAX_CORRELATION_WINDOW_SECS}"
            )));
        }
        if self.tools.lsof_interval_secs == 0 {
            return Err(ConfigError::Invalid("tools.lsof_interval_secs must be positive".into()));
        }
        Ok(())
    }
}

/// Tool runner supervision limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Time between SIGTERM and SIGKILL on stop
    pub grace_period_ms: u64,
    /// Restart attempts after unexpected exits before giving up
    pub max_restarts: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    /// A run lasting this long resets the restart counter
    pub stable_after_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 3_000,
            max_restarts: 5,
            backoff_initial_ms: 500,
            backoff_max_ms: 10_000,
            stable_after_secs: 30,
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    #[must_use]
    pub fn stable_after(&self) -> Duration {
        Duration::from_secs(self.stable_after_secs)
    }

    /// Delay before restart attempt `attempt` (1-based): doubles, capped
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let delay = self.backoff_initial_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

/// Dual-stream dispatcher limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Default per-subscriber queue size on the crisis stream
    pub crisis_capacity: usize,
    /// Default per-subscriber queue size on the knowledge stream
    pub knowledge_capacity: usize,
    /// Crisis overflow evicts entries below this severity first
    pub crisis_drop_below: Severity,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { crisis_capacity: 256, knowledge_capacity: 256, crisis_drop_below: Severity::High }
    }
}

/// Largest correlation window chrono can represent in milliseconds
pub const MAX_CORRELATION_WINDOW_SECS: u64 = i64::MAX.unsigned_abs() / 1000;

/// Per-session context window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub capacity: usize,
    /// Related-event lookups ignore events further apart than this
    pub correlation_window_secs: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { capacity: 100, correlation_window_secs: 300 }
    }
}

impl ContextConfig {
    #[must_use]
    pub fn correlation_window(&self) -> TimeDelta {
        i64::try_from(self.correlation_window_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }
}

/// Line parser inputs that influence severity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Administratively flagged addresses; any event touching one is critical
    pub watchlist: Vec<IpAddr>,
}

/// Fixed tool invocation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Capture interface passed to tcpdump `-i`
    pub interface: String,
    /// Optional capture filter, one token per argv entry
    pub capture_filter: Vec<String>,
    /// Repeat interval for lsof `-r`
    pub lsof_interval_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { interface: "any".to_string(), capture_filter: Vec::new(), lsof_interval_secs: 5 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let cfg = RunnerConfig::default();
        assert_eq!(cfg.backoff(1), Duration::from_millis(500));
        assert_eq!(cfg.backoff(2), Duration::from_millis(1_000));
        assert_eq!(cfg.backoff(3), Duration::from_millis(2_000));
        assert_eq!(cfg.backoff(10), Duration::from_millis(10_000));
        assert_eq!(cfg.backoff(u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"context": {{"capacity": 10}}, "parser": {{"watchlist": ["10.0.0.66"]}}}}"#)
            .unwrap();

        let config = MonitorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.context.capacity, 10);
        assert_eq!(config.context.correlation_window_secs, 300);
        assert_eq!(config.parser.watchlist.len(), 1);
        assert_eq!(config.runner, RunnerConfig::default());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = MonitorConfig::default();
        config.context.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_correlation_window() {
        let mut config = MonitorConfig::default();
        config.context.correlation_window_secs = u64::MAX;
        assert!(config.validate().is_err());
        assert_eq!(config.context.correlation_window(), TimeDelta::MAX);

        config.context.correlation_window_secs = MAX_CORRELATION_WINDOW_SECS;
        assert!(config.validate().is_ok());
        assert!(config.context.correlation_window() > TimeDelta::days(365));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = MonitorConfig::from_file(Path::new("/nonexistent/domai.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/domai.json"));
    }
}
