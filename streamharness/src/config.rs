//! Per-run configuration.
//!
//! Poll intervals and budgets are explicit settings rather than constants,
//! because suitable values differ between pipelines and test scenarios.
//! Every config is built per run and passed to the component that uses it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::codec::{DEFAULT_MAX_RECORD_LEN, ENVELOPE_LEN};
use crate::core::SourceRoles;
use crate::errors::{HarnessError, Result};

/// When the stasis detector may declare quiescence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "target", rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Every stage idle for the threshold.
    #[default]
    IdleOnly,
    /// Every stage idle and at least this many outputs observed.
    IdleAndTarget(u64),
    /// Every stage idle, or this many outputs observed, whichever is first.
    IdleOrTarget(u64),
}

impl CompletionPolicy {
    /// The expected output count, if the policy has one.
    #[must_use]
    pub fn target(&self) -> Option<u64> {
        match self {
            Self::IdleOnly => None,
            Self::IdleAndTarget(n) | Self::IdleOrTarget(n) => Some(*n),
        }
    }

    /// Combines the idle verdict with the observed output count.
    #[must_use]
    pub fn is_complete(&self, all_idle: bool, output_total: u64) -> bool {
        match self {
            Self::IdleOnly => all_idle,
            Self::IdleAndTarget(n) => all_idle && output_total >= *n,
            Self::IdleOrTarget(n) => all_idle || output_total >= *n,
        }
    }
}

/// Settings for the stasis detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StasisConfig {
    /// Delay between polls in milliseconds.
    pub poll_interval_ms: u64,
    /// Consecutive idle polls required per stage.
    pub idle_threshold: u32,
    /// Maximum number of polls before giving up.
    pub max_polls: u32,
    /// Completion policy.
    pub completion: CompletionPolicy,
}

impl Default for StasisConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            idle_threshold: 10,
            max_polls: 600,
            completion: CompletionPolicy::IdleOnly,
        }
    }
}

impl StasisConfig {
    /// Creates a new stasis config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Sets the idle threshold.
    #[must_use]
    pub fn with_idle_threshold(mut self, polls: u32) -> Self {
        self.idle_threshold = polls;
        self
    }

    /// Sets the poll budget.
    #[must_use]
    pub fn with_max_polls(mut self, polls: u32) -> Self {
        self.max_polls = polls;
        self
    }

    /// Sets the completion policy.
    #[must_use]
    pub fn with_completion(mut self, completion: CompletionPolicy) -> Self {
        self.completion = completion;
        self
    }

    /// Poll interval as a duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Longest time the detector can spend polling.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.poll_interval() * self.max_polls
    }

    /// Checks the settings for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.idle_threshold == 0 {
            return Err(HarnessError::config("stasis idle_threshold must be at least 1"));
        }
        if self.max_polls < self.idle_threshold {
            return Err(HarnessError::config(format!(
                "stasis max_polls {} is below idle_threshold {}",
                self.max_polls, self.idle_threshold
            )));
        }
        Ok(())
    }
}

/// Settings for lifecycle waits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// Delay between checks in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of checks.
    pub max_polls: u32,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            max_polls: 100,
        }
    }
}

impl WaitConfig {
    /// Creates a new wait config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Sets the poll budget.
    #[must_use]
    pub fn with_max_polls(mut self, polls: u32) -> Self {
        self.max_polls = polls;
        self
    }

    /// Poll interval as a duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Settings for channel links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Bytes buffered in each channel before writers block.
    pub buffer_size: usize,
    /// Largest record a link will accept.
    pub max_record_len: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
        }
    }
}

impl LinkConfig {
    /// Creates a new link config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the channel buffer size.
    #[must_use]
    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    /// Sets the maximum record length.
    #[must_use]
    pub fn with_max_record_len(mut self, bytes: usize) -> Self {
        self.max_record_len = bytes;
        self
    }

    /// Checks the settings for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(HarnessError::config("link buffer_size must be non-zero"));
        }
        if self.max_record_len < ENVELOPE_LEN {
            return Err(HarnessError::config(format!(
                "link max_record_len {} is smaller than the {ENVELOPE_LEN}-byte envelope",
                self.max_record_len
            )));
        }
        Ok(())
    }
}

/// Everything one harness run needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Name used in logs and reports.
    pub run_name: String,
    /// Stasis detector settings.
    pub stasis: StasisConfig,
    /// Lifecycle wait settings.
    pub wait: WaitConfig,
    /// Link settings.
    pub link: LinkConfig,
    /// Source id to role table.
    pub roles: SourceRoles,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            run_name: "harness".to_string(),
            stasis: StasisConfig::default(),
            wait: WaitConfig::default(),
            link: LinkConfig::default(),
            roles: SourceRoles::default(),
        }
    }
}

impl HarnessConfig {
    /// Creates a config with defaults and the given run name.
    #[must_use]
    pub fn new(run_name: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
            ..Self::default()
        }
    }

    /// Sets the stasis settings.
    #[must_use]
    pub fn with_stasis(mut self, stasis: StasisConfig) -> Self {
        self.stasis = stasis;
        self
    }

    /// Sets the wait settings.
    #[must_use]
    pub fn with_wait(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    /// Sets the link settings.
    #[must_use]
    pub fn with_link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    /// Sets the role table.
    #[must_use]
    pub fn with_roles(mut self, roles: SourceRoles) -> Self {
        self.roles = roles;
        self
    }

    /// Parses and validates a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<()> {
        self.stasis.validate()?;
        self.link.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SourceId, StageRole};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.stasis.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.stasis.idle_threshold, 10);
        assert_eq!(config.wait.max_polls, 100);
        assert_eq!(config.link.buffer_size, 64 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let stasis = StasisConfig::new()
            .with_poll_interval_ms(20)
            .with_idle_threshold(5)
            .with_max_polls(50)
            .with_completion(CompletionPolicy::IdleAndTarget(100));

        assert_eq!(stasis.budget(), Duration::from_secs(1));
        assert_eq!(stasis.completion.target(), Some(100));
    }

    #[test]
    fn test_completion_policy() {
        assert!(CompletionPolicy::IdleOnly.is_complete(true, 0));
        assert!(!CompletionPolicy::IdleAndTarget(5).is_complete(true, 4));
        assert!(CompletionPolicy::IdleAndTarget(5).is_complete(true, 5));
        assert!(CompletionPolicy::IdleOrTarget(5).is_complete(false, 5));
        assert!(!CompletionPolicy::IdleOrTarget(5).is_complete(false, 4));
    }

    #[test]
    fn test_validation_errors() {
        let bad = StasisConfig::new().with_idle_threshold(0);
        assert!(bad.validate().is_err());

        let bad = StasisConfig::new().with_idle_threshold(10).with_max_polls(5);
        assert!(bad.validate().unwrap_err().to_string().contains("below idle_threshold"));

        assert!(LinkConfig::new().with_buffer_size(0).validate().is_err());
        assert!(LinkConfig::new().with_max_record_len(8).validate().is_err());
    }

    #[test]
    fn test_from_json_partial() {
        let json = r#"{
            "run_name": "hits",
            "stasis": { "poll_interval_ms": 10, "completion": { "mode": "idle_or_target", "target": 500 } },
            "roles": { "1": "source", "9": "sink" }
        }"#;

        let config = HarnessConfig::from_json_str(json).unwrap();
        assert_eq!(config.run_name, "hits");
        assert_eq!(config.stasis.poll_interval_ms, 10);
        assert_eq!(config.stasis.idle_threshold, 10);
        assert_eq!(config.stasis.completion, CompletionPolicy::IdleOrTarget(500));
        assert_eq!(config.roles.role_of(SourceId::new(9)), Some(StageRole::Sink));
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        let json = r#"{ "stasis": { "idle_threshold": 0 } }"#;
        assert!(matches!(
            HarnessConfig::from_json_str(json),
            Err(HarnessError::Config(_))
        ));
        assert!(matches!(
            HarnessConfig::from_json_str("not json"),
            Err(HarnessError::Serialization(_))
        ));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let config = HarnessConfig::new("from-file")
            .with_wait(WaitConfig::new().with_max_polls(3));
        write!(file, "{}", serde_json::to_string(&config).unwrap()).unwrap();

        let loaded = HarnessConfig::from_json_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }
}
