//! Immutable runtime configuration for a mission.
//!
//! Built once at startup (defaults, then environment, then front-end
//! overrides) and handed by value to every component constructor.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PilotError;

/// How much the scheduler may do without a human in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutonomyLevel {
    /// Dispatch everything without pausing.
    #[default]
    Full,
    /// Pause for approval before high-risk actions.
    Assisted,
    /// Every action needs approval.
    Manual,
}

impl FromStr for AutonomyLevel {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "assisted" => Ok(Self::Assisted),
            "manual" => Ok(Self::Manual),
            other => Err(PilotError::Fatal(format!("Unknown autonomy level: {}", other))),
        }
    }
}

/// Which memory record goes first when the store is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the oldest record.
    #[default]
    Oldest,
    /// Evict the record least similar to the one being inserted.
    Relevance,
}

impl FromStr for EvictionPolicy {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "oldest" | "fifo" => Ok(Self::Oldest),
            "relevance" | "lowest-relevance" => Ok(Self::Relevance),
            other => Err(PilotError::Fatal(format!("Unknown eviction policy: {}", other))),
        }
    }
}

/// Named overrides a front end may submit together with a goal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    pub autonomy_level: Option<AutonomyLevel>,
    pub confidence_threshold: Option<f32>,
    pub parallel_actions: Option<bool>,
    pub max_steps: Option<u32>,
}

/// Configuration shared by every component of the mission loop.
#[derive(Debug, Clone)]
pub struct PilotConfig {
    /// Safety checkpoint policy.
    pub autonomy_level: AutonomyLevel,
    /// Global confidence threshold for overrides and for skipping checkpoints.
    pub confidence_threshold: f32,
    /// Minimum confidence for an advisory result to reach the planner.
    pub suggestion_threshold: f32,
    /// Dispatch independent actions concurrently.
    pub parallel_actions: bool,
    /// Upper bound on concurrently dispatched actions.
    pub max_concurrency: usize,
    /// Steps before the mission fails.
    pub max_steps: u32,
    /// Steps kept in the in-memory history.
    pub history_depth: usize,
    /// Memory hits handed to the planner.
    pub memory_top_k: usize,
    /// Maximum stored memory records.
    pub memory_capacity: usize,
    pub eviction_policy: EvictionPolicy,
    /// Loop guard rolling window (steps).
    pub loop_window: usize,
    /// Same fingerprint/outcome more than this many times in the window signals a loop.
    pub loop_repeat_threshold: usize,
    /// Consecutive failed/partial steps that signal stagnation.
    pub loop_failure_streak: usize,
    /// Consecutive transport-failed steps before the mission fails.
    pub transport_failure_limit: u32,
    pub device_timeout: Duration,
    pub reasoning_timeout: Duration,
    pub checkpoint_timeout: Duration,
    /// Delay before the single retry of a transport call.
    pub retry_backoff: Duration,
    /// Root for mission state and memory records.
    pub state_dir: PathBuf,
    pub log_level: String,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            autonomy_level: AutonomyLevel::Full,
            confidence_threshold: 0.75,
            suggestion_threshold: 0.6,
            parallel_actions: true,
            max_concurrency: 4,
            max_steps: 20,
            history_depth: 10,
            memory_top_k: 3,
            memory_capacity: 1000,
            eviction_policy: EvictionPolicy::Oldest,
            loop_window: 6,
            loop_repeat_threshold: 2,
            loop_failure_streak: 3,
            transport_failure_limit: 3,
            device_timeout: Duration::from_secs(15),
            reasoning_timeout: Duration::from_secs(30),
            checkpoint_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(500),
            state_dir: default_state_dir(),
            log_level: "info".to_string(),
        }
    }
}

/// Platform data directory for persisted state, or `./.device-pilot`.
pub fn default_state_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "moderras", "device-pilot")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".device-pilot"))
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, PilotError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| PilotError::Fatal(format!("Invalid value for {}: {}", key, raw))),
        Err(_) => Ok(None),
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl PilotConfig {
    /// Read overrides from the process environment on top of the defaults.
    ///
    /// Malformed values are a fatal configuration error rather than silently
    /// falling back to defaults.
    pub fn from_env() -> Result<Self, PilotError> {
        let mut config = Self::default();

        if let Ok(level) = env::var("AUTONOMY_LEVEL") {
            config.autonomy_level = level.parse()?;
        }
        if let Some(v) = env_parse("CONFIDENCE_THRESHOLD")? {
            config.confidence_threshold = v;
        }
        if let Some(v) = env_parse("SUGGESTION_THRESHOLD")? {
            config.suggestion_threshold = v;
        }
        if let Some(v) = env_bool("PARALLEL_ACTIONS") {
            config.parallel_actions = v;
        }
        if let Some(v) = env_parse("MAX_CONCURRENCY")? {
            config.max_concurrency = v;
        }
        if let Some(v) = env_parse("MAX_STEPS")? {
            config.max_steps = v;
        }
        if let Some(v) = env_parse("HISTORY_DEPTH")? {
            config.history_depth = v;
        }
        if let Some(v) = env_parse("MEMORY_TOP_K")? {
            config.memory_top_k = v;
        }
        if let Some(v) = env_parse("MEMORY_CAPACITY")? {
            config.memory_capacity = v;
        }
        if let Ok(policy) = env::var("MEMORY_EVICTION") {
            config.eviction_policy = policy.parse()?;
        }
        if let Some(v) = env_parse("LOOP_WINDOW")? {
            config.loop_window = v;
        }
        if let Some(v) = env_parse("LOOP_REPEAT_THRESHOLD")? {
            config.loop_repeat_threshold = v;
        }
        if let Some(v) = env_parse("LOOP_FAILURE_STREAK")? {
            config.loop_failure_streak = v;
        }
        if let Some(v) = env_parse("TRANSPORT_FAILURE_LIMIT")? {
            config.transport_failure_limit = v;
        }
        if let Some(secs) = env_parse::<u64>("ADB_TIMEOUT")? {
            config.device_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("REASONING_TIMEOUT")? {
            config.reasoning_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("CHECKPOINT_TIMEOUT")? {
            config.checkpoint_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("RETRY_BACKOFF_MS")? {
            config.retry_backoff = Duration::from_millis(ms);
        }
        if let Ok(dir) = env::var("PILOT_STATE_DIR").or_else(|_| env::var("ANDROMANCER_STATE_DIR")) {
            config.state_dir = PathBuf::from(dir);
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            config.log_level = level.to_lowercase();
        }

        Ok(config)
    }

    /// Check every value is usable. Called before a mission starts.
    pub fn validate(&self) -> Result<(), PilotError> {
        let unit = 0.0_f32..=1.0_f32;
        if !unit.contains(&self.confidence_threshold) {
            return Err(PilotError::Fatal(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if !unit.contains(&self.suggestion_threshold) {
            return Err(PilotError::Fatal(format!(
                "suggestion_threshold must be within [0, 1], got {}",
                self.suggestion_threshold
            )));
        }
        if self.max_steps == 0 {
            return Err(PilotError::Fatal("max_steps must be at least 1".into()));
        }
        if self.max_concurrency == 0 {
            return Err(PilotError::Fatal("max_concurrency must be at least 1".into()));
        }
        if self.memory_capacity == 0 {
            return Err(PilotError::Fatal("memory_capacity must be at least 1".into()));
        }
        if self.loop_window == 0 || self.loop_failure_streak == 0 {
            return Err(PilotError::Fatal(
                "loop_window and loop_failure_streak must be at least 1".into(),
            ));
        }
        if self.history_depth == 0 {
            return Err(PilotError::Fatal("history_depth must be at least 1".into()));
        }
        if self.transport_failure_limit == 0 {
            return Err(PilotError::Fatal(
                "transport_failure_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Produce a new configuration with front-end overrides applied.
    pub fn apply(&self, overrides: &ConfigOverrides) -> Self {
        let mut config = self.clone();
        if let Some(level) = overrides.autonomy_level {
            config.autonomy_level = level;
        }
        if let Some(threshold) = overrides.confidence_threshold {
            config.confidence_threshold = threshold;
        }
        if let Some(parallel) = overrides.parallel_actions {
            config.parallel_actions = parallel;
        }
        if let Some(max_steps) = overrides.max_steps {
            config.max_steps = max_steps;
        }
        config
    }

    /// Set the autonomy level.
    pub fn with_autonomy(mut self, level: AutonomyLevel) -> Self {
        self.autonomy_level = level;
        self
    }

    /// Set the maximum number of steps.
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Enable or disable parallel dispatch.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel_actions = parallel;
        self
    }

    /// Set the concurrency bound for parallel dispatch.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Set the global confidence threshold.
    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Set the memory capacity and eviction policy.
    pub fn with_memory(mut self, capacity: usize, policy: EvictionPolicy) -> Self {
        self.memory_capacity = capacity;
        self.eviction_policy = policy;
        self
    }

    /// Set the loop guard parameters.
    pub fn with_loop_guard(mut self, window: usize, repeat_threshold: usize, failure_streak: usize) -> Self {
        self.loop_window = window;
        self.loop_repeat_threshold = repeat_threshold;
        self.loop_failure_streak = failure_streak;
        self
    }

    /// Consecutive transport-failed steps tolerated before the mission fails.
    pub fn with_transport_failure_limit(mut self, limit: u32) -> Self {
        self.transport_failure_limit = limit;
        self
    }

    /// Set the checkpoint approval timeout.
    pub fn with_checkpoint_timeout(mut self, timeout: Duration) -> Self {
        self.checkpoint_timeout = timeout;
        self
    }

    /// Set the per-action device timeout.
    pub fn with_device_timeout(mut self, timeout: Duration) -> Self {
        self.device_timeout = timeout;
        self
    }

    /// Set the retry backoff.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the state directory.
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Path of the durable memory record file.
    pub fn memory_path(&self) -> PathBuf {
        self.state_dir.join("memory.jsonl")
    }

    /// Directory holding one JSON file per mission.
    pub fn missions_dir(&self) -> PathBuf {
        self.state_dir.join("missions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PilotConfig::default();
        assert_eq!(config.autonomy_level, AutonomyLevel::Full);
        assert_eq!(config.max_steps, 20);
        assert_eq!(config.device_timeout, Duration::from_secs(15));
        assert!(config.parallel_actions);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PilotConfig::default()
            .with_autonomy(AutonomyLevel::Manual)
            .with_max_steps(3)
            .with_parallel(false);

        assert_eq!(config.autonomy_level, AutonomyLevel::Manual);
        assert_eq!(config.max_steps, 3);
        assert!(!config.parallel_actions);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let config = PilotConfig::default().with_confidence_threshold(1.5);
        assert!(matches!(config.validate(), Err(PilotError::Fatal(_))));

        let config = PilotConfig::default().with_max_steps(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_transport_failure_limit() {
        let config = PilotConfig::default().with_transport_failure_limit(0);
        assert!(matches!(config.validate(), Err(PilotError::Fatal(_))));

        let config = PilotConfig::default().with_transport_failure_limit(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_overrides() {
        let base = PilotConfig::default();
        let overrides = ConfigOverrides {
            autonomy_level: Some(AutonomyLevel::Assisted),
            parallel_actions: Some(false),
            ..Default::default()
        };
        let config = base.apply(&overrides);
        assert_eq!(config.autonomy_level, AutonomyLevel::Assisted);
        assert!(!config.parallel_actions);
        assert_eq!(config.max_steps, base.max_steps);
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("MANUAL".parse::<AutonomyLevel>().unwrap(), AutonomyLevel::Manual);
        assert!("sometimes".parse::<AutonomyLevel>().is_err());
        assert_eq!("relevance".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Relevance);
    }
}
