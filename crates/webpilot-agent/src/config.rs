//! The single agent configuration value.
//!
//! Every tunable the kernel reads lives here with a default; `from_env`
//! applies the documented `AGENT_*` environment overrides on top.

use std::path::PathBuf;
use std::time::Duration;

use crate::captcha::CaptchaThresholds;
use crate::memory::MemoryConfig;
use crate::reliability::{CircuitConfig, RetryPolicy};
use crate::reliability::executor::ExecutorTimeouts;
use crate::snapshot::SnapshotCacheConfig;
use crate::valence::ValenceConfig;

/// Full kernel configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// ReAct iteration budget per goal.
    pub max_iterations: usize,
    /// Wall-clock budget per goal.
    pub goal_timeout: Duration,
    /// Working-memory message cap.
    pub context_cap: usize,
    /// Message count at which compaction becomes mandatory.
    pub compact_threshold: usize,
    /// Steps kept verbatim through compaction.
    pub keep_tail: usize,
    /// Steps rendered in full detail in each prompt.
    pub detailed_tail: usize,
    /// Screenshot payloads retained after compaction.
    pub keep_last_n_screenshots: usize,
    /// Consecutive failed steps before the goal is abandoned.
    pub fatal_consecutive_failures: u32,
    /// Snapshot cache TTL + LRU capacity.
    pub snapshot_cache: SnapshotCacheConfig,
    /// Default diff mode for orchestrator-initiated snapshots.
    pub snapshot_diff_enabled: bool,
    /// Per-kind operation timeouts (action, screenshot).
    pub timeouts: ExecutorTimeouts,
    /// Model call timeout.
    pub model_timeout: Duration,
    /// Per-error-kind retry table.
    pub retry_policy: RetryPolicy,
    /// Per-domain breaker tuning.
    pub circuit: CircuitConfig,
    /// CAPTCHA decision-band cutoffs.
    pub captcha_thresholds: CaptchaThresholds,
    /// Site-memory entries below this are not consulted.
    pub min_selector_confidence: f64,
    /// Retrieval and consolidation tuning.
    pub memory: MemoryConfig,
    /// Directory for the persistent stores.
    pub memory_dir: PathBuf,
    /// Attach to a running browser instead of launching one.
    pub debug_browser_port: Option<u16>,
    /// Model runtime endpoint (OpenAI-compatible).
    pub model_endpoint: String,
    pub text_model: String,
    pub vision_model: String,
    /// Optional behavioral tuning, neutral by default.
    pub valence: ValenceConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            goal_timeout: Duration::from_secs(600),
            context_cap: 100,
            compact_threshold: 80,
            keep_tail: 10,
            detailed_tail: 10,
            keep_last_n_screenshots: 1,
            fatal_consecutive_failures: 3,
            snapshot_cache: SnapshotCacheConfig::default(),
            snapshot_diff_enabled: false,
            timeouts: ExecutorTimeouts::default(),
            model_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            circuit: CircuitConfig::default(),
            captcha_thresholds: CaptchaThresholds::default(),
            min_selector_confidence: 0.5,
            memory: MemoryConfig::default(),
            memory_dir: PathBuf::from(".webpilot"),
            debug_browser_port: None,
            model_endpoint: "http://127.0.0.1:11434/v1".to_string(),
            text_model: "local-text".to_string(),
            vision_model: "local-vision".to_string(),
            valence: ValenceConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl AgentConfig {
    /// Defaults plus `AGENT_*` environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse::<usize>("AGENT_MAX_ITERATIONS") {
            config.max_iterations = v;
        }
        if let Some(ms) = env_parse::<u64>("AGENT_GOAL_TIMEOUT_MS") {
            config.goal_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = env_parse::<usize>("AGENT_CONTEXT_CAP") {
            config.context_cap = v;
        }
        if let Some(v) = env_parse::<usize>("AGENT_COMPACT_THRESHOLD") {
            config.compact_threshold = v;
        }
        if let Some(ms) = env_parse::<u64>("AGENT_CACHE_TTL_MS") {
            config.snapshot_cache.ttl = Duration::from_millis(ms);
        }
        if let Some(v) = env_flag("AGENT_DIFF_MODE") {
            config.snapshot_diff_enabled = v;
        }
        if let Ok(dir) = std::env::var("AGENT_MEMORY_DIR") {
            config.memory_dir = PathBuf::from(dir);
        }
        if let Some(port) = env_parse::<u16>("AGENT_DEBUG_BROWSER_PORT") {
            config.debug_browser_port = Some(port);
        }
        if let Ok(endpoint) = std::env::var("AGENT_MODEL_ENDPOINT") {
            config.model_endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("AGENT_TEXT_MODEL") {
            config.text_model = model;
        }
        if let Ok(model) = std::env::var("AGENT_VISION_MODEL") {
            config.vision_model = model;
        }
        config
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_goal_timeout(mut self, timeout: Duration) -> Self {
        self.goal_timeout = timeout;
        self
    }

    pub fn with_memory_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.memory_dir = dir.into();
        self
    }

    pub fn with_fatal_consecutive_failures(mut self, n: u32) -> Self {
        self.fatal_consecutive_failures = n;
        self
    }
}
