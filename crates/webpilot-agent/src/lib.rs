//! Webpilot agent kernel.
//!
//! The execution core of an autonomous browser-automation agent:
//! - ReAct orchestrator with context compaction ([`agent`])
//! - Reliability fabric: classification, retry, circuit breaking,
//!   validation, obstruction handling ([`reliability`])
//! - Accessibility snapshots with TTL cache and diffs ([`snapshot`])
//! - Smart tool router ([`router`])
//! - Working/episodic/semantic/skill memory ([`memory`])
//! - Site memory and selector synthesis ([`site_memory`])
//! - Dual-model CAPTCHA confidence engine ([`captcha`])
//!
//! The kernel consumes two external capabilities, `PageDriver` and
//! `ModelClient` from `webpilot-traits`, and persists through
//! `webpilot-storage`. It neither listens nor proxies on the network.

pub mod agent;
pub mod captcha;
pub mod config;
pub mod error;
pub mod memory;
pub mod model;
pub mod reliability;
pub mod router;
pub mod site_memory;
pub mod snapshot;
pub mod tools;
pub mod valence;

// Re-export commonly used types
pub use agent::{Agent, Goal, Step};
pub use captcha::{CaptchaAssessment, CaptchaEngine, CaptchaKind, CaptchaThresholds, DecisionBand};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use memory::{
    Episode, EpisodeFilter, EpisodeOutcome, MemoryConfig, MemoryManager, Skill, WorkingMemory,
};
pub use model::{MockModelClient, MockModelStep, OpenAiCompatClient};
pub use reliability::{
    CircuitBreaker, CircuitConfig, ErrorKind, Executor, RetryPolicy, classify,
};
pub use router::route;
pub use site_memory::{ElementLocator, SiteMemory, SiteMemoryStore, canonicalize_url};
pub use snapshot::{
    Element, ElementRef, Snapshot, SnapshotCacheConfig, SnapshotDiff, SnapshotOptions,
    SnapshotResult, SnapshotService,
};
pub use tools::{ActionResult, ToolCall, ToolOrigin};
pub use valence::{ValenceBias, ValenceConfig, ValenceModule};
