//! Typed events emitted by kernel components.
//!
//! Components push these into a channel; the optional valence module is
//! the only consumer today. Emission is fire-and-forget: a full or closed
//! channel never affects the emitting component.

use serde::{Deserialize, Serialize};

/// Domain events the kernel emits while executing a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    ActionCompleted {
        tool: String,
        success: bool,
        latency_ms: u64,
    },
    ObstructionDismissed {
        category: String,
    },
    CircuitOpened {
        domain: String,
    },
    CaptchaEscalated {
        band: String,
    },
    HealthCritical {
        reason: String,
    },
    GoalFinished {
        success: bool,
    },
}
