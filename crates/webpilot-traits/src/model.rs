//! The `ModelClient` contract: a local language model with text and
//! vision modes.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExternalResult;

/// Schema for one tool offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema object for the arguments.
    pub parameters: Value,
}

/// One reasoning turn returned by the model.
///
/// Exactly one of `action` / `answer` is expected to be meaningful: a turn
/// that carries no parseable action is the final answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionOutcome {
    /// Free-text reasoning preceding the action.
    pub thought: String,
    /// At most one intended tool call, as a raw tagged JSON value.
    pub action: Option<Value>,
    /// Terminal answer when the model decides the goal is complete.
    pub answer: Option<String>,
}

/// Options for a vision call.
#[derive(Debug, Clone, Default)]
pub struct VisionOptions {
    /// Ask the runtime to contrast-stretch / sharpen the input first.
    pub enhance: bool,
    /// Use a specific vision model instead of the configured default.
    pub model_override: Option<String>,
}

/// A local model runtime. Both calls are retried by the reliability fabric
/// under the rate-limit / server-5xx / transient-timeout policies.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// One text completion: prompt plus tool schemas in, one turn out.
    async fn complete(
        &self,
        prompt: &str,
        tools: &[ToolSpec],
        timeout: Duration,
    ) -> ExternalResult<CompletionOutcome>;

    /// One vision completion over an encoded image.
    async fn complete_vision(
        &self,
        prompt: &str,
        image: &[u8],
        options: VisionOptions,
        timeout: Duration,
    ) -> ExternalResult<String>;
}
