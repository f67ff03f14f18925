//! Goal and step records for one ReAct run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reliability::ErrorKind;
use crate::tools::{ToolCall, ToolOrigin};

/// One top-level user request. Owns one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Parent trace id for nested or replayed goals.
    pub trace_id: Option<Uuid>,
}

impl Goal {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            created_at: Utc::now(),
            trace_id: None,
        }
    }
}

/// One ReAct iteration. Immutable once appended to working memory;
/// `success` is always assigned before the next step begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub index: usize,
    pub thought: String,
    pub tool: Option<ToolCall>,
    pub origin: Option<ToolOrigin>,
    pub observation: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error_kind: Option<ErrorKind>,
    /// Screenshot bytes, held at most until compaction strips them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Vec<u8>>,
}

impl Step {
    /// One-line form used by compaction and episode traces:
    /// `Step N: <tool> - <short outcome>`.
    pub fn summary(&self) -> String {
        let tool = self
            .tool
            .as_ref()
            .map(|t| t.name())
            .unwrap_or("(no tool)");
        let outcome = if self.success {
            "ok".to_string()
        } else {
            match self.error_kind {
                Some(kind) => format!("failed: {kind}"),
                None => "failed".to_string(),
            }
        };
        format!("Step {}: {} - {}", self.index, tool, outcome)
    }

    /// Full rendering for the detailed tail of the context.
    pub fn render_detailed(&self) -> String {
        let mut out = format!("Step {}\n", self.index);
        if !self.thought.is_empty() {
            out.push_str(&format!("Thought: {}\n", self.thought));
        }
        if let Some(tool) = &self.tool {
            let args = serde_json::to_string(tool).unwrap_or_default();
            out.push_str(&format!("Action: {args}\n"));
        }
        out.push_str(&format!("Observation: {}\n", self.observation));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_names_tool_and_outcome() {
        let step = Step {
            index: 3,
            thought: "need the links".into(),
            tool: Some(ToolCall::ExtractLinks),
            origin: Some(ToolOrigin::Model),
            observation: "[]".into(),
            success: true,
            duration_ms: 12,
            error_kind: None,
            screenshot: None,
        };
        assert_eq!(step.summary(), "Step 3: extract_links - ok");
    }

    #[test]
    fn failed_summary_carries_kind() {
        let step = Step {
            index: 1,
            thought: String::new(),
            tool: Some(ToolCall::Navigate {
                url: "https://a.test/".into(),
            }),
            origin: Some(ToolOrigin::Model),
            observation: "circuit open".into(),
            success: false,
            duration_ms: 1,
            error_kind: Some(ErrorKind::CircuitOpen),
            screenshot: None,
        };
        assert!(step.summary().contains("failed: circuit-open"));
    }
}
