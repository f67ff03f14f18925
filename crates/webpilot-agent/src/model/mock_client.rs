//! Deterministic scripted model client for kernel tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use webpilot_traits::{
    CompletionOutcome, ExternalError, ExternalResult, ModelClient, ToolSpec, VisionOptions,
};

/// One scripted completion turn.
#[derive(Debug, Clone)]
pub enum MockModelStep {
    /// A terminal answer with no tool call.
    Answer(String),
    /// A thought plus one tagged action value.
    Action(String, Value),
    /// A boundary error (optionally with an HTTP-like status).
    Error(String, Option<u16>),
}

impl MockModelStep {
    pub fn answer(text: impl Into<String>) -> Self {
        Self::Answer(text.into())
    }

    pub fn action(thought: impl Into<String>, action: Value) -> Self {
        Self::Action(thought.into(), action)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into(), None)
    }

    pub fn error_with_status(message: impl Into<String>, status: u16) -> Self {
        Self::Error(message.into(), Some(status))
    }
}

/// Scripted `ModelClient`: completions and vision replies drain in order.
#[derive(Debug, Default)]
pub struct MockModelClient {
    script: Mutex<VecDeque<MockModelStep>>,
    vision_replies: Mutex<VecDeque<String>>,
    complete_calls: Mutex<usize>,
    vision_calls: Mutex<usize>,
}

impl MockModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(self, steps: Vec<MockModelStep>) -> Self {
        *self.script.lock().unwrap() = steps.into();
        self
    }

    pub fn with_vision_replies(self, replies: Vec<String>) -> Self {
        *self.vision_replies.lock().unwrap() = replies.into();
        self
    }

    pub fn push_step(&self, step: MockModelStep) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn complete_calls(&self) -> usize {
        *self.complete_calls.lock().unwrap()
    }

    pub fn vision_calls(&self) -> usize {
        *self.vision_calls.lock().unwrap()
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn complete(
        &self,
        _prompt: &str,
        _tools: &[ToolSpec],
        _timeout: Duration,
    ) -> ExternalResult<CompletionOutcome> {
        *self.complete_calls.lock().unwrap() += 1;
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ExternalError::new("mock model script exhausted"))?;
        match step {
            MockModelStep::Answer(text) => Ok(CompletionOutcome {
                thought: String::new(),
                action: None,
                answer: Some(text),
            }),
            MockModelStep::Action(thought, action) => Ok(CompletionOutcome {
                thought,
                action: Some(action),
                answer: None,
            }),
            MockModelStep::Error(message, status) => {
                let mut err = ExternalError::new(message);
                err.status = status;
                Err(err)
            }
        }
    }

    async fn complete_vision(
        &self,
        _prompt: &str,
        _image: &[u8],
        _options: VisionOptions,
        _timeout: Duration,
    ) -> ExternalResult<String> {
        *self.vision_calls.lock().unwrap() += 1;
        self.vision_replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ExternalError::new("mock vision script exhausted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn steps_drain_in_order() {
        let mock = MockModelClient::new().with_steps(vec![
            MockModelStep::action("navigate first", json!({"type": "navigate", "url": "https://a.test/"})),
            MockModelStep::answer("done"),
        ]);

        let first = mock.complete("p", &[], Duration::from_secs(1)).await.unwrap();
        assert!(first.action.is_some());
        assert_eq!(first.thought, "navigate first");

        let second = mock.complete("p", &[], Duration::from_secs(1)).await.unwrap();
        assert_eq!(second.answer.as_deref(), Some("done"));

        assert!(mock.complete("p", &[], Duration::from_secs(1)).await.is_err());
        assert_eq!(mock.complete_calls(), 3);
    }

    #[tokio::test]
    async fn scripted_error_carries_status() {
        let mock = MockModelClient::new()
            .with_steps(vec![MockModelStep::error_with_status("too many requests", 429)]);
        let err = mock.complete("p", &[], Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.status, Some(429));
    }
}
