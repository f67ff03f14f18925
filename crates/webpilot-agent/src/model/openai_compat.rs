//! OpenAI-compatible chat-completions adapter for local model runtimes
//! (llama.cpp server, vLLM, Ollama's compatible endpoint).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use webpilot_traits::{
    CompletionOutcome, ExternalError, ExternalResult, ModelClient, ToolSpec, VisionOptions,
};

/// HTTP client against an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompatClient {
    client: Client,
    base_url: String,
    text_model: String,
    vision_model: String,
}

impl OpenAiCompatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            text_model: "local-text".to_string(),
            vision_model: "local-vision".to_string(),
        }
    }

    pub fn with_text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = model.into();
        self
    }

    pub fn with_vision_model(mut self, model: impl Into<String>) -> Self {
        self.vision_model = model.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn post(&self, body: Value, timeout: Duration) -> ExternalResult<ChatResponse> {
        let response = self
            .client
            .post(self.endpoint())
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExternalError::timeout("model call", timeout)
                } else {
                    ExternalError::new(format!("model request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(
                ExternalError::new(format!("model endpoint returned {status}: {text}"))
                    .with_status(status.as_u16()),
            );
        }
        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ExternalError::new(format!("undecodable model response: {e}")))
    }
}

#[derive(Serialize)]
struct ChatTool<'a> {
    r#type: &'static str,
    function: &'a ToolSpec,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Deserialize)]
struct ChatToolCall {
    function: ChatFunctionCall,
}

#[derive(Deserialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    async fn complete(
        &self,
        prompt: &str,
        tools: &[ToolSpec],
        timeout: Duration,
    ) -> ExternalResult<CompletionOutcome> {
        let mut body = json!({
            "model": self.text_model,
            "messages": [{"role": "user", "content": prompt}],
        });
        if !tools.is_empty() {
            let wrapped: Vec<ChatTool> = tools
                .iter()
                .map(|function| ChatTool {
                    r#type: "function",
                    function,
                })
                .collect();
            body["tools"] = serde_json::to_value(wrapped)
                .map_err(|e| ExternalError::new(e.to_string()))?;
        }

        let response = self.post(body, timeout).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ExternalError::new("model returned no choices"))?;

        let content = choice.message.content.unwrap_or_default();
        // The first tool call becomes the tagged action value; the
        // content is the thought. With no tool call the content is the
        // final answer.
        let action = choice
            .message
            .tool_calls
            .and_then(|calls| calls.into_iter().next())
            .and_then(|call| {
                let mut arguments: Value = serde_json::from_str(&call.function.arguments).ok()?;
                arguments
                    .as_object_mut()?
                    .insert("type".to_string(), Value::String(call.function.name));
                Some(arguments)
            });

        Ok(match action {
            Some(action) => CompletionOutcome {
                thought: content,
                action: Some(action),
                answer: None,
            },
            None => CompletionOutcome {
                thought: String::new(),
                action: None,
                answer: Some(content),
            },
        })
    }

    async fn complete_vision(
        &self,
        prompt: &str,
        image: &[u8],
        options: VisionOptions,
        timeout: Duration,
    ) -> ExternalResult<String> {
        let model = options
            .model_override
            .unwrap_or_else(|| self.vision_model.clone());
        let mut text = prompt.to_string();
        if options.enhance {
            // Preprocessing is delegated to the runtime.
            text.push_str(
                "\n(The image may be low-contrast; apply input enhancement before reading.)",
            );
        }
        let data_url = format!("data:image/png;base64,{}", BASE64_STANDARD.encode(image));
        let body = json!({
            "model": model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": text},
                    {"type": "image_url", "image_url": {"url": data_url}},
                ],
            }],
        });

        let response = self.post(body, timeout).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ExternalError::new("vision model returned no content"))
    }
}
