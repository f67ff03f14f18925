//! The closed tool set and its dispatch table.
//!
//! Tools are a tagged enum, one case per capability, so the router, the
//! orchestrator, and the reliability fabric are type-safe and enumerable
//! in tests. Dispatch is a single match against the driver; there is no
//! string-keyed callable pool.

pub mod scripts;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use webpilot_traits::{
    ConsoleLevel, ExternalError, ExternalResult, LoadState, PageDriver, ToolSpec,
};

use crate::reliability::ErrorKind;
use crate::site_memory::ElementLocator;
use crate::snapshot::{ElementRef, RefError, SnapshotOptions, SnapshotResult, SnapshotService};

/// Where a tool call came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOrigin {
    Trigger,
    Model,
    Recovery,
}

/// One intended action. Serialized with a `type` tag, which is also the
/// wire name the model uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCall {
    Navigate {
        url: String,
    },
    Click {
        #[serde(rename = "ref")]
        target: ElementRef,
    },
    TypeText {
        #[serde(rename = "ref")]
        target: ElementRef,
        text: String,
    },
    Hover {
        #[serde(rename = "ref")]
        target: ElementRef,
    },
    Scroll {
        dx: f64,
        dy: f64,
    },
    PressKey {
        key: String,
    },
    WaitForLoad {
        state: LoadState,
    },
    SnapshotPage {
        #[serde(default)]
        diff: bool,
    },
    Screenshot,
    LocateElement {
        description: String,
    },
    ExtractLinks,
    ExtractForms,
    ExtractInputs,
    ExtractTables,
    DetectContactForm,
    ConsoleErrors,
    FailedRequests,
    ConsoleLogs,
    InspectHtml,
    AttachSession {
        port: u16,
    },
}

impl ToolCall {
    /// The wire name (serde tag) of this tool.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Click { .. } => "click",
            Self::TypeText { .. } => "type_text",
            Self::Hover { .. } => "hover",
            Self::Scroll { .. } => "scroll",
            Self::PressKey { .. } => "press_key",
            Self::WaitForLoad { .. } => "wait_for_load",
            Self::SnapshotPage { .. } => "snapshot_page",
            Self::Screenshot => "screenshot",
            Self::LocateElement { .. } => "locate_element",
            Self::ExtractLinks => "extract_links",
            Self::ExtractForms => "extract_forms",
            Self::ExtractInputs => "extract_inputs",
            Self::ExtractTables => "extract_tables",
            Self::DetectContactForm => "detect_contact_form",
            Self::ConsoleErrors => "console_errors",
            Self::FailedRequests => "failed_requests",
            Self::ConsoleLogs => "console_logs",
            Self::InspectHtml => "inspect_html",
            Self::AttachSession { .. } => "attach_session",
        }
    }

    /// Interaction tools go through pre-action validation.
    pub fn is_interaction(&self) -> bool {
        matches!(
            self,
            Self::Click { .. } | Self::TypeText { .. } | Self::Hover { .. }
        )
    }

    /// The element ref this call targets, if any.
    pub fn target_ref(&self) -> Option<&ElementRef> {
        match self {
            Self::Click { target } | Self::TypeText { target, .. } | Self::Hover { target } => {
                Some(target)
            }
            _ => None,
        }
    }

    /// The URL this call navigates to, if any (circuit-breaker keying).
    pub fn target_url(&self) -> Option<&str> {
        match self {
            Self::Navigate { url } => Some(url),
            _ => None,
        }
    }

    /// Parse a model-emitted tagged value into a known tool. `None` means
    /// the output is not a tool call and should be read as a final answer.
    pub fn parse(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Schemas for every tool, offered to the model on each completion.
    pub fn schemas() -> Vec<ToolSpec> {
        fn spec(name: &str, description: &str, properties: Value, required: &[&str]) -> ToolSpec {
            ToolSpec {
                name: name.to_string(),
                description: description.to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }),
            }
        }
        let ref_prop = json!({"ref": {"type": "string", "description": "element ref from the latest snapshot"}});
        vec![
            spec("navigate", "Navigate the page to a URL", json!({"url": {"type": "string"}}), &["url"]),
            spec("click", "Click an element", ref_prop.clone(), &["ref"]),
            spec(
                "type_text",
                "Type text into an element",
                json!({"ref": {"type": "string"}, "text": {"type": "string"}}),
                &["ref", "text"],
            ),
            spec("hover", "Hover an element", ref_prop, &["ref"]),
            spec(
                "scroll",
                "Scroll the viewport by pixel deltas",
                json!({"dx": {"type": "number"}, "dy": {"type": "number"}}),
                &["dx", "dy"],
            ),
            spec("press_key", "Press a keyboard key", json!({"key": {"type": "string"}}), &["key"]),
            spec(
                "wait_for_load",
                "Wait for a page load state",
                json!({"state": {"type": "string", "enum": ["dom_content_loaded", "network_idle"]}}),
                &["state"],
            ),
            spec(
                "snapshot_page",
                "Capture an accessibility snapshot of the current page",
                json!({"diff": {"type": "boolean"}}),
                &[],
            ),
            spec("screenshot", "Take a viewport screenshot", json!({}), &[]),
            spec(
                "locate_element",
                "Find an element by natural-language description",
                json!({"description": {"type": "string"}}),
                &["description"],
            ),
            spec("extract_links", "List all links on the page", json!({}), &[]),
            spec("extract_forms", "Inventory all forms on the page", json!({}), &[]),
            spec("extract_inputs", "Inventory all input fields on the page", json!({}), &[]),
            spec("extract_tables", "Extract all tables as rows of cells", json!({}), &[]),
            spec("detect_contact_form", "Detect a contact form on the page", json!({}), &[]),
            spec("console_errors", "List console errors", json!({}), &[]),
            spec("failed_requests", "List failed network requests", json!({}), &[]),
            spec("console_logs", "Dump the console log", json!({}), &[]),
            spec("inspect_html", "Summarize the current DOM without navigating", json!({}), &[]),
            spec(
                "attach_session",
                "Attach to an externally running browser on a debug port",
                json!({"port": {"type": "integer"}}),
                &["port"],
            ),
        ]
    }
}

/// Outcome of one executed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub data: Value,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub attempts: u32,
    pub latency_ms: u64,
}

impl ActionResult {
    pub fn ok(data: Value, attempts: u32, latency_ms: u64) -> Self {
        Self {
            success: true,
            data,
            error: None,
            error_kind: None,
            attempts,
            latency_ms,
        }
    }

    pub fn fail(kind: ErrorKind, reason: impl Into<String>, attempts: u32, latency_ms: u64) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(reason.into()),
            error_kind: Some(kind),
            attempts,
            latency_ms,
        }
    }

    /// Short single-line outcome for step summaries.
    pub fn brief(&self) -> String {
        if self.success {
            match &self.data {
                Value::Array(items) => format!("ok ({} items)", items.len()),
                Value::String(s) if s.len() > 60 => format!("ok ({} chars)", s.len()),
                Value::Null => "ok".to_string(),
                other => {
                    let text = other.to_string();
                    if text.len() > 60 {
                        format!("ok ({} chars)", text.len())
                    } else {
                        format!("ok {text}")
                    }
                }
            }
        } else {
            format!(
                "failed ({})",
                self.error_kind.map(|k| k.to_string()).unwrap_or_default()
            )
        }
    }
}

/// Capabilities dispatch needs beyond the driver itself.
pub struct ToolContext<'a> {
    pub driver: &'a dyn PageDriver,
    pub snapshots: &'a SnapshotService,
    pub locator: Option<&'a ElementLocator>,
}

fn ref_error(ref_: &ElementRef, err: RefError) -> ExternalError {
    match err {
        RefError::Stale => ExternalError::new(format!(
            "stale element reference: {ref_} belongs to an earlier snapshot"
        )),
        RefError::Unknown => {
            ExternalError::new(format!("no element matches ref {ref_} in the current snapshot"))
        }
        RefError::NoSnapshot => ExternalError::new(format!(
            "no element matches ref {ref_}: no snapshot captured yet"
        )),
    }
}

/// Execute one raw attempt of a tool call. Retries, validation, and
/// circuit breaking live in the reliability fabric, not here.
pub async fn dispatch(call: &ToolCall, ctx: &ToolContext<'_>) -> ExternalResult<Value> {
    match call {
        ToolCall::Navigate { url } => {
            ctx.driver.navigate(url).await?;
            ctx.driver
                .wait_for_load_state(LoadState::DomContentLoaded)
                .await?;
            Ok(json!({"url": url}))
        }
        ToolCall::Click { target } => {
            let backend_id = ctx
                .snapshots
                .resolve(target)
                .map_err(|e| ref_error(target, e))?;
            ctx.driver.click(backend_id).await?;
            Ok(json!({"clicked": target.as_str()}))
        }
        ToolCall::TypeText { target, text } => {
            let backend_id = ctx
                .snapshots
                .resolve(target)
                .map_err(|e| ref_error(target, e))?;
            ctx.driver.type_text(backend_id, text).await?;
            Ok(json!({"typed": text.len(), "ref": target.as_str()}))
        }
        ToolCall::Hover { target } => {
            let backend_id = ctx
                .snapshots
                .resolve(target)
                .map_err(|e| ref_error(target, e))?;
            ctx.driver.hover(backend_id).await?;
            Ok(json!({"hovered": target.as_str()}))
        }
        ToolCall::Scroll { dx, dy } => {
            ctx.driver.scroll_by(*dx, *dy).await?;
            Ok(json!({"dx": dx, "dy": dy}))
        }
        ToolCall::PressKey { key } => {
            ctx.driver.press_key(key).await?;
            Ok(json!({"pressed": key}))
        }
        ToolCall::WaitForLoad { state } => {
            ctx.driver.wait_for_load_state(*state).await?;
            Ok(json!({"reached": format!("{state:?}")}))
        }
        ToolCall::SnapshotPage { diff } => {
            let options = SnapshotOptions {
                diff: *diff,
                ..Default::default()
            };
            match ctx.snapshots.capture(ctx.driver, &options).await? {
                SnapshotResult::Full(snapshot) => Ok(json!({
                    "url": snapshot.url,
                    "title": snapshot.title,
                    "elements": snapshot.elements.len(),
                    "snapshot": snapshot.render(),
                })),
                SnapshotResult::Diff(delta) => Ok(serde_json::to_value(&delta)
                    .map_err(|e| ExternalError::new(e.to_string()))?),
            }
        }
        ToolCall::Screenshot => {
            let bytes = ctx.driver.screenshot().await?;
            use base64::Engine as _;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            Ok(json!({"format": "png", "base64": encoded}))
        }
        ToolCall::LocateElement { description } => {
            let Some(locator) = ctx.locator else {
                return Err(ExternalError::new("element locator not configured"));
            };
            let located = locator.locate(ctx.driver, description).await?;
            Ok(json!({
                "backend_id": located.info.backend_id,
                "role": located.info.role,
                "name": located.info.name,
                "via": located.via_label(),
            }))
        }
        ToolCall::ExtractLinks => ctx.driver.evaluate(scripts::EXTRACT_LINKS).await,
        ToolCall::ExtractForms => ctx.driver.evaluate(scripts::EXTRACT_FORMS).await,
        ToolCall::ExtractInputs => ctx.driver.evaluate(scripts::EXTRACT_INPUTS).await,
        ToolCall::ExtractTables => ctx.driver.evaluate(scripts::EXTRACT_TABLES).await,
        ToolCall::DetectContactForm => ctx.driver.evaluate(scripts::DETECT_CONTACT_FORM).await,
        ToolCall::ConsoleErrors => {
            let events = ctx.driver.console_events().await?;
            let errors: Vec<Value> = events
                .iter()
                .filter(|e| e.level == ConsoleLevel::Error)
                .map(|e| json!({"text": e.text, "timestamp_ms": e.timestamp_ms}))
                .collect();
            Ok(Value::Array(errors))
        }
        ToolCall::FailedRequests => {
            let events = ctx.driver.network_events().await?;
            let failed: Vec<Value> = events
                .iter()
                .filter(|e| e.failed || e.status.is_some_and(|s| s >= 400))
                .map(|e| {
                    json!({
                        "url": e.url,
                        "method": e.method,
                        "status": e.status,
                        "error": e.error_text,
                    })
                })
                .collect();
            Ok(Value::Array(failed))
        }
        ToolCall::ConsoleLogs => {
            let events = ctx.driver.console_events().await?;
            let logs: Vec<Value> = events
                .iter()
                .map(|e| json!({"level": format!("{:?}", e.level), "text": e.text}))
                .collect();
            Ok(Value::Array(logs))
        }
        ToolCall::InspectHtml => ctx.driver.evaluate(scripts::INSPECT_HTML).await,
        ToolCall::AttachSession { port } => {
            ctx.driver.attach_debug_port(*port).await?;
            Ok(json!({"attached": true, "port": port}))
        }
    }
}

/// Infer episode tags from the tools a run invoked.
pub fn infer_tags(tool_names: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let mut add = |tag: &str| {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    };
    for name in tool_names {
        match name.as_str() {
            "navigate" => add("navigation"),
            "click" | "hover" | "press_key" | "scroll" => add("interaction"),
            "type_text" => add("form-fill"),
            "extract_links" | "extract_forms" | "extract_inputs" | "extract_tables" => {
                add("extraction")
            }
            "detect_contact_form" => add("extraction"),
            "console_errors" | "failed_requests" | "console_logs" => add("diagnostics"),
            "locate_element" => add("vision"),
            "screenshot" => add("vision"),
            "attach_session" => add("session-reuse"),
            _ => {}
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use webpilot_traits::{MockPage, MockPageDriver};

    use crate::snapshot::SnapshotCacheConfig;

    #[test]
    fn tool_calls_roundtrip_through_tagged_json() {
        let call = ToolCall::TypeText {
            target: ElementRef::new(3, 1),
            text: "hello".to_string(),
        };
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(value["type"], "type_text");
        assert_eq!(value["ref"], "s3e1");
        assert_eq!(ToolCall::parse(&value), Some(call));
    }

    #[test]
    fn unknown_tool_fails_to_parse() {
        let value = json!({"type": "self_destruct", "countdown": 3});
        assert_eq!(ToolCall::parse(&value), None);
    }

    #[test]
    fn non_object_does_not_parse() {
        assert_eq!(ToolCall::parse(&json!("just text")), None);
    }

    #[test]
    fn schemas_cover_every_tool() {
        let schemas = ToolCall::schemas();
        let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        for expected in [
            "navigate",
            "click",
            "type_text",
            "extract_links",
            "console_errors",
            "attach_session",
            "locate_element",
        ] {
            assert!(names.contains(&expected), "{expected} missing from schemas");
        }
    }

    #[test]
    fn interaction_classification() {
        assert!(ToolCall::Click { target: ElementRef::new(1, 0) }.is_interaction());
        assert!(!ToolCall::ExtractLinks.is_interaction());
        assert!(!ToolCall::Navigate { url: "https://a.test/".into() }.is_interaction());
    }

    #[tokio::test]
    async fn extract_links_returns_document_order() {
        let driver = MockPageDriver::new();
        driver.add_page(MockPage::new("https://a.test/").with_eval(
            "querySelectorAll('a')",
            json!([
                {"text": "One", "href": "/a"},
                {"text": "Two", "href": "/b"},
                {"text": "Three", "href": "/c"},
            ]),
        ));
        let snapshots = SnapshotService::new(SnapshotCacheConfig::default());
        let ctx = ToolContext {
            driver: &driver,
            snapshots: &snapshots,
            locator: None,
        };

        let data = dispatch(&ToolCall::ExtractLinks, &ctx).await.unwrap();
        let items = data.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["text"], "One");
        assert_eq!(items[2]["href"], "/c");
    }

    #[tokio::test]
    async fn click_with_stale_ref_reports_stale_message() {
        let driver = MockPageDriver::new();
        driver.add_page(MockPage::new("https://a.test/"));
        let snapshots = SnapshotService::new(SnapshotCacheConfig::default());
        // Capture once so a current generation exists.
        let _ = snapshots
            .capture(&driver, &SnapshotOptions::default())
            .await
            .unwrap();
        let ctx = ToolContext {
            driver: &driver,
            snapshots: &snapshots,
            locator: None,
        };

        let stale = ToolCall::Click {
            target: ElementRef::new(0, 0),
        };
        let err = dispatch(&stale, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("stale element reference"));
        assert_eq!(driver.calls("click"), 0);
    }

    #[tokio::test]
    async fn failed_requests_filters_successes() {
        use webpilot_traits::NetworkEvent;
        let driver = MockPageDriver::new();
        driver.add_page(MockPage::new("https://a.test/").with_network(vec![
            NetworkEvent {
                url: "https://a.test/ok".into(),
                method: "GET".into(),
                status: Some(200),
                failed: false,
                error_text: None,
            },
            NetworkEvent {
                url: "https://a.test/missing".into(),
                method: "GET".into(),
                status: Some(404),
                failed: false,
                error_text: None,
            },
            NetworkEvent {
                url: "https://a.test/reset".into(),
                method: "POST".into(),
                status: None,
                failed: true,
                error_text: Some("net::ERR_CONNECTION_RESET".into()),
            },
        ]));
        let snapshots = SnapshotService::new(SnapshotCacheConfig::default());
        let ctx = ToolContext {
            driver: &driver,
            snapshots: &snapshots,
            locator: None,
        };

        let data = dispatch(&ToolCall::FailedRequests, &ctx).await.unwrap();
        assert_eq!(data.as_array().unwrap().len(), 2);
    }

    #[test]
    fn tag_inference_deduplicates() {
        let tags = infer_tags(&[
            "navigate".to_string(),
            "click".to_string(),
            "click".to_string(),
            "extract_links".to_string(),
        ]);
        assert_eq!(tags, vec!["navigation", "interaction", "extraction"]);
    }
}
