//! The `PageDriver` contract: a handle to one open browser page.
//!
//! Element addressing happens through driver-private backend node ids.
//! The kernel's snapshot subsystem maps those to opaque, generation-scoped
//! refs; this trait never sees refs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ExternalError, ExternalResult};

/// Axis-aligned element geometry in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// One node of the accessibility tree as fetched from the driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AxNode {
    /// Driver-private node id, stable until the next navigation.
    pub backend_id: u64,
    pub role: String,
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub box_: Option<BoundingBox>,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub children: Vec<AxNode>,
}

/// Everything pre-action validation needs to know about one element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementInfo {
    pub backend_id: u64,
    pub role: String,
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub box_: Option<BoundingBox>,
    pub visible: bool,
    pub in_viewport: bool,
    pub disabled: bool,
    pub read_only: bool,
    pub pointer_events: bool,
}

impl ElementInfo {
    /// Minimal interactable element, used heavily by tests.
    pub fn interactable(backend_id: u64, role: &str, name: &str, box_: BoundingBox) -> Self {
        Self {
            backend_id,
            role: role.to_string(),
            name: name.to_string(),
            attributes: BTreeMap::new(),
            box_: Some(box_),
            visible: true,
            in_viewport: true,
            disabled: false,
            read_only: false,
            pointer_events: true,
        }
    }
}

/// Page lifecycle states the kernel can await.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    DomContentLoaded,
    NetworkIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warning,
    Error,
}

/// One console message captured by the driver's event tap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleEvent {
    pub level: ConsoleLevel,
    pub text: String,
    pub timestamp_ms: i64,
}

/// One network request observed by the driver's event tap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub url: String,
    pub method: String,
    pub status: Option<u16>,
    pub failed: bool,
    #[serde(default)]
    pub error_text: Option<String>,
}

/// A handle to one open page. All methods may raise [`ExternalError`];
/// the reliability fabric classifies and retries them.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> ExternalResult<()>;
    async fn current_url(&self) -> ExternalResult<String>;
    async fn title(&self) -> ExternalResult<String>;

    /// Fetch the full accessibility tree rooted at the document.
    async fn accessibility_tree(&self) -> ExternalResult<AxNode>;

    /// Resolve a backend node id to its current state, `None` if gone.
    async fn describe_element(&self, backend_id: u64) -> ExternalResult<Option<ElementInfo>>;

    /// Topmost rendered element at a viewport coordinate.
    async fn element_at_point(&self, x: f64, y: f64) -> ExternalResult<Option<ElementInfo>>;

    /// First element matched by a CSS selector or xpath (`xpath=` prefix).
    async fn query_selector(&self, selector: &str) -> ExternalResult<Option<ElementInfo>>;

    async fn scroll_into_view(&self, backend_id: u64) -> ExternalResult<()>;
    async fn click(&self, backend_id: u64) -> ExternalResult<()>;
    async fn type_text(&self, backend_id: u64, text: &str) -> ExternalResult<()>;
    async fn hover(&self, backend_id: u64) -> ExternalResult<()>;

    /// Click a raw viewport coordinate (obstruction backdrop dismissal).
    async fn click_at(&self, x: f64, y: f64) -> ExternalResult<()>;

    async fn press_key(&self, key: &str) -> ExternalResult<()>;
    async fn scroll_by(&self, dx: f64, dy: f64) -> ExternalResult<()>;

    /// Viewport screenshot as encoded image bytes.
    async fn screenshot(&self) -> ExternalResult<Vec<u8>>;

    /// Evaluate a script in page context and return its JSON result.
    async fn evaluate(&self, script: &str) -> ExternalResult<Value>;

    async fn wait_for_load_state(&self, state: LoadState) -> ExternalResult<()>;

    /// Drain buffered console messages since the last call.
    async fn console_events(&self) -> ExternalResult<Vec<ConsoleEvent>>;

    /// Drain buffered network events since the last call.
    async fn network_events(&self) -> ExternalResult<Vec<NetworkEvent>>;

    /// Attach to an externally running browser on a debug port.
    /// Drivers that are constructed already attached may keep the default.
    async fn attach_debug_port(&self, port: u16) -> ExternalResult<()> {
        let _ = port;
        Err(ExternalError::new("attach not supported by this driver"))
    }
}
