//! Deterministic mock page driver for kernel tests.
//!
//! Behavior is scripted per page: canned accessibility trees, element
//! descriptors, selector matches, evaluate results, and event taps.
//! Failures are injected per method, either a finite queue (`fail_next`)
//! or permanently (`fail_always`). Every call is counted so tests can
//! assert "the driver was not contacted".

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::driver::{
    AxNode, ConsoleEvent, ElementInfo, LoadState, NetworkEvent, PageDriver,
};
use crate::error::{ExternalError, ExternalResult};

/// A canned page the mock driver can serve.
#[derive(Debug, Clone, Default)]
pub struct MockPage {
    pub url: String,
    pub title: String,
    pub tree: AxNode,
    pub elements: HashMap<u64, ElementInfo>,
    pub selectors: HashMap<String, ElementInfo>,
    /// (script fragment, result) pairs tried in order against `evaluate`.
    pub eval_results: Vec<(String, Value)>,
    pub console: Vec<ConsoleEvent>,
    pub network: Vec<NetworkEvent>,
}

impl MockPage {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_tree(mut self, tree: AxNode) -> Self {
        self.tree = tree;
        self
    }

    pub fn with_element(mut self, info: ElementInfo) -> Self {
        self.elements.insert(info.backend_id, info);
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>, info: ElementInfo) -> Self {
        self.selectors.insert(selector.into(), info);
        self
    }

    pub fn with_eval(mut self, fragment: impl Into<String>, result: Value) -> Self {
        self.eval_results.push((fragment.into(), result));
        self
    }

    pub fn with_console(mut self, events: Vec<ConsoleEvent>) -> Self {
        self.console = events;
        self
    }

    pub fn with_network(mut self, events: Vec<NetworkEvent>) -> Self {
        self.network = events;
        self
    }
}

/// An obstruction overlay: `element` is reported by `element_at_point`
/// for any coordinate inside its box until `dismiss_backend_id` is
/// clicked or Escape is pressed (when `escape_dismisses`).
#[derive(Debug, Clone)]
pub struct MockObstruction {
    pub element: ElementInfo,
    pub dismiss_backend_id: u64,
    pub escape_dismisses: bool,
}

#[derive(Default)]
struct Inner {
    pages: HashMap<String, MockPage>,
    current_url: String,
    obstructions: Vec<MockObstruction>,
    fail_queues: HashMap<String, VecDeque<ExternalError>>,
    always_fail: HashMap<String, ExternalError>,
    calls: HashMap<String, usize>,
    actions: Vec<String>,
}

/// Scripted in-memory `PageDriver`.
#[derive(Default)]
pub struct MockPageDriver {
    inner: Mutex<Inner>,
}

impl MockPageDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page; the first registered page becomes current.
    pub fn add_page(&self, page: MockPage) {
        let mut inner = self.inner.lock().unwrap();
        if inner.current_url.is_empty() {
            inner.current_url = page.url.clone();
        }
        inner.pages.insert(page.url.clone(), page);
    }

    pub fn set_current_url(&self, url: &str) {
        self.inner.lock().unwrap().current_url = url.to_string();
    }

    /// Replace the accessibility tree of the current page (page mutation
    /// between snapshots).
    pub fn set_tree(&self, tree: AxNode) {
        let mut inner = self.inner.lock().unwrap();
        let url = inner.current_url.clone();
        inner.pages.entry(url.clone()).or_insert_with(|| MockPage::new(url)).tree = tree;
    }

    /// Upsert one element descriptor on the current page.
    pub fn set_element(&self, info: ElementInfo) {
        let mut inner = self.inner.lock().unwrap();
        let url = inner.current_url.clone();
        inner
            .pages
            .entry(url.clone())
            .or_insert_with(|| MockPage::new(url))
            .elements
            .insert(info.backend_id, info);
    }

    pub fn add_obstruction(&self, obstruction: MockObstruction) {
        self.inner.lock().unwrap().obstructions.push(obstruction);
    }

    pub fn active_obstructions(&self) -> usize {
        self.inner.lock().unwrap().obstructions.len()
    }

    /// Queue `count` failures for a method.
    pub fn fail_next(&self, method: &str, err: ExternalError, count: usize) {
        let mut inner = self.inner.lock().unwrap();
        let queue = inner.fail_queues.entry(method.to_string()).or_default();
        for _ in 0..count {
            queue.push_back(err.clone());
        }
    }

    /// Make a method fail permanently (until cleared).
    pub fn fail_always(&self, method: &str, err: ExternalError) {
        self.inner
            .lock()
            .unwrap()
            .always_fail
            .insert(method.to_string(), err);
    }

    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_queues.clear();
        inner.always_fail.clear();
    }

    /// Number of calls recorded for one method.
    pub fn calls(&self, method: &str) -> usize {
        *self.inner.lock().unwrap().calls.get(method).unwrap_or(&0)
    }

    /// Total calls across all methods.
    pub fn total_calls(&self) -> usize {
        self.inner.lock().unwrap().calls.values().sum()
    }

    /// Ordered log of interaction actions ("click:42", "type:7:hello").
    pub fn action_log(&self) -> Vec<String> {
        self.inner.lock().unwrap().actions.clone()
    }

    fn enter(&self, method: &str) -> ExternalResult<()> {
        let mut inner = self.inner.lock().unwrap();
        *inner.calls.entry(method.to_string()).or_insert(0) += 1;
        if let Some(queue) = inner.fail_queues.get_mut(method)
            && let Some(err) = queue.pop_front()
        {
            return Err(err);
        }
        if let Some(err) = inner.always_fail.get(method) {
            return Err(err.clone());
        }
        Ok(())
    }

    fn with_current_page<T>(&self, f: impl FnOnce(&MockPage) -> T) -> T {
        let inner = self.inner.lock().unwrap();
        let blank = MockPage::new(inner.current_url.clone());
        let page = inner.pages.get(&inner.current_url).unwrap_or(&blank);
        f(page)
    }

    fn record_action(&self, action: String) {
        self.inner.lock().unwrap().actions.push(action);
    }
}

#[async_trait]
impl PageDriver for MockPageDriver {
    async fn navigate(&self, url: &str) -> ExternalResult<()> {
        self.enter("navigate")?;
        let mut inner = self.inner.lock().unwrap();
        inner.current_url = url.to_string();
        inner.actions.push(format!("navigate:{url}"));
        Ok(())
    }

    async fn current_url(&self) -> ExternalResult<String> {
        self.enter("current_url")?;
        Ok(self.inner.lock().unwrap().current_url.clone())
    }

    async fn title(&self) -> ExternalResult<String> {
        self.enter("title")?;
        Ok(self.with_current_page(|p| p.title.clone()))
    }

    async fn accessibility_tree(&self) -> ExternalResult<AxNode> {
        self.enter("accessibility_tree")?;
        Ok(self.with_current_page(|p| p.tree.clone()))
    }

    async fn describe_element(&self, backend_id: u64) -> ExternalResult<Option<ElementInfo>> {
        self.enter("describe_element")?;
        Ok(self.with_current_page(|p| p.elements.get(&backend_id).cloned()))
    }

    async fn element_at_point(&self, x: f64, y: f64) -> ExternalResult<Option<ElementInfo>> {
        self.enter("element_at_point")?;
        let inner = self.inner.lock().unwrap();
        for obstruction in &inner.obstructions {
            if let Some(box_) = obstruction.element.box_
                && x >= box_.x
                && x <= box_.x + box_.width
                && y >= box_.y
                && y <= box_.y + box_.height
            {
                return Ok(Some(obstruction.element.clone()));
            }
        }
        let blank = MockPage::new(inner.current_url.clone());
        let page = inner.pages.get(&inner.current_url).unwrap_or(&blank);
        let hit = page.elements.values().find(|info| {
            info.box_.is_some_and(|b| {
                x >= b.x && x <= b.x + b.width && y >= b.y && y <= b.y + b.height
            })
        });
        Ok(hit.cloned())
    }

    async fn query_selector(&self, selector: &str) -> ExternalResult<Option<ElementInfo>> {
        self.enter("query_selector")?;
        Ok(self.with_current_page(|p| p.selectors.get(selector).cloned()))
    }

    async fn scroll_into_view(&self, backend_id: u64) -> ExternalResult<()> {
        self.enter("scroll_into_view")?;
        let mut inner = self.inner.lock().unwrap();
        let url = inner.current_url.clone();
        if let Some(page) = inner.pages.get_mut(&url)
            && let Some(info) = page.elements.get_mut(&backend_id)
        {
            info.in_viewport = true;
        }
        inner.actions.push(format!("scroll_into_view:{backend_id}"));
        Ok(())
    }

    async fn click(&self, backend_id: u64) -> ExternalResult<()> {
        self.enter("click")?;
        let mut inner = self.inner.lock().unwrap();
        inner
            .obstructions
            .retain(|o| o.dismiss_backend_id != backend_id);
        inner.actions.push(format!("click:{backend_id}"));
        Ok(())
    }

    async fn type_text(&self, backend_id: u64, text: &str) -> ExternalResult<()> {
        self.enter("type_text")?;
        self.record_action(format!("type:{backend_id}:{text}"));
        Ok(())
    }

    async fn hover(&self, backend_id: u64) -> ExternalResult<()> {
        self.enter("hover")?;
        self.record_action(format!("hover:{backend_id}"));
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> ExternalResult<()> {
        self.enter("click_at")?;
        self.record_action(format!("click_at:{x},{y}"));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> ExternalResult<()> {
        self.enter("press_key")?;
        let mut inner = self.inner.lock().unwrap();
        if key == "Escape" {
            inner.obstructions.retain(|o| !o.escape_dismisses);
        }
        inner.actions.push(format!("press_key:{key}"));
        Ok(())
    }

    async fn scroll_by(&self, dx: f64, dy: f64) -> ExternalResult<()> {
        self.enter("scroll_by")?;
        self.record_action(format!("scroll_by:{dx},{dy}"));
        Ok(())
    }

    async fn screenshot(&self) -> ExternalResult<Vec<u8>> {
        self.enter("screenshot")?;
        Ok(b"mock-screenshot-bytes".to_vec())
    }

    async fn evaluate(&self, script: &str) -> ExternalResult<Value> {
        self.enter("evaluate")?;
        Ok(self.with_current_page(|p| {
            p.eval_results
                .iter()
                .find(|(fragment, _)| script.contains(fragment.as_str()))
                .map(|(_, result)| result.clone())
                .unwrap_or(Value::Null)
        }))
    }

    async fn wait_for_load_state(&self, state: LoadState) -> ExternalResult<()> {
        self.enter("wait_for_load_state")?;
        self.record_action(format!("wait_for_load_state:{state:?}"));
        Ok(())
    }

    async fn console_events(&self) -> ExternalResult<Vec<ConsoleEvent>> {
        self.enter("console_events")?;
        Ok(self.with_current_page(|p| p.console.clone()))
    }

    async fn network_events(&self) -> ExternalResult<Vec<NetworkEvent>> {
        self.enter("network_events")?;
        Ok(self.with_current_page(|p| p.network.clone()))
    }

    async fn attach_debug_port(&self, port: u16) -> ExternalResult<()> {
        self.enter("attach_debug_port")?;
        self.record_action(format!("attach:{port}"));
        Ok(())
    }
}
