//! Site memory: learned selectors keyed by (URL pattern, element
//! description), turning vision lookups into deterministic selector
//! lookups.
//!
//! Confidence ledger: +0.05 per successful reuse (saturating at 1.0),
//! −0.10 per failure (floor 0.0). Below 0.5 an entry stops being
//! consulted but is retained for re-learning; below 0.1 it is dropped
//! from the store.

pub mod synthesis;

pub use synthesis::{SelectorCandidate, SelectorKind, candidates_for, is_stable_token};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;
use webpilot_storage::{KvTable, SiteMemoryStorage};
use webpilot_traits::{
    ElementInfo, ExternalError, ExternalResult, ModelClient, PageDriver, VisionOptions,
};

use crate::error::Result;

/// Confidence below which an entry is not consulted.
pub const CONSULT_THRESHOLD: f64 = 0.5;
/// Confidence below which an entry is deleted.
const DELETE_THRESHOLD: f64 = 0.1;
/// Initial confidence when no candidate validated live.
const UNVALIDATED_INITIAL: f64 = 0.7;
/// Candidate-center tolerance against the vision-supplied center.
const CENTER_TOLERANCE_PX: f64 = 50.0;

/// Learned selectors for one (url pattern, description) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteMemory {
    pub pattern: String,
    pub description: String,
    pub candidates: Vec<SelectorCandidate>,
    pub use_count: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub confidence: f64,
    pub last_used: DateTime<Utc>,
}

impl SiteMemory {
    fn key(&self) -> String {
        entry_key(&self.pattern, &self.description)
    }

    /// Apply one reuse outcome to the confidence ledger.
    pub fn record_use(&mut self, success: bool) {
        self.use_count += 1;
        if success {
            self.success_count += 1;
            self.confidence = (self.confidence + 0.05).min(1.0);
        } else {
            self.failure_count += 1;
            self.confidence = (self.confidence - 0.10).max(0.0);
        }
        self.last_used = Utc::now();
    }
}

fn normalize_description(description: &str) -> String {
    description.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn entry_key(pattern: &str, description: &str) -> String {
    format!("{pattern}|{}", normalize_description(description))
}

fn segment_is_generated(segment: &str) -> bool {
    if segment.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    // uuid-ish or long hex identifiers
    let hexish = segment.len() >= 8
        && segment
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == '-');
    hexish && segment.chars().any(|c| c.is_ascii_digit())
}

/// Canonicalize a URL into its site-memory pattern: identifier-like path
/// segments become `*`, and the trailing segment of any multi-segment
/// path is wildcarded so sibling detail pages share one pattern
/// (`/users/123` and `/category/shoes` both end in `*`).
pub fn canonicalize_url(url_str: &str) -> String {
    let Ok(url) = Url::parse(url_str) else {
        return url_str.trim_end_matches('/').to_string();
    };
    let host = url.host_str().unwrap_or_default();
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    if segments.is_empty() {
        return host.to_string();
    }

    let last = segments.len() - 1;
    let mapped: Vec<&str> = segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            if segment_is_generated(segment) || (segments.len() >= 2 && i == last) {
                "*"
            } else {
                *segment
            }
        })
        .collect();

    format!("{host}/{}", mapped.join("/"))
}

/// Persistent store of site memories with an in-memory index.
pub struct SiteMemoryStore {
    storage: SiteMemoryStorage,
    index: RwLock<HashMap<String, SiteMemory>>,
    min_confidence: f64,
}

impl SiteMemoryStore {
    pub fn new(storage: SiteMemoryStorage) -> Result<Self> {
        let mut index = HashMap::new();
        for (key, bytes) in storage.list_raw()? {
            if let Ok(memory) = serde_json::from_slice::<SiteMemory>(&bytes) {
                index.insert(key, memory);
            }
        }
        Ok(Self {
            storage,
            index: RwLock::new(index),
            min_confidence: CONSULT_THRESHOLD,
        })
    }

    /// Override the consult threshold.
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Look up a consultable memory for this URL and description.
    /// Entries under the consult threshold stay invisible here.
    pub fn find_memory(&self, url: &str, description: &str) -> Option<SiteMemory> {
        let key = entry_key(&canonicalize_url(url), description);
        self.index
            .read()
            .get(&key)
            .filter(|m| m.confidence >= self.min_confidence)
            .cloned()
    }

    /// Raw lookup regardless of confidence (re-learning path).
    pub fn get_any(&self, url: &str, description: &str) -> Option<SiteMemory> {
        let key = entry_key(&canonicalize_url(url), description);
        self.index.read().get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    pub fn all(&self) -> Vec<SiteMemory> {
        self.index.read().values().cloned().collect()
    }

    pub fn clear(&self) -> Result<usize> {
        let removed = self.storage.clear()?;
        self.index.write().clear();
        Ok(removed)
    }

    /// Persist a memory, dropping it instead when its confidence has
    /// decayed past the deletion threshold.
    pub fn save(&self, memory: &SiteMemory) -> Result<()> {
        let key = memory.key();
        if memory.confidence < DELETE_THRESHOLD {
            self.storage.delete(&key)?;
            self.index.write().remove(&key);
            info!(pattern = %memory.pattern, "Site memory dropped after confidence decay");
            return Ok(());
        }
        let bytes = serde_json::to_vec(memory)?;
        self.storage.put_raw(&key, &bytes)?;
        self.index.write().insert(key, memory.clone());
        Ok(())
    }

    /// Apply one reuse outcome and persist.
    pub fn record_use(&self, memory: &mut SiteMemory, success: bool) -> Result<()> {
        memory.record_use(success);
        self.save(memory)
    }

    /// Validate candidates on the live page and persist the new memory.
    /// Validated entries start at full confidence, unvalidated ones lower.
    pub async fn synthesize_and_save(
        &self,
        driver: &dyn PageDriver,
        url: &str,
        description: &str,
        element: &ElementInfo,
    ) -> Result<SiteMemory> {
        let mut candidates = candidates_for(element);
        let target_center = element.box_.map(|b| b.center());

        for candidate in &mut candidates {
            if let Ok(Some(found)) = driver.query_selector(&candidate.value).await {
                let centers_close = match (target_center, found.box_.map(|b| b.center())) {
                    (Some((tx, ty)), Some((fx, fy))) => {
                        (tx - fx).abs() <= CENTER_TOLERANCE_PX
                            && (ty - fy).abs() <= CENTER_TOLERANCE_PX
                    }
                    _ => false,
                };
                candidate.validated = centers_close;
            }
        }

        let any_validated = candidates.iter().any(|c| c.validated);
        let memory = SiteMemory {
            pattern: canonicalize_url(url),
            description: normalize_description(description),
            candidates,
            use_count: 0,
            success_count: 0,
            failure_count: 0,
            confidence: if any_validated { 1.0 } else { UNVALIDATED_INITIAL },
            last_used: Utc::now(),
        };
        debug!(
            pattern = %memory.pattern,
            candidates = memory.candidates.len(),
            validated = any_validated,
            "Synthesized site memory"
        );
        self.save(&memory)?;
        Ok(memory)
    }

    /// Try candidates in descending priority on the live page. First hit
    /// bumps confidence and returns the element; exhaustion decays it.
    pub async fn try_reuse(
        &self,
        driver: &dyn PageDriver,
        memory: &mut SiteMemory,
    ) -> Result<Option<ElementInfo>> {
        for candidate in memory.candidates.clone() {
            match driver.query_selector(&candidate.value).await {
                Ok(Some(info)) => {
                    self.record_use(memory, true)?;
                    debug!(selector = %candidate.value, "Site memory reuse hit");
                    return Ok(Some(info));
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(selector = %candidate.value, error = %err, "Selector probe failed");
                }
            }
        }
        self.record_use(memory, false)?;
        Ok(None)
    }
}

/// How an element was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateVia {
    Memory,
    Vision,
}

/// A located element plus the path that found it.
#[derive(Debug, Clone)]
pub struct LocatedElement {
    pub info: ElementInfo,
    pub via: LocateVia,
}

impl LocatedElement {
    pub fn via_label(&self) -> &'static str {
        match self.via {
            LocateVia::Memory => "site-memory",
            LocateVia::Vision => "vision",
        }
    }
}

/// Element location: site memory first, vision fallback, selector
/// synthesis after every vision success.
pub struct ElementLocator {
    store: Arc<SiteMemoryStore>,
    vision: Option<Arc<dyn ModelClient>>,
    vision_timeout: Duration,
}

impl ElementLocator {
    pub fn new(store: Arc<SiteMemoryStore>) -> Self {
        Self {
            store,
            vision: None,
            vision_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_vision(mut self, vision: Arc<dyn ModelClient>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn store(&self) -> &Arc<SiteMemoryStore> {
        &self.store
    }

    /// Find an element by natural-language description.
    pub async fn locate(
        &self,
        driver: &dyn PageDriver,
        description: &str,
    ) -> ExternalResult<LocatedElement> {
        let url = driver.current_url().await?;

        if let Some(mut memory) = self.store.find_memory(&url, description) {
            match self.store.try_reuse(driver, &mut memory).await {
                Ok(Some(info)) => {
                    return Ok(LocatedElement {
                        info,
                        via: LocateVia::Memory,
                    });
                }
                Ok(None) => {
                    debug!(pattern = %memory.pattern, "Site memory exhausted, falling back to vision");
                }
                Err(err) => {
                    debug!(error = %err, "Site memory store error, falling back to vision");
                }
            }
        }

        let Some(vision) = &self.vision else {
            return Err(ExternalError::new(format!(
                "no selector memory for \"{description}\" and no vision model configured"
            )));
        };

        let screenshot = driver.screenshot().await?;
        let prompt = format!(
            "Locate this element on the page: {description}. \
             Respond with only a JSON object {{\"x\": <number>, \"y\": <number>}} \
             giving the element's center in CSS pixels."
        );
        let answer = vision
            .complete_vision(&prompt, &screenshot, VisionOptions::default(), self.vision_timeout)
            .await?;
        let (x, y) = parse_point(&answer).ok_or_else(|| {
            ExternalError::new(format!("vision reply did not contain coordinates: {answer}"))
        })?;

        let info = driver.element_at_point(x, y).await?.ok_or_else(|| {
            ExternalError::new(format!("no element at vision-supplied point ({x}, {y})"))
        })?;

        if let Err(err) = self
            .store
            .synthesize_and_save(driver, &url, description, &info)
            .await
        {
            debug!(error = %err, "Selector synthesis failed; vision result still returned");
        }

        Ok(LocatedElement {
            info,
            via: LocateVia::Vision,
        })
    }
}

fn parse_point(text: &str) -> Option<(f64, f64)> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    let value: serde_json::Value = serde_json::from_str(&text[start..=end]).ok()?;
    Some((value.get("x")?.as_f64()?, value.get("y")?.as_f64()?))
}
