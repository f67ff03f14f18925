//! Snapshot cache with TTL + LRU eviction and a coherent diff anchor.
//!
//! The cache and the per-key diff anchor live behind one mutex and are
//! only ever updated together: a caller never observes a cached snapshot
//! whose anchor has not been updated to match. Diff-mode captures bypass
//! the cached value (a diff must reflect the page as it is now) but still
//! refresh both the cache and the anchor on the way out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};
use webpilot_traits::{ExternalResult, PageDriver};

use super::{
    Snapshot, SnapshotDiff, SnapshotOptions, build_snapshot, diff_snapshots,
};

/// Cache tuning.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotCacheConfig {
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for SnapshotCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(2),
            capacity: 10,
        }
    }
}

/// The stable return shape: full snapshot or delta, decided by
/// `options.diff` and never by cache state.
#[derive(Debug, Clone)]
pub enum SnapshotResult {
    Full(Arc<Snapshot>),
    Diff(SnapshotDiff),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    url: String,
    scope: Option<String>,
    exclude: Vec<String>,
}

struct CacheEntry {
    snapshot: Arc<Snapshot>,
    inserted_at: Instant,
    last_used: Instant,
}

#[derive(Default)]
struct State {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Previous snapshot per key, the baseline for the next diff.
    anchors: HashMap<CacheKey, Arc<Snapshot>>,
    /// Most recent capture overall; refs resolve against this.
    current: Option<Arc<Snapshot>>,
    generation: u64,
}

/// Snapshot production, caching, and ref resolution.
pub struct SnapshotService {
    config: SnapshotCacheConfig,
    state: Mutex<State>,
}

/// Ref resolution failure modes.
#[derive(Debug, Clone, PartialEq)]
pub enum RefError {
    /// Ref was minted by an older snapshot generation.
    Stale,
    /// Ref does not exist in the current snapshot.
    Unknown,
    /// No snapshot has been captured yet.
    NoSnapshot,
}

impl SnapshotService {
    pub fn new(config: SnapshotCacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    /// Capture (or serve from cache) a snapshot of the driver's current
    /// page. See the module docs for the cache/diff coherence contract.
    pub async fn capture(
        &self,
        driver: &dyn PageDriver,
        options: &SnapshotOptions,
    ) -> ExternalResult<SnapshotResult> {
        let url = driver.current_url().await?;
        let key = CacheKey {
            url: url.clone(),
            scope: options.scope.clone(),
            exclude: options.exclude.clone(),
        };

        // Fast path: full-mode cache hit. The anchor is refreshed to the
        // served value inside the same critical section.
        if !options.diff && !options.force {
            let mut state = self.state.lock();
            if let Some(entry) = state.entries.get_mut(&key)
                && entry.inserted_at.elapsed() < self.config.ttl
            {
                entry.last_used = Instant::now();
                let snapshot = entry.snapshot.clone();
                state.anchors.insert(key, snapshot.clone());
                trace!(url, "Snapshot cache hit");
                return Ok(SnapshotResult::Full(snapshot));
            }
        }

        // Fresh capture. The driver is awaited without holding the lock.
        let title = driver.title().await?;
        let tree = driver.accessibility_tree().await?;

        let mut state = self.state.lock();
        state.generation += 1;
        let generation = state.generation;
        let snapshot = Arc::new(build_snapshot(&url, &title, &tree, generation, options));
        debug!(
            url,
            generation,
            elements = snapshot.elements.len(),
            "Captured snapshot"
        );

        let previous = state.anchors.get(&key).cloned();

        // Cache + anchor + current updated together.
        self.insert_entry(&mut state, key.clone(), snapshot.clone());
        state.anchors.insert(key, snapshot.clone());
        state.current = Some(snapshot.clone());

        if options.diff {
            let diff = match previous {
                Some(previous) => diff_snapshots(&previous, &snapshot),
                // No baseline: everything is new.
                None => SnapshotDiff {
                    added: snapshot.elements.iter().map(|e| e.ref_.clone()).collect(),
                    ..Default::default()
                },
            };
            Ok(SnapshotResult::Diff(diff))
        } else {
            Ok(SnapshotResult::Full(snapshot))
        }
    }

    fn insert_entry(&self, state: &mut State, key: CacheKey, snapshot: Arc<Snapshot>) {
        let now = Instant::now();
        if state.entries.len() >= self.config.capacity && !state.entries.contains_key(&key) {
            // Evict the least-recently-used entry.
            if let Some(lru_key) = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                state.entries.remove(&lru_key);
            }
        }
        state.entries.insert(
            key,
            CacheEntry {
                snapshot,
                inserted_at: now,
                last_used: now,
            },
        );
    }

    /// Resolve a ref to its driver backend id against the current
    /// snapshot. Stale generations are rejected.
    pub fn resolve(&self, ref_: &super::ElementRef) -> Result<u64, RefError> {
        let state = self.state.lock();
        let Some(current) = &state.current else {
            return Err(RefError::NoSnapshot);
        };
        match ref_.generation() {
            Some(generation) if generation == current.generation => current
                .element(ref_)
                .map(|e| e.backend_id)
                .ok_or(RefError::Unknown),
            _ => Err(RefError::Stale),
        }
    }

    /// The most recent capture, if any.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.state.lock().current.clone()
    }

    /// Drop expired entries. Run by the background TTL sweeper.
    pub fn sweep_expired(&self) -> usize {
        let mut state = self.state.lock();
        let ttl = self.config.ttl;
        let before = state.entries.len();
        state.entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
        before - state.entries.len()
    }

    /// Periodic TTL sweep task; aborts with its JoinHandle.
    pub fn spawn_ttl_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        let period = service.config.ttl.max(Duration::from_millis(250));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let evicted = service.sweep_expired();
                if evicted > 0 {
                    trace!(evicted, "Snapshot TTL sweep");
                }
            }
        })
    }
}
