//! Episodic memory: past goal outcomes, searchable by similarity.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use webpilot_storage::{EpisodeStorage, KvTable};

use crate::error::Result;
use crate::reliability::ErrorKind;
use crate::tools::ToolCall;

use super::embedding::{cosine, embed};

/// Terminal outcome of one goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EpisodeOutcome {
    Success,
    Failed { error: ErrorKind },
    Timeout,
    Cancelled,
    Escalated,
}

impl EpisodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// CLI exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failed { .. } | Self::Escalated => 1,
            Self::Timeout => 2,
            Self::Cancelled => 3,
        }
    }
}

/// Persisted record of one completed goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub goal_text: String,
    /// Compacted one-line step trace.
    pub trace: Vec<String>,
    /// The successful call sequence, for replay and skill promotion.
    pub calls: Vec<ToolCall>,
    pub tool_sequence: Vec<String>,
    pub outcome: EpisodeOutcome,
    pub duration_ms: u64,
    pub tags: Vec<String>,
    pub importance: f32,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl Episode {
    pub fn new(goal_text: impl Into<String>, outcome: EpisodeOutcome) -> Self {
        let goal_text = goal_text.into();
        let embedding = embed(&goal_text);
        Self {
            id: Uuid::new_v4().to_string(),
            goal_text,
            trace: Vec::new(),
            calls: Vec::new(),
            tool_sequence: Vec::new(),
            outcome,
            duration_ms: 0,
            tags: Vec::new(),
            importance: 0.5,
            embedding,
            created_at: Utc::now(),
        }
    }
}

/// Filters applied before similarity ranking.
#[derive(Debug, Clone, Default)]
pub struct EpisodeFilter {
    pub success: Option<bool>,
    pub tags: Vec<String>,
}

/// Episodic store: redb-backed with an in-memory index for search.
/// Writer-priority lock; readers run in parallel.
pub struct EpisodicMemory {
    storage: EpisodeStorage,
    index: RwLock<Vec<Episode>>,
}

impl EpisodicMemory {
    pub fn new(storage: EpisodeStorage) -> Result<Self> {
        let mut index = Vec::new();
        for (id, bytes) in storage.list_raw()? {
            match serde_json::from_slice::<Episode>(&bytes) {
                Ok(episode) => index.push(episode),
                Err(err) => debug!(id, error = %err, "Skipping undecodable episode"),
            }
        }
        index.sort_by_key(|e| e.created_at);
        Ok(Self {
            storage,
            index: RwLock::new(index),
        })
    }

    pub fn save(&self, episode: &Episode) -> Result<()> {
        let bytes = serde_json::to_vec(episode)?;
        self.storage.put_raw(&episode.id, &bytes)?;
        let mut index = self.index.write();
        index.retain(|e| e.id != episode.id);
        index.push(episode.clone());
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Episode> {
        self.index.read().iter().find(|e| e.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Most recent `n` episodes, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Episode> {
        let index = self.index.read();
        let start = index.len().saturating_sub(n);
        index[start..].to_vec()
    }

    pub fn all(&self) -> Vec<Episode> {
        self.index.read().clone()
    }

    pub fn clear(&self) -> Result<usize> {
        let removed = self.storage.clear()?;
        self.index.write().clear();
        Ok(removed)
    }

    /// Top-K by embedding similarity to the query, after filters.
    pub fn search(&self, query: &str, filter: &EpisodeFilter, k: usize) -> Vec<(f32, Episode)> {
        let query_embedding = embed(query);
        let index = self.index.read();
        let mut scored: Vec<(f32, Episode)> = index
            .iter()
            .filter(|e| {
                filter
                    .success
                    .map(|wanted| e.outcome.is_success() == wanted)
                    .unwrap_or(true)
                    && filter.tags.iter().all(|t| e.tags.contains(t))
            })
            .map(|e| (cosine(&query_embedding, &e.embedding), e.clone()))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k);
        scored
    }
}
