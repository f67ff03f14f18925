//! Semantic memory: patterns distilled from multiple episodes by the
//! consolidation pass.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use webpilot_storage::{KvTable, SemanticStorage};

use crate::error::Result;

use super::embedding::{cosine, embed};

/// One distilled pattern ("on sites with consent banners, dismiss before
/// interacting"). Keyed canonically so consolidation never duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticEntry {
    /// Canonical key (sorted tag signature).
    pub key: String,
    pub pattern: String,
    /// How many episodes support this pattern.
    pub support: u32,
    pub tags: Vec<String>,
    pub embedding: Vec<f32>,
    pub updated_at: DateTime<Utc>,
}

/// Semantic store with the same lock discipline as the episodic tier.
pub struct SemanticMemory {
    storage: SemanticStorage,
    index: RwLock<Vec<SemanticEntry>>,
}

impl SemanticMemory {
    pub fn new(storage: SemanticStorage) -> Result<Self> {
        let mut index = Vec::new();
        for (_, bytes) in storage.list_raw()? {
            if let Ok(entry) = serde_json::from_slice::<SemanticEntry>(&bytes) {
                index.push(entry);
            }
        }
        Ok(Self {
            storage,
            index: RwLock::new(index),
        })
    }

    /// Insert or merge by canonical key. Re-running consolidation over
    /// the same episodes leaves `support` unchanged (idempotent) because
    /// the caller passes absolute counts, not deltas.
    pub fn upsert(&self, key: &str, pattern: &str, tags: &[String], support: u32) -> Result<()> {
        let mut index = self.index.write();
        let entry = SemanticEntry {
            key: key.to_string(),
            pattern: pattern.to_string(),
            support,
            tags: tags.to_vec(),
            embedding: embed(pattern),
            updated_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&entry)?;
        self.storage.put_raw(key, &bytes)?;
        index.retain(|e| e.key != key);
        index.push(entry);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<SemanticEntry> {
        self.index.read().iter().find(|e| e.key == key).cloned()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    pub fn all(&self) -> Vec<SemanticEntry> {
        self.index.read().clone()
    }

    pub fn clear(&self) -> Result<usize> {
        let removed = self.storage.clear()?;
        self.index.write().clear();
        Ok(removed)
    }

    pub fn search(&self, query: &str, k: usize) -> Vec<(f32, SemanticEntry)> {
        let query_embedding = embed(query);
        let index = self.index.read();
        let mut scored: Vec<(f32, SemanticEntry)> = index
            .iter()
            .map(|e| (cosine(&query_embedding, &e.embedding), e.clone()))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use webpilot_storage::StoreSet;

    fn open_memory(dir: &std::path::Path) -> SemanticMemory {
        let stores = StoreSet::open(dir).unwrap();
        SemanticMemory::new(stores.semantic).unwrap()
    }

    #[test]
    fn upsert_by_key_does_not_duplicate() {
        let dir = tempdir().unwrap();
        let memory = open_memory(dir.path());
        let tags = vec!["extraction".to_string()];

        memory
            .upsert("extraction", "extraction goals usually succeed", &tags, 3)
            .unwrap();
        memory
            .upsert("extraction", "extraction goals usually succeed", &tags, 3)
            .unwrap();

        assert_eq!(memory.len(), 1);
        assert_eq!(memory.get("extraction").unwrap().support, 3);
    }

    #[test]
    fn search_ranks_by_similarity() {
        let dir = tempdir().unwrap();
        let memory = open_memory(dir.path());
        memory
            .upsert(
                "consent",
                "on sites with consent banners, dismiss before interacting",
                &["interaction".to_string()],
                4,
            )
            .unwrap();
        memory
            .upsert("tables", "pricing tables need the table extractor", &[], 3)
            .unwrap();

        let hits = memory.search("dismiss the consent banner first", 1);
        assert_eq!(hits[0].1.key, "consent");
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let memory = open_memory(dir.path());
            memory.upsert("k", "pattern text", &[], 2).unwrap();
        }
        let memory = open_memory(dir.path());
        assert_eq!(memory.get("k").unwrap().pattern, "pattern text");
    }
}
