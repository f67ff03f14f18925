//! Skill memory: named, reusable action sequences with execution stats.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use webpilot_storage::{KvTable, SkillStorage};

use crate::error::Result;
use crate::tools::ToolCall;

use super::embedding::text_similarity;

/// Skills below this success rate are never preferred over planning.
pub const SKILL_SUCCESS_THRESHOLD: f64 = 0.7;
/// Minimum goal similarity for a skill to count as a match.
const SKILL_MATCH_SIMILARITY: f32 = 0.35;

/// A reusable action sequence derived from past successful episodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub description: String,
    pub calls: Vec<ToolCall>,
    pub preconditions: Vec<String>,
    pub postconditions: Vec<String>,
    pub exec_count: u32,
    pub success_count: u32,
    pub total_duration_ms: u64,
    pub updated_at: DateTime<Utc>,
}

impl Skill {
    pub fn new(id: impl Into<String>, name: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            calls,
            preconditions: Vec::new(),
            postconditions: Vec::new(),
            exec_count: 0,
            success_count: 0,
            total_duration_ms: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.exec_count == 0 {
            0.0
        } else {
            f64::from(self.success_count) / f64::from(self.exec_count)
        }
    }

    pub fn avg_duration_ms(&self) -> u64 {
        if self.exec_count == 0 {
            0
        } else {
            self.total_duration_ms / u64::from(self.exec_count)
        }
    }

    /// The canonical id for a tool sequence, used by consolidation so a
    /// repeating plan maps to one skill.
    pub fn sequence_id(tool_sequence: &[String]) -> String {
        format!("seq:{}", tool_sequence.join(">"))
    }
}

/// Skill store.
pub struct SkillMemory {
    storage: SkillStorage,
    index: RwLock<Vec<Skill>>,
}

impl SkillMemory {
    pub fn new(storage: SkillStorage) -> Result<Self> {
        let mut index = Vec::new();
        for (_, bytes) in storage.list_raw()? {
            if let Ok(skill) = serde_json::from_slice::<Skill>(&bytes) {
                index.push(skill);
            }
        }
        Ok(Self {
            storage,
            index: RwLock::new(index),
        })
    }

    pub fn save(&self, skill: &Skill) -> Result<()> {
        let bytes = serde_json::to_vec(skill)?;
        self.storage.put_raw(&skill.id, &bytes)?;
        let mut index = self.index.write();
        index.retain(|s| s.id != skill.id);
        index.push(skill.clone());
        Ok(())
    }

    /// Insert only if absent; keeps consolidation idempotent.
    pub fn save_if_absent(&self, skill: &Skill) -> Result<bool> {
        let bytes = serde_json::to_vec(skill)?;
        let inserted = self.storage.insert_if_absent(&skill.id, &bytes)?;
        if inserted {
            self.index.write().push(skill.clone());
        }
        Ok(inserted)
    }

    pub fn get(&self, id: &str) -> Option<Skill> {
        self.index.read().iter().find(|s| s.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    pub fn all(&self) -> Vec<Skill> {
        self.index.read().clone()
    }

    pub fn clear(&self) -> Result<usize> {
        let removed = self.storage.clear()?;
        self.index.write().clear();
        Ok(removed)
    }

    /// Best reliable skill for a goal: similarity above the match floor
    /// and success rate at or above the preference threshold.
    pub fn find_matching(&self, goal: &str) -> Option<Skill> {
        let index = self.index.read();
        index
            .iter()
            .filter(|s| s.exec_count > 0 && s.success_rate() >= SKILL_SUCCESS_THRESHOLD)
            .map(|s| {
                let text = format!("{} {}", s.name, s.description);
                (text_similarity(goal, &text), s)
            })
            .filter(|(similarity, _)| *similarity >= SKILL_MATCH_SIMILARITY)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, s)| s.clone())
    }

    /// Record one execution outcome for a skill.
    pub fn record_execution(&self, id: &str, success: bool, duration_ms: u64) -> Result<()> {
        let updated = {
            let mut index = self.index.write();
            let Some(skill) = index.iter_mut().find(|s| s.id == id) else {
                return Ok(());
            };
            skill.exec_count += 1;
            if success {
                skill.success_count += 1;
            }
            skill.total_duration_ms += duration_ms;
            skill.updated_at = Utc::now();
            skill.clone()
        };
        let bytes = serde_json::to_vec(&updated)?;
        self.storage.put_raw(&updated.id, &bytes)?;
        Ok(())
    }

    /// Text search over name + description.
    pub fn search(&self, query: &str, k: usize) -> Vec<(f32, Skill)> {
        let index = self.index.read();
        let mut scored: Vec<(f32, Skill)> = index
            .iter()
            .map(|s| {
                let text = format!("{} {}", s.name, s.description);
                (text_similarity(query, &text), s.clone())
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k);
        scored
    }
}
