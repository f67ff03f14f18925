//! Memory manager: the facade the orchestrator reads before each model
//! call and writes after each goal, plus the consolidation pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};
use webpilot_storage::StoreSet;

use crate::error::Result;

use super::episodic::{Episode, EpisodeFilter, EpisodicMemory};
use super::semantic::{SemanticEntry, SemanticMemory};
use super::skills::{Skill, SkillMemory};

/// Retrieval and consolidation tuning.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Hits returned per tier during enrichment.
    pub top_k: usize,
    /// Consolidate after this many saved episodes…
    pub consolidate_every: usize,
    /// …or after this much time, whichever comes first.
    pub consolidate_interval: Duration,
    /// Minimum cluster size to materialize a semantic pattern.
    pub min_cluster: usize,
    /// Repetitions of a successful sequence before skill promotion.
    pub promote_after: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            consolidate_every: 10,
            consolidate_interval: Duration::from_secs(300),
            min_cluster: 3,
            promote_after: 2,
        }
    }
}

/// Parallel retrieval results across the persistent tiers.
#[derive(Debug, Default)]
pub struct SearchAllResults {
    pub episodic: Vec<(f32, Episode)>,
    pub semantic: Vec<(f32, SemanticEntry)>,
    pub skills: Vec<(f32, Skill)>,
}

/// What one consolidation pass produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidationStats {
    pub patterns_updated: usize,
    pub skills_promoted: usize,
}

/// The three persistent tiers behind one facade.
pub struct MemoryManager {
    episodic: Arc<EpisodicMemory>,
    semantic: Arc<SemanticMemory>,
    skills: Arc<SkillMemory>,
    config: MemoryConfig,
    episodes_since_consolidation: AtomicUsize,
    last_consolidation: Mutex<Instant>,
}

impl MemoryManager {
    pub fn open(stores: &StoreSet, config: MemoryConfig) -> Result<Self> {
        Ok(Self {
            episodic: Arc::new(EpisodicMemory::new(stores.episodes.clone())?),
            semantic: Arc::new(SemanticMemory::new(stores.semantic.clone())?),
            skills: Arc::new(SkillMemory::new(stores.skills.clone())?),
            config,
            episodes_since_consolidation: AtomicUsize::new(0),
            last_consolidation: Mutex::new(Instant::now()),
        })
    }

    pub fn episodic(&self) -> &Arc<EpisodicMemory> {
        &self.episodic
    }

    pub fn semantic(&self) -> &Arc<SemanticMemory> {
        &self.semantic
    }

    pub fn skills(&self) -> &Arc<SkillMemory> {
        &self.skills
    }

    /// Context enrichment for the next model call: matching skill first,
    /// then similar episodes, then known patterns.
    pub fn enriched_context(&self, query: &str) -> String {
        let mut out = String::new();

        if let Some(skill) = self.skills.find_matching(query) {
            out.push_str(&format!(
                "A reliable skill matches this goal: \"{}\" ({} runs, {:.0}% success). \
                 Its sequence: {}.\n\n",
                skill.name,
                skill.exec_count,
                skill.success_rate() * 100.0,
                skill
                    .calls
                    .iter()
                    .map(|c| c.name())
                    .collect::<Vec<_>>()
                    .join(" -> "),
            ));
        }

        let episodes = self
            .episodic
            .search(query, &EpisodeFilter::default(), self.config.top_k);
        if !episodes.is_empty() {
            out.push_str("Similar past episodes:\n");
            for (score, episode) in &episodes {
                let outcome = if episode.outcome.is_success() {
                    "succeeded"
                } else {
                    "failed"
                };
                out.push_str(&format!(
                    "- \"{}\" {} in {} steps (similarity {:.2})\n",
                    episode.goal_text,
                    outcome,
                    episode.trace.len(),
                    score
                ));
            }
            out.push('\n');
        }

        let patterns = self.semantic.search(query, self.config.top_k);
        if !patterns.is_empty() {
            out.push_str("Known patterns:\n");
            for (_, entry) in &patterns {
                out.push_str(&format!("- {}\n", entry.pattern));
            }
        }

        out
    }

    /// Parallel retrieval across the tiers; they touch independent
    /// stores, so the three searches are dispatched concurrently.
    pub async fn search_all(&self, query: &str) -> SearchAllResults {
        let k = self.config.top_k;
        let query = query.to_string();

        let episodic = {
            let store = Arc::clone(&self.episodic);
            let query = query.clone();
            tokio::task::spawn_blocking(move || {
                store.search(&query, &EpisodeFilter::default(), k)
            })
        };
        let semantic = {
            let store = Arc::clone(&self.semantic);
            let query = query.clone();
            tokio::task::spawn_blocking(move || store.search(&query, k))
        };
        let skills = {
            let store = Arc::clone(&self.skills);
            tokio::task::spawn_blocking(move || store.search(&query, k))
        };

        let (episodic, semantic, skills) = tokio::join!(episodic, semantic, skills);
        SearchAllResults {
            episodic: episodic.unwrap_or_default(),
            semantic: semantic.unwrap_or_default(),
            skills: skills.unwrap_or_default(),
        }
    }

    /// Persist an episode and trigger consolidation when due.
    pub fn save_episode(&self, episode: &Episode) -> Result<()> {
        self.episodic.save(episode)?;
        let pending = self
            .episodes_since_consolidation
            .fetch_add(1, Ordering::Relaxed)
            + 1;

        let interval_elapsed =
            self.last_consolidation.lock().elapsed() >= self.config.consolidate_interval;
        if pending >= self.config.consolidate_every || interval_elapsed {
            self.consolidate()?;
        }
        Ok(())
    }

    /// Record a skill execution outcome (pass-through).
    pub fn record_skill_execution(&self, id: &str, success: bool, duration_ms: u64) -> Result<()> {
        self.skills.record_execution(id, success, duration_ms)
    }

    /// Consolidation: cluster recent episodes into semantic patterns and
    /// promote repeating successful sequences into skills. Idempotent:
    /// re-running over the same episodes updates the same canonical keys.
    pub fn consolidate(&self) -> Result<ConsolidationStats> {
        let mut stats = ConsolidationStats::default();
        let recent = self.episodic.recent(50);

        // Cluster by sorted tag signature.
        let mut clusters: std::collections::BTreeMap<String, Vec<&Episode>> = Default::default();
        for episode in &recent {
            if episode.tags.is_empty() {
                continue;
            }
            let mut tags = episode.tags.clone();
            tags.sort();
            clusters.entry(tags.join("+")).or_default().push(episode);
        }

        for (key, members) in &clusters {
            if members.len() < self.config.min_cluster {
                continue;
            }
            let successes = members.iter().filter(|e| e.outcome.is_success()).count();
            let tools: std::collections::BTreeSet<&str> = members
                .iter()
                .flat_map(|e| e.tool_sequence.iter().map(String::as_str))
                .collect();
            let pattern = format!(
                "goals tagged [{}] completed {} of {} times; typical tools: {}",
                key,
                successes,
                members.len(),
                tools.into_iter().collect::<Vec<_>>().join(", "),
            );
            let tags: Vec<String> = key.split('+').map(str::to_string).collect();
            self.semantic
                .upsert(key, &pattern, &tags, members.len() as u32)?;
            stats.patterns_updated += 1;
        }

        // Promote repeating successful sequences into skills.
        let mut sequences: std::collections::BTreeMap<String, Vec<&Episode>> = Default::default();
        for episode in &recent {
            if !episode.outcome.is_success() || episode.tool_sequence.len() < 2 {
                continue;
            }
            sequences
                .entry(Skill::sequence_id(&episode.tool_sequence))
                .or_default()
                .push(episode);
        }
        for (id, members) in &sequences {
            if members.len() < self.config.promote_after {
                continue;
            }
            let Some(newest) = members.last() else {
                continue;
            };
            let mut skill = Skill::new(id.clone(), newest.goal_text.clone(), newest.calls.clone());
            skill.description = format!("learned from {} similar successful runs", members.len());
            // Seed stats so the skill is immediately preferable.
            skill.exec_count = members.len() as u32;
            skill.success_count = members.len() as u32;
            skill.total_duration_ms = members.iter().map(|e| e.duration_ms).sum();
            if self.skills.save_if_absent(&skill)? {
                info!(skill = %skill.name, "Promoted sequence to skill");
                stats.skills_promoted += 1;
            }
        }

        self.episodes_since_consolidation.store(0, Ordering::Relaxed);
        *self.last_consolidation.lock() = Instant::now();
        debug!(
            patterns = stats.patterns_updated,
            skills = stats.skills_promoted,
            "Consolidation pass complete"
        );
        Ok(stats)
    }

    /// Periodic background consolidation, per the configured interval.
    pub fn spawn_consolidator(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.consolidate_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(err) = manager.consolidate() {
                    tracing::warn!(error = %err, "Background consolidation failed");
                }
            }
        })
    }
}
