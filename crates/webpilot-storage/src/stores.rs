//! The four persistent stores and the directory-level store set.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use redb::Database;
use tracing::debug;

use crate::define_kv_store;

define_kv_store! {
    /// Past goal outcomes, one record per episode id.
    pub struct EpisodeStorage { table: "episodes" }
}

define_kv_store! {
    /// Consolidated patterns distilled from multiple episodes.
    pub struct SemanticStorage { table: "semantic" }
}

define_kv_store! {
    /// Reusable action sequences with execution stats.
    pub struct SkillStorage { table: "skills" }
}

define_kv_store! {
    /// Learned selectors keyed by (url pattern, element description).
    pub struct SiteMemoryStorage { table: "site_memory" }
}

/// All stores opened under one memory directory.
#[derive(Debug, Clone)]
pub struct StoreSet {
    pub dir: PathBuf,
    pub episodes: EpisodeStorage,
    pub semantic: SemanticStorage,
    pub skills: SkillStorage,
    pub site_memory: SiteMemoryStorage,
}

impl StoreSet {
    /// Open (creating as needed) the standard store layout under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Opening memory stores");

        let open = |file: &str| -> Result<Arc<Database>> {
            Ok(Arc::new(Database::create(dir.join(file))?))
        };

        Ok(Self {
            episodes: EpisodeStorage::new(open("episodic.db")?)?,
            semantic: SemanticStorage::new(open("semantic.db")?)?,
            skills: SkillStorage::new(open("skills.db")?)?,
            site_memory: SiteMemoryStorage::new(open("site_memory.db")?)?,
            dir,
        })
    }

    /// Path of the crash-recovery working trace.
    pub fn working_state_path(&self) -> PathBuf {
        self.dir.join("working.json")
    }

    /// Path of the optional valence tuning snapshot.
    pub fn valence_state_path(&self) -> PathBuf {
        self.dir.join("valence_state.json")
    }
}
