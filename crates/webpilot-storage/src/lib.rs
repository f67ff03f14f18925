//! Persistent stores for the webpilot agent.
//!
//! One redb database per store (`episodic.db`, `semantic.db`, `skills.db`,
//! `site_memory.db`), each wrapped in a typed struct with a byte-level API;
//! callers serialize their own records. JSON state files (`working.json`,
//! `valence_state.json`) are written with atomic rename so readers never
//! observe a torn file.

pub mod atomic;
pub mod kv;
pub mod stores;

pub use atomic::{read_json_state, write_json_state};
pub use kv::KvTable;
pub use stores::{
    EpisodeStorage, SemanticStorage, SiteMemoryStorage, SkillStorage, StoreSet,
};
