//! Atomic-rename JSON state files.
//!
//! Write path: serialize to a sibling temp file, fsync, rename over the
//! target. A reader either sees the old complete file or the new one.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Persist `state` to `path` atomically.
pub fn write_json_state<T: Serialize>(path: &Path, state: &T) -> Result<()> {
    let parent = path
        .parent()
        .context("state path has no parent directory")?;
    fs::create_dir_all(parent)?;

    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(state)?;
    {
        let mut file = File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

/// Load a previously persisted state, `None` when the file does not exist.
pub fn read_json_state<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
