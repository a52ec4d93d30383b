use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::ConfigError;
use crate::db::RecordSeed;

#[derive(Deserialize)]
#[serde(untagged)]
enum SeedFile {
    Wrapped { records: Vec<RecordSeed> },
    Bare(Vec<RecordSeed>),
}

/// Read seeds exported by the discovery step. Accepts `{"records": [...]}`
/// or a bare array. Seeds without an id or name are dropped.
pub fn load_seeds(path: &Path) -> Result<Vec<RecordSeed>> {
    if !path.is_file() {
        return Err(ConfigError::MissingSeedFile(path.to_path_buf()).into());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file: SeedFile = serde_json::from_str(&raw)
        .with_context(|| format!("invalid seed file {}", path.display()))?;

    let seeds = match file {
        SeedFile::Wrapped { records } => records,
        SeedFile::Bare(records) => records,
    };
    Ok(seeds
        .into_iter()
        .filter(|s| !s.id.trim().is_empty() && !s.name.trim().is_empty())
        .collect())
}
