//! Per-project skip preferences for discovery and import.
//!
//! Stored at `.claude/.skillmeat_skip_prefs.toml` inside each project.
//! Artifact keys use the `"<type>:<name>"` format. A file containing
//! duplicate keys loads as empty (safe fallback) with a warning; mutations
//! are atomic and serialized through a per-project lock.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use utils::fs::atomic_write;

pub const SKIP_PREFS_RELATIVE_PATH: &str = ".claude/.skillmeat_skip_prefs.toml";

const SCHEMA_VERSION: &str = "1.0";

static PROJECT_LOCKS: Lazy<DashMap<PathBuf, Arc<Mutex<()>>>> = Lazy::new(DashMap::new);

fn project_lock(project_path: &Path) -> Arc<Mutex<()>> {
    PROJECT_LOCKS
        .entry(project_path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

#[derive(Debug, Error)]
pub enum SkipPreferencesError {
    #[error("invalid artifact key '{0}': expected \"<type>:<name>\"")]
    InvalidArtifactKey(String),
    #[error("artifact key '{0}' is already skipped")]
    DuplicateKey(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to serialize skip preferences: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error(transparent)]
    Write(#[from] utils::fs::AtomicWriteError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipMetadata {
    pub version: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipEntry {
    pub artifact_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub added_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipPreferences {
    pub metadata: SkipMetadata,
    #[serde(default)]
    pub skips: Vec<SkipEntry>,
}

impl Default for SkipPreferences {
    fn default() -> Self {
        Self {
            metadata: SkipMetadata {
                version: SCHEMA_VERSION.to_string(),
                last_updated: Utc::now(),
            },
            skips: Vec::new(),
        }
    }
}

impl SkipPreferences {
    pub fn is_skipped(&self, artifact_key: &str) -> bool {
        self.skips.iter().any(|s| s.artifact_key == artifact_key)
    }

    pub fn skipped_keys(&self) -> HashSet<String> {
        self.skips.iter().map(|s| s.artifact_key.clone()).collect()
    }
}

fn validate_artifact_key(key: &str) -> Result<(), SkipPreferencesError> {
    match key.split_once(':') {
        Some((artifact_type, name)) if !artifact_type.is_empty() && !name.is_empty() => Ok(()),
        _ => Err(SkipPreferencesError::InvalidArtifactKey(key.to_string())),
    }
}

fn prefs_path(project_path: &Path) -> PathBuf {
    project_path.join(SKIP_PREFS_RELATIVE_PATH)
}

/// Load a project's skip preferences. Missing file, malformed TOML, or
/// duplicate keys all yield the empty default so discovery keeps working.
pub fn load(project_path: &Path) -> SkipPreferences {
    let path = prefs_path(project_path);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(_) => return SkipPreferences::default(),
    };

    let prefs: SkipPreferences = match toml::from_str(&raw) {
        Ok(prefs) => prefs,
        Err(e) => {
            warn!("malformed skip preferences at {}: {e}", path.display());
            return SkipPreferences::default();
        }
    };

    let mut seen = HashSet::new();
    for entry in &prefs.skips {
        if !seen.insert(entry.artifact_key.as_str()) {
            warn!(
                "duplicate artifact key '{}' in {}; loading empty skip list",
                entry.artifact_key,
                path.display()
            );
            return SkipPreferences::default();
        }
    }

    prefs
}

/// Persist skip preferences atomically (write-to-temp + rename).
pub fn save(project_path: &Path, prefs: &SkipPreferences) -> Result<(), SkipPreferencesError> {
    let lock = project_lock(project_path);
    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let mut snapshot = prefs.clone();
    snapshot.metadata.last_updated = Utc::now();
    let rendered = toml::to_string_pretty(&snapshot)?;
    atomic_write(&prefs_path(project_path), &rendered)?;
    Ok(())
}

/// Add a skip entry and persist. Duplicate keys are a conflict.
pub fn add_skip(
    project_path: &Path,
    artifact_key: &str,
    skip_reason: Option<&str>,
) -> Result<SkipPreferences, SkipPreferencesError> {
    validate_artifact_key(artifact_key)?;

    let mut prefs = load(project_path);
    if prefs.is_skipped(artifact_key) {
        return Err(SkipPreferencesError::DuplicateKey(artifact_key.to_string()));
    }
    prefs.skips.push(SkipEntry {
        artifact_key: artifact_key.to_string(),
        skip_reason: skip_reason.map(str::to_string),
        added_date: Utc::now(),
    });
    save(project_path, &prefs)?;
    Ok(prefs)
}

/// Remove a skip entry and persist. Returns true when an entry was removed.
pub fn remove_skip(
    project_path: &Path,
    artifact_key: &str,
) -> Result<bool, SkipPreferencesError> {
    let mut prefs = load(project_path);
    let before = prefs.skips.len();
    prefs.skips.retain(|s| s.artifact_key != artifact_key);
    if prefs.skips.len() == before {
        return Ok(false);
    }
    save(project_path, &prefs)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let prefs = load(dir.path());
        assert!(prefs.skips.is_empty());
    }

    #[test]
    fn save_load_round_trip_preserves_order() {
        let dir = TempDir::new().unwrap();
        add_skip(dir.path(), "skill:alpha", Some("not needed")).unwrap();
        add_skip(dir.path(), "command:beta", None).unwrap();
        add_skip(dir.path(), "agent:gamma", Some("broken upstream")).unwrap();

        let loaded = load(dir.path());
        let keys: Vec<_> = loaded.skips.iter().map(|s| s.artifact_key.as_str()).collect();
        assert_eq!(keys, vec!["skill:alpha", "command:beta", "agent:gamma"]);
        assert_eq!(loaded.skips[0].skip_reason.as_deref(), Some("not needed"));
    }

    #[test]
    fn duplicate_key_add_is_a_conflict() {
        let dir = TempDir::new().unwrap();
        add_skip(dir.path(), "skill:alpha", None).unwrap();
        let err = add_skip(dir.path(), "skill:alpha", None).unwrap_err();
        assert!(matches!(err, SkipPreferencesError::DuplicateKey(_)));
    }

    #[test]
    fn invalid_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            add_skip(dir.path(), "no-colon", None).unwrap_err(),
            SkipPreferencesError::InvalidArtifactKey(_)
        ));
        assert!(matches!(
            add_skip(dir.path(), ":missing-type", None).unwrap_err(),
            SkipPreferencesError::InvalidArtifactKey(_)
        ));
    }

    #[test]
    fn file_with_duplicate_keys_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SKIP_PREFS_RELATIVE_PATH);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"
[metadata]
version = "1.0"
last_updated = "2026-01-01T00:00:00Z"

[[skips]]
artifact_key = "skill:dup"
added_date = "2026-01-01T00:00:00Z"

[[skips]]
artifact_key = "skill:dup"
added_date = "2026-01-02T00:00:00Z"
"#,
        )
        .unwrap();

        let prefs = load(dir.path());
        assert!(prefs.skips.is_empty());
    }

    #[test]
    fn malformed_toml_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SKIP_PREFS_RELATIVE_PATH);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not [valid toml").unwrap();
        assert!(load(dir.path()).skips.is_empty());
    }

    #[test]
    fn remove_skip_deletes_entry() {
        let dir = TempDir::new().unwrap();
        add_skip(dir.path(), "skill:alpha", None).unwrap();
        assert!(remove_skip(dir.path(), "skill:alpha").unwrap());
        assert!(!remove_skip(dir.path(), "skill:alpha").unwrap());
        assert!(load(dir.path()).skips.is_empty());
    }
}
