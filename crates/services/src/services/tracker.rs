//! Per-profile-root deployment ledger.
//!
//! Each profile root in a project carries one TOML file,
//! `<project>/<root_dir>/.skillmeat-deployed.toml`, with a `[[deployed]]`
//! array recording exactly what was placed, from where, and at which
//! version. Readers fall back to an empty list on missing or malformed
//! files; all mutations are atomic and serialized per file.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use db::models::deployment_profile::Platform;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use utils::fs::atomic_write;
use uuid::Uuid;

pub const TRACKER_FILENAME: &str = ".skillmeat-deployed.toml";

static TRACKER_LOCKS: Lazy<DashMap<PathBuf, Arc<Mutex<()>>>> = Lazy::new(DashMap::new);

fn tracker_lock(path: &Path) -> Arc<Mutex<()>> {
    TRACKER_LOCKS
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("failed to serialize deployment records: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error(transparent)]
    Write(#[from] utils::fs::AtomicWriteError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One deployed artifact as recorded in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub artifact_name: String,
    pub artifact_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_uuid: Option<Uuid>,
    pub artifact_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_collection: Option<String>,
    pub deployed_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_base_snapshot: Option<String>,
    #[serde(default)]
    pub local_modifications: bool,
    #[serde(default)]
    pub version_lineage: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_root_dir: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrackerFile {
    #[serde(default)]
    deployed: Vec<DeploymentRecord>,
}

pub fn tracker_path(project_path: &Path, profile_root_dir: &str) -> PathBuf {
    project_path.join(profile_root_dir).join(TRACKER_FILENAME)
}

/// Load the ledger for a profile root. Missing or malformed files read as
/// empty.
pub fn load_records(project_path: &Path, profile_root_dir: &str) -> Vec<DeploymentRecord> {
    let path = tracker_path(project_path, profile_root_dir);
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    match toml::from_str::<TrackerFile>(&raw) {
        Ok(file) => file.deployed,
        Err(e) => {
            warn!("malformed tracker at {}: {e}; treating as empty", path.display());
            Vec::new()
        }
    }
}

fn save_records(
    project_path: &Path,
    profile_root_dir: &str,
    records: &[DeploymentRecord],
) -> Result<(), TrackerError> {
    let path = tracker_path(project_path, profile_root_dir);
    let rendered = toml::to_string_pretty(&TrackerFile {
        deployed: records.to_vec(),
    })?;
    atomic_write(&path, &rendered)?;
    Ok(())
}

/// Record a deployment. An earlier record for the same `(type, name)` pair
/// is replaced so each artifact appears once per profile root.
pub fn record_deployment(
    project_path: &Path,
    profile_root_dir: &str,
    record: DeploymentRecord,
) -> Result<(), TrackerError> {
    let path = tracker_path(project_path, profile_root_dir);
    let lock = tracker_lock(&path);
    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let mut records = load_records(project_path, profile_root_dir);
    records.retain(|r| {
        !(r.artifact_type == record.artifact_type && r.artifact_name == record.artifact_name)
    });
    records.push(record);
    save_records(project_path, profile_root_dir, &records)
}

/// Remove a deployment record. Returns true when one was removed.
pub fn remove_record(
    project_path: &Path,
    profile_root_dir: &str,
    artifact_type: &str,
    artifact_name: &str,
) -> Result<bool, TrackerError> {
    let path = tracker_path(project_path, profile_root_dir);
    let lock = tracker_lock(&path);
    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let mut records = load_records(project_path, profile_root_dir);
    let before = records.len();
    records.retain(|r| !(r.artifact_type == artifact_type && r.artifact_name == artifact_name));
    if records.len() == before {
        return Ok(false);
    }
    save_records(project_path, profile_root_dir, &records)?;
    Ok(true)
}

fn infer_root_from_artifact_path(artifact_path: &str) -> Option<&'static str> {
    db::models::deployment_profile::KNOWN_PROFILE_ROOTS
        .iter()
        .find(|root| artifact_path.starts_with(&format!("{root}/")))
        .copied()
}

fn infer_profile_from_root(root_dir: &str) -> String {
    let platform = Platform::from_root_dir(root_dir);
    match platform {
        Platform::Other => root_dir.trim_start_matches('.').to_string(),
        _ => platform.to_string(),
    }
}

/// Back-fill profile metadata on legacy records.
///
/// Records missing `deployment_profile_id`, `platform`, or
/// `profile_root_dir` get values derived from the record's artifact path
/// prefix and the tracker file's parent directory. Populated fields are
/// never overwritten. Returns the number of records updated.
pub fn migrate_legacy_records(
    project_path: &Path,
    profile_root_dir: &str,
) -> Result<usize, TrackerError> {
    let path = tracker_path(project_path, profile_root_dir);
    let lock = tracker_lock(&path);
    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let mut records = load_records(project_path, profile_root_dir);
    let mut updated = 0usize;

    for record in &mut records {
        if record.deployment_profile_id.is_some()
            && record.platform.is_some()
            && record.profile_root_dir.is_some()
        {
            continue;
        }

        let root_dir = record
            .profile_root_dir
            .clone()
            .or_else(|| infer_root_from_artifact_path(&record.artifact_path).map(str::to_string))
            .unwrap_or_else(|| profile_root_dir.to_string());
        let profile_id = record
            .deployment_profile_id
            .clone()
            .unwrap_or_else(|| infer_profile_from_root(&root_dir));
        let platform = record.platform.clone().unwrap_or_else(|| {
            profile_id
                .parse::<Platform>()
                .unwrap_or(Platform::Other)
                .to_string()
        });

        record.profile_root_dir = Some(root_dir);
        record.deployment_profile_id = Some(profile_id);
        record.platform = Some(platform);
        updated += 1;
    }

    if updated > 0 {
        save_records(project_path, profile_root_dir, &records)?;
        debug!("backfilled {updated} legacy tracker record(s) under {profile_root_dir}");
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(name: &str) -> DeploymentRecord {
        DeploymentRecord {
            artifact_name: name.to_string(),
            artifact_type: "skill".to_string(),
            artifact_uuid: Some(Uuid::new_v4()),
            artifact_path: format!(".claude/skills/{name}"),
            from_collection: Some("default".to_string()),
            deployed_at: "2026-08-01T00:00:00Z".to_string(),
            collection_sha: None,
            content_hash: Some("abc123".to_string()),
            merge_base_snapshot: None,
            local_modifications: false,
            version_lineage: vec!["abc123".to_string()],
            deployment_profile_id: Some("claude_code".to_string()),
            platform: Some("claude_code".to_string()),
            profile_root_dir: Some(".claude".to_string()),
        }
    }

    #[test]
    fn missing_tracker_reads_empty() {
        let dir = TempDir::new().unwrap();
        assert!(load_records(dir.path(), ".claude").is_empty());
    }

    #[test]
    fn malformed_tracker_reads_empty() {
        let dir = TempDir::new().unwrap();
        let path = tracker_path(dir.path(), ".claude");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "deployed = 3").unwrap();
        assert!(load_records(dir.path(), ".claude").is_empty());
    }

    #[test]
    fn record_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        record_deployment(dir.path(), ".claude", record("canvas")).unwrap();
        record_deployment(dir.path(), ".claude", record("writer")).unwrap();

        let records = load_records(dir.path(), ".claude");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].artifact_name, "canvas");
        assert_eq!(records[0].content_hash.as_deref(), Some("abc123"));
    }

    #[test]
    fn redeploying_replaces_the_previous_record() {
        let dir = TempDir::new().unwrap();
        record_deployment(dir.path(), ".claude", record("canvas")).unwrap();
        let mut updated = record("canvas");
        updated.content_hash = Some("def456".to_string());
        record_deployment(dir.path(), ".claude", updated).unwrap();

        let records = load_records(dir.path(), ".claude");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content_hash.as_deref(), Some("def456"));
    }

    #[test]
    fn separate_profile_roots_have_separate_ledgers() {
        let dir = TempDir::new().unwrap();
        record_deployment(dir.path(), ".claude", record("canvas")).unwrap();
        record_deployment(dir.path(), ".codex", record("canvas")).unwrap();

        assert_eq!(load_records(dir.path(), ".claude").len(), 1);
        assert_eq!(load_records(dir.path(), ".codex").len(), 1);
        assert!(tracker_path(dir.path(), ".codex").exists());
    }

    #[test]
    fn remove_record_deletes_only_matching_entry() {
        let dir = TempDir::new().unwrap();
        record_deployment(dir.path(), ".claude", record("canvas")).unwrap();
        record_deployment(dir.path(), ".claude", record("writer")).unwrap();

        assert!(remove_record(dir.path(), ".claude", "skill", "canvas").unwrap());
        assert!(!remove_record(dir.path(), ".claude", "skill", "canvas").unwrap());
        let records = load_records(dir.path(), ".claude");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].artifact_name, "writer");
    }

    #[test]
    fn legacy_records_are_backfilled_without_touching_existing_fields() {
        let dir = TempDir::new().unwrap();
        let mut legacy = record("old");
        legacy.deployment_profile_id = None;
        legacy.platform = None;
        legacy.profile_root_dir = None;
        legacy.artifact_path = ".codex/skills/old".to_string();
        record_deployment(dir.path(), ".codex", legacy).unwrap();

        let mut populated = record("new");
        populated.platform = Some("other".to_string());
        record_deployment(dir.path(), ".codex", populated).unwrap();

        let updated = migrate_legacy_records(dir.path(), ".codex").unwrap();
        assert_eq!(updated, 1);

        let records = load_records(dir.path(), ".codex");
        let old = records.iter().find(|r| r.artifact_name == "old").unwrap();
        assert_eq!(old.profile_root_dir.as_deref(), Some(".codex"));
        assert_eq!(old.deployment_profile_id.as_deref(), Some("codex"));
        assert_eq!(old.platform.as_deref(), Some("codex"));

        let new = records.iter().find(|r| r.artifact_name == "new").unwrap();
        assert_eq!(new.platform.as_deref(), Some("other"));
    }

    #[test]
    fn migration_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut legacy = record("old");
        legacy.deployment_profile_id = None;
        legacy.platform = None;
        legacy.profile_root_dir = None;
        record_deployment(dir.path(), ".claude", legacy).unwrap();

        assert_eq!(migrate_legacy_records(dir.path(), ".claude").unwrap(), 1);
        assert_eq!(migrate_legacy_records(dir.path(), ".claude").unwrap(), 0);
    }
}
