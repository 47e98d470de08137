//! Filesystem-authoritative collection store.
//!
//! Each collection is a directory under the workspace holding a
//! `collection.toml` manifest plus the artifact files themselves. The
//! manifest is the source of truth for tag definitions, groups, and the set
//! of artifacts present; the relational cache is a projection of it. All
//! writes are atomic and serialized through a per-collection lock.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use utils::fs::atomic_write;

use super::config::WorkspaceConfig;

pub const MANIFEST_FILENAME: &str = "collection.toml";

/// Markdown filenames probed when locating an artifact's primary manifest,
/// in priority order.
pub const ARTIFACT_MD_NAMES: &[&str] = &["SKILL.md", "COMMAND.md", "AGENT.md", "README.md"];

static COLLECTION_LOCKS: Lazy<DashMap<String, Arc<Mutex<()>>>> = Lazy::new(DashMap::new);

fn collection_lock(name: &str) -> Arc<Mutex<()>> {
    COLLECTION_LOCKS
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

static HEX_COLOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("valid regex"));

/// Keep valid hex colors, coerce anything else to None.
pub fn normalize_hex_color(color: Option<&str>) -> Option<String> {
    color
        .map(str::trim)
        .filter(|c| HEX_COLOR_RE.is_match(c))
        .map(str::to_string)
}

#[derive(Debug, Error)]
pub enum CollectionStoreError {
    #[error("collection '{0}' not found")]
    NotFound(String),
    #[error("failed to read {path}: {source}")]
    TomlRead {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize collection manifest: {0}")]
    TomlWrite(#[from] toml::ser::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Write(#[from] utils::fs::AtomicWriteError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub version: String,
    pub created: String,
    pub updated: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagDefinition {
    pub name: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub icon: String,
    pub position: i64,
    #[serde(default)]
    pub members: Vec<String>,
}

/// An artifact listed in the manifest. `metadata` is carried through
/// untouched for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<toml::Value>,
}

impl ArtifactEntry {
    pub fn artifact_key(&self) -> String {
        format!("{}:{}", self.artifact_type, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionManifest {
    pub collection: CollectionInfo,
    #[serde(default)]
    pub tag_definitions: Vec<TagDefinition>,
    #[serde(default)]
    pub groups: Vec<GroupDefinition>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactEntry>,
}

impl CollectionManifest {
    pub fn new(name: &str) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            collection: CollectionInfo {
                name: name.to_string(),
                version: "1.0".to_string(),
                created: now.clone(),
                updated: now,
            },
            tag_definitions: Vec::new(),
            groups: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn artifact_keys(&self) -> HashSet<String> {
        self.artifacts.iter().map(ArtifactEntry::artifact_key).collect()
    }

    pub fn find_artifact(&self, artifact_type: &str, name: &str) -> Option<&ArtifactEntry> {
        self.artifacts
            .iter()
            .find(|a| a.artifact_type == artifact_type && a.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct CollectionStore {
    config: WorkspaceConfig,
}

impl CollectionStore {
    pub fn new(config: WorkspaceConfig) -> Self {
        Self { config }
    }

    pub fn collection_path(&self, name: &str) -> PathBuf {
        self.config.collection_path(name)
    }

    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.collection_path(name).join(MANIFEST_FILENAME)
    }

    /// Names of collections present on disk (directories with a manifest).
    pub fn list_collections(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.config.collections_root()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().join(MANIFEST_FILENAME).exists())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Create the collection directory and a fresh manifest when missing.
    pub fn ensure_collection(&self, name: &str) -> Result<CollectionManifest, CollectionStoreError> {
        let manifest_path = self.manifest_path(name);
        if manifest_path.exists() {
            return self.read_manifest(name);
        }
        let manifest = CollectionManifest::new(name);
        self.write_manifest(name, &manifest)?;
        Ok(manifest)
    }

    /// Read a collection manifest, normalizing tag colors (non-hex to None).
    pub fn read_manifest(&self, name: &str) -> Result<CollectionManifest, CollectionStoreError> {
        let path = self.manifest_path(name);
        if !path.exists() {
            return Err(CollectionStoreError::NotFound(name.to_string()));
        }
        let raw = std::fs::read_to_string(&path)?;
        let mut manifest: CollectionManifest =
            toml::from_str(&raw).map_err(|source| CollectionStoreError::TomlRead {
                path: path.clone(),
                source,
            })?;
        for tag in &mut manifest.tag_definitions {
            tag.color = normalize_hex_color(tag.color.as_deref());
        }
        Ok(manifest)
    }

    /// Write a manifest atomically under the collection lock, bumping the
    /// `updated` stamp.
    pub fn write_manifest(
        &self,
        name: &str,
        manifest: &CollectionManifest,
    ) -> Result<(), CollectionStoreError> {
        let lock = collection_lock(name);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut snapshot = manifest.clone();
        snapshot.collection.updated = Utc::now().to_rfc3339();
        let rendered = toml::to_string_pretty(&snapshot)?;
        atomic_write(&self.manifest_path(name), &rendered)?;
        debug!("wrote manifest for collection '{name}'");
        Ok(())
    }

    /// Absolute on-disk path of a manifest-listed artifact.
    pub fn artifact_abs_path(&self, collection_name: &str, entry: &ArtifactEntry) -> PathBuf {
        self.collection_path(collection_name).join(&entry.path)
    }

    /// Locate the primary markdown file of an artifact on disk.
    pub fn find_artifact_markdown(artifact_path: &Path) -> Option<PathBuf> {
        if artifact_path.is_dir() {
            ARTIFACT_MD_NAMES
                .iter()
                .map(|name| artifact_path.join(name))
                .find(|p| p.exists())
        } else if artifact_path.is_file()
            && artifact_path.extension().is_some_and(|ext| ext == "md")
        {
            Some(artifact_path.to_path_buf())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CollectionStore {
        CollectionStore::new(WorkspaceConfig::with_home(dir.path().to_path_buf()))
    }

    #[test]
    fn ensure_creates_manifest_and_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure_collection("default").unwrap();

        let manifest = store.read_manifest("default").unwrap();
        assert_eq!(manifest.collection.name, "default");
        assert!(manifest.artifacts.is_empty());
    }

    #[test]
    fn missing_collection_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir).read_manifest("ghost").unwrap_err();
        assert!(matches!(err, CollectionStoreError::NotFound(_)));
    }

    #[test]
    fn tags_groups_and_artifacts_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut manifest = CollectionManifest::new("default");
        manifest.tag_definitions.push(TagDefinition {
            name: "Beta".to_string(),
            slug: "beta".to_string(),
            color: Some("#ff8800".to_string()),
            description: Some("preview features".to_string()),
        });
        manifest.groups.push(GroupDefinition {
            name: "Design".to_string(),
            description: String::new(),
            color: String::new(),
            icon: String::new(),
            position: 0,
            members: vec!["skill:canvas".to_string(), "command:fmt".to_string()],
        });
        manifest.artifacts.push(ArtifactEntry {
            artifact_type: "skill".to_string(),
            name: "canvas".to_string(),
            path: "artifacts/skills/canvas".to_string(),
            origin: Some("owner/repo/canvas".to_string()),
            added: None,
            tags: vec!["Beta".to_string()],
            metadata: None,
        });
        store.write_manifest("default", &manifest).unwrap();

        let loaded = store.read_manifest("default").unwrap();
        assert_eq!(loaded.tag_definitions, manifest.tag_definitions);
        assert_eq!(loaded.groups, manifest.groups);
        assert_eq!(loaded.artifacts.len(), 1);
        assert_eq!(
            loaded.artifact_keys(),
            HashSet::from(["skill:canvas".to_string()])
        );
    }

    #[test]
    fn non_hex_colors_coerce_to_none_on_read() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut manifest = CollectionManifest::new("default");
        manifest.tag_definitions.push(TagDefinition {
            name: "Bad".to_string(),
            slug: "bad".to_string(),
            color: Some("tomato".to_string()),
            description: None,
        });
        manifest.tag_definitions.push(TagDefinition {
            name: "Good".to_string(),
            slug: "good".to_string(),
            color: Some("#abc".to_string()),
            description: None,
        });
        store.write_manifest("default", &manifest).unwrap();

        let loaded = store.read_manifest("default").unwrap();
        assert_eq!(loaded.tag_definitions[0].color, None);
        assert_eq!(loaded.tag_definitions[1].color.as_deref(), Some("#abc"));
    }

    #[test]
    fn list_collections_only_counts_dirs_with_manifests() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure_collection("alpha").unwrap();
        store.ensure_collection("beta").unwrap();
        std::fs::create_dir_all(dir.path().join("collections/not-a-collection")).unwrap();

        assert_eq!(store.list_collections(), vec!["alpha", "beta"]);
    }

    #[test]
    fn write_bumps_updated_stamp() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let manifest = store.ensure_collection("default").unwrap();
        let before = manifest.collection.updated.clone();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.write_manifest("default", &manifest).unwrap();
        let after = store.read_manifest("default").unwrap().collection.updated;
        assert_ne!(before, after);
    }
}
