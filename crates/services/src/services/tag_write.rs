//! Propagates tag renames and deletes to the filesystem sources.
//!
//! The flow is filesystem-first: mutations touch every `collection.toml`
//! entry and artifact frontmatter file carrying the tag, then patch the
//! `tags_json` snapshot on the cache rows. Without this, tag edits would
//! revert on the next cache rebuild.

use db::models::artifact::Artifact;
use db::models::collection::CollectionArtifact;
use db::models::tag::ArtifactTag;
use db::DBService;
use tracing::{debug, error, info, warn};
use utils::frontmatter::{remove_tag_from_frontmatter, rename_tag_in_frontmatter};

use super::collection::CollectionStore;

/// What a rename/delete touched.
#[derive(Debug, Default)]
pub struct TagWriteOutcome {
    /// Artifact identifiers (`"<type>:<name>"`) whose tags changed.
    pub affected_artifacts: Vec<String>,
    /// Files rewritten on disk (frontmatter files plus manifests).
    pub files_updated: usize,
}

pub struct TagWriteService {
    db: DBService,
    store: CollectionStore,
}

impl TagWriteService {
    pub fn new(db: DBService, store: CollectionStore) -> Self {
        Self { db, store }
    }

    /// Rename a tag across every collection manifest and artifact
    /// frontmatter file. Per-collection failures are logged and skipped.
    pub fn rename_tag(&self, old_name: &str, new_name: &str) -> TagWriteOutcome {
        let outcome = self.rewrite_tag(old_name, Some(new_name));
        info!(
            "tag rename '{old_name}' -> '{new_name}': {} artifacts, {} files",
            outcome.affected_artifacts.len(),
            outcome.files_updated
        );
        outcome
    }

    /// Strip a tag from every collection manifest and frontmatter file.
    pub fn delete_tag(&self, tag_name: &str) -> TagWriteOutcome {
        let outcome = self.rewrite_tag(tag_name, None);
        info!(
            "tag delete '{tag_name}': {} artifacts, {} files",
            outcome.affected_artifacts.len(),
            outcome.files_updated
        );
        outcome
    }

    fn rewrite_tag(&self, old_name: &str, new_name: Option<&str>) -> TagWriteOutcome {
        let mut outcome = TagWriteOutcome::default();

        for collection_name in self.store.list_collections() {
            let mut manifest = match self.store.read_manifest(&collection_name) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!("skipping collection '{collection_name}' (load failed): {e}");
                    continue;
                }
            };

            let mut modified = false;
            for artifact in &mut manifest.artifacts {
                if !artifact.tags.iter().any(|t| t == old_name) {
                    continue;
                }

                // Apply the edit in place, preserving order, deduplicating,
                // dropping empties.
                let mut new_tags: Vec<String> = Vec::with_capacity(artifact.tags.len());
                for tag in &artifact.tags {
                    let replacement = if tag == old_name {
                        match new_name {
                            Some(name) => name,
                            None => continue,
                        }
                    } else {
                        tag.as_str()
                    };
                    if replacement.is_empty() {
                        continue;
                    }
                    if !new_tags.iter().any(|t| t == replacement) {
                        new_tags.push(replacement.to_string());
                    }
                }
                artifact.tags = new_tags;
                modified = true;
                outcome.affected_artifacts.push(artifact.artifact_key());

                let artifact_path = self
                    .store
                    .artifact_abs_path(&collection_name, artifact);
                if let Some(md_path) = CollectionStore::find_artifact_markdown(&artifact_path) {
                    let result = match new_name {
                        Some(name) => rename_tag_in_frontmatter(&md_path, old_name, name),
                        None => remove_tag_from_frontmatter(&md_path, old_name),
                    };
                    match result {
                        Ok(true) => outcome.files_updated += 1,
                        Ok(false) => {}
                        Err(e) => warn!("frontmatter update failed for {}: {e}", md_path.display()),
                    }
                } else {
                    debug!("no markdown file for {}", artifact_path.display());
                }
            }

            if modified {
                match self.store.write_manifest(&collection_name, &manifest) {
                    Ok(()) => outcome.files_updated += 1,
                    Err(e) => error!("failed to save collection '{collection_name}': {e}"),
                }
            }
        }

        outcome
    }

    /// Refresh `tags_json` on every cache row of the affected artifacts from
    /// the tag junction table. Returns the number of rows patched.
    pub async fn update_tags_json_cache(
        &self,
        affected_artifact_ids: &[String],
    ) -> Result<u64, sqlx::Error> {
        let mut updated = 0u64;
        for artifact_id in affected_artifact_ids {
            let Some(artifact) = Artifact::find_by_id(&self.db.pool, artifact_id).await? else {
                debug!("tags_json refresh: artifact '{artifact_id}' not in cache; skipping");
                continue;
            };
            let tag_names =
                ArtifactTag::tag_names_for_artifact(&self.db.pool, artifact.uuid).await?;
            for row in CollectionArtifact::find_by_artifact(&self.db.pool, artifact.uuid).await? {
                CollectionArtifact::set_tags_json(&self.db.pool, row.id, &tag_names).await?;
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::collection::{ArtifactEntry, CollectionManifest};
    use crate::services::config::WorkspaceConfig;
    use db::models::artifact::{ArtifactType, CreateArtifact};
    use db::models::collection::Collection;
    use db::models::tag::{CreateTag, Tag};
    use tempfile::TempDir;

    const SKILL_MD: &str = "---\nname: canvas\ntags:\n- design\n- Beta\n---\nbody\n";

    fn seed_collection(dir: &TempDir) -> CollectionStore {
        let store = CollectionStore::new(WorkspaceConfig::with_home(dir.path().to_path_buf()));
        let mut manifest = CollectionManifest::new("default");
        manifest.artifacts.push(ArtifactEntry {
            artifact_type: "skill".to_string(),
            name: "canvas".to_string(),
            path: "artifacts/skills/canvas".to_string(),
            origin: None,
            added: None,
            tags: vec!["design".to_string(), "Beta".to_string()],
            metadata: None,
        });
        store.write_manifest("default", &manifest).unwrap();

        let skill_dir = store
            .collection_path("default")
            .join("artifacts/skills/canvas");
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(skill_dir.join("SKILL.md"), SKILL_MD).unwrap();
        store
    }

    #[tokio::test]
    async fn rename_updates_manifest_and_frontmatter() {
        let dir = TempDir::new().unwrap();
        let store = seed_collection(&dir);
        let db = DBService::new_in_memory().await.unwrap();
        let service = TagWriteService::new(db, store.clone());

        let outcome = service.rename_tag("Beta", "Preview");

        assert_eq!(outcome.affected_artifacts, vec!["skill:canvas".to_string()]);
        assert_eq!(outcome.files_updated, 2);

        let manifest = store.read_manifest("default").unwrap();
        assert_eq!(
            manifest.artifacts[0].tags,
            vec!["design".to_string(), "Preview".to_string()]
        );

        let md = std::fs::read_to_string(
            store
                .collection_path("default")
                .join("artifacts/skills/canvas/SKILL.md"),
        )
        .unwrap();
        assert!(md.contains("Preview"));
        assert!(!md.contains("Beta"));
    }

    #[tokio::test]
    async fn rename_to_existing_tag_deduplicates() {
        let dir = TempDir::new().unwrap();
        let store = CollectionStore::new(WorkspaceConfig::with_home(dir.path().to_path_buf()));
        let mut manifest = CollectionManifest::new("default");
        manifest.artifacts.push(ArtifactEntry {
            artifact_type: "skill".to_string(),
            name: "canvas".to_string(),
            path: "artifacts/skills/canvas".to_string(),
            origin: None,
            added: None,
            tags: vec!["Preview".to_string(), "Beta".to_string()],
            metadata: None,
        });
        store.write_manifest("default", &manifest).unwrap();

        let db = DBService::new_in_memory().await.unwrap();
        let service = TagWriteService::new(db, store.clone());
        service.rename_tag("Beta", "Preview");

        let manifest = store.read_manifest("default").unwrap();
        assert_eq!(manifest.artifacts[0].tags, vec!["Preview".to_string()]);
    }

    #[tokio::test]
    async fn delete_strips_tag_everywhere() {
        let dir = TempDir::new().unwrap();
        let store = seed_collection(&dir);
        let db = DBService::new_in_memory().await.unwrap();
        let service = TagWriteService::new(db, store.clone());

        let outcome = service.delete_tag("Beta");
        assert_eq!(outcome.affected_artifacts.len(), 1);

        let manifest = store.read_manifest("default").unwrap();
        assert_eq!(manifest.artifacts[0].tags, vec!["design".to_string()]);
    }

    #[tokio::test]
    async fn untouched_collections_are_left_alone() {
        let dir = TempDir::new().unwrap();
        let store = seed_collection(&dir);
        let db = DBService::new_in_memory().await.unwrap();
        let service = TagWriteService::new(db, store.clone());

        let outcome = service.rename_tag("nonexistent", "whatever");
        assert!(outcome.affected_artifacts.is_empty());
        assert_eq!(outcome.files_updated, 0);
    }

    #[tokio::test]
    async fn tags_json_cache_refresh_patches_rows() {
        let dir = TempDir::new().unwrap();
        let store = seed_collection(&dir);
        let db = DBService::new_in_memory().await.unwrap();

        let collection = Collection::upsert(&db.pool, "default", None).await.unwrap();
        let artifact = Artifact::create(
            &db.pool,
            &CreateArtifact {
                project_id: None,
                artifact_type: ArtifactType::Skill,
                name: "canvas".to_string(),
            },
        )
        .await
        .unwrap();
        CollectionArtifact::upsert(
            &db.pool,
            collection.id,
            artifact.uuid,
            &["stale".to_string()],
            None,
        )
        .await
        .unwrap();
        let tag = Tag::create(
            &db.pool,
            &CreateTag {
                name: "Preview".to_string(),
                slug: "preview".to_string(),
                color: None,
                description: None,
            },
        )
        .await
        .unwrap();
        ArtifactTag::attach(&db.pool, tag.id, artifact.uuid).await.unwrap();

        let service = TagWriteService::new(db.clone(), store);
        let updated = service
            .update_tags_json_cache(&["skill:canvas".to_string()])
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let row = CollectionArtifact::find(&db.pool, collection.id, artifact.uuid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.tags(), vec!["Preview".to_string()]);
    }
}
