//! Composite (plugin) import orchestration and bulk artifact import.
//!
//! A composite import is all-or-nothing: every registry row for the parent
//! and its children is written inside one transaction, child content is
//! pinned by hash into membership rows, and plugin meta files are staged and
//! rename-replaced on disk. Any failure rolls back both the transaction and
//! the staging.

use std::path::PathBuf;
use std::time::Instant;

use db::models::artifact::{Artifact, ArtifactType, CreateArtifact};
use db::models::artifact_version::{ArtifactVersion, ChangeOrigin};
use db::models::collection::{Collection, CollectionArtifact};
use db::models::composite::{CompositeArtifact, CompositeMembership, CompositeType};
use db::DBService;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use utils::fs::copy_dir_all;
use utils::source_spec::SourceSpec;
use uuid::Uuid;

use super::collection::{ArtifactEntry, CollectionStore};
use super::deduplication::{resolve_on_connection, DeduplicationDecision};
use super::discovery::{signature_for, DiscoveredGraph};
use super::hashing::{compute_artifact_hash, HashError};
use super::lineage::build_lineage_on_connection;
use super::plugin_storage::{
    collect_meta_files, composite_id, remove_plugin_dir, write_plugin_meta_files,
    PluginStorageError,
};

const CONTAINS_RELATIONSHIP: &str = "contains";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Storage(#[from] PluginStorageError),
    #[error("composite shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("dedup returned an inconsistent mapping for '{0}'")]
    Integrity(String),
}

/// Outcome of a transactional plugin import.
#[derive(Debug)]
pub struct ImportResult {
    pub success: bool,
    pub plugin_id: Option<String>,
    pub children_imported: usize,
    pub children_reused: usize,
    pub errors: Vec<String>,
    pub transaction_id: Uuid,
}

pub struct PluginImporter {
    db: DBService,
    store: CollectionStore,
}

impl PluginImporter {
    pub fn new(db: DBService, store: CollectionStore) -> Self {
        Self { db, store }
    }

    /// Atomically import a composite parent and its children.
    ///
    /// Children are processed in discovery order; membership `position`
    /// reflects that order and `pinned_version_hash` pins each child's
    /// content at import time.
    pub async fn import_plugin_transactional(
        &self,
        graph: &DiscoveredGraph,
        source_url: Option<&str>,
        project_id: Option<Uuid>,
        collection_name: &str,
    ) -> ImportResult {
        let transaction_id = Uuid::new_v4();
        info!(
            %transaction_id,
            plugin = %graph.parent_name,
            children = graph.children.len(),
            "starting plugin import"
        );

        match self
            .run_import(graph, source_url, project_id, collection_name, transaction_id)
            .await
        {
            Ok((plugin_id, children_imported, children_reused)) => {
                info!(
                    %transaction_id,
                    plugin_id = %plugin_id,
                    children_imported,
                    children_reused,
                    "plugin import committed"
                );
                ImportResult {
                    success: true,
                    plugin_id: Some(plugin_id),
                    children_imported,
                    children_reused,
                    errors: Vec::new(),
                    transaction_id,
                }
            }
            Err(e) => {
                error!(%transaction_id, "plugin import rolled back: {e}");
                ImportResult {
                    success: false,
                    plugin_id: None,
                    children_imported: 0,
                    children_reused: 0,
                    errors: vec![e.to_string()],
                    transaction_id,
                }
            }
        }
    }

    async fn run_import(
        &self,
        graph: &DiscoveredGraph,
        source_url: Option<&str>,
        project_id: Option<Uuid>,
        collection_name: &str,
        transaction_id: Uuid,
    ) -> Result<(String, usize, usize), ImportError> {
        if graph.composite_type == CompositeType::Skill
            && graph.parent_path.join("plugin.json").exists()
        {
            return Err(ImportError::ShapeMismatch(format!(
                "'{}' claims to be a skill composite but carries a plugin.json",
                graph.parent_name
            )));
        }

        let plugin_id = composite_id(&graph.parent_name)?;

        // Hash all children up front so filesystem errors surface before any
        // row is written.
        let mut hashed = Vec::with_capacity(graph.children.len());
        for child in &graph.children {
            hashed.push((child, compute_artifact_hash(&child.path)?));
        }

        let mut tx = self.db.pool.begin().await?;

        let collection = Collection::upsert(&mut *tx, collection_name, None).await?;
        CompositeArtifact::upsert(
            &mut *tx,
            &plugin_id,
            &graph.parent_name,
            graph.composite_type,
            source_url.or(graph.source_url.as_deref()),
        )
        .await?;

        let mut children_imported = 0usize;
        let mut children_reused = 0usize;

        for (position, (child, content_hash)) in hashed.iter().enumerate() {
            let resolution =
                resolve_on_connection(&mut tx, &child.name, child.artifact_type, content_hash)
                    .await?;

            let child_uuid = match resolution.decision {
                DeduplicationDecision::LinkExisting => {
                    children_reused += 1;
                    resolution
                        .artifact_uuid
                        .ok_or_else(|| ImportError::Integrity(child.name.clone()))?
                }
                DeduplicationDecision::CreateNewVersion => {
                    let artifact_uuid = resolution
                        .artifact_uuid
                        .ok_or_else(|| ImportError::Integrity(child.name.clone()))?;
                    let parent = ArtifactVersion::latest(&mut *tx, artifact_uuid).await?;
                    let parent_hash = parent.map(|p| p.content_hash);
                    let lineage = build_lineage_on_connection(
                        &mut tx,
                        parent_hash.as_deref(),
                        content_hash,
                    )
                    .await?;
                    ArtifactVersion::create(
                        &mut *tx,
                        artifact_uuid,
                        content_hash,
                        parent_hash.as_deref(),
                        ChangeOrigin::Sync,
                        &lineage,
                    )
                    .await?;
                    children_imported += 1;
                    artifact_uuid
                }
                DeduplicationDecision::CreateNewArtifact => {
                    let artifact = Artifact::create(
                        &mut *tx,
                        &CreateArtifact {
                            project_id,
                            artifact_type: child.artifact_type,
                            name: child.name.clone(),
                        },
                    )
                    .await?;
                    ArtifactVersion::create(
                        &mut *tx,
                        artifact.uuid,
                        content_hash,
                        None,
                        ChangeOrigin::Sync,
                        &[content_hash.to_string()],
                    )
                    .await?;
                    children_imported += 1;
                    artifact.uuid
                }
            };

            CompositeMembership::create(
                &mut *tx,
                &plugin_id,
                child_uuid,
                position as i64,
                content_hash,
                CONTAINS_RELATIONSHIP,
                Some(collection.id),
            )
            .await?;

            CollectionArtifact::upsert(
                &mut *tx,
                collection.id,
                child_uuid,
                &child.tags,
                child.version.as_deref(),
            )
            .await?;
        }

        // Stage and rename-replace the meta files before the DB commit; a
        // failed commit removes the freshly placed directory.
        let meta_files = collect_meta_files(&graph.parent_path)?;
        let collection_root = self.store.collection_path(collection_name);
        write_plugin_meta_files(&collection_root, &graph.parent_name, &meta_files)?;

        if let Err(e) = tx.commit().await {
            warn!(%transaction_id, "commit failed; removing plugin meta files");
            let _ = remove_plugin_dir(&collection_root, &graph.parent_name);
            return Err(e.into());
        }

        Ok((plugin_id, children_imported, children_reused))
    }
}

// ---------------------------------------------------------------------------
// Bulk import
// ---------------------------------------------------------------------------

/// A single artifact requested in a bulk import. `path` points at the local
/// tree for the artifact; for upstream sources it is the tree the fetch layer
/// already placed on disk (the core performs no network I/O).
#[derive(Debug, Clone)]
pub struct BulkImportItem {
    pub source: String,
    pub artifact_type: ArtifactType,
    pub name: Option<String>,
    pub tags: Vec<String>,
    pub scope: String,
    pub path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct BulkItemResult {
    pub artifact_id: String,
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct BulkImportResult {
    pub total_requested: usize,
    pub total_imported: usize,
    pub total_failed: usize,
    pub results: Vec<BulkItemResult>,
    pub duration_ms: f64,
}

const IMPORTABLE_TYPES: &[ArtifactType] = &[
    ArtifactType::Skill,
    ArtifactType::Command,
    ArtifactType::Agent,
    ArtifactType::Hook,
    ArtifactType::Mcp,
];

impl PluginImporter {
    /// Import a batch of standalone artifacts into a collection.
    ///
    /// All items are validated first; per-item failures during the import
    /// phase are captured and never abort the batch. Cancellation is honored
    /// between items and keeps already committed artifacts.
    pub async fn bulk_import(
        &self,
        items: &[BulkImportItem],
        collection_name: &str,
        auto_resolve_conflicts: bool,
        cancel: Option<&CancellationToken>,
    ) -> BulkImportResult {
        let start = Instant::now();
        let mut results = Vec::with_capacity(items.len());
        let mut imported = 0usize;
        let mut failed = 0usize;

        info!(
            artifact_count = items.len(),
            collection = collection_name,
            auto_resolve_conflicts,
            "starting bulk import"
        );

        let validation_errors = validate_batch(items);
        if !validation_errors.is_empty() && !auto_resolve_conflicts {
            for (item, error) in validation_errors {
                results.push(BulkItemResult {
                    artifact_id: item_artifact_id(item),
                    success: false,
                    message: "validation failed".to_string(),
                    error: Some(error),
                });
                failed += 1;
            }
            return BulkImportResult {
                total_requested: items.len(),
                total_imported: 0,
                total_failed: failed,
                results,
                duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            };
        }

        let mut manifest = match self.store.ensure_collection(collection_name) {
            Ok(manifest) => manifest,
            Err(e) => {
                return BulkImportResult {
                    total_requested: items.len(),
                    total_imported: 0,
                    total_failed: items.len(),
                    results: vec![BulkItemResult {
                        artifact_id: "collection".to_string(),
                        success: false,
                        message: "collection unavailable".to_string(),
                        error: Some(e.to_string()),
                    }],
                    duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                };
            }
        };

        for item in items {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                warn!("bulk import cancelled; keeping previously committed artifacts");
                results.push(BulkItemResult {
                    artifact_id: item_artifact_id(item),
                    success: false,
                    message: "import cancelled".to_string(),
                    error: Some("cancelled before import".to_string()),
                });
                failed += 1;
                continue;
            }

            let artifact_id = item_artifact_id(item);
            let name = item_name(item);

            if manifest.find_artifact(&item.artifact_type.to_string(), &name).is_some() {
                if auto_resolve_conflicts {
                    results.push(BulkItemResult {
                        artifact_id,
                        success: true,
                        message: "skipped (already exists)".to_string(),
                        error: None,
                    });
                    imported += 1;
                } else {
                    results.push(BulkItemResult {
                        artifact_id,
                        success: false,
                        message: "import failed".to_string(),
                        error: Some("artifact already exists in collection".to_string()),
                    });
                    failed += 1;
                }
                continue;
            }

            match self.import_single(item, &name, collection_name, &mut manifest).await {
                Ok(()) => {
                    results.push(BulkItemResult {
                        artifact_id,
                        success: true,
                        message: "imported successfully".to_string(),
                        error: None,
                    });
                    imported += 1;
                }
                Err(e) => {
                    error!("failed to import '{artifact_id}': {e}");
                    results.push(BulkItemResult {
                        artifact_id,
                        success: false,
                        message: "import failed".to_string(),
                        error: Some(e.to_string()),
                    });
                    failed += 1;
                }
            }
        }

        if let Err(e) = self.store.write_manifest(collection_name, &manifest) {
            error!("failed to persist manifest after bulk import: {e}");
        }

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(
            imported_count = imported,
            failed_count = failed,
            duration_ms,
            "bulk import completed"
        );

        BulkImportResult {
            total_requested: items.len(),
            total_imported: imported,
            total_failed: failed,
            results,
            duration_ms,
        }
    }

    async fn import_single(
        &self,
        item: &BulkImportItem,
        name: &str,
        collection_name: &str,
        manifest: &mut super::collection::CollectionManifest,
    ) -> Result<(), anyhow::Error> {
        let source_path = item
            .path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("source '{}' has no local tree to import", item.source))?;

        let signature = signature_for(item.artifact_type)
            .ok_or_else(|| anyhow::anyhow!("type '{}' is not importable", item.artifact_type))?;

        // Place the artifact under artifacts/<container>/.
        let relative = if source_path.is_dir() {
            format!("artifacts/{}/{}", signature.canonical_container, name)
        } else {
            format!("artifacts/{}/{}.md", signature.canonical_container, name)
        };
        let dest = self.store.collection_path(collection_name).join(&relative);

        if source_path.is_dir() {
            copy_dir_all(source_path, &dest)?;
        } else {
            std::fs::create_dir_all(dest.parent().unwrap_or(&dest))?;
            std::fs::copy(source_path, &dest)?;
        }

        let content_hash = compute_artifact_hash(&dest)?;
        let resolution = super::deduplication::resolve_artifact_for_import(
            &self.db.pool,
            name,
            item.artifact_type,
            &content_hash,
        )
        .await?;

        let artifact_uuid = match resolution.decision {
            DeduplicationDecision::LinkExisting => resolution
                .artifact_uuid
                .ok_or_else(|| anyhow::anyhow!("dedup returned no artifact for '{name}'"))?,
            DeduplicationDecision::CreateNewVersion => {
                let artifact_uuid = resolution
                    .artifact_uuid
                    .ok_or_else(|| anyhow::anyhow!("dedup returned no artifact for '{name}'"))?;
                let parent = ArtifactVersion::latest(&self.db.pool, artifact_uuid).await?;
                let parent_hash = parent.map(|p| p.content_hash);
                let lineage = super::lineage::build_version_lineage(
                    &self.db.pool,
                    parent_hash.as_deref(),
                    &content_hash,
                )
                .await?;
                ArtifactVersion::create(
                    &self.db.pool,
                    artifact_uuid,
                    &content_hash,
                    parent_hash.as_deref(),
                    ChangeOrigin::Sync,
                    &lineage,
                )
                .await?;
                artifact_uuid
            }
            DeduplicationDecision::CreateNewArtifact => {
                let artifact = Artifact::create(
                    &self.db.pool,
                    &CreateArtifact {
                        project_id: None,
                        artifact_type: item.artifact_type,
                        name: name.to_string(),
                    },
                )
                .await?;
                ArtifactVersion::create(
                    &self.db.pool,
                    artifact.uuid,
                    &content_hash,
                    None,
                    ChangeOrigin::Sync,
                    &[content_hash.clone()],
                )
                .await?;
                artifact.uuid
            }
        };

        let collection = Collection::upsert(&self.db.pool, collection_name, None).await?;
        CollectionArtifact::upsert(&self.db.pool, collection.id, artifact_uuid, &item.tags, None)
            .await?;

        manifest.artifacts.push(ArtifactEntry {
            artifact_type: item.artifact_type.to_string(),
            name: name.to_string(),
            path: relative,
            origin: Some(item.source.clone()),
            added: Some(chrono::Utc::now().to_rfc3339()),
            tags: item.tags.clone(),
            metadata: None,
        });

        Ok(())
    }
}

fn item_name(item: &BulkImportItem) -> String {
    if let Some(name) = &item.name {
        return name.clone();
    }
    if let Some(rest) = item.source.strip_prefix("local/") {
        return rest
            .rsplit('/')
            .next()
            .unwrap_or(rest)
            .trim_end_matches(".md")
            .to_string();
    }
    match SourceSpec::parse(&item.source) {
        Ok(spec) => spec.default_name().trim_end_matches(".md").to_string(),
        Err(_) => item.source.clone(),
    }
}

fn item_artifact_id(item: &BulkImportItem) -> String {
    item.artifact_type.artifact_id(&item_name(item))
}

fn validate_batch(items: &[BulkImportItem]) -> Vec<(&BulkImportItem, String)> {
    let mut errors = Vec::new();
    for item in items {
        if !IMPORTABLE_TYPES.contains(&item.artifact_type) {
            errors.push((item, format!("invalid artifact type: {}", item.artifact_type)));
            continue;
        }
        if item.source.is_empty() || !item.source.contains('/') {
            errors.push((item, format!("invalid source format: {}", item.source)));
            continue;
        }
        if item.source.starts_with("local/") {
            if item.path.is_none() {
                errors.push((
                    item,
                    format!("local source '{}' requires a filesystem path", item.source),
                ));
                continue;
            }
        } else if SourceSpec::parse(&item.source).is_err() {
            errors.push((item, format!("invalid source format: {}", item.source)));
            continue;
        }
        if item.scope != "user" && item.scope != "local" {
            errors.push((item, format!("invalid scope: {}", item.scope)));
        }
    }
    errors
}
