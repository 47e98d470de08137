//! Deployment engine: materializes resolved artifacts into a project.
//!
//! The engine stages every artifact under a temp directory inside the
//! project (staged writes fan out over blocking tasks), then commits each
//! artifact by renaming it into place, appending a tracker record, and
//! updating the registry. Per-artifact failures are captured into the
//! result; a batch never aborts on a single artifact. Cancellation between
//! artifacts keeps everything committed so far.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use db::models::artifact::Artifact;
use db::models::artifact_version::{ArtifactVersion, ChangeOrigin};
use db::models::collection::{Collection, CollectionArtifact};
use db::models::deployment_profile::DeploymentProfile;
use db::DBService;
use futures::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use utils::fs::replace_dir;
use uuid::Uuid;

use super::collection::CollectionStore;
use super::deployment_sets::{DeploymentSetResolver, SetResolutionError};
use super::hashing::compute_artifact_hash;
use super::profiles::resolve_relative_path;
use super::template::{render_content, validate_variables, with_defaults, TemplateError};
use super::tracker::{record_deployment, DeploymentRecord};

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("deployment profile '{0}' not found")]
    ProfileNotFound(Uuid),
    #[error("project path is not usable: {0}")]
    InvalidProjectPath(String),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Resolution(#[from] SetResolutionError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStatus {
    Deployed,
    Skipped,
    Failed,
}

#[derive(Debug)]
pub struct ArtifactDeployResult {
    pub artifact_uuid: Uuid,
    pub artifact_id: Option<String>,
    pub status: DeployStatus,
    pub target_path: Option<PathBuf>,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct DeployOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub dry_run: bool,
    pub results: Vec<ArtifactDeployResult>,
}

#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    pub overwrite: bool,
    pub dry_run: bool,
    /// Whitelisted template variables; empty map disables substitution.
    pub variables: HashMap<String, String>,
}

struct PlannedArtifact {
    artifact: Artifact,
    collection: String,
    source_abs: PathBuf,
    rel_path: PathBuf,
    target_abs: PathBuf,
    exists: bool,
}

pub struct DeploymentEngine {
    db: DBService,
    store: CollectionStore,
}

impl DeploymentEngine {
    pub fn new(db: DBService, store: CollectionStore) -> Self {
        Self { db, store }
    }

    /// Deploy a resolved, ordered list of artifacts into a project.
    pub async fn deploy_artifacts(
        &self,
        artifact_uuids: &[Uuid],
        project_path: &Path,
        profile_id: Uuid,
        options: &DeployOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<DeployOutcome, DeployError> {
        let variables = if options.variables.is_empty() {
            HashMap::new()
        } else {
            validate_variables(&options.variables)?;
            with_defaults(options.variables.clone())
        };

        let profile = DeploymentProfile::find_by_id(&self.db.pool, profile_id)
            .await?
            .ok_or(DeployError::ProfileNotFound(profile_id))?;

        std::fs::create_dir_all(project_path)
            .map_err(|e| DeployError::InvalidProjectPath(format!("{}: {e}", project_path.display())))?;

        let mut results: Vec<ArtifactDeployResult> = Vec::with_capacity(artifact_uuids.len());
        let mut planned: Vec<PlannedArtifact> = Vec::new();

        // Plan: locate content and compute every target path up front.
        for uuid in artifact_uuids {
            match self.plan_artifact(*uuid, project_path, &profile).await {
                Ok(plan) => planned.push(plan),
                Err(message) => {
                    results.push(ArtifactDeployResult {
                        artifact_uuid: *uuid,
                        artifact_id: None,
                        status: DeployStatus::Failed,
                        target_path: None,
                        error: Some(message),
                    });
                }
            }
        }

        if options.dry_run {
            for plan in planned {
                results.push(ArtifactDeployResult {
                    artifact_uuid: plan.artifact.uuid,
                    artifact_id: Some(plan.artifact.id.clone()),
                    status: DeployStatus::Skipped,
                    target_path: Some(plan.target_abs),
                    error: None,
                });
            }
            let counts = count(&results);
            return Ok(DeployOutcome {
                succeeded: counts.0,
                failed: counts.1,
                skipped: counts.2,
                dry_run: true,
                results,
            });
        }

        let staging = tempfile::Builder::new()
            .prefix(".skillmeat-staging-")
            .tempdir_in(project_path)
            .map_err(|e| DeployError::InvalidProjectPath(format!("{}: {e}", project_path.display())))?;

        // Stage: fan writes out over the blocking pool, one task per
        // artifact; directory artifacts copy whole trees.
        let mut stage_jobs = Vec::new();
        let mut stageable: Vec<&PlannedArtifact> = Vec::new();
        for plan in &planned {
            if plan.exists && !options.overwrite {
                continue;
            }
            let source = plan.source_abs.clone();
            let staged = staging.path().join(&plan.rel_path);
            let vars = variables.clone();
            stageable.push(plan);
            stage_jobs.push(tokio::task::spawn_blocking(move || {
                stage_artifact(&source, &staged, &vars)
            }));
        }
        let stage_results = join_all(stage_jobs).await;
        let mut stage_errors: HashMap<Uuid, String> = HashMap::new();
        for (plan, outcome) in stageable.iter().zip(stage_results) {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    stage_errors.insert(plan.artifact.uuid, e.to_string());
                }
                Err(e) => {
                    stage_errors.insert(plan.artifact.uuid, format!("staging task failed: {e}"));
                }
            }
        }

        // Commit: rename each staged artifact into place, then write the
        // tracker record and registry bookkeeping.
        for plan in planned {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                warn!("deployment cancelled; keeping artifacts committed so far");
                results.push(ArtifactDeployResult {
                    artifact_uuid: plan.artifact.uuid,
                    artifact_id: Some(plan.artifact.id.clone()),
                    status: DeployStatus::Failed,
                    target_path: Some(plan.target_abs),
                    error: Some("cancelled before commit".to_string()),
                });
                continue;
            }

            if plan.exists && !options.overwrite {
                debug!("skipping existing target {}", plan.target_abs.display());
                results.push(ArtifactDeployResult {
                    artifact_uuid: plan.artifact.uuid,
                    artifact_id: Some(plan.artifact.id.clone()),
                    status: DeployStatus::Skipped,
                    target_path: Some(plan.target_abs),
                    error: None,
                });
                continue;
            }

            if let Some(message) = stage_errors.remove(&plan.artifact.uuid) {
                results.push(ArtifactDeployResult {
                    artifact_uuid: plan.artifact.uuid,
                    artifact_id: Some(plan.artifact.id.clone()),
                    status: DeployStatus::Failed,
                    target_path: Some(plan.target_abs),
                    error: Some(message),
                });
                continue;
            }

            let staged = staging.path().join(&plan.rel_path);
            match self.commit_artifact(&plan, &staged, project_path, &profile).await {
                Ok(()) => {
                    results.push(ArtifactDeployResult {
                        artifact_uuid: plan.artifact.uuid,
                        artifact_id: Some(plan.artifact.id.clone()),
                        status: DeployStatus::Deployed,
                        target_path: Some(plan.target_abs),
                        error: None,
                    });
                }
                Err(e) => {
                    error!("failed to commit {}: {e}", plan.artifact.id);
                    results.push(ArtifactDeployResult {
                        artifact_uuid: plan.artifact.uuid,
                        artifact_id: Some(plan.artifact.id.clone()),
                        status: DeployStatus::Failed,
                        target_path: Some(plan.target_abs),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let (succeeded, failed, skipped) = count(&results);
        info!(
            succeeded,
            failed,
            skipped,
            project = %project_path.display(),
            "deployment finished"
        );
        Ok(DeployOutcome {
            succeeded,
            failed,
            skipped,
            dry_run: false,
            results,
        })
    }

    /// Resolve a deployment set and deploy each artifact independently.
    pub async fn deploy_set(
        &self,
        set_id: Uuid,
        project_path: &Path,
        profile_id: Uuid,
        options: &DeployOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<DeployOutcome, DeployError> {
        let resolver = DeploymentSetResolver::new(self.db.clone());
        let artifact_uuids = resolver.resolve(set_id).await?;
        self.deploy_artifacts(&artifact_uuids, project_path, profile_id, options, cancel)
            .await
    }

    async fn plan_artifact(
        &self,
        artifact_uuid: Uuid,
        project_path: &Path,
        profile: &DeploymentProfile,
    ) -> Result<PlannedArtifact, String> {
        let artifact = Artifact::find_by_uuid(&self.db.pool, artifact_uuid)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("artifact '{artifact_uuid}' not found"))?;

        let (collection, source_abs, source_rel) = self
            .locate_content(&artifact)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("no collection content for '{}'", artifact.id))?;

        // Collection trees keep artifacts under artifacts/<container>/...;
        // that prefix has no meaning inside a project.
        let logical = source_rel
            .strip_prefix("artifacts/")
            .unwrap_or(&source_rel)
            .to_string();

        let rel_path = resolve_relative_path(profile, artifact.artifact_type, &logical)
            .map_err(|e| e.to_string())?;
        let target_abs = project_path.join(&rel_path);
        let exists = target_abs.exists();

        Ok(PlannedArtifact {
            artifact,
            collection,
            source_abs,
            rel_path,
            target_abs,
            exists,
        })
    }

    async fn locate_content(
        &self,
        artifact: &Artifact,
    ) -> Result<Option<(String, PathBuf, String)>, sqlx::Error> {
        for membership in CollectionArtifact::find_by_artifact(&self.db.pool, artifact.uuid).await? {
            let Some(collection) =
                Collection::find_by_id(&self.db.pool, membership.collection_id).await?
            else {
                continue;
            };
            let Ok(manifest) = self.store.read_manifest(&collection.name) else {
                continue;
            };
            if let Some(entry) =
                manifest.find_artifact(&artifact.artifact_type.to_string(), &artifact.name)
            {
                let abs = self.store.artifact_abs_path(&collection.name, entry);
                return Ok(Some((collection.name, abs, entry.path.clone())));
            }
        }

        // The cache join rows may be freshly rebuilt and incomplete; the
        // manifests on disk stay authoritative.
        for name in self.store.list_collections() {
            let Ok(manifest) = self.store.read_manifest(&name) else {
                continue;
            };
            if let Some(entry) =
                manifest.find_artifact(&artifact.artifact_type.to_string(), &artifact.name)
            {
                let abs = self.store.artifact_abs_path(&name, entry);
                return Ok(Some((name, abs, entry.path.clone())));
            }
        }
        Ok(None)
    }

    async fn commit_artifact(
        &self,
        plan: &PlannedArtifact,
        staged: &Path,
        project_path: &Path,
        profile: &DeploymentProfile,
    ) -> Result<(), DeployError> {
        if let Some(parent) = plan.target_abs.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if staged.is_dir() {
            replace_dir(staged, &plan.target_abs)?;
        } else {
            std::fs::rename(staged, &plan.target_abs)?;
        }

        // Registry and tracker bookkeeping never fail the deploy; the file
        // is already in place.
        if let Err(e) = self
            .record_deployment_metadata(plan, project_path, profile)
            .await
        {
            error!(
                "deployment bookkeeping failed for '{}': {e}",
                plan.artifact.id
            );
        }
        Ok(())
    }

    async fn record_deployment_metadata(
        &self,
        plan: &PlannedArtifact,
        project_path: &Path,
        profile: &DeploymentProfile,
    ) -> Result<(), anyhow::Error> {
        let content_hash = compute_artifact_hash(&plan.target_abs)?;

        // A hash the registry has never seen for this artifact becomes a new
        // root version with deployment origin; known hashes write nothing.
        let version = match ArtifactVersion::find_by_hash(&self.db.pool, &content_hash).await? {
            Some(version) => version,
            None => {
                ArtifactVersion::create(
                    &self.db.pool,
                    plan.artifact.uuid,
                    &content_hash,
                    None,
                    ChangeOrigin::Deployment,
                    &[content_hash.clone()],
                )
                .await?
            }
        };

        let record = DeploymentRecord {
            artifact_name: plan.artifact.name.clone(),
            artifact_type: plan.artifact.artifact_type.to_string(),
            artifact_uuid: Some(plan.artifact.uuid),
            artifact_path: plan.rel_path.to_string_lossy().into_owned(),
            from_collection: Some(plan.collection.clone()),
            deployed_at: chrono::Utc::now().to_rfc3339(),
            collection_sha: None,
            content_hash: Some(content_hash),
            merge_base_snapshot: version.parent_hash.clone(),
            local_modifications: false,
            version_lineage: version.lineage(),
            deployment_profile_id: Some(profile.profile_id.clone()),
            platform: Some(profile.platform.to_string()),
            profile_root_dir: Some(profile.root_dir.clone()),
        };
        record_deployment(project_path, &profile.root_dir, record)?;
        Ok(())
    }
}

fn count(results: &[ArtifactDeployResult]) -> (usize, usize, usize) {
    let mut succeeded = 0;
    let mut failed = 0;
    let mut skipped = 0;
    for result in results {
        match result.status {
            DeployStatus::Deployed => succeeded += 1,
            DeployStatus::Failed => failed += 1,
            DeployStatus::Skipped => skipped += 1,
        }
    }
    (succeeded, failed, skipped)
}

/// Stage one artifact: render single files, walk directory trees rendering
/// markdown and copying everything else.
fn stage_artifact(
    source: &Path,
    staged: &Path,
    variables: &HashMap<String, String>,
) -> Result<(), std::io::Error> {
    if let Some(parent) = staged.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if source.is_dir() {
        for entry in walkdir::WalkDir::new(source) {
            let entry = entry.map_err(std::io::Error::other)?;
            let rel = entry
                .path()
                .strip_prefix(source)
                .map_err(std::io::Error::other)?;
            let dest = staged.join(rel);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&dest)?;
            } else {
                stage_file(entry.path(), &dest, variables)?;
            }
        }
        Ok(())
    } else {
        stage_file(source, staged, variables)
    }
}

fn stage_file(
    source: &Path,
    dest: &Path,
    variables: &HashMap<String, String>,
) -> Result<(), std::io::Error> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let is_markdown = source.extension().is_some_and(|ext| ext == "md");
    if variables.is_empty() || !is_markdown {
        std::fs::copy(source, dest)?;
        return Ok(());
    }
    let content = std::fs::read_to_string(source)?;
    std::fs::write(dest, render_content(&content, variables))
}
