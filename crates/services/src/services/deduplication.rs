//! Deduplication logic for artifact imports.
//!
//! Decides whether an incoming `(name, type, content_hash)` triple links to
//! an existing version, appends a new version on an existing artifact, or
//! creates a brand-new artifact. Both lookups are index-backed; the name
//! query is skipped entirely when the hash query hits.

use db::models::artifact::{Artifact, ArtifactType};
use db::models::artifact_version::ArtifactVersion;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

/// Outcome of a deduplication check for an incoming artifact import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeduplicationDecision {
    /// The content hash already exists; link to the existing artifact and
    /// version without writing anything.
    LinkExisting,
    /// Same name+type exists with different content; append a new version.
    CreateNewVersion,
    /// No match; create both the artifact and its root version.
    CreateNewArtifact,
}

#[derive(Debug, Clone)]
pub struct DeduplicationResult {
    pub decision: DeduplicationDecision,
    /// Human identifier of the matched artifact, when one matched.
    pub artifact_id: Option<String>,
    pub artifact_uuid: Option<Uuid>,
    /// The exact matching version for `LinkExisting`.
    pub artifact_version_id: Option<Uuid>,
    /// Human-readable explanation, suitable for logs.
    pub reason: String,
}

/// Determine how an artifact import should be handled to avoid duplicates.
pub async fn resolve_artifact_for_import(
    pool: &SqlitePool,
    name: &str,
    artifact_type: ArtifactType,
    content_hash: &str,
) -> Result<DeduplicationResult, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    resolve_on_connection(&mut conn, name, artifact_type, content_hash).await
}

/// Connection-level variant so the composite importer can resolve inside an
/// open transaction and see rows written by earlier children.
pub async fn resolve_on_connection(
    conn: &mut sqlx::SqliteConnection,
    name: &str,
    artifact_type: ArtifactType,
    content_hash: &str,
) -> Result<DeduplicationResult, sqlx::Error> {
    let short_hash = &content_hash[..content_hash.len().min(8)];

    if let Some(existing_version) =
        ArtifactVersion::find_by_hash(&mut *conn, content_hash).await?
    {
        let owner = Artifact::find_by_uuid(&mut *conn, existing_version.artifact_uuid).await?;
        debug!(
            artifact_uuid = %existing_version.artifact_uuid,
            version_id = %existing_version.id,
            hash = short_hash,
            "dedup: exact hash match"
        );
        return Ok(DeduplicationResult {
            decision: DeduplicationDecision::LinkExisting,
            artifact_id: owner.map(|a| a.id),
            artifact_uuid: Some(existing_version.artifact_uuid),
            artifact_version_id: Some(existing_version.id),
            reason: format!(
                "content hash '{short_hash}...' already exists; linking to artifact {}",
                existing_version.artifact_uuid
            ),
        });
    }

    if let Some(existing_artifact) =
        Artifact::find_by_name_type(&mut *conn, name, artifact_type).await?
    {
        debug!(
            artifact_uuid = %existing_artifact.uuid,
            name,
            %artifact_type,
            "dedup: name+type match, new hash"
        );
        return Ok(DeduplicationResult {
            decision: DeduplicationDecision::CreateNewVersion,
            artifact_id: Some(existing_artifact.id),
            artifact_uuid: Some(existing_artifact.uuid),
            artifact_version_id: None,
            reason: format!(
                "artifact '{name}' ({artifact_type}) exists with a different content hash; \
                 a new version will be appended"
            ),
        });
    }

    debug!(name, %artifact_type, "dedup: no match, will create new artifact");
    Ok(DeduplicationResult {
        decision: DeduplicationDecision::CreateNewArtifact,
        artifact_id: None,
        artifact_uuid: None,
        artifact_version_id: None,
        reason: format!(
            "no existing artifact for name='{name}' type='{artifact_type}'; \
             a new artifact and root version will be created"
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::artifact::CreateArtifact;
    use db::models::artifact_version::ChangeOrigin;
    use db::DBService;

    async fn seed_artifact(db: &DBService, name: &str, hash: &str) -> Artifact {
        let artifact = Artifact::create(
            &db.pool,
            &CreateArtifact {
                project_id: None,
                artifact_type: ArtifactType::Skill,
                name: name.to_string(),
            },
        )
        .await
        .unwrap();
        ArtifactVersion::create(
            &db.pool,
            artifact.uuid,
            hash,
            None,
            ChangeOrigin::Sync,
            &[hash.to_string()],
        )
        .await
        .unwrap();
        artifact
    }

    #[tokio::test]
    async fn exact_hash_match_links_existing() {
        let db = DBService::new_in_memory().await.unwrap();
        let artifact = seed_artifact(&db, "canvas", "aaaa1111").await;

        let result =
            resolve_artifact_for_import(&db.pool, "renamed", ArtifactType::Skill, "aaaa1111")
                .await
                .unwrap();
        assert_eq!(result.decision, DeduplicationDecision::LinkExisting);
        assert_eq!(result.artifact_uuid, Some(artifact.uuid));
        assert!(result.artifact_version_id.is_some());
    }

    #[tokio::test]
    async fn name_match_is_case_insensitive() {
        let db = DBService::new_in_memory().await.unwrap();
        let artifact = seed_artifact(&db, "Canvas-Design", "aaaa1111").await;

        let result = resolve_artifact_for_import(
            &db.pool,
            "canvas-design",
            ArtifactType::Skill,
            "bbbb2222",
        )
        .await
        .unwrap();
        assert_eq!(result.decision, DeduplicationDecision::CreateNewVersion);
        assert_eq!(result.artifact_uuid, Some(artifact.uuid));
        assert_eq!(result.artifact_version_id, None);
    }

    #[tokio::test]
    async fn type_match_is_strict() {
        let db = DBService::new_in_memory().await.unwrap();
        seed_artifact(&db, "canvas", "aaaa1111").await;

        let result =
            resolve_artifact_for_import(&db.pool, "canvas", ArtifactType::Command, "bbbb2222")
                .await
                .unwrap();
        assert_eq!(result.decision, DeduplicationDecision::CreateNewArtifact);
        assert_eq!(result.artifact_uuid, None);
    }

    #[tokio::test]
    async fn no_match_creates_new_artifact() {
        let db = DBService::new_in_memory().await.unwrap();
        let result =
            resolve_artifact_for_import(&db.pool, "fresh", ArtifactType::Agent, "cccc3333")
                .await
                .unwrap();
        assert_eq!(result.decision, DeduplicationDecision::CreateNewArtifact);
    }

    #[tokio::test]
    async fn hash_match_wins_over_name_match() {
        let db = DBService::new_in_memory().await.unwrap();
        let hash_owner = seed_artifact(&db, "canvas", "aaaa1111").await;
        seed_artifact(&db, "other", "dddd4444").await;

        // Same hash as "canvas" but the name of "other".
        let result =
            resolve_artifact_for_import(&db.pool, "other", ArtifactType::Skill, "aaaa1111")
                .await
                .unwrap();
        assert_eq!(result.decision, DeduplicationDecision::LinkExisting);
        assert_eq!(result.artifact_uuid, Some(hash_owner.uuid));
    }
}
