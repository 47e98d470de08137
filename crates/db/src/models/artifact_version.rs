use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor};
use strum_macros::{Display, EnumString};
use tracing::debug;
use uuid::Uuid;

/// Why a version record was created.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    sqlx::Type,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeOrigin {
    Deployment,
    Sync,
    LocalModification,
}

/// Append-only registry row. `content_hash` is globally unique; rows are
/// never mutated and only disappear when the owning artifact is deleted.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub id: Uuid,
    pub artifact_uuid: Uuid,
    pub content_hash: String,
    pub parent_hash: Option<String>,
    pub change_origin: ChangeOrigin,
    /// JSON array of content hashes, root first, current last.
    pub version_lineage: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ArtifactVersion {
    /// Parse the stored lineage. Empty for legacy rows without one.
    pub fn lineage(&self) -> Vec<String> {
        self.version_lineage
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    pub async fn find_by_hash(
        executor: impl SqliteExecutor<'_>,
        content_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ArtifactVersion>(
            "SELECT * FROM artifact_versions WHERE content_hash = ?",
        )
        .bind(content_hash)
        .fetch_optional(executor)
        .await
    }

    pub async fn exists(
        executor: impl SqliteExecutor<'_>,
        content_hash: &str,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM artifact_versions WHERE content_hash = ?",
        )
        .bind(content_hash)
        .fetch_one(executor)
        .await?;
        Ok(count > 0)
    }

    /// All versions for an artifact, oldest first. Rowid breaks created_at
    /// ties so same-instant appends keep insertion order.
    pub async fn chain(
        executor: impl SqliteExecutor<'_>,
        artifact_uuid: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ArtifactVersion>(
            "SELECT * FROM artifact_versions
             WHERE artifact_uuid = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(artifact_uuid)
        .fetch_all(executor)
        .await
    }

    pub async fn latest(
        executor: impl SqliteExecutor<'_>,
        artifact_uuid: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ArtifactVersion>(
            "SELECT * FROM artifact_versions
             WHERE artifact_uuid = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
        )
        .bind(artifact_uuid)
        .fetch_optional(executor)
        .await
    }

    pub async fn root(
        executor: impl SqliteExecutor<'_>,
        artifact_uuid: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ArtifactVersion>(
            "SELECT * FROM artifact_versions
             WHERE artifact_uuid = ?
             ORDER BY created_at ASC, rowid ASC
             LIMIT 1",
        )
        .bind(artifact_uuid)
        .fetch_optional(executor)
        .await
    }

    /// Append a version. Idempotent on `content_hash`: when a version with
    /// this hash already exists the existing row is returned and nothing is
    /// written.
    pub async fn create(
        executor: impl SqliteExecutor<'_>,
        artifact_uuid: Uuid,
        content_hash: &str,
        parent_hash: Option<&str>,
        change_origin: ChangeOrigin,
        version_lineage: &[String],
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        let lineage_json =
            serde_json::to_string(version_lineage).unwrap_or_else(|_| "[]".to_string());
        let result = sqlx::query_as::<_, ArtifactVersion>(
            "INSERT INTO artifact_versions
                 (id, artifact_uuid, content_hash, parent_hash, change_origin,
                  version_lineage, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(content_hash) DO UPDATE SET content_hash = excluded.content_hash
             RETURNING *",
        )
        .bind(id)
        .bind(artifact_uuid)
        .bind(content_hash)
        .bind(parent_hash)
        .bind(change_origin)
        .bind(lineage_json)
        .bind(Utc::now())
        .fetch_one(executor)
        .await?;

        if result.id != id {
            debug!(
                content_hash = %&content_hash[..content_hash.len().min(8)],
                "version append deduplicated to existing row"
            );
        }
        Ok(result)
    }

    /// Depth of a version in its lineage (0 for roots and unknown hashes).
    pub async fn depth(
        executor: impl SqliteExecutor<'_>,
        content_hash: &str,
    ) -> Result<i64, sqlx::Error> {
        let version = Self::find_by_hash(executor, content_hash).await?;
        Ok(version
            .map(|v| {
                let lineage = v.lineage();
                lineage.len().saturating_sub(1) as i64
            })
            .unwrap_or(0))
    }

    /// Backfill lineage on a legacy row. Only used by maintenance repair.
    pub async fn set_lineage(
        executor: impl SqliteExecutor<'_>,
        id: Uuid,
        parent_hash: Option<&str>,
        version_lineage: &[String],
    ) -> Result<(), sqlx::Error> {
        let lineage_json =
            serde_json::to_string(version_lineage).unwrap_or_else(|_| "[]".to_string());
        sqlx::query(
            "UPDATE artifact_versions SET parent_hash = ?, version_lineage = ? WHERE id = ?",
        )
        .bind(parent_hash)
        .bind(lineage_json)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }
}
