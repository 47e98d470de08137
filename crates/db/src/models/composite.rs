use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Shape of a composite: a user plugin bundle or a skill with embedded
/// members. Both import through the same transactional path.
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
pub enum CompositeType {
    Plugin,
    Skill,
}

/// Parent record for a bundle of related artifacts. Keyed by the composite
/// identifier `"composite:<slug>"`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CompositeArtifact {
    pub id: String,
    pub name: String,
    pub composite_type: CompositeType,
    pub upstream_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CompositeArtifact {
    pub async fn find_by_id(
        executor: impl SqliteExecutor<'_>,
        id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CompositeArtifact>("SELECT * FROM composite_artifacts WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn upsert(
        executor: impl SqliteExecutor<'_>,
        id: &str,
        name: &str,
        composite_type: CompositeType,
        upstream_url: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, CompositeArtifact>(
            "INSERT INTO composite_artifacts (id, name, composite_type, upstream_url, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 upstream_url = COALESCE(excluded.upstream_url, composite_artifacts.upstream_url),
                 updated_at = excluded.updated_at
             RETURNING *",
        )
        .bind(id)
        .bind(name)
        .bind(composite_type)
        .bind(upstream_url)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub async fn delete(executor: impl SqliteExecutor<'_>, id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM composite_artifacts WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Membership join pinning a child artifact to the exact content imported
/// with the composite. Updating the child later never moves the pin.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CompositeMembership {
    pub id: Uuid,
    pub composite_id: String,
    pub child_artifact_uuid: Uuid,
    pub position: i64,
    pub pinned_version_hash: String,
    pub relationship_type: String,
    pub collection_id: Option<Uuid>,
}

impl CompositeMembership {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        executor: impl SqliteExecutor<'_>,
        composite_id: &str,
        child_artifact_uuid: Uuid,
        position: i64,
        pinned_version_hash: &str,
        relationship_type: &str,
        collection_id: Option<Uuid>,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, CompositeMembership>(
            "INSERT INTO composite_memberships
                 (id, composite_id, child_artifact_uuid, position,
                  pinned_version_hash, relationship_type, collection_id)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(composite_id, child_artifact_uuid) DO UPDATE SET
                 position = excluded.position,
                 pinned_version_hash = excluded.pinned_version_hash,
                 relationship_type = excluded.relationship_type,
                 collection_id = excluded.collection_id
             RETURNING *",
        )
        .bind(id)
        .bind(composite_id)
        .bind(child_artifact_uuid)
        .bind(position)
        .bind(pinned_version_hash)
        .bind(relationship_type)
        .bind(collection_id)
        .fetch_one(executor)
        .await
    }

    /// Memberships for a composite in position order.
    pub async fn find_by_composite(
        executor: impl SqliteExecutor<'_>,
        composite_id: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, CompositeMembership>(
            "SELECT * FROM composite_memberships WHERE composite_id = ? ORDER BY position ASC",
        )
        .bind(composite_id)
        .fetch_all(executor)
        .await
    }

    pub async fn delete_for_composite(
        executor: impl SqliteExecutor<'_>,
        composite_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM composite_memberships WHERE composite_id = ?")
            .bind(composite_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
