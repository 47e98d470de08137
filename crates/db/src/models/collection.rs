use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Collection {
    pub id: Uuid,
    pub name: String,
    pub version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collection {
    pub async fn find_by_id(
        executor: impl SqliteExecutor<'_>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Collection>("SELECT * FROM collections WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_name(
        executor: impl SqliteExecutor<'_>,
        name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Collection>("SELECT * FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_all(executor: impl SqliteExecutor<'_>) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Collection>("SELECT * FROM collections ORDER BY name ASC")
            .fetch_all(executor)
            .await
    }

    pub async fn upsert(
        executor: impl SqliteExecutor<'_>,
        name: &str,
        version: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query_as::<_, Collection>(
            "INSERT INTO collections (id, name, version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                 version = COALESCE(excluded.version, collections.version),
                 updated_at = excluded.updated_at
             RETURNING *",
        )
        .bind(id)
        .bind(name)
        .bind(version)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub async fn delete(executor: impl SqliteExecutor<'_>, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Join row between a collection and an artifact, carrying the per-collection
/// tag snapshot and pinned versions.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CollectionArtifact {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub artifact_uuid: Uuid,
    pub tags_json: Option<String>,
    pub version: Option<String>,
    pub resolved_version: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl CollectionArtifact {
    pub fn tags(&self) -> Vec<String> {
        self.tags_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    pub async fn upsert(
        executor: impl SqliteExecutor<'_>,
        collection_id: Uuid,
        artifact_uuid: Uuid,
        tags: &[String],
        version: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        let tags_json = serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string());
        sqlx::query_as::<_, CollectionArtifact>(
            "INSERT INTO collection_artifacts
                 (id, collection_id, artifact_uuid, tags_json, version, added_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(collection_id, artifact_uuid) DO UPDATE SET
                 tags_json = excluded.tags_json,
                 version = COALESCE(excluded.version, collection_artifacts.version)
             RETURNING *",
        )
        .bind(id)
        .bind(collection_id)
        .bind(artifact_uuid)
        .bind(tags_json)
        .bind(version)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    pub async fn find(
        executor: impl SqliteExecutor<'_>,
        collection_id: Uuid,
        artifact_uuid: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CollectionArtifact>(
            "SELECT * FROM collection_artifacts
             WHERE collection_id = ? AND artifact_uuid = ?",
        )
        .bind(collection_id)
        .bind(artifact_uuid)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_collection(
        executor: impl SqliteExecutor<'_>,
        collection_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, CollectionArtifact>(
            "SELECT * FROM collection_artifacts WHERE collection_id = ? ORDER BY added_at ASC",
        )
        .bind(collection_id)
        .fetch_all(executor)
        .await
    }

    pub async fn find_by_artifact(
        executor: impl SqliteExecutor<'_>,
        artifact_uuid: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, CollectionArtifact>(
            "SELECT * FROM collection_artifacts WHERE artifact_uuid = ?",
        )
        .bind(artifact_uuid)
        .fetch_all(executor)
        .await
    }

    pub async fn set_tags_json(
        executor: impl SqliteExecutor<'_>,
        id: Uuid,
        tags: &[String],
    ) -> Result<(), sqlx::Error> {
        let tags_json = serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string());
        sqlx::query("UPDATE collection_artifacts SET tags_json = ? WHERE id = ?")
            .bind(tags_json)
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }
}
