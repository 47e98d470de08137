use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor};
use uuid::Uuid;

/// Collection-scoped, position-ordered group of artifacts.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub position: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGroup {
    pub collection_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateGroup {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
}

impl Group {
    /// List all groups for a collection, ordered by position.
    pub async fn find_by_collection(
        executor: impl SqliteExecutor<'_>,
        collection_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Group>(
            "SELECT * FROM groups WHERE collection_id = ? ORDER BY position ASC",
        )
        .bind(collection_id)
        .fetch_all(executor)
        .await
    }

    pub async fn find_by_id(
        executor: impl SqliteExecutor<'_>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Group>("SELECT * FROM groups WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Create a group with position auto-assigned as max+1.
    pub async fn create(
        executor: impl SqliteExecutor<'_>,
        data: &CreateGroup,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, Group>(
            "INSERT INTO groups (id, collection_id, name, description, color, icon, position, created_at)
             VALUES (?, ?, ?, ?, ?, ?,
                     COALESCE((SELECT MAX(position) FROM groups WHERE collection_id = ?), -1) + 1,
                     ?)
             RETURNING *",
        )
        .bind(id)
        .bind(data.collection_id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(&data.color)
        .bind(&data.icon)
        .bind(data.collection_id)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    /// Create a group at an explicit position (used by cache recovery, which
    /// assigns sequential positions from the manifest order).
    pub async fn create_at_position(
        executor: impl SqliteExecutor<'_>,
        data: &CreateGroup,
        position: i64,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, Group>(
            "INSERT INTO groups (id, collection_id, name, description, color, icon, position, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(id)
        .bind(data.collection_id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(&data.color)
        .bind(&data.icon)
        .bind(position)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    pub async fn update(
        executor: impl SqliteExecutor<'_>,
        id: Uuid,
        data: &UpdateGroup,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Group>(
            "UPDATE groups
             SET name = COALESCE(?, name),
                 description = COALESCE(?, description),
                 color = COALESCE(?, color),
                 icon = COALESCE(?, icon)
             WHERE id = ?
             RETURNING *",
        )
        .bind(&data.name)
        .bind(&data.description)
        .bind(&data.color)
        .bind(&data.icon)
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn delete(executor: impl SqliteExecutor<'_>, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// True when the collection already has groups; recovery skips group
    /// import in that case.
    pub async fn any_for_collection(
        executor: impl SqliteExecutor<'_>,
        collection_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM groups WHERE collection_id = ?")
                .bind(collection_id)
                .fetch_one(executor)
                .await?;
        Ok(count > 0)
    }
}

/// Ordered join between groups and artifacts.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GroupArtifact {
    pub group_id: Uuid,
    pub artifact_uuid: Uuid,
    pub position: i64,
}

impl GroupArtifact {
    pub async fn add(
        executor: impl SqliteExecutor<'_>,
        group_id: Uuid,
        artifact_uuid: Uuid,
        position: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO group_artifacts (group_id, artifact_uuid, position)
             VALUES (?, ?, ?)
             ON CONFLICT(group_id, artifact_uuid) DO UPDATE SET position = excluded.position",
        )
        .bind(group_id)
        .bind(artifact_uuid)
        .bind(position)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn remove(
        executor: impl SqliteExecutor<'_>,
        group_id: Uuid,
        artifact_uuid: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM group_artifacts WHERE group_id = ? AND artifact_uuid = ?")
                .bind(group_id)
                .bind(artifact_uuid)
                .execute(executor)
                .await?;
        Ok(result.rows_affected())
    }

    /// Member artifact UUIDs in position order.
    pub async fn members(
        executor: impl SqliteExecutor<'_>,
        group_id: Uuid,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT artifact_uuid FROM group_artifacts WHERE group_id = ? ORDER BY position ASC",
        )
        .bind(group_id)
        .fetch_all(executor)
        .await
    }

    /// Member human identifiers (`"<type>:<name>"`) in position order.
    pub async fn member_ids(
        executor: impl SqliteExecutor<'_>,
        group_id: Uuid,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT a.id FROM group_artifacts ga
             JOIN artifacts a ON a.uuid = ga.artifact_uuid
             WHERE ga.group_id = ?
             ORDER BY ga.position ASC",
        )
        .bind(group_id)
        .fetch_all(executor)
        .await
    }
}
