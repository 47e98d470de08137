use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor};
use uuid::Uuid;

/// Named, owned, ordered composition of artifacts, groups, and nested sets.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeploymentSet {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub tags_json: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDeploymentSet {
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub tags: Option<Vec<String>>,
}

/// Exactly one of `artifact_uuid`, `group_id`, `member_set_id` is set,
/// enforced by a table CHECK constraint.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeploymentSetMember {
    pub id: Uuid,
    pub set_id: Uuid,
    pub artifact_uuid: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub member_set_id: Option<Uuid>,
    pub position: i64,
}

impl DeploymentSet {
    pub async fn find_by_id(
        executor: impl SqliteExecutor<'_>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, DeploymentSet>("SELECT * FROM deployment_sets WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_owner(
        executor: impl SqliteExecutor<'_>,
        owner_id: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, DeploymentSet>(
            "SELECT * FROM deployment_sets WHERE owner_id = ? ORDER BY name ASC",
        )
        .bind(owner_id)
        .fetch_all(executor)
        .await
    }

    pub async fn create(
        executor: impl SqliteExecutor<'_>,
        data: &CreateDeploymentSet,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let tags_json = data
            .tags
            .as_ref()
            .map(|t| serde_json::to_string(t).unwrap_or_else(|_| "[]".to_string()));
        sqlx::query_as::<_, DeploymentSet>(
            "INSERT INTO deployment_sets (id, name, description, owner_id, tags_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(&data.owner_id)
        .bind(tags_json)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub async fn delete(executor: impl SqliteExecutor<'_>, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM deployment_sets WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

impl DeploymentSetMember {
    /// Members of a set in position order.
    pub async fn find_by_set(
        executor: impl SqliteExecutor<'_>,
        set_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, DeploymentSetMember>(
            "SELECT * FROM deployment_set_members WHERE set_id = ? ORDER BY position ASC",
        )
        .bind(set_id)
        .fetch_all(executor)
        .await
    }

    /// Nested-set references out of `set_id` (for reachability walks).
    pub async fn nested_refs(
        executor: impl SqliteExecutor<'_>,
        set_id: Uuid,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT member_set_id FROM deployment_set_members
             WHERE set_id = ? AND member_set_id IS NOT NULL",
        )
        .bind(set_id)
        .fetch_all(executor)
        .await
    }

    pub async fn add(
        executor: impl SqliteExecutor<'_>,
        set_id: Uuid,
        artifact_uuid: Option<Uuid>,
        group_id: Option<Uuid>,
        member_set_id: Option<Uuid>,
        position: i64,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, DeploymentSetMember>(
            "INSERT INTO deployment_set_members
                 (id, set_id, artifact_uuid, group_id, member_set_id, position)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(id)
        .bind(set_id)
        .bind(artifact_uuid)
        .bind(group_id)
        .bind(member_set_id)
        .bind(position)
        .fetch_one(executor)
        .await
    }

    pub async fn remove(
        executor: impl SqliteExecutor<'_>,
        set_id: Uuid,
        member_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM deployment_set_members WHERE id = ? AND set_id = ?")
                .bind(member_id)
                .bind(set_id)
                .execute(executor)
                .await?;
        Ok(result.rows_affected())
    }

    /// Next free position within a set.
    pub async fn next_position(
        executor: impl SqliteExecutor<'_>,
        set_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        let max: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(position) FROM deployment_set_members WHERE set_id = ?",
        )
        .bind(set_id)
        .fetch_one(executor)
        .await?;
        Ok(max.map_or(0, |m| m + 1))
    }
}
