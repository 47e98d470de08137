use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor};
use uuid::Uuid;

/// Reserved project name that owns collection-scoped artifacts.
pub const COLLECTION_SENTINEL: &str = "__collection__";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub path: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub name: String,
    pub path: Option<String>,
}

impl Project {
    pub async fn find_by_id(
        executor: impl SqliteExecutor<'_>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_name(
        executor: impl SqliteExecutor<'_>,
        name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE name = ?")
            .bind(name)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_all(executor: impl SqliteExecutor<'_>) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY name ASC")
            .fetch_all(executor)
            .await
    }

    pub async fn create(
        executor: impl SqliteExecutor<'_>,
        data: &CreateProject,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query_as::<_, Project>(
            "INSERT INTO projects (id, name, path, status, created_at, updated_at)
             VALUES (?, ?, ?, 'active', ?, ?)
             RETURNING *",
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.path)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    /// Fetch the sentinel project that owns collection-scoped artifacts,
    /// creating it on first use.
    pub async fn ensure_collection_sentinel(
        pool: &sqlx::SqlitePool,
    ) -> Result<Self, sqlx::Error> {
        if let Some(existing) = Self::find_by_name(pool, COLLECTION_SENTINEL).await? {
            return Ok(existing);
        }
        Self::create(
            pool,
            &CreateProject {
                name: COLLECTION_SENTINEL.to_string(),
                path: None,
            },
        )
        .await
    }

    pub async fn delete(executor: impl SqliteExecutor<'_>, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
