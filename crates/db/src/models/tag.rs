use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor};
use uuid::Uuid;

/// Workspace-scoped tag. Slug is unique; color is an optional hex string.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub color: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTag {
    pub name: String,
    pub slug: String,
    pub color: Option<String>,
    pub description: Option<String>,
}

impl Tag {
    pub async fn find_all(executor: impl SqliteExecutor<'_>) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Tag>("SELECT * FROM tags ORDER BY name ASC")
            .fetch_all(executor)
            .await
    }

    pub async fn find_by_id(
        executor: impl SqliteExecutor<'_>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_slug(
        executor: impl SqliteExecutor<'_>,
        slug: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE slug = ?")
            .bind(slug)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_name(
        executor: impl SqliteExecutor<'_>,
        name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE name = ?")
            .bind(name)
            .fetch_optional(executor)
            .await
    }

    pub async fn create(
        executor: impl SqliteExecutor<'_>,
        data: &CreateTag,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, Tag>(
            "INSERT INTO tags (id, name, slug, color, description, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.slug)
        .bind(&data.color)
        .bind(&data.description)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    pub async fn rename(
        executor: impl SqliteExecutor<'_>,
        id: Uuid,
        new_name: &str,
        new_slug: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Tag>(
            "UPDATE tags SET name = ?, slug = ? WHERE id = ? RETURNING *",
        )
        .bind(new_name)
        .bind(new_slug)
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn delete(executor: impl SqliteExecutor<'_>, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tags WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// True when any tag carries a color. Used as the authority check during
    /// cache recovery: colored tags mean the DB already holds tag metadata.
    pub async fn any_with_color(
        executor: impl SqliteExecutor<'_>,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tags WHERE color IS NOT NULL")
                .fetch_one(executor)
                .await?;
        Ok(count > 0)
    }
}

/// Ordered-free join between tags and artifacts.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ArtifactTag {
    pub tag_id: Uuid,
    pub artifact_uuid: Uuid,
}

impl ArtifactTag {
    pub async fn attach(
        executor: impl SqliteExecutor<'_>,
        tag_id: Uuid,
        artifact_uuid: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO artifact_tags (tag_id, artifact_uuid)
             VALUES (?, ?)
             ON CONFLICT(tag_id, artifact_uuid) DO NOTHING",
        )
        .bind(tag_id)
        .bind(artifact_uuid)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn detach(
        executor: impl SqliteExecutor<'_>,
        tag_id: Uuid,
        artifact_uuid: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM artifact_tags WHERE tag_id = ? AND artifact_uuid = ?")
            .bind(tag_id)
            .bind(artifact_uuid)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Tag names carried by an artifact, sorted for stable `tags_json` output.
    pub async fn tag_names_for_artifact(
        executor: impl SqliteExecutor<'_>,
        artifact_uuid: Uuid,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT t.name FROM tags t
             JOIN artifact_tags at ON at.tag_id = t.id
             WHERE at.artifact_uuid = ?
             ORDER BY t.name ASC",
        )
        .bind(artifact_uuid)
        .fetch_all(executor)
        .await
    }

    pub async fn artifacts_with_tag(
        executor: impl SqliteExecutor<'_>,
        tag_id: Uuid,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar("SELECT artifact_uuid FROM artifact_tags WHERE tag_id = ?")
            .bind(tag_id)
            .fetch_all(executor)
            .await
    }
}
