use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor};
use strum_macros::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Closed set of artifact kinds. The first five are prompt-engineering units;
/// the rest are context entities deployed alongside them.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    sqlx::Type,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ArtifactType {
    Skill,
    Command,
    Agent,
    Hook,
    Mcp,
    Config,
    Spec,
    Rule,
    Progress,
}

impl ArtifactType {
    /// Human identifier `"<type>:<name>"` shared with collection manifests
    /// and skip-preference keys.
    pub fn artifact_id(&self, name: &str) -> String {
        format!("{self}:{name}")
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Artifact {
    pub uuid: Uuid,
    /// Human identifier, `"<type>:<name>"`.
    pub id: String,
    pub project_id: Option<Uuid>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub name: String,
    pub deployed_version: Option<String>,
    pub upstream_version: Option<String>,
    pub outdated: bool,
    pub local_modified: bool,
    /// JSON array of platform names; None means "all platforms".
    pub target_platforms: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateArtifact {
    pub project_id: Option<Uuid>,
    pub artifact_type: ArtifactType,
    pub name: String,
}

impl Artifact {
    pub async fn find_by_uuid(
        executor: impl SqliteExecutor<'_>,
        uuid: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Artifact>("SELECT * FROM artifacts WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(executor)
            .await
    }

    /// Look up by human identifier `"<type>:<name>"`.
    pub async fn find_by_id(
        executor: impl SqliteExecutor<'_>,
        id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Artifact>("SELECT * FROM artifacts WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Case-insensitive name lookup with a strict type match. Backed by the
    /// expression index on (LOWER(name), type).
    pub async fn find_by_name_type(
        executor: impl SqliteExecutor<'_>,
        name: &str,
        artifact_type: ArtifactType,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Artifact>(
            "SELECT * FROM artifacts WHERE LOWER(name) = LOWER(?) AND type = ?",
        )
        .bind(name)
        .bind(artifact_type)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_project(
        executor: impl SqliteExecutor<'_>,
        project_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Artifact>(
            "SELECT * FROM artifacts WHERE project_id = ? ORDER BY id ASC",
        )
        .bind(project_id)
        .fetch_all(executor)
        .await
    }

    pub async fn create(
        executor: impl SqliteExecutor<'_>,
        data: &CreateArtifact,
    ) -> Result<Self, sqlx::Error> {
        let uuid = Uuid::new_v4();
        let id = data.artifact_type.artifact_id(&data.name);
        let now = Utc::now();
        sqlx::query_as::<_, Artifact>(
            "INSERT INTO artifacts (uuid, id, project_id, type, name, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(uuid)
        .bind(&id)
        .bind(data.project_id)
        .bind(data.artifact_type)
        .bind(&data.name)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    /// Insert the artifact if its identifier is new, otherwise return the
    /// existing row (bumping only `updated_at`).
    pub async fn upsert(
        executor: impl SqliteExecutor<'_>,
        data: &CreateArtifact,
    ) -> Result<Self, sqlx::Error> {
        let uuid = Uuid::new_v4();
        let id = data.artifact_type.artifact_id(&data.name);
        let now = Utc::now();
        sqlx::query_as::<_, Artifact>(
            "INSERT INTO artifacts (uuid, id, project_id, type, name, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at
             RETURNING *",
        )
        .bind(uuid)
        .bind(&id)
        .bind(data.project_id)
        .bind(data.artifact_type)
        .bind(&data.name)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub async fn set_versions(
        executor: impl SqliteExecutor<'_>,
        uuid: Uuid,
        deployed_version: Option<&str>,
        upstream_version: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE artifacts
             SET deployed_version = COALESCE(?, deployed_version),
                 upstream_version = COALESCE(?, upstream_version),
                 outdated = CASE
                     WHEN COALESCE(?, deployed_version) IS NOT NULL
                          AND COALESCE(?, upstream_version) IS NOT NULL
                          AND COALESCE(?, deployed_version) != COALESCE(?, upstream_version)
                     THEN 1 ELSE outdated END,
                 updated_at = ?
             WHERE uuid = ?",
        )
        .bind(deployed_version)
        .bind(upstream_version)
        .bind(deployed_version)
        .bind(upstream_version)
        .bind(deployed_version)
        .bind(upstream_version)
        .bind(Utc::now())
        .bind(uuid)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn mark_local_modified(
        executor: impl SqliteExecutor<'_>,
        uuid: Uuid,
        modified: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE artifacts SET local_modified = ?, updated_at = ? WHERE uuid = ?")
            .bind(modified)
            .bind(Utc::now())
            .bind(uuid)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn delete(executor: impl SqliteExecutor<'_>, uuid: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM artifacts WHERE uuid = ?")
            .bind(uuid)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    pub fn target_platforms(&self) -> Option<Vec<String>> {
        self.target_platforms
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}
