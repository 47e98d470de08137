use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Assistant platforms a profile can target.
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
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    ClaudeCode,
    Codex,
    Gemini,
    Cursor,
    Other,
}

impl Platform {
    /// The conventional root directory for each platform.
    pub fn default_root_dir(&self) -> &'static str {
        match self {
            Platform::ClaudeCode => ".claude",
            Platform::Codex => ".codex",
            Platform::Gemini => ".gemini",
            Platform::Cursor => ".cursor",
            Platform::Other => ".claude",
        }
    }

    /// Reverse mapping used by tracker legacy-record migration.
    pub fn from_root_dir(root_dir: &str) -> Platform {
        match root_dir.trim_start_matches('/') {
            ".claude" => Platform::ClaudeCode,
            ".codex" => Platform::Codex,
            ".gemini" => Platform::Gemini,
            ".cursor" => Platform::Cursor,
            _ => Platform::Other,
        }
    }
}

/// All root directories recognized when stripping platform prefixes from
/// collection-relative artifact paths.
pub const KNOWN_PROFILE_ROOTS: &[&str] = &[".claude", ".codex", ".gemini", ".cursor"];

/// Per-project, per-platform deployment configuration.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeploymentProfile {
    pub id: Uuid,
    pub project_id: Uuid,
    pub profile_id: String,
    pub platform: Platform,
    pub root_dir: String,
    /// JSON object mapping artifact type to subdirectory.
    pub artifact_path_map: String,
    pub config_filenames: Option<String>,
    pub context_prefixes: Option<String>,
    pub supported_types: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDeploymentProfile {
    pub project_id: Uuid,
    pub profile_id: String,
    pub platform: Platform,
    pub root_dir: Option<String>,
    pub artifact_path_map: Option<HashMap<String, String>>,
    pub config_filenames: Option<Vec<String>>,
    pub context_prefixes: Option<Vec<String>>,
    pub supported_types: Option<Vec<String>>,
}

impl DeploymentProfile {
    pub fn path_map(&self) -> HashMap<String, String> {
        serde_json::from_str(&self.artifact_path_map).unwrap_or_default()
    }

    pub fn supported_types(&self) -> Option<Vec<String>> {
        self.supported_types
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    pub async fn find_by_id(
        executor: impl SqliteExecutor<'_>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, DeploymentProfile>("SELECT * FROM deployment_profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_for_project(
        executor: impl SqliteExecutor<'_>,
        project_id: Uuid,
        profile_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, DeploymentProfile>(
            "SELECT * FROM deployment_profiles WHERE project_id = ? AND profile_id = ?",
        )
        .bind(project_id)
        .bind(profile_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_project(
        executor: impl SqliteExecutor<'_>,
        project_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, DeploymentProfile>(
            "SELECT * FROM deployment_profiles WHERE project_id = ? ORDER BY profile_id ASC",
        )
        .bind(project_id)
        .fetch_all(executor)
        .await
    }

    pub async fn upsert(
        executor: impl SqliteExecutor<'_>,
        data: &CreateDeploymentProfile,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        let root_dir = data
            .root_dir
            .clone()
            .unwrap_or_else(|| data.platform.default_root_dir().to_string());
        let path_map = data
            .artifact_path_map
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_else(|_| "{}".to_string()))
            .unwrap_or_else(|| "{}".to_string());
        let as_json = |list: &Option<Vec<String>>| {
            list.as_ref()
                .map(|v| serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string()))
        };
        let config_filenames = as_json(&data.config_filenames);
        let context_prefixes = as_json(&data.context_prefixes);
        let supported = as_json(&data.supported_types);
        sqlx::query_as::<_, DeploymentProfile>(
            "INSERT INTO deployment_profiles
                 (id, project_id, profile_id, platform, root_dir, artifact_path_map,
                  config_filenames, context_prefixes, supported_types, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(project_id, profile_id) DO UPDATE SET
                 platform = excluded.platform,
                 root_dir = excluded.root_dir,
                 artifact_path_map = excluded.artifact_path_map,
                 config_filenames = excluded.config_filenames,
                 context_prefixes = excluded.context_prefixes,
                 supported_types = excluded.supported_types
             RETURNING *",
        )
        .bind(id)
        .bind(data.project_id)
        .bind(&data.profile_id)
        .bind(data.platform)
        .bind(root_dir)
        .bind(path_map)
        .bind(config_filenames)
        .bind(context_prefixes)
        .bind(supported)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    pub async fn delete(executor: impl SqliteExecutor<'_>, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM deployment_profiles WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
