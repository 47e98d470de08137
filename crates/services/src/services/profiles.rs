//! Deployment-profile path resolution.
//!
//! Rewrites collection-relative artifact paths onto a profile's platform
//! root. Any leading segment matching a known profile root (`.claude/`,
//! `.codex/`, …) is stripped and the profile's own root directory takes its
//! place; the profile's type-to-subdirectory map is honored for bare paths.

use std::path::{Path, PathBuf};

use db::models::artifact::ArtifactType;
use db::models::deployment_profile::{DeploymentProfile, KNOWN_PROFILE_ROOTS};
use thiserror::Error;

use super::discovery::signature_for;

#[derive(Debug, Error)]
pub enum PathResolutionError {
    #[error("artifact path '{0}' contains parent directory traversal")]
    PathTraversal(String),
    #[error("artifact path '{0}' is empty after normalization")]
    EmptyPath(String),
}

/// Compute the project-relative target path for an artifact under a profile.
pub fn resolve_relative_path(
    profile: &DeploymentProfile,
    artifact_type: ArtifactType,
    source_path: &str,
) -> Result<PathBuf, PathResolutionError> {
    let normalized = source_path.trim().trim_start_matches("./").trim_start_matches('/');

    if normalized.split('/').any(|segment| segment == "..") {
        return Err(PathResolutionError::PathTraversal(source_path.to_string()));
    }

    // Strip a leading platform root so collection layouts written for one
    // platform redeploy cleanly onto another.
    let mut remainder = normalized;
    for root in KNOWN_PROFILE_ROOTS {
        if let Some(stripped) = remainder
            .strip_prefix(root)
            .and_then(|rest| rest.strip_prefix('/'))
        {
            remainder = stripped;
            break;
        }
    }

    if remainder.is_empty() {
        return Err(PathResolutionError::EmptyPath(source_path.to_string()));
    }

    let subdir = type_subdir(profile, artifact_type);
    let mut target = PathBuf::from(&profile.root_dir);
    match &subdir {
        Some(subdir) if remainder.split('/').next() != Some(subdir.as_str()) => {
            target.push(subdir);
        }
        _ => {}
    }
    target.push(remainder);
    Ok(target)
}

/// Absolute target path under the project directory.
pub fn resolve_target_path(
    project_root: &Path,
    profile: &DeploymentProfile,
    artifact_type: ArtifactType,
    source_path: &str,
) -> Result<PathBuf, PathResolutionError> {
    Ok(project_root.join(resolve_relative_path(profile, artifact_type, source_path)?))
}

fn type_subdir(profile: &DeploymentProfile, artifact_type: ArtifactType) -> Option<String> {
    let path_map = profile.path_map();
    path_map
        .get(&artifact_type.to_string())
        .cloned()
        .or_else(|| {
            signature_for(artifact_type).map(|s| s.canonical_container.to_string())
        })
}
