//! Version lineage utilities.
//!
//! A lineage is the ordered list of content hashes from the root version to
//! the current one. Deployment and sync use these helpers to extend chains,
//! find merge bases, and trace paths between related versions.

use db::models::artifact_version::ArtifactVersion;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

/// Build the lineage for a new version by extending its parent's lineage.
///
/// - no parent: `[current]`
/// - parent with lineage: `parent_lineage + [current]`
/// - parent without lineage (legacy row): `[parent, current]`
/// - parent hash unknown to the registry: `[current]` (orphan)
pub async fn build_version_lineage(
    pool: &SqlitePool,
    parent_hash: Option<&str>,
    current_hash: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    build_lineage_on_connection(&mut conn, parent_hash, current_hash).await
}

/// Connection-level variant for callers holding an open transaction.
pub async fn build_lineage_on_connection(
    conn: &mut sqlx::SqliteConnection,
    parent_hash: Option<&str>,
    current_hash: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let Some(parent_hash) = parent_hash else {
        return Ok(vec![current_hash.to_string()]);
    };

    match ArtifactVersion::find_by_hash(&mut *conn, parent_hash).await? {
        Some(parent) => {
            let mut lineage = parent.lineage();
            if lineage.is_empty() {
                lineage = vec![parent_hash.to_string()];
            }
            lineage.push(current_hash.to_string());
            Ok(lineage)
        }
        None => Ok(vec![current_hash.to_string()]),
    }
}

/// Most recent common ancestor of two versions, used as the base of a
/// three-way merge. Returns None when either version is unknown, either
/// lineage is empty, or the versions share no history.
pub async fn find_common_ancestor(
    pool: &SqlitePool,
    hash_a: &str,
    hash_b: &str,
) -> Result<Option<String>, sqlx::Error> {
    let (Some(version_a), Some(version_b)) = (
        ArtifactVersion::find_by_hash(pool, hash_a).await?,
        ArtifactVersion::find_by_hash(pool, hash_b).await?,
    ) else {
        return Ok(None);
    };

    let lineage_a = version_a.lineage();
    let lineage_b = version_b.lineage();
    if lineage_a.is_empty() || lineage_b.is_empty() {
        return Ok(None);
    }

    let set_b: std::collections::HashSet<&str> =
        lineage_b.iter().map(String::as_str).collect();

    // Walk A's lineage backwards so the first hit is the most recent.
    Ok(lineage_a
        .iter()
        .rev()
        .find(|h| set_b.contains(h.as_str()))
        .cloned())
}

/// Ordered slice of the lineage connecting two versions, reversed when `to`
/// precedes `from`. None when the versions are unrelated.
pub async fn trace_lineage_path(
    pool: &SqlitePool,
    from_hash: &str,
    to_hash: &str,
) -> Result<Option<Vec<String>>, sqlx::Error> {
    let (Some(from_version), Some(to_version)) = (
        ArtifactVersion::find_by_hash(pool, from_hash).await?,
        ArtifactVersion::find_by_hash(pool, to_hash).await?,
    ) else {
        return Ok(None);
    };

    let slice_between = |lineage: &[String]| -> Option<Vec<String>> {
        let from_index = lineage.iter().position(|h| h == from_hash)?;
        let to_index = lineage.iter().position(|h| h == to_hash)?;
        if from_index <= to_index {
            Some(lineage[from_index..=to_index].to_vec())
        } else {
            let mut path = lineage[to_index..=from_index].to_vec();
            path.reverse();
            Some(path)
        }
    };

    if let Some(path) = slice_between(&to_version.lineage()) {
        return Ok(Some(path));
    }
    if let Some(path) = slice_between(&from_version.lineage()) {
        return Ok(Some(path));
    }
    Ok(None)
}

/// Maintenance repair: rebuild parent links and lineages for legacy version
/// rows that predate lineage tracking. Walks each artifact's chain in
/// creation order, treating the previous version as the parent. Returns the
/// number of rows updated.
pub async fn link_orphan_versions(pool: &SqlitePool, artifact_uuid: Uuid) -> Result<u64, sqlx::Error> {
    let chain = ArtifactVersion::chain(pool, artifact_uuid).await?;
    let mut repaired = 0u64;
    let mut previous: Option<(String, Vec<String>)> = None;

    for version in chain {
        let lineage = version.lineage();
        if lineage.is_empty() {
            let (parent_hash, rebuilt) = match &previous {
                Some((parent, parent_lineage)) => {
                    let mut rebuilt = parent_lineage.clone();
                    rebuilt.push(version.content_hash.clone());
                    (Some(parent.clone()), rebuilt)
                }
                None => (None, vec![version.content_hash.clone()]),
            };
            ArtifactVersion::set_lineage(pool, version.id, parent_hash.as_deref(), &rebuilt)
                .await?;
            repaired += 1;
            previous = Some((version.content_hash.clone(), rebuilt));
        } else {
            previous = Some((version.content_hash.clone(), lineage));
        }
    }

    if repaired > 0 {
        info!(%artifact_uuid, repaired, "backfilled lineage on legacy version rows");
    }
    Ok(repaired)
}
