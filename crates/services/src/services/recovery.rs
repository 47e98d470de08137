//! Cache recovery: rebuild tag and group metadata from `collection.toml`
//! after the relational cache has been dropped or lost.
//!
//! The manifest is only consulted where the DB holds nothing authoritative:
//! tags are recovered only when no DB tag carries a color, groups only when
//! the collection has no group rows. Calling recovery twice is a no-op.

use db::models::artifact::Artifact;
use db::models::collection::Collection;
use db::models::group::{CreateGroup, Group, GroupArtifact};
use db::models::tag::{CreateTag, Tag};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};

use super::collection::{normalize_hex_color, CollectionStore, CollectionStoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkippedReason {
    NoCollectionToml,
    TomlReadError,
}

impl SkippedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkippedReason::NoCollectionToml => "no_collection_toml",
            SkippedReason::TomlReadError => "toml_read_error",
        }
    }
}

#[derive(Debug)]
pub struct RecoveryReport {
    pub collection: String,
    pub tags_imported: usize,
    pub groups_imported: usize,
    pub members_skipped: usize,
    pub skipped_reason: Option<SkippedReason>,
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Recover tag definitions and groups for one collection from its manifest.
pub async fn recover_collection_metadata(
    pool: &SqlitePool,
    store: &CollectionStore,
    collection_name: &str,
) -> Result<RecoveryReport, RecoveryError> {
    let mut report = RecoveryReport {
        collection: collection_name.to_string(),
        tags_imported: 0,
        groups_imported: 0,
        members_skipped: 0,
        skipped_reason: None,
    };

    let manifest = match store.read_manifest(collection_name) {
        Ok(manifest) => manifest,
        Err(CollectionStoreError::NotFound(_)) => {
            report.skipped_reason = Some(SkippedReason::NoCollectionToml);
            return Ok(report);
        }
        Err(e) => {
            warn!("recovery: unreadable manifest for '{collection_name}': {e}");
            report.skipped_reason = Some(SkippedReason::TomlReadError);
            return Ok(report);
        }
    };

    let collection =
        Collection::upsert(pool, collection_name, Some(manifest.collection.version.as_str()))
            .await?;

    // Tags: colored DB tags mean the DB already holds richer metadata than
    // the manifest can provide, so the manifest loses.
    if Tag::any_with_color(pool).await? {
        info!("recovery: DB tags carry colors; skipping tag recovery for '{collection_name}'");
    } else {
        for definition in &manifest.tag_definitions {
            if Tag::find_by_slug(pool, &definition.slug).await?.is_some() {
                continue;
            }
            Tag::create(
                pool,
                &CreateTag {
                    name: definition.name.clone(),
                    slug: definition.slug.clone(),
                    color: normalize_hex_color(definition.color.as_deref()),
                    description: definition.description.clone(),
                },
            )
            .await?;
            report.tags_imported += 1;
        }
    }

    // Groups: any existing group row for the collection means the DB state
    // survived and must not be clobbered.
    if Group::any_for_collection(pool, collection.id).await? {
        info!("recovery: collection '{collection_name}' already has groups; skipping");
        return Ok(report);
    }

    for (index, definition) in manifest.groups.iter().enumerate() {
        let group = Group::create_at_position(
            pool,
            &CreateGroup {
                collection_id: collection.id,
                name: definition.name.clone(),
                description: (!definition.description.is_empty())
                    .then(|| definition.description.clone()),
                color: (!definition.color.is_empty()).then(|| definition.color.clone()),
                icon: (!definition.icon.is_empty()).then(|| definition.icon.clone()),
            },
            index as i64,
        )
        .await?;
        report.groups_imported += 1;

        let mut position = 0i64;
        for member in &definition.members {
            match Artifact::find_by_id(pool, member).await? {
                Some(artifact) => {
                    GroupArtifact::add(pool, group.id, artifact.uuid, position).await?;
                    position += 1;
                }
                None => {
                    warn!(
                        "recovery: member '{member}' of group '{}' not found; skipping",
                        definition.name
                    );
                    report.members_skipped += 1;
                }
            }
        }
    }

    info!(
        "recovery for '{collection_name}': {} tag(s), {} group(s), {} member(s) skipped",
        report.tags_imported, report.groups_imported, report.members_skipped
    );
    Ok(report)
}
