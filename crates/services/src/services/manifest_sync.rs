//! Write-through sync: mirrors DB-side group and tag mutations back into
//! `collection.toml`.
//!
//! Every sync writes a full snapshot of the affected section, never a patch.
//! Failures are logged and swallowed so the API request that triggered the
//! mutation still succeeds; the DB commit has already happened by the time
//! these run.

use db::models::collection::Collection;
use db::models::group::{Group, GroupArtifact};
use db::models::tag::Tag;
use db::DBService;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::collection::{CollectionStore, CollectionStoreError, GroupDefinition, TagDefinition};

#[derive(Debug, Error)]
pub enum ManifestSyncError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Store(#[from] CollectionStoreError),
}

pub struct ManifestSyncService {
    db: DBService,
    store: CollectionStore,
}

impl ManifestSyncService {
    pub fn new(db: DBService, store: CollectionStore) -> Self {
        Self { db, store }
    }

    /// Snapshot all groups of a collection into its manifest. Never
    /// propagates failures.
    pub async fn sync_groups(&self, collection_id: Uuid) {
        if let Err(e) = self.sync_groups_inner(collection_id).await {
            error!("manifest sync: failed to sync groups for collection '{collection_id}': {e}");
        }
    }

    async fn sync_groups_inner(&self, collection_id: Uuid) -> Result<(), ManifestSyncError> {
        let Some(name) = self.resolve_collection_name(collection_id).await? else {
            return Ok(());
        };
        if !self.store.manifest_path(&name).exists() {
            debug!("manifest sync: no manifest for '{name}'; skipping group sync");
            return Ok(());
        }

        let groups = Group::find_by_collection(&self.db.pool, collection_id).await?;
        let mut definitions = Vec::with_capacity(groups.len());
        for group in groups {
            let members = GroupArtifact::member_ids(&self.db.pool, group.id).await?;
            definitions.push(GroupDefinition {
                name: group.name,
                description: group.description.unwrap_or_default(),
                color: group.color.unwrap_or_default(),
                icon: group.icon.unwrap_or_default(),
                position: group.position,
                members,
            });
        }

        let mut manifest = self.store.read_manifest(&name)?;
        let count = definitions.len();
        manifest.groups = definitions;
        self.store.write_manifest(&name, &manifest)?;

        info!("manifest sync: wrote {count} group(s) to collection '{name}'");
        Ok(())
    }

    /// Snapshot all tag definitions into a collection's manifest. Tags are
    /// workspace-scoped, so every Tag row is written regardless of which
    /// collection triggered the sync. Never propagates failures.
    pub async fn sync_tag_definitions(&self, collection_id: Uuid) {
        if let Err(e) = self.sync_tag_definitions_inner(collection_id).await {
            error!(
                "manifest sync: failed to sync tag definitions for collection '{collection_id}': {e}"
            );
        }
    }

    async fn sync_tag_definitions_inner(
        &self,
        collection_id: Uuid,
    ) -> Result<(), ManifestSyncError> {
        let Some(name) = self.resolve_collection_name(collection_id).await? else {
            return Ok(());
        };
        if !self.store.manifest_path(&name).exists() {
            debug!("manifest sync: no manifest for '{name}'; skipping tag sync");
            return Ok(());
        }

        let tags = Tag::find_all(&self.db.pool).await?;
        let definitions: Vec<TagDefinition> = tags
            .into_iter()
            .map(|tag| TagDefinition {
                name: tag.name,
                slug: tag.slug,
                color: tag.color,
                description: tag.description,
            })
            .collect();

        let mut manifest = self.store.read_manifest(&name)?;
        let count = definitions.len();
        manifest.tag_definitions = definitions;
        self.store.write_manifest(&name, &manifest)?;

        info!("manifest sync: wrote {count} tag definition(s) to collection '{name}'");
        Ok(())
    }

    async fn resolve_collection_name(
        &self,
        collection_id: Uuid,
    ) -> Result<Option<String>, sqlx::Error> {
        let collection = Collection::find_by_id(&self.db.pool, collection_id).await?;
        if collection.is_none() {
            debug!("manifest sync: collection '{collection_id}' not in DB; skipping");
        }
        Ok(collection.map(|c| c.name))
    }
}
