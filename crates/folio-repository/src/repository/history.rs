//! History operations: version listing, historical reads, restoring old
//! versions and deleted resources, and pruning.

use std::collections::BTreeMap;

use chrono::Utc;

use folio_core::{HistoryEntry, Resource, StructureId};
use folio_storage::{ResourceStore, View};

use crate::collaborators::Permission;
use crate::context::RequestContext;
use crate::error::RepositoryError;
use crate::ledger::{self, PruneLimits, PruneStats};

use super::resources::{fresh_state, place, place_structure, store_bytes};
use super::{
    ensure_project, ensure_writable, mark_content, mark_structure, new_content_aspect, reload,
    resolve, split_properties, Repository, ResourceFilter,
};

/// A published version of a file together with the bytes it was published
/// with.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalFile {
    pub entry: HistoryEntry,
    pub contents: Vec<u8>,
}

/// Finds version `version` among the published versions of a structure.
fn find_version(
    store: &dyn ResourceStore,
    structure_id: StructureId,
    version: u32,
) -> Result<HistoryEntry, RepositoryError> {
    ledger::versions_for_structure(store, structure_id)?
        .ok_or_else(|| RepositoryError::not_found(format!("history of {}", structure_id)))?
        .into_iter()
        .find(|entry| entry.version() == version)
        .ok_or_else(|| {
            RepositoryError::not_found(format!("version {} of {}", version, structure_id))
        })
}

fn history_bytes(
    store: &dyn ResourceStore,
    entry: &HistoryEntry,
) -> Result<Vec<u8>, RepositoryError> {
    store
        .read_history_content(&entry.content_hash)?
        .ok_or_else(|| {
            RepositoryError::not_found(format!(
                "contents of version {} of {}",
                entry.version(),
                entry.path
            ))
        })
}

impl Repository {
    /// Published versions of a resource, newest first. Versions published
    /// through siblings that changed the shared content are included.
    pub fn read_all_available_versions(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
    ) -> Result<Vec<HistoryEntry>, RepositoryError> {
        self.inner.read(|store| {
            let resource = resolve(store, View::Offline, raw_path, ResourceFilter::All)?;
            self.inner.require(ctx, &resource, Permission::Read)?;
            Ok(ledger::list_versions(
                store,
                resource.structure_id(),
                resource.content_id(),
                resource.path(),
            )?)
        })
    }

    pub fn read_historical_file(
        &self,
        ctx: &RequestContext,
        structure_id: StructureId,
        version: u32,
    ) -> Result<HistoricalFile, RepositoryError> {
        self.inner.read(|store| {
            if let Some(live) = store.read_resource(View::Offline, structure_id)? {
                self.inner.require(ctx, &live, Permission::Read)?;
            }
            let entry = find_version(store, structure_id, version)?;
            let contents = history_bytes(store, &entry)?;
            Ok(HistoricalFile { entry, contents })
        })
    }

    /// Replaces the offline content and properties of a resource with those
    /// of a published version. The resource must be locked by the caller.
    pub fn restore_resource_version(
        &self,
        ctx: &RequestContext,
        structure_id: StructureId,
        version: u32,
    ) -> Result<Resource, RepositoryError> {
        ensure_writable(ctx)?;
        let now = Utc::now();
        let restored = self.inner.transaction(|store| {
            let resource = store
                .read_resource(View::Offline, structure_id)?
                .filter(|r| !r.state().is_deleted())
                .ok_or_else(|| RepositoryError::not_found(format!("structure {}", structure_id)))?;
            self.inner.check_write(ctx, &resource)?;
            let entry = find_version(&*store, structure_id, version)?;
            let bytes = history_bytes(&*store, &entry)?;

            let (own, shared) = split_properties(&entry.properties);
            if own != store.read_structure_properties(View::Offline, structure_id)? {
                store.replace_structure_properties(View::Offline, structure_id, &own)?;
                mark_structure(store, resource.structure.clone(), ctx, now)?;
            }
            store.replace_resource_properties(View::Offline, resource.content_id(), &shared)?;

            let mut content = resource.content.clone();
            content.flags = entry.flags;
            if resource.is_file() {
                content.length = bytes.len() as u64;
                content.date_content = now;
            }
            mark_content(store, content, ctx, now)?;
            if resource.is_file() {
                store_bytes(store, &*self.inner.links, resource.content_id(), &bytes)?;
            }
            reload(&*store, structure_id)
        })?;
        tracing::debug!(path = %restored.path(), version, "version restored");
        Ok(restored)
    }

    /// Resources below `folder` whose deletion was published and that have
    /// not been restored since. Returns the latest entry of each structure,
    /// ordered by path.
    pub fn read_deleted_resources(
        &self,
        ctx: &RequestContext,
        raw_folder: &str,
        recursive: bool,
    ) -> Result<Vec<HistoryEntry>, RepositoryError> {
        self.inner.read(|store| {
            let folder = resolve(store, View::Offline, raw_folder, ResourceFilter::Default)?;
            self.inner.require(ctx, &folder, Permission::Read)?;
            let mut latest: BTreeMap<StructureId, HistoryEntry> = BTreeMap::new();
            for entry in store.read_deleted_history(folder.path(), recursive)? {
                latest.insert(entry.structure_id, entry);
            }
            let mut deleted = Vec::new();
            for (id, entry) in latest {
                if store.read_resource(View::Offline, id)?.is_some() {
                    continue;
                }
                // Restored under a new structure id.
                let restored = store
                    .read_resource_by_path(View::Offline, &entry.path)?
                    .is_some_and(|r| r.content_id() == entry.content_id);
                if !restored {
                    deleted.push(entry);
                }
            }
            deleted.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(deleted)
        })
    }

    /// Brings a resource whose deletion was published back at its last
    /// path, under a new structure id.
    ///
    /// The content identity is reused, so the content history stays
    /// reachable. If a live sibling still holds the content the restored
    /// resource joins it; otherwise the content is recreated from the
    /// history entry.
    pub fn restore_deleted_resource(
        &self,
        ctx: &RequestContext,
        structure_id: StructureId,
    ) -> Result<Resource, RepositoryError> {
        ensure_writable(ctx)?;
        let now = Utc::now();
        let restored = self.inner.transaction(|store| {
            ensure_project(&*store, ctx)?;
            if let Some(live) = store.read_resource(View::Offline, structure_id)? {
                return Err(RepositoryError::DataConsistency(format!(
                    "structure {} is live at {}",
                    structure_id,
                    live.path()
                )));
            }
            let entry = store
                .read_history_by_structure(structure_id)?
                .pop()
                .ok_or_else(|| RepositoryError::not_found(format!("history of {}", structure_id)))?;
            if let Some(occupant) = store.read_resource_by_path(View::Offline, &entry.path)? {
                if !occupant.state().is_deleted() {
                    return Err(RepositoryError::DataConsistency(format!(
                        "{} is occupied by another resource",
                        entry.path
                    )));
                }
            }
            let placement = place(&self.inner, &*store, ctx, entry.path.clone())?;
            let content_id = entry.content_id;
            let (own, shared) = split_properties(&entry.properties);

            let recreate = store.read_content_aspect(View::Offline, content_id)?.is_none();
            if recreate {
                let mut content =
                    new_content_aspect(content_id, entry.resource_type, entry.length, ctx, now);
                content.flags = entry.flags;
                content.state = fresh_state(&*store, content_id)?;
                content.resource_version = entry.resource_version;
                content.date_content = entry.date_content;
                store.write_content_aspect(View::Offline, &content)?;
            }

            let mut structure = place_structure(
                store,
                &placement,
                Some(StructureId::new()),
                content_id,
                ctx,
                now,
            )?;
            structure.date_released = entry.date_released;
            structure.date_expired = entry.date_expired;
            store.write_structure(View::Offline, &structure)?;
            store.replace_structure_properties(View::Offline, structure.structure_id, &own)?;

            if recreate {
                store.replace_resource_properties(View::Offline, content_id, &shared)?;
                if !entry.resource_type.is_folder() {
                    let bytes = history_bytes(&*store, &entry)?;
                    store_bytes(store, &*self.inner.links, content_id, &bytes)?;
                }
            }
            let resource = reload(&*store, structure.structure_id)?;
            crate::relations::resolve_incoming(store, View::Offline, &resource)?;
            self.lock_created(&*store, ctx, &resource)?;
            Ok(resource)
        })?;
        tracing::debug!(
            path = %restored.path(),
            from = %structure_id,
            to = %restored.structure_id(),
            "deleted resource restored"
        );
        Ok(restored)
    }

    /// Prunes the whole history ledger. `None` uses the configured keep
    /// counts.
    pub fn prune_history(
        &self,
        limits: Option<PruneLimits>,
    ) -> Result<PruneStats, RepositoryError> {
        let limits = limits.unwrap_or_else(|| self.inner.history_limits());
        let stats = self
            .inner
            .transaction(|store| Ok(ledger::prune(store, limits, None)?))?;
        tracing::info!(
            entries = stats.entries_removed,
            blobs = stats.blobs_removed,
            "history pruned"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{ProjectId, ResourceType, UserId};

    use crate::publish::PublishOptions;

    async fn setup() -> (Repository, RequestContext) {
        let repo = Repository::in_memory().unwrap();
        let user = UserId::new();
        let project = repo
            .create_project(&RequestContext::online(user), "Work", "")
            .unwrap();
        (repo, RequestContext::new(user, project.id))
    }

    async fn publish(repo: &Repository, ctx: &RequestContext, path: &str) {
        repo.publish_resources(ctx, &[path], PublishOptions::default())
            .unwrap();
        repo.wait_while_running().await;
    }

    #[tokio::test]
    async fn test_restore_version_round_trip() {
        let (repo, ctx) = setup().await;
        let file = repo
            .create_resource(&ctx, "/page.txt", ResourceType::Plain, Some(b"first"), &[])
            .unwrap();
        publish(&repo, &ctx, "/page.txt").await;
        repo.lock_resource(&ctx, "/page.txt").unwrap();
        repo.write_file(&ctx, "/page.txt", b"second").unwrap();
        publish(&repo, &ctx, "/page.txt").await;

        let versions = repo.read_all_available_versions(&ctx, "/page.txt").unwrap();
        let numbers: Vec<u32> = versions.iter().map(|v| v.version()).collect();
        assert_eq!(numbers, vec![2, 1]);

        repo.lock_resource(&ctx, "/page.txt").unwrap();
        repo.restore_resource_version(&ctx, file.structure_id(), 1)
            .unwrap();
        let read = repo
            .read_file(&ctx, "/page.txt", ResourceFilter::Default)
            .unwrap();
        assert_eq!(read.contents, b"first");

        let historical = repo
            .read_historical_file(&ctx, file.structure_id(), 2)
            .unwrap();
        assert_eq!(historical.contents, b"second");
        assert!(matches!(
            repo.read_historical_file(&ctx, file.structure_id(), 9),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_deleted_resource_reuses_content() {
        let (repo, ctx) = setup().await;
        let file = repo
            .create_resource(&ctx, "/gone.txt", ResourceType::Plain, Some(b"bytes"), &[])
            .unwrap();
        publish(&repo, &ctx, "/gone.txt").await;
        repo.lock_resource(&ctx, "/gone.txt").unwrap();
        repo.delete_resource(&ctx, "/gone.txt", Default::default())
            .unwrap();
        publish(&repo, &ctx, "/gone.txt").await;

        let deleted = repo.read_deleted_resources(&ctx, "/", false).unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].structure_id, file.structure_id());

        let restored = repo
            .restore_deleted_resource(&ctx, file.structure_id())
            .unwrap();
        assert_ne!(restored.structure_id(), file.structure_id());
        assert_eq!(restored.content_id(), file.content_id());
        assert_eq!(restored.path(), "/gone.txt");
        assert!(restored.state().is_new());
        let read = repo
            .read_file(&ctx, "/gone.txt", ResourceFilter::Default)
            .unwrap();
        assert_eq!(read.contents, b"bytes");
        assert!(repo.read_deleted_resources(&ctx, "/", true).unwrap().is_empty());

        let err = repo
            .restore_deleted_resource(&ctx, StructureId::new())
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_restore_deleted_over_live_resource_fails() {
        let (repo, ctx) = setup().await;
        let file = repo
            .create_resource(&ctx, "/a.txt", ResourceType::Plain, Some(b"a"), &[])
            .unwrap();
        publish(&repo, &ctx, "/a.txt").await;
        repo.lock_resource(&ctx, "/a.txt").unwrap();
        repo.delete_resource(&ctx, "/a.txt", Default::default())
            .unwrap();
        publish(&repo, &ctx, "/a.txt").await;
        repo.create_resource(&ctx, "/a.txt", ResourceType::Plain, Some(b"b"), &[])
            .unwrap();

        let err = repo
            .restore_deleted_resource(&ctx, file.structure_id())
            .unwrap_err();
        assert!(matches!(err, RepositoryError::DataConsistency(_)));
    }

    #[tokio::test]
    async fn test_online_project_cannot_restore() {
        let (repo, _) = setup().await;
        let err = repo
            .restore_deleted_resource(
                &RequestContext::new(UserId::new(), ProjectId::ONLINE),
                StructureId::new(),
            )
            .unwrap_err();
        assert!(matches!(err, RepositoryError::PermissionDenied(_)));
    }
}
