//! The [`Repository`]: the injectable state object every operation runs
//! against.
//!
//! A repository owns the store (behind one mutex; every operation runs in a
//! single store transaction), the in-memory lock table, the collaborators,
//! and the publish queue with its worker task. Construct one per process
//! (or per test) with [`Repository::builder`]; shut it down with
//! [`Repository::shutdown`].
//!
//! The operations are grouped by concern in the submodules:
//! - [`resources`]: create/import/delete/move/copy and attribute writes
//! - [`locks`]: lock, unlock, steal, query
//! - [`history`]: version listing, historical reads, restore, pruning
//! - [`publish`]: publish lists, validation, queue control
//! - [`projects`]: project management

pub mod history;
pub mod locks;
pub mod projects;
pub mod publish;
pub mod resources;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use folio_core::path;
use folio_core::property::{merge_value, validate_property_name};
use folio_core::{
    ContentAspect, ContentId, Project, ProjectId, Property, PropertyDefinition, PublishJobState,
    PublishTag, Resource, ResourceFlags, ResourceState, ResourceType, StructureAspect,
    StructureId, UserId,
};
use folio_storage::{
    InMemoryStore, PropertyMap, PublishJobRecord, ResourceStore, SqliteStore, StorageError, View,
    PUBLISH_SEQUENCE_COUNTER, PUBLISH_TAG_COUNTER,
};

use crate::collaborators::{AllowAll, LinkExtractor, NoLinks, Permission, PermissionHandler};
use crate::concurrency::{LockManager, LockTarget, LockType};
use crate::config::{RepositoryConfig, StorageBackend};
use crate::context::RequestContext;
use crate::error::RepositoryError;
use crate::ledger::PruneLimits;
use crate::publish::engine::PublishEngine;
use crate::publish::queue::{spawn_worker, PublishJob, PublishQueue};
use crate::relations;

/// The user recorded for bootstrap records.
pub const SYSTEM_USER: UserId = UserId(Uuid::nil());

/// Whether reads include resources marked DELETED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceFilter {
    /// Hide deleted resources.
    #[default]
    Default,
    /// Include deleted resources.
    All,
}

impl ResourceFilter {
    pub fn accepts(self, resource: &Resource) -> bool {
        self == ResourceFilter::All || !resource.state().is_deleted()
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub(crate) struct RepositoryInner {
    store: Mutex<Box<dyn ResourceStore>>,
    pub(crate) locks: LockManager,
    pub(crate) config: RepositoryConfig,
    pub(crate) permissions: Box<dyn PermissionHandler>,
    pub(crate) links: Box<dyn LinkExtractor>,
    publish_tags: AtomicU64,
    job_sequence: AtomicU64,
}

/// Runs `f` inside a store transaction, rolling back on error.
fn in_transaction<T>(
    store: &mut dyn ResourceStore,
    f: impl FnOnce(&mut dyn ResourceStore) -> Result<T, RepositoryError>,
) -> Result<T, RepositoryError> {
    store.begin()?;
    match f(&mut *store) {
        Ok(value) => {
            store.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = store.rollback() {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}

impl RepositoryInner {
    fn store(&self) -> Result<MutexGuard<'_, Box<dyn ResourceStore>>, RepositoryError> {
        self.store
            .lock()
            .map_err(|_| RepositoryError::Internal("store mutex poisoned".to_string()))
    }

    /// Runs `f` in one store transaction.
    pub(crate) fn transaction<T>(
        &self,
        f: impl FnOnce(&mut dyn ResourceStore) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let mut guard = self.store()?;
        in_transaction(&mut **guard, f)
    }

    /// Runs a read-only closure against the store.
    pub(crate) fn read<T>(
        &self,
        f: impl FnOnce(&dyn ResourceStore) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let guard = self.store()?;
        f(&**guard)
    }

    pub(crate) fn require(
        &self,
        ctx: &RequestContext,
        resource: &Resource,
        permission: Permission,
    ) -> Result<(), RepositoryError> {
        if self
            .permissions
            .has_permission(ctx.user, resource, permission)
        {
            Ok(())
        } else {
            Err(RepositoryError::PermissionDenied(format!(
                "{:?} permission on {} denied for user {}",
                permission,
                resource.path(),
                ctx.user
            )))
        }
    }

    /// Write permission plus an exclusive or inherited lock of the caller.
    pub(crate) fn check_write(
        &self,
        ctx: &RequestContext,
        resource: &Resource,
    ) -> Result<(), RepositoryError> {
        self.require(ctx, resource, Permission::Write)?;
        self.locks
            .check_write(&LockTarget::of(resource), ctx.user)?;
        Ok(())
    }

    /// Fails if another user or a publish job holds a lock that applies to
    /// `resource`. Used for folders receiving new children and for deleted
    /// resources being replaced.
    pub(crate) fn check_not_locked_by_others(
        &self,
        ctx: &RequestContext,
        resource: &Resource,
    ) -> Result<(), RepositoryError> {
        let lock = self.locks.get_lock(&LockTarget::of(resource));
        match lock.lock_type {
            LockType::Unlocked => Ok(()),
            LockType::Publish => Err(RepositoryError::LockConflict(format!(
                "{} is locked for publishing",
                resource.path()
            ))),
            _ if lock.is_owned_by(ctx.user) => Ok(()),
            _ => Err(RepositoryError::LockConflict(format!(
                "{} is locked by another user",
                resource.path()
            ))),
        }
    }

    pub(crate) fn history_limits(&self) -> PruneLimits {
        PruneLimits {
            keep_versions: self.config.history.keep_versions,
            keep_deleted_versions: self.config.history.keep_deleted_versions,
            max_age: None,
        }
    }

    /// Reserves the next publish tag. Tags are never reused, even when the
    /// job reserving one fails.
    pub(crate) fn reserve_tag(&self) -> Result<PublishTag, RepositoryError> {
        let tag = PublishTag(self.publish_tags.fetch_add(1, Ordering::SeqCst) + 1);
        self.transaction(|store| {
            if store.read_counter(PUBLISH_TAG_COUNTER)? < tag.0 {
                store.write_counter(PUBLISH_TAG_COUNTER, tag.0)?;
            }
            Ok(())
        })?;
        Ok(tag)
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.job_sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn persist_job(&self, job: &PublishJob) -> Result<(), RepositoryError> {
        let record = PublishJobRecord {
            id: job.id,
            sequence: job.sequence,
            state: job.state,
            payload: serde_json::to_value(job).map_err(StorageError::from)?,
        };
        self.transaction(|store| {
            store.write_publish_job(&record)?;
            if store.read_counter(PUBLISH_SEQUENCE_COUNTER)? < job.sequence {
                store.write_counter(PUBLISH_SEQUENCE_COUNTER, job.sequence)?;
            }
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by the operation modules
// ---------------------------------------------------------------------------

/// Rejects writes through the Online project.
pub(crate) fn ensure_writable(ctx: &RequestContext) -> Result<(), RepositoryError> {
    if ctx.is_online() {
        return Err(RepositoryError::PermissionDenied(
            "the Online project is read-only".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn ensure_project(
    store: &dyn ResourceStore,
    ctx: &RequestContext,
) -> Result<(), RepositoryError> {
    if store.read_project(ctx.project)?.is_none() {
        return Err(RepositoryError::not_found(format!("project {}", ctx.project)));
    }
    Ok(())
}

/// Finds the resource at a caller-supplied path in `view`.
pub(crate) fn resolve(
    store: &dyn ResourceStore,
    view: View,
    raw_path: &str,
    filter: ResourceFilter,
) -> Result<Resource, RepositoryError> {
    let folder = path::is_folder_path(raw_path) || raw_path.is_empty();
    let normalized = path::normalize(raw_path, folder)?;
    match relations::lookup_path(store, view, &normalized)? {
        Some(resource) if filter.accepts(&resource) => Ok(resource),
        _ => Err(RepositoryError::not_found(normalized)),
    }
}

/// The live parent folder of `path`.
pub(crate) fn parent_folder(
    store: &dyn ResourceStore,
    target: &str,
) -> Result<Resource, RepositoryError> {
    let parent = path::parent(target)
        .ok_or_else(|| RepositoryError::DataConsistency("the root has no parent".to_string()))?;
    match store.read_resource_by_path(View::Offline, &parent)? {
        Some(folder) if !folder.state().is_deleted() => Ok(folder),
        Some(_) => Err(RepositoryError::DataConsistency(format!(
            "parent folder {} is deleted",
            parent
        ))),
        None => Err(RepositoryError::not_found(parent)),
    }
}

/// Lock targets of the other offline structures sharing the content of
/// `resource`.
pub(crate) fn sibling_targets(
    store: &dyn ResourceStore,
    resource: &Resource,
) -> Result<Vec<LockTarget>, RepositoryError> {
    Ok(store
        .read_siblings(View::Offline, resource.content_id())?
        .iter()
        .filter(|sibling| sibling.structure_id() != resource.structure_id())
        .map(LockTarget::of)
        .collect())
}

pub(crate) fn reload(
    store: &dyn ResourceStore,
    id: StructureId,
) -> Result<Resource, RepositoryError> {
    store
        .read_resource(View::Offline, id)?
        .ok_or_else(|| RepositoryError::Internal(format!("structure {} vanished", id)))
}

/// A fresh content aspect owned by `ctx`.
pub(crate) fn new_content_aspect(
    content_id: ContentId,
    resource_type: ResourceType,
    length: u64,
    ctx: &RequestContext,
    now: DateTime<Utc>,
) -> ContentAspect {
    ContentAspect {
        content_id,
        resource_type,
        flags: ResourceFlags::NONE,
        state: ResourceState::New,
        length,
        date_created: now,
        user_created: ctx.user,
        date_content: now,
        date_last_modified: now,
        user_last_modified: ctx.user,
        project_last_modified: Some(ctx.project),
        resource_version: 0,
    }
}

/// A fresh structure aspect at `target` below `parent`.
pub(crate) fn new_structure_aspect(
    structure_id: StructureId,
    content_id: ContentId,
    target: &str,
    parent: &Resource,
    ctx: &RequestContext,
    now: DateTime<Utc>,
) -> StructureAspect {
    StructureAspect {
        structure_id,
        content_id,
        path: target.to_string(),
        parent_id: Some(parent.structure_id()),
        state: ResourceState::New,
        date_released: None,
        date_expired: None,
        date_last_modified: now,
        user_last_modified: ctx.user,
        project_last_modified: Some(ctx.project),
        structure_version: 0,
    }
}

/// Marks the structure aspect as edited by `ctx` and writes it.
pub(crate) fn mark_structure(
    store: &mut dyn ResourceStore,
    mut structure: StructureAspect,
    ctx: &RequestContext,
    now: DateTime<Utc>,
) -> Result<StructureAspect, RepositoryError> {
    structure.state = structure.state.touched();
    structure.date_last_modified = now;
    structure.user_last_modified = ctx.user;
    structure.project_last_modified = Some(ctx.project);
    store.write_structure(View::Offline, &structure)?;
    Ok(structure)
}

/// Marks the shared content aspect as edited by `ctx` and writes it.
pub(crate) fn mark_content(
    store: &mut dyn ResourceStore,
    mut content: ContentAspect,
    ctx: &RequestContext,
    now: DateTime<Utc>,
) -> Result<ContentAspect, RepositoryError> {
    content.state = content.state.touched();
    content.date_last_modified = now;
    content.user_last_modified = ctx.user;
    content.project_last_modified = Some(ctx.project);
    store.write_content_aspect(View::Offline, &content)?;
    Ok(content)
}

/// Combines structure and resource property maps into property objects,
/// ordered by name.
pub(crate) fn merge_properties(structure: &PropertyMap, resource: &PropertyMap) -> Vec<Property> {
    let names: BTreeSet<&String> = structure.keys().chain(resource.keys()).collect();
    names
        .into_iter()
        .map(|name| Property {
            name: name.clone(),
            structure_value: structure.get(name).cloned(),
            resource_value: resource.get(name).cloned(),
        })
        .collect()
}

/// Splits property objects back into structure and resource maps.
pub(crate) fn split_properties(properties: &[Property]) -> (PropertyMap, PropertyMap) {
    let mut structure = PropertyMap::new();
    let mut resource = PropertyMap::new();
    for property in properties {
        if let Some(value) = &property.structure_value {
            structure.insert(property.name.clone(), value.clone());
        }
        if let Some(value) = &property.resource_value {
            resource.insert(property.name.clone(), value.clone());
        }
    }
    (structure, resource)
}

/// Which aspects a property write changed.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PropertyChanges {
    pub structure: bool,
    pub resource: bool,
}

/// Applies property writes to `resource` in the offline view.
///
/// A `None` value leaves the stored value alone, the empty string deletes
/// it. Unknown property names are registered as definitions.
pub(crate) fn apply_properties(
    store: &mut dyn ResourceStore,
    resource: &Resource,
    properties: &[Property],
    now: DateTime<Utc>,
) -> Result<PropertyChanges, RepositoryError> {
    let mut structure_values =
        store.read_structure_properties(View::Offline, resource.structure_id())?;
    let mut resource_values =
        store.read_resource_properties(View::Offline, resource.content_id())?;
    let mut changes = PropertyChanges::default();
    for property in properties {
        validate_property_name(&property.name)?;
        if store.read_property_definition(&property.name)?.is_none() {
            store.write_property_definition(&PropertyDefinition {
                name: property.name.clone(),
                date_created: now,
            })?;
        }

        let current = structure_values.get(&property.name).cloned();
        let next = merge_value(current.clone(), property.structure_value.as_deref());
        if next != current {
            store.write_structure_property(
                View::Offline,
                resource.structure_id(),
                &property.name,
                next.as_deref(),
            )?;
            match next {
                Some(value) => structure_values.insert(property.name.clone(), value),
                None => structure_values.remove(&property.name),
            };
            changes.structure = true;
        }

        let current = resource_values.get(&property.name).cloned();
        let next = merge_value(current.clone(), property.resource_value.as_deref());
        if next != current {
            store.write_resource_property(
                View::Offline,
                resource.content_id(),
                &property.name,
                next.as_deref(),
            )?;
            match next {
                Some(value) => resource_values.insert(property.name.clone(), value),
                None => resource_values.remove(&property.name),
            };
            changes.resource = true;
        }
    }
    Ok(changes)
}

/// Touches the aspects a property write changed.
pub(crate) fn record_property_changes(
    store: &mut dyn ResourceStore,
    resource: &Resource,
    changes: PropertyChanges,
    ctx: &RequestContext,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    if changes.structure {
        mark_structure(store, resource.structure.clone(), ctx, now)?;
    }
    if changes.resource {
        mark_content(store, resource.content.clone(), ctx, now)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Assembles a [`Repository`] from a config and optional collaborators.
pub struct RepositoryBuilder {
    config: RepositoryConfig,
    store: Option<Box<dyn ResourceStore>>,
    permissions: Box<dyn PermissionHandler>,
    links: Box<dyn LinkExtractor>,
}

impl RepositoryBuilder {
    pub fn new(config: RepositoryConfig) -> Self {
        RepositoryBuilder {
            config,
            store: None,
            permissions: Box::new(AllowAll),
            links: Box::new(NoLinks),
        }
    }

    /// Uses `store` instead of the backend named by the config.
    pub fn with_store(mut self, store: impl ResourceStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn with_permission_handler(mut self, handler: impl PermissionHandler + 'static) -> Self {
        self.permissions = Box::new(handler);
        self
    }

    pub fn with_link_extractor(mut self, extractor: impl LinkExtractor + 'static) -> Self {
        self.links = Box::new(extractor);
        self
    }

    /// Opens the store, bootstraps it, recovers interrupted publish jobs and
    /// starts the publish worker. Must be called inside a tokio runtime.
    pub fn build(self) -> Result<Repository, RepositoryError> {
        let mut store: Box<dyn ResourceStore> = match self.store {
            Some(store) => store,
            None => match &self.config.storage {
                StorageBackend::Memory => Box::new(InMemoryStore::new()),
                StorageBackend::Sqlite { path } => Box::new(SqliteStore::new(path)?),
            },
        };
        in_transaction(&mut *store, bootstrap)?;
        let publish_tags = store.read_counter(PUBLISH_TAG_COUNTER)?;
        let job_sequence = store.read_counter(PUBLISH_SEQUENCE_COUNTER)?;
        let records = store.read_publish_jobs()?;

        let queue = Arc::new(PublishQueue::new(
            self.config.publish.start_paused,
            self.config.publish.history_size,
        ));
        let inner = Arc::new(RepositoryInner {
            store: Mutex::new(store),
            locks: LockManager::new(),
            config: self.config,
            permissions: self.permissions,
            links: self.links,
            publish_tags: AtomicU64::new(publish_tags),
            job_sequence: AtomicU64::new(job_sequence),
        });
        recover_jobs(&inner, &queue, records)?;

        let engine = Arc::new(PublishEngine::new(Arc::clone(&inner)));
        let trim_inner = Arc::clone(&inner);
        let worker = spawn_worker(Arc::clone(&queue), engine, move |ids| {
            let result = trim_inner.transaction(|store| {
                for id in &ids {
                    store.delete_publish_job(*id)?;
                }
                Ok(())
            });
            if let Err(err) = result {
                tracing::warn!(error = %err, "failed to trim publish history");
            }
        });
        tracing::info!(
            backend = ?inner.config.storage,
            last_tag = publish_tags,
            "repository opened"
        );

        Ok(Repository {
            inner,
            queue,
            worker: Mutex::new(Some(worker)),
        })
    }
}

/// Creates the root folder in both views and the Online project.
fn bootstrap(store: &mut dyn ResourceStore) -> Result<(), RepositoryError> {
    let now = Utc::now();
    if store.read_resource_by_path(View::Offline, path::ROOT)?.is_none() {
        let content = ContentAspect {
            content_id: ContentId::new(),
            resource_type: ResourceType::Folder,
            flags: ResourceFlags::NONE,
            state: ResourceState::Unchanged,
            length: 0,
            date_created: now,
            user_created: SYSTEM_USER,
            date_content: now,
            date_last_modified: now,
            user_last_modified: SYSTEM_USER,
            project_last_modified: None,
            resource_version: 0,
        };
        let structure = StructureAspect {
            structure_id: StructureId::new(),
            content_id: content.content_id,
            path: path::ROOT.to_string(),
            parent_id: None,
            state: ResourceState::Unchanged,
            date_released: None,
            date_expired: None,
            date_last_modified: now,
            user_last_modified: SYSTEM_USER,
            project_last_modified: None,
            structure_version: 0,
        };
        for view in [View::Offline, View::Online] {
            store.write_content_aspect(view, &content)?;
            store.write_structure(view, &structure)?;
        }
    }
    if store.read_project(ProjectId::ONLINE)?.is_none() {
        store.write_project(&Project::online(SYSTEM_USER, now))?;
    }
    Ok(())
}

/// Re-enqueues jobs that were queued or running when the process stopped
/// and restores the finished history.
fn recover_jobs(
    inner: &RepositoryInner,
    queue: &PublishQueue,
    records: Vec<PublishJobRecord>,
) -> Result<(), RepositoryError> {
    let mut finished = Vec::new();
    let mut pending = Vec::new();
    for record in records {
        let job: PublishJob =
            serde_json::from_value(record.payload).map_err(StorageError::from)?;
        if job.is_finished() {
            finished.push(job);
        } else {
            pending.push(job);
        }
    }
    finished.sort_by(|a, b| b.sequence.cmp(&a.sequence));
    queue.restore_history(finished);

    for mut job in pending {
        tracing::warn!(job = %job.id, state = %job.state, "recovering interrupted publish job");
        job.state = PublishJobState::Queued;
        job.tag = None;
        job.started_at = None;
        for entry in job.list.entries() {
            if let Err(err) =
                inner
                    .locks
                    .acquire_publish(&entry.lock_target(), job.user, job.project, job.id)
            {
                tracing::warn!(path = %entry.path, error = %err, "publish lock not restored");
            }
        }
        inner.persist_job(&job)?;
        queue.enqueue(job);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// The resource repository.
pub struct Repository {
    pub(crate) inner: Arc<RepositoryInner>,
    pub(crate) queue: Arc<PublishQueue>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Repository {
    pub fn builder(config: RepositoryConfig) -> RepositoryBuilder {
        RepositoryBuilder::new(config)
    }

    pub fn open(config: RepositoryConfig) -> Result<Self, RepositoryError> {
        RepositoryBuilder::new(config).build()
    }

    /// An ephemeral repository with default settings.
    pub fn in_memory() -> Result<Self, RepositoryError> {
        Self::open(RepositoryConfig::default())
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.inner.config
    }

    /// Stops the publish worker after the job it is running (if any).
    /// Queued jobs stay persisted and are recovered on the next open.
    pub async fn shutdown(&self) {
        self.queue.shutdown();
        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "publish worker ended abnormally");
            }
        }
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        self.queue.shutdown();
    }
}
