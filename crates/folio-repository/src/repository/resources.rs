//! Resource operations: create, import, delete, move, copy, siblings,
//! content and attribute writes, and reads.
//!
//! Every mutation runs in one store transaction. Validation (names, locks,
//! permissions) happens before the first write, and lock table changes are
//! made last so a failed write never leaves a lock behind.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use folio_core::path;
use folio_core::{
    ContentId, File, Property, PropertyDefinition, Relation, RelationDirection, Resource,
    ResourceFlags, ResourceState, ResourceTemplate, ResourceType, StructureAspect, StructureId,
};
use folio_storage::{PropertyMap, ResourceStore, View};

use crate::collaborators::{LinkExtractor, Permission};
use crate::concurrency::LockTarget;
use crate::context::RequestContext;
use crate::error::RepositoryError;
use crate::relations;

use super::{
    apply_properties, ensure_project, ensure_writable, mark_content, mark_structure,
    merge_properties, new_content_aspect, new_structure_aspect, parent_folder,
    record_property_changes, reload, resolve, sibling_targets, Repository, RepositoryInner,
    ResourceFilter,
};

/// What happens to the siblings of a deleted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SiblingMode {
    /// Only the addressed structure is deleted.
    #[default]
    PreserveSiblings,
    /// Every sibling is deleted along with it.
    RemoveSiblings,
}

/// How a copied file relates to its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyMode {
    /// The copy gets its own content.
    #[default]
    AsNew,
    /// The copy shares the source's content. Folders are always copied as new.
    AsSibling,
}

// ---------------------------------------------------------------------------
// Placement of new structures
// ---------------------------------------------------------------------------

/// A checked target slot for a new structure.
pub(super) struct Placement {
    pub(super) target: String,
    pub(super) parent: Resource,
    /// Deleted resource at the target, replaced by the new one.
    pub(super) replaced: Option<Resource>,
}

/// The path naming the same slot as a folder or as a file.
fn twin_path(target: &str) -> String {
    if path::is_folder_path(target) {
        target.trim_end_matches('/').to_string()
    } else {
        format!("{}/", target)
    }
}

/// Checks that nothing live occupies `target` and returns the deleted
/// resource that does, if any.
fn claim_slot(
    store: &dyn ResourceStore,
    target: &str,
) -> Result<Option<Resource>, RepositoryError> {
    if target == path::ROOT {
        return Err(RepositoryError::AlreadyExists(target.to_string()));
    }
    let twin = twin_path(target);
    if store.read_resource_by_path(View::Offline, &twin)?.is_some() {
        return Err(RepositoryError::AlreadyExists(format!(
            "{} (as {})",
            target, twin
        )));
    }
    match store.read_resource_by_path(View::Offline, target)? {
        Some(existing) if existing.state().is_deleted() => Ok(Some(existing)),
        Some(_) => Err(RepositoryError::AlreadyExists(target.to_string())),
        None => Ok(None),
    }
}

pub(super) fn place(
    inner: &RepositoryInner,
    store: &dyn ResourceStore,
    ctx: &RequestContext,
    target: String,
) -> Result<Placement, RepositoryError> {
    let replaced = claim_slot(store, &target)?;
    let parent = parent_folder(store, &target)?;
    inner.require(ctx, &parent, Permission::Write)?;
    inner.check_not_locked_by_others(ctx, &parent)?;
    if let Some(deleted) = &replaced {
        inner.check_not_locked_by_others(ctx, deleted)?;
    }
    Ok(Placement {
        target,
        parent,
        replaced,
    })
}

/// Writes the structure of a new resource at `placement`. A replaced
/// deleted resource lends its structure id; otherwise `structure_id` is
/// used, or a fresh one.
pub(super) fn place_structure(
    store: &mut dyn ResourceStore,
    placement: &Placement,
    structure_id: Option<StructureId>,
    content_id: ContentId,
    ctx: &RequestContext,
    now: DateTime<Utc>,
) -> Result<StructureAspect, RepositoryError> {
    let structure_id = match &placement.replaced {
        Some(old) => old.structure_id(),
        None => structure_id.unwrap_or_else(StructureId::new),
    };
    let mut structure = new_structure_aspect(
        structure_id,
        content_id,
        &placement.target,
        &placement.parent,
        ctx,
        now,
    );
    if let Some(old) = &placement.replaced {
        structure.structure_version = old.structure.structure_version;
        store.replace_structure_properties(View::Offline, structure_id, &PropertyMap::new())?;
    }
    if store.read_resource(View::Online, structure_id)?.is_some() {
        structure.state = ResourceState::Changed;
    }
    store.write_structure(View::Offline, &structure)?;
    if let Some(old) = &placement.replaced {
        let old_content = old.content_id();
        if old_content != content_id
            && store.read_siblings(View::Offline, old_content)?.is_empty()
        {
            store.remove_content_aspect(View::Offline, old_content)?;
        }
    }
    Ok(structure)
}

/// Content state for a content aspect that is (re)created offline.
pub(super) fn fresh_state(
    store: &dyn ResourceStore,
    content_id: ContentId,
) -> Result<ResourceState, RepositoryError> {
    Ok(if store.read_content_aspect(View::Online, content_id)?.is_some() {
        ResourceState::Changed
    } else {
        ResourceState::New
    })
}

/// Stores file bytes and re-extracts the relations of every structure
/// sharing them.
pub(super) fn store_bytes(
    store: &mut dyn ResourceStore,
    links: &dyn LinkExtractor,
    content_id: ContentId,
    bytes: &[u8],
) -> Result<(), RepositoryError> {
    store.write_content(View::Offline, content_id, bytes)?;
    for sibling in store.read_siblings(View::Offline, content_id)? {
        relations::update_relations(store, links, &sibling, bytes)?;
    }
    Ok(())
}

/// Copies one resource into `placement` and returns the copy.
fn copy_one(
    store: &mut dyn ResourceStore,
    links: &dyn LinkExtractor,
    ctx: &RequestContext,
    source: &Resource,
    placement: &Placement,
    mode: CopyMode,
    now: DateTime<Utc>,
) -> Result<Resource, RepositoryError> {
    let content_id = if mode == CopyMode::AsSibling && source.is_file() {
        source.content_id()
    } else {
        let mut content =
            new_content_aspect(ContentId::new(), source.resource_type(), source.length(), ctx, now);
        content.flags = source.flags();
        store.write_content_aspect(View::Offline, &content)?;
        if source.is_file() {
            let bytes = store
                .read_content(View::Offline, source.content_id())?
                .unwrap_or_default();
            store.write_content(View::Offline, content.content_id, &bytes)?;
        }
        let shared = store.read_resource_properties(View::Offline, source.content_id())?;
        store.replace_resource_properties(View::Offline, content.content_id, &shared)?;
        content.content_id
    };

    let mut structure = place_structure(store, placement, None, content_id, ctx, now)?;
    structure.date_released = source.structure.date_released;
    structure.date_expired = source.structure.date_expired;
    store.write_structure(View::Offline, &structure)?;
    let own = store.read_structure_properties(View::Offline, source.structure_id())?;
    store.replace_structure_properties(View::Offline, structure.structure_id, &own)?;

    let copy = reload(&*store, structure.structure_id)?;
    if copy.is_file() {
        let bytes = store
            .read_content(View::Offline, content_id)?
            .unwrap_or_default();
        relations::update_relations(store, links, &copy, &bytes)?;
    }
    relations::resolve_incoming(store, View::Offline, &copy)?;
    Ok(copy)
}

/// Marks one resource deleted, or purges it if it was never published.
/// Returns true if it was purged.
fn delete_one(
    store: &mut dyn ResourceStore,
    ctx: &RequestContext,
    resource: &Resource,
    now: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let purge = resource.structure.state.is_new()
        && !(resource.is_folder()
            && !store
                .read_subtree(View::Offline, resource.path(), false)?
                .is_empty());
    if purge {
        store.remove_structure(View::Offline, resource.structure_id())?;
        if store
            .read_siblings(View::Offline, resource.content_id())?
            .is_empty()
        {
            store.remove_content_aspect(View::Offline, resource.content_id())?;
        }
        return Ok(true);
    }
    let mut structure = resource.structure.clone();
    structure.state = ResourceState::Deleted;
    structure.date_last_modified = now;
    structure.user_last_modified = ctx.user;
    structure.project_last_modified = Some(ctx.project);
    store.write_structure(View::Offline, &structure)?;
    Ok(false)
}

fn property_of(
    store: &dyn ResourceStore,
    view: View,
    resource: &Resource,
    name: &str,
) -> Result<Property, RepositoryError> {
    let own = store.read_structure_properties(view, resource.structure_id())?;
    let shared = store.read_resource_properties(view, resource.content_id())?;
    Ok(Property {
        name: name.to_string(),
        structure_value: own.get(name).cloned(),
        resource_value: shared.get(name).cloned(),
    })
}

impl Repository {
    /// Locks a freshly placed resource for its creator.
    pub(super) fn lock_created(
        &self,
        store: &dyn ResourceStore,
        ctx: &RequestContext,
        resource: &Resource,
    ) -> Result<(), RepositoryError> {
        let siblings = sibling_targets(store, resource)?;
        self.inner
            .locks
            .lock(&LockTarget::of(resource), &siblings, ctx.user, ctx.project)?;
        Ok(())
    }

    /// Runs a write against one locked offline resource and returns it
    /// re-read.
    fn write_locked<F>(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        write: F,
    ) -> Result<Resource, RepositoryError>
    where
        F: FnOnce(&mut dyn ResourceStore, &Resource, DateTime<Utc>) -> Result<(), RepositoryError>,
    {
        ensure_writable(ctx)?;
        let now = Utc::now();
        self.inner.transaction(|store| {
            let resource = resolve(&*store, View::Offline, raw_path, ResourceFilter::Default)?;
            self.inner.check_write(ctx, &resource)?;
            write(&mut *store, &resource, now)?;
            reload(&*store, resource.structure_id())
        })
    }

    // -------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------

    /// Creates a resource. A deleted, unpublished resource at the same path
    /// is replaced and keeps its structure id.
    pub fn create_resource(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        resource_type: ResourceType,
        contents: Option<&[u8]>,
        properties: &[Property],
    ) -> Result<Resource, RepositoryError> {
        ensure_writable(ctx)?;
        let folder = resource_type.is_folder();
        let target = path::normalize(raw_path, folder)?;
        let bytes = if folder {
            &[][..]
        } else {
            contents.unwrap_or_default()
        };
        let now = Utc::now();
        let created = self.inner.transaction(|store| {
            ensure_project(&*store, ctx)?;
            let placement = place(&self.inner, &*store, ctx, target)?;

            let content = match &placement.replaced {
                Some(old) if !old.has_siblings() => {
                    let mut content = old.content.clone();
                    content.resource_type = resource_type;
                    content.length = bytes.len() as u64;
                    content.date_content = now;
                    content.date_last_modified = now;
                    content.user_last_modified = ctx.user;
                    content.project_last_modified = Some(ctx.project);
                    content.state = fresh_state(&*store, content.content_id)?;
                    store.replace_resource_properties(
                        View::Offline,
                        content.content_id,
                        &PropertyMap::new(),
                    )?;
                    content
                }
                _ => new_content_aspect(
                    ContentId::new(),
                    resource_type,
                    bytes.len() as u64,
                    ctx,
                    now,
                ),
            };
            store.write_content_aspect(View::Offline, &content)?;
            let structure =
                place_structure(store, &placement, None, content.content_id, ctx, now)?;
            let resource = reload(&*store, structure.structure_id)?;

            if !folder {
                store_bytes(store, &*self.inner.links, content.content_id, bytes)?;
            }
            apply_properties(store, &resource, properties, now)?;
            relations::resolve_incoming(store, View::Offline, &resource)?;
            self.lock_created(&*store, ctx, &resource)?;
            reload(&*store, resource.structure_id())
        })?;
        tracing::debug!(path = %created.path(), user = %ctx.user, "resource created");
        Ok(created)
    }

    /// Creates a resource from a template that may name the structure and
    /// content ids to use.
    ///
    /// Naming an existing content id makes the resource a sibling of that
    /// content; `contents`, when given, replace the shared bytes. Naming
    /// the ids of a resource whose deletion was published reconnects the
    /// new resource to its history. Importing over a deleted, unpublished
    /// resource reuses that resource's ids instead of the template's.
    pub fn import_resource(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        template: &ResourceTemplate,
        contents: Option<&[u8]>,
        properties: &[Property],
    ) -> Result<Resource, RepositoryError> {
        ensure_writable(ctx)?;
        let resource_type = template.resource_type.unwrap_or(if path::is_folder_path(raw_path) {
            ResourceType::Folder
        } else {
            ResourceType::Plain
        });
        let folder = resource_type.is_folder();
        let target = path::normalize(raw_path, folder)?;
        let now = Utc::now();
        let imported = self.inner.transaction(|store| {
            ensure_project(&*store, ctx)?;
            let placement = place(&self.inner, &*store, ctx, target)?;

            let (structure_id, content_id) = match &placement.replaced {
                Some(old) => (old.structure_id(), old.content_id()),
                None => {
                    let structure_id = template.structure_id.unwrap_or_else(StructureId::new);
                    if let Some(existing) = store.read_resource(View::Offline, structure_id)? {
                        return Err(RepositoryError::DataConsistency(format!(
                            "structure {} is already in use at {}",
                            structure_id,
                            existing.path()
                        )));
                    }
                    (structure_id, template.content_id.unwrap_or_else(ContentId::new))
                }
            };

            let mut content_changed = contents.is_some();
            let content = match store.read_content_aspect(View::Offline, content_id)? {
                Some(mut content) => {
                    if (content.resource_type.is_folder() || folder)
                        && placement.replaced.is_none()
                    {
                        return Err(RepositoryError::DataConsistency(format!(
                            "content {} cannot be shared by a folder",
                            content_id
                        )));
                    }
                    if content_changed && !folder {
                        content.length = contents.map_or(0, |b| b.len()) as u64;
                        content.date_content = now;
                        content.resource_type = resource_type;
                    }
                    content
                }
                None => {
                    content_changed = !folder;
                    let mut content = new_content_aspect(
                        content_id,
                        resource_type,
                        contents.map_or(0, |b| b.len()) as u64,
                        ctx,
                        now,
                    );
                    content.flags = template.flags;
                    content.state = fresh_state(&*store, content_id)?;
                    if let Some(date) = template.date_created {
                        content.date_created = date;
                    }
                    if let Some(user) = template.user_created {
                        content.user_created = user;
                    }
                    content
                }
            };
            if content_changed {
                mark_content(store, content.clone(), ctx, now)?;
            } else {
                store.write_content_aspect(View::Offline, &content)?;
            }

            let mut structure =
                place_structure(store, &placement, Some(structure_id), content_id, ctx, now)?;
            structure.date_released = template.date_released;
            structure.date_expired = template.date_expired;
            store.write_structure(View::Offline, &structure)?;
            let resource = reload(&*store, structure_id)?;

            if !folder && content_changed {
                store_bytes(
                    store,
                    &*self.inner.links,
                    content_id,
                    contents.unwrap_or_default(),
                )?;
            }
            apply_properties(store, &resource, properties, now)?;
            relations::resolve_incoming(store, View::Offline, &resource)?;
            self.lock_created(&*store, ctx, &resource)?;
            reload(&*store, structure_id)
        })?;
        tracing::debug!(
            path = %imported.path(),
            structure = %imported.structure_id(),
            "resource imported"
        );
        Ok(imported)
    }

    /// Creates a new structure at `raw_target` sharing the content of
    /// `raw_source`.
    pub fn create_sibling(
        &self,
        ctx: &RequestContext,
        raw_source: &str,
        raw_target: &str,
        properties: &[Property],
    ) -> Result<Resource, RepositoryError> {
        ensure_writable(ctx)?;
        let now = Utc::now();
        let sibling = self.inner.transaction(|store| {
            let source = resolve(&*store, View::Offline, raw_source, ResourceFilter::Default)?;
            if source.is_folder() {
                return Err(RepositoryError::DataConsistency(format!(
                    "folder {} cannot have siblings",
                    source.path()
                )));
            }
            self.inner.require(ctx, &source, Permission::Read)?;
            let target = path::normalize(raw_target, false)?;
            let placement = place(&self.inner, &*store, ctx, target)?;
            let sibling = copy_one(
                store,
                &*self.inner.links,
                ctx,
                &source,
                &placement,
                CopyMode::AsSibling,
                now,
            )?;
            apply_properties(store, &sibling, properties, now)?;
            self.lock_created(&*store, ctx, &sibling)?;
            reload(&*store, sibling.structure_id())
        })?;
        tracing::debug!(path = %sibling.path(), source = raw_source, "sibling created");
        Ok(sibling)
    }

    /// Copies a resource (a folder with everything below it).
    pub fn copy_resource(
        &self,
        ctx: &RequestContext,
        raw_source: &str,
        raw_target: &str,
        mode: CopyMode,
    ) -> Result<Resource, RepositoryError> {
        ensure_writable(ctx)?;
        let now = Utc::now();
        let copy = self.inner.transaction(|store| {
            let source = resolve(&*store, View::Offline, raw_source, ResourceFilter::Default)?;
            self.inner.require(ctx, &source, Permission::Read)?;
            let target = path::normalize(raw_target, source.is_folder())?;
            if path::is_descendant(&target, source.path()) {
                return Err(RepositoryError::DataConsistency(format!(
                    "cannot copy {} into itself",
                    source.path()
                )));
            }
            let placement = place(&self.inner, &*store, ctx, target)?;
            let links = &*self.inner.links;
            let copy = copy_one(store, links, ctx, &source, &placement, mode, now)?;

            if source.is_folder() {
                let below = store.read_subtree(View::Offline, source.path(), true)?;
                for child in below.iter().filter(|r| !r.state().is_deleted()) {
                    let Some(child_target) = path::rebase(child.path(), source.path(), copy.path())
                    else {
                        continue;
                    };
                    let placement = Placement {
                        replaced: claim_slot(&*store, &child_target)?,
                        parent: parent_folder(&*store, &child_target)?,
                        target: child_target,
                    };
                    copy_one(store, links, ctx, child, &placement, mode, now)?;
                }
            }
            self.lock_created(&*store, ctx, &copy)?;
            reload(&*store, copy.structure_id())
        })?;
        tracing::debug!(source = raw_source, target = %copy.path(), ?mode, "resource copied");
        Ok(copy)
    }

    // -------------------------------------------------------------------
    // Deletion and recovery
    // -------------------------------------------------------------------

    /// Marks a resource (and everything below a folder) deleted.
    ///
    /// Resources that were never published are removed at once, and their
    /// locks with them.
    pub fn delete_resource(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        mode: SiblingMode,
    ) -> Result<(), RepositoryError> {
        ensure_writable(ctx)?;
        let now = Utc::now();
        let purged = self.inner.transaction(|store| {
            let resource = resolve(&*store, View::Offline, raw_path, ResourceFilter::Default)?;
            if resource.path() == path::ROOT {
                return Err(RepositoryError::DataConsistency(
                    "the root folder cannot be deleted".to_string(),
                ));
            }
            self.inner.check_write(ctx, &resource)?;

            let mut doomed = Vec::new();
            if resource.is_folder() {
                let mut below = store.read_subtree(View::Offline, resource.path(), true)?;
                below.retain(|r| !r.state().is_deleted());
                for child in &below {
                    self.inner.check_write(ctx, child)?;
                }
                below.sort_by(|a, b| path::depth(b.path()).cmp(&path::depth(a.path())));
                doomed.extend(below);
            } else if mode == SiblingMode::RemoveSiblings {
                for sibling in store.read_siblings(View::Offline, resource.content_id())? {
                    if sibling.structure_id() == resource.structure_id()
                        || sibling.state().is_deleted()
                    {
                        continue;
                    }
                    self.inner.require(ctx, &sibling, Permission::Write)?;
                    self.inner.check_not_locked_by_others(ctx, &sibling)?;
                    doomed.push(sibling);
                }
            }
            doomed.push(resource);

            let mut purged = Vec::new();
            for victim in &doomed {
                if delete_one(store, ctx, victim, now)? {
                    purged.push(victim.structure_id());
                }
            }
            for id in &purged {
                self.inner.locks.remove(*id);
            }
            Ok(purged.len())
        })?;
        tracing::debug!(path = raw_path, purged, "resource deleted");
        Ok(())
    }

    /// Reverts an unpublished deletion. With `recursive`, deleted resources
    /// below a folder are restored as well.
    pub fn undelete_resource(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        recursive: bool,
    ) -> Result<Resource, RepositoryError> {
        ensure_writable(ctx)?;
        let now = Utc::now();
        self.inner.transaction(|store| {
            let resource = resolve(&*store, View::Offline, raw_path, ResourceFilter::All)?;
            if !resource.state().is_deleted() {
                return Err(RepositoryError::DataConsistency(format!(
                    "{} is not deleted",
                    resource.path()
                )));
            }
            self.inner.check_write(ctx, &resource)?;
            parent_folder(&*store, resource.path())?;

            let mut restored = vec![resource.clone()];
            if recursive && resource.is_folder() {
                for child in store.read_subtree(View::Offline, resource.path(), true)? {
                    if child.state().is_deleted() {
                        self.inner.check_write(ctx, &child)?;
                        restored.push(child);
                    }
                }
            }
            for item in &restored {
                let mut structure = item.structure.clone();
                let published = store
                    .read_resource(View::Online, item.structure_id())?
                    .is_some();
                structure.state = if published {
                    ResourceState::Changed
                } else {
                    ResourceState::New
                };
                structure.date_last_modified = now;
                structure.user_last_modified = ctx.user;
                structure.project_last_modified = Some(ctx.project);
                store.write_structure(View::Offline, &structure)?;
            }
            tracing::debug!(path = %resource.path(), count = restored.len(), "resource undeleted");
            reload(&*store, resource.structure_id())
        })
    }

    /// Discards every unpublished change of a resource, restoring its
    /// online state: path, attributes, properties, relations and, if the
    /// shared content changed, content.
    pub fn undo_changes(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
    ) -> Result<Resource, RepositoryError> {
        ensure_writable(ctx)?;
        let now = Utc::now();
        self.inner.transaction(|store| {
            let resource = resolve(&*store, View::Offline, raw_path, ResourceFilter::All)?;
            self.inner.check_write(ctx, &resource)?;
            let Some(online) = store.read_resource(View::Online, resource.structure_id())? else {
                return Err(RepositoryError::DataConsistency(format!(
                    "{} was never published",
                    resource.path()
                )));
            };
            if resource.state().is_unchanged() {
                return Ok(resource);
            }
            let id = resource.structure_id();

            let moved = resource.path() != online.path();
            let below = if moved && resource.is_folder() {
                store.read_subtree(View::Offline, resource.path(), true)?
            } else {
                Vec::new()
            };
            if moved {
                if let Some(occupant) = store.read_resource_by_path(View::Offline, online.path())? {
                    if occupant.structure_id() != id {
                        return Err(RepositoryError::DataConsistency(format!(
                            "{} is occupied by another resource",
                            online.path()
                        )));
                    }
                }
                parent_folder(&*store, online.path())?;
            }

            store.write_structure(View::Offline, &online.structure)?;
            let own = store.read_structure_properties(View::Online, id)?;
            store.replace_structure_properties(View::Offline, id, &own)?;
            let outgoing = store.read_relations_from(View::Online, id)?;
            store.write_relations(View::Offline, id, &outgoing)?;

            if !resource.content.state.is_unchanged() {
                let content_id = online.content_id();
                store.write_content_aspect(View::Offline, &online.content)?;
                if online.is_file() {
                    let bytes = store
                        .read_content(View::Online, content_id)?
                        .unwrap_or_default();
                    store.write_content(View::Offline, content_id, &bytes)?;
                }
                let shared = store.read_resource_properties(View::Online, content_id)?;
                store.replace_resource_properties(View::Offline, content_id, &shared)?;
            }

            for child in below {
                if let Some(original) = path::rebase(child.path(), resource.path(), online.path()) {
                    let mut structure = child.structure.clone();
                    structure.path = original;
                    mark_structure(store, structure, ctx, now)?;
                }
            }
            if moved {
                self.inner.locks.rebase(resource.path(), online.path());
            }
            tracing::debug!(path = %online.path(), "changes undone");
            reload(&*store, id)
        })
    }

    // -------------------------------------------------------------------
    // Moving
    // -------------------------------------------------------------------

    /// Moves (or renames) a resource. A folder moves with its subtree.
    pub fn move_resource(
        &self,
        ctx: &RequestContext,
        raw_source: &str,
        raw_target: &str,
    ) -> Result<Resource, RepositoryError> {
        ensure_writable(ctx)?;
        let now = Utc::now();
        self.inner.transaction(|store| {
            let resource = resolve(&*store, View::Offline, raw_source, ResourceFilter::Default)?;
            if resource.path() == path::ROOT {
                return Err(RepositoryError::DataConsistency(
                    "the root folder cannot be moved".to_string(),
                ));
            }
            self.inner.check_write(ctx, &resource)?;
            let target = path::normalize(raw_target, resource.is_folder())?;
            if target == resource.path() {
                return Ok(resource);
            }
            if path::is_descendant(&target, resource.path()) {
                return Err(RepositoryError::DataConsistency(format!(
                    "cannot move {} into itself",
                    resource.path()
                )));
            }
            if claim_slot(&*store, &target)?.is_some() {
                return Err(RepositoryError::AlreadyExists(target));
            }
            let parent = parent_folder(&*store, &target)?;
            self.inner.require(ctx, &parent, Permission::Write)?;
            self.inner.check_not_locked_by_others(ctx, &parent)?;

            let below = if resource.is_folder() {
                store.read_subtree(View::Offline, resource.path(), true)?
            } else {
                Vec::new()
            };
            for child in &below {
                self.inner.check_write(ctx, child)?;
            }

            let mut structure = resource.structure.clone();
            structure.path = target.clone();
            structure.parent_id = Some(parent.structure_id());
            mark_structure(store, structure, ctx, now)?;
            for child in below {
                if let Some(moved) = path::rebase(child.path(), resource.path(), &target) {
                    let mut structure = child.structure.clone();
                    structure.path = moved;
                    mark_structure(store, structure, ctx, now)?;
                }
            }
            let moved = reload(&*store, resource.structure_id())?;
            relations::resolve_incoming(store, View::Offline, &moved)?;
            self.inner.locks.rebase(resource.path(), &target);
            tracing::debug!(from = %resource.path(), to = %target, "resource moved");
            Ok(moved)
        })
    }

    // -------------------------------------------------------------------
    // Content, properties and attributes
    // -------------------------------------------------------------------

    /// Replaces the bytes of a file. The change is visible through every
    /// sibling.
    pub fn write_file(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        contents: &[u8],
    ) -> Result<Resource, RepositoryError> {
        self.write_locked(ctx, raw_path, |store, resource, now| {
            if resource.is_folder() {
                return Err(RepositoryError::DataConsistency(format!(
                    "{} is a folder",
                    resource.path()
                )));
            }
            let mut content = resource.content.clone();
            content.length = contents.len() as u64;
            content.date_content = now;
            mark_content(store, content, ctx, now)?;
            store_bytes(store, &*self.inner.links, resource.content_id(), contents)
        })
    }

    pub fn write_property_object(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        property: &Property,
    ) -> Result<Resource, RepositoryError> {
        self.write_property_objects(ctx, raw_path, std::slice::from_ref(property))
    }

    /// Writes properties. Per value: `None` keeps the stored value, the
    /// empty string deletes it.
    pub fn write_property_objects(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        properties: &[Property],
    ) -> Result<Resource, RepositoryError> {
        self.write_locked(ctx, raw_path, |store, resource, now| {
            let changes = apply_properties(store, resource, properties, now)?;
            record_property_changes(store, resource, changes, ctx, now)
        })
    }

    /// Changes the type of a resource; folders stay folders.
    pub fn change_resource_type(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        resource_type: ResourceType,
    ) -> Result<Resource, RepositoryError> {
        self.write_locked(ctx, raw_path, |store, resource, now| {
            if resource_type.is_folder() != resource.is_folder() {
                return Err(RepositoryError::DataConsistency(format!(
                    "cannot change {} to {}",
                    resource.path(),
                    resource_type
                )));
            }
            let mut content = resource.content.clone();
            content.resource_type = resource_type;
            mark_content(store, content, ctx, now)?;
            Ok(())
        })
    }

    pub fn change_flags(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        flags: ResourceFlags,
    ) -> Result<Resource, RepositoryError> {
        self.write_locked(ctx, raw_path, |store, resource, now| {
            let mut content = resource.content.clone();
            content.flags = flags;
            mark_content(store, content, ctx, now)?;
            Ok(())
        })
    }

    pub fn set_date_released(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        date: Option<DateTime<Utc>>,
    ) -> Result<Resource, RepositoryError> {
        self.write_locked(ctx, raw_path, |store, resource, now| {
            let mut structure = resource.structure.clone();
            structure.date_released = date;
            mark_structure(store, structure, ctx, now)?;
            Ok(())
        })
    }

    pub fn set_date_expired(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        date: Option<DateTime<Utc>>,
    ) -> Result<Resource, RepositoryError> {
        self.write_locked(ctx, raw_path, |store, resource, now| {
            let mut structure = resource.structure.clone();
            structure.date_expired = date;
            mark_structure(store, structure, ctx, now)?;
            Ok(())
        })
    }

    /// Sets the last-modified date of a resource, marking it changed.
    pub fn touch(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        date: DateTime<Utc>,
    ) -> Result<Resource, RepositoryError> {
        self.write_locked(ctx, raw_path, |store, resource, _| {
            mark_structure(store, resource.structure.clone(), ctx, date)?;
            Ok(())
        })
    }

    // -------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------

    /// Reads a resource in the view of the context's project.
    pub fn read_resource(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        filter: ResourceFilter,
    ) -> Result<Resource, RepositoryError> {
        self.inner.read(|store| {
            let resource = resolve(store, ctx.view(), raw_path, filter)?;
            self.inner.require(ctx, &resource, Permission::Read)?;
            Ok(resource)
        })
    }

    pub fn read_resource_by_id(
        &self,
        ctx: &RequestContext,
        id: StructureId,
        filter: ResourceFilter,
    ) -> Result<Resource, RepositoryError> {
        self.inner.read(|store| match store.read_resource(ctx.view(), id)? {
            Some(resource) if filter.accepts(&resource) => {
                self.inner.require(ctx, &resource, Permission::Read)?;
                Ok(resource)
            }
            _ => Err(RepositoryError::not_found(format!("structure {}", id))),
        })
    }

    pub fn read_file(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        filter: ResourceFilter,
    ) -> Result<File, RepositoryError> {
        self.inner.read(|store| {
            let resource = resolve(store, ctx.view(), raw_path, filter)?;
            if resource.is_folder() {
                return Err(RepositoryError::DataConsistency(format!(
                    "{} is a folder",
                    resource.path()
                )));
            }
            self.inner.require(ctx, &resource, Permission::Read)?;
            let contents = store
                .read_content(ctx.view(), resource.content_id())?
                .unwrap_or_default();
            Ok(File { resource, contents })
        })
    }

    /// Direct children of a folder, ordered by path.
    pub fn read_children(
        &self,
        ctx: &RequestContext,
        raw_folder: &str,
        filter: ResourceFilter,
    ) -> Result<Vec<Resource>, RepositoryError> {
        self.inner.read(|store| {
            let folder = resolve(store, ctx.view(), raw_folder, filter)?;
            if !folder.is_folder() {
                return Err(RepositoryError::DataConsistency(format!(
                    "{} is not a folder",
                    folder.path()
                )));
            }
            self.inner.require(ctx, &folder, Permission::Read)?;
            Ok(store
                .read_subtree(ctx.view(), folder.path(), false)?
                .into_iter()
                .filter(|child| filter.accepts(child))
                .collect())
        })
    }

    /// Every structure sharing the content of the resource, itself included.
    pub fn read_siblings(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        filter: ResourceFilter,
    ) -> Result<Vec<Resource>, RepositoryError> {
        self.inner.read(|store| {
            let resource = resolve(store, ctx.view(), raw_path, filter)?;
            self.inner.require(ctx, &resource, Permission::Read)?;
            Ok(store
                .read_siblings(ctx.view(), resource.content_id())?
                .into_iter()
                .filter(|sibling| filter.accepts(sibling))
                .collect())
        })
    }

    pub fn read_relations(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        direction: RelationDirection,
    ) -> Result<Vec<Relation>, RepositoryError> {
        self.inner.read(|store| {
            let resource = resolve(store, ctx.view(), raw_path, ResourceFilter::All)?;
            self.inner.require(ctx, &resource, Permission::Read)?;
            Ok(match direction {
                RelationDirection::Outgoing => {
                    store.read_relations_from(ctx.view(), resource.structure_id())?
                }
                RelationDirection::Incoming => {
                    store.read_relations_to(ctx.view(), resource.structure_id(), resource.path())?
                }
            })
        })
    }

    /// Reads one property. With `search`, a property the resource does not
    /// set is looked up on its ancestor folders, nearest first. A property
    /// found nowhere comes back with both values unset.
    pub fn read_property_object(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        name: &str,
        search: bool,
    ) -> Result<Property, RepositoryError> {
        self.inner.read(|store| {
            let view = ctx.view();
            let resource = resolve(store, view, raw_path, ResourceFilter::All)?;
            self.inner.require(ctx, &resource, Permission::Read)?;
            let own = property_of(store, view, &resource, name)?;
            if !own.is_null() || !search {
                return Ok(own);
            }
            for ancestor in path::ancestors(resource.path()).iter().rev() {
                if let Some(folder) = store.read_resource_by_path(view, ancestor)? {
                    let inherited = property_of(store, view, &folder, name)?;
                    if !inherited.is_null() {
                        return Ok(inherited);
                    }
                }
            }
            Ok(Property::new(name))
        })
    }

    /// Reads every property of a resource, ordered by name. With `search`,
    /// properties set on ancestor folders are included where the resource
    /// does not set them.
    pub fn read_properties(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        search: bool,
    ) -> Result<Vec<Property>, RepositoryError> {
        self.inner.read(|store| {
            let view = ctx.view();
            let resource = resolve(store, view, raw_path, ResourceFilter::All)?;
            self.inner.require(ctx, &resource, Permission::Read)?;
            let mut chain = vec![resource.clone()];
            if search {
                for ancestor in path::ancestors(resource.path()).iter().rev() {
                    if let Some(folder) = store.read_resource_by_path(view, ancestor)? {
                        chain.push(folder);
                    }
                }
            }
            let mut found: BTreeMap<String, Property> = BTreeMap::new();
            for item in &chain {
                let own = store.read_structure_properties(view, item.structure_id())?;
                let shared = store.read_resource_properties(view, item.content_id())?;
                for property in merge_properties(&own, &shared) {
                    found.entry(property.name.clone()).or_insert(property);
                }
            }
            Ok(found.into_values().collect())
        })
    }

    pub fn read_property_definitions(&self) -> Result<Vec<PropertyDefinition>, RepositoryError> {
        self.inner
            .read(|store| Ok(store.read_property_definitions()?))
    }
}
