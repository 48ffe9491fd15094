//! The relation graph: link extraction on content writes, re-resolution of
//! dangling targets, and link validation of publish lists.

use std::collections::{BTreeMap, HashSet};

use folio_core::path;
use folio_core::{BrokenRelation, Relation, RelationTarget, RelationType, Resource, StructureId};
use folio_storage::{ResourceStore, StorageError, View};

use crate::collaborators::LinkExtractor;
use crate::publish::PublishList;

/// Looks a path up as given and, for file-shaped paths, as a folder.
pub(crate) fn lookup_path(
    store: &dyn ResourceStore,
    view: View,
    target: &str,
) -> Result<Option<Resource>, StorageError> {
    if let Some(resource) = store.read_resource_by_path(view, target)? {
        return Ok(Some(resource));
    }
    if path::is_folder_path(target) {
        return Ok(None);
    }
    store.read_resource_by_path(view, &format!("{}/", target))
}

/// Re-extracts the outgoing relations of `resource` from `contents` and
/// replaces them in the offline view.
///
/// Targets are resolved relative to the resource's folder; a target with
/// no offline resource is stored unresolved and picked up later by
/// [`resolve_incoming`].
pub(crate) fn update_relations(
    store: &mut dyn ResourceStore,
    links: &dyn LinkExtractor,
    resource: &Resource,
    contents: &[u8],
) -> Result<usize, StorageError> {
    let mut seen: HashSet<(String, RelationType)> = HashSet::new();
    let mut relations = Vec::new();
    for link in links.extract_links(resource, contents) {
        let Some(target_path) = path::resolve_link(resource.path(), &link.target) else {
            continue;
        };
        let target = match lookup_path(store, View::Offline, &target_path)? {
            Some(found) => RelationTarget::Resolved {
                id: found.structure_id(),
                path: found.path().to_string(),
            },
            None => RelationTarget::Unresolved { path: target_path },
        };
        if !seen.insert((target.path().to_string(), link.relation_type)) {
            continue;
        }
        relations.push(Relation {
            source_id: resource.structure_id(),
            source_path: resource.path().to_string(),
            target,
            relation_type: link.relation_type,
        });
    }
    store.write_relations(View::Offline, resource.structure_id(), &relations)?;
    Ok(relations.len())
}

/// Points dangling relations at a resource that appeared at their target
/// path. Links may name a folder with or without the trailing slash.
pub(crate) fn resolve_incoming(
    store: &mut dyn ResourceStore,
    view: View,
    resource: &Resource,
) -> Result<usize, StorageError> {
    let id = Some(resource.structure_id());
    let mut touched = store.retarget_relations(view, resource.path(), id)?;
    if resource.is_folder() && resource.path() != path::ROOT {
        let bare = resource.path().trim_end_matches('/');
        touched += store.retarget_relations(view, bare, id)?;
    }
    Ok(touched)
}

/// Finds the links a publish of `list` would break.
///
/// For every file that stays live, strong outgoing relations must point at
/// a resource that is either part of the list or already published, and
/// not being deleted by it. For every resource the list deletes, published
/// resources outside the list still linking to it are reported too.
/// Results are keyed by source path.
pub(crate) fn validate(
    store: &dyn ResourceStore,
    list: &PublishList,
) -> Result<BTreeMap<String, Vec<BrokenRelation>>, StorageError> {
    let in_list: HashSet<StructureId> = list.entries().map(|e| e.structure_id).collect();
    let mut deleting: HashSet<StructureId> = HashSet::new();
    let mut live_files = Vec::new();
    for entry in list.entries() {
        let Some(resource) = store.read_resource(View::Offline, entry.structure_id)? else {
            continue;
        };
        if resource.state().is_deleted() {
            deleting.insert(resource.structure_id());
        } else if resource.is_file() {
            live_files.push(resource);
        }
    }

    let mut broken: BTreeMap<String, Vec<BrokenRelation>> = BTreeMap::new();
    let mut report = |relation: &Relation| {
        broken
            .entry(relation.source_path.clone())
            .or_default()
            .push(BrokenRelation {
                source_path: relation.source_path.clone(),
                target_path: relation.target.path().to_string(),
                relation_type: relation.relation_type,
            });
    };

    for file in &live_files {
        for relation in store.read_relations_from(View::Offline, file.structure_id())? {
            let is_broken = match relation.target.id() {
                None => true,
                Some(target) => {
                    deleting.contains(&target)
                        || (!in_list.contains(&target)
                            && store.read_resource(View::Online, target)?.is_none())
                }
            };
            if is_broken {
                report(&relation);
            }
        }
    }

    for id in &deleting {
        let Some(online) = store.read_resource(View::Online, *id)? else {
            continue;
        };
        for relation in store.read_relations_to(View::Online, *id, online.path())? {
            if in_list.contains(&relation.source_id) {
                continue;
            }
            report(&relation);
        }
    }
    Ok(broken)
}
