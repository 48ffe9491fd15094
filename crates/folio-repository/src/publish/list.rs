//! Publish lists: the closure of resources one publish job moves online.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Topo;
use serde::{Deserialize, Serialize};

use folio_core::path;
use folio_core::{
    ContentId, ProjectId, PublishJobId, Resource, ResourceState, StructureId, UserId,
};
use folio_storage::{ResourceStore, StorageError, View};

use crate::concurrency::{LockManager, LockTarget, LockType};
use crate::context::RequestContext;
use crate::error::RepositoryError;

/// Options of a direct publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Publish the changed resources below requested folders.
    pub include_subresources: bool,
    /// Publish every sibling of a changed file along with it.
    pub publish_siblings: bool,
    /// Give the publisher their locks back after the job.
    pub keep_locks: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        PublishOptions {
            include_subresources: true,
            publish_siblings: false,
            keep_locks: false,
        }
    }
}

/// One resource in a publish list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishListEntry {
    pub structure_id: StructureId,
    pub content_id: ContentId,
    pub path: String,
    /// State when the list was built.
    pub state: ResourceState,
}

impl PublishListEntry {
    fn of(resource: &Resource) -> Self {
        PublishListEntry {
            structure_id: resource.structure_id(),
            content_id: resource.content_id(),
            path: resource.path().to_string(),
            state: resource.state(),
        }
    }

    pub(crate) fn lock_target(&self) -> LockTarget {
        LockTarget {
            structure_id: self.structure_id,
            content_id: self.content_id,
            path: self.path.clone(),
        }
    }
}

/// An ordered publish closure.
///
/// `folders` are ordered parents first, `deleted_folders` children first,
/// `files` so that link targets come before the files linking to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishList {
    pub id: PublishJobId,
    pub project: ProjectId,
    pub user: UserId,
    pub folders: Vec<PublishListEntry>,
    pub files: Vec<PublishListEntry>,
    pub deleted_folders: Vec<PublishListEntry>,
    pub options: PublishOptions,
    /// Built from explicit resources rather than a whole project.
    pub direct: bool,
}

impl PublishList {
    /// Every entry: folders, files, then deleted folders.
    pub fn entries(&self) -> impl Iterator<Item = &PublishListEntry> {
        self.folders
            .iter()
            .chain(self.files.iter())
            .chain(self.deleted_folders.iter())
    }

    pub fn len(&self) -> usize {
        self.folders.len() + self.files.len() + self.deleted_folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: StructureId) -> bool {
        self.entries().any(|entry| entry.structure_id == id)
    }

    pub fn paths(&self) -> Vec<&str> {
        self.entries().map(|entry| entry.path.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects candidate resources and orders them into a [`PublishList`].
///
/// Unchanged resources, resources locked by another user and resources
/// already claimed by a publish job are left out.
pub(crate) struct ListBuilder<'a> {
    store: &'a dyn ResourceStore,
    locks: &'a LockManager,
    user: UserId,
    project: ProjectId,
    options: PublishOptions,
    candidates: IndexMap<StructureId, Resource>,
}

impl<'a> ListBuilder<'a> {
    pub(crate) fn new(
        store: &'a dyn ResourceStore,
        locks: &'a LockManager,
        ctx: &RequestContext,
        options: PublishOptions,
    ) -> Self {
        ListBuilder {
            store,
            locks,
            user: ctx.user,
            project: ctx.project,
            options,
            candidates: IndexMap::new(),
        }
    }

    fn consider(&mut self, resource: Resource) {
        if resource.state().is_unchanged() || self.candidates.contains_key(&resource.structure_id())
        {
            return;
        }
        let lock = self.locks.get_lock(&LockTarget::of(&resource));
        let publishable = match lock.lock_type {
            LockType::Publish => false,
            LockType::Unlocked => true,
            _ => lock.is_owned_by(self.user),
        };
        if publishable {
            self.candidates.insert(resource.structure_id(), resource);
        }
    }

    fn add_with_subtree(&mut self, root: Resource) -> Result<(), StorageError> {
        let descend = root.is_folder() && self.options.include_subresources;
        let folder = root.path().to_string();
        self.consider(root);
        if descend {
            for resource in self.store.read_subtree(View::Offline, &folder, true)? {
                self.consider(resource);
            }
        }
        Ok(())
    }

    /// Adds explicitly requested resources.
    ///
    /// A NEW ancestor folder that is not itself requested makes the request
    /// fail with `ParentNotPublished`.
    pub(crate) fn add_direct(&mut self, roots: &[Resource]) -> Result<(), RepositoryError> {
        let requested: HashSet<&str> = roots.iter().map(|r| r.path()).collect();
        for root in roots {
            for ancestor in path::ancestors(root.path()) {
                if requested.contains(ancestor.as_str()) {
                    continue;
                }
                if let Some(folder) = self.store.read_resource_by_path(View::Offline, &ancestor)? {
                    if folder.state().is_new() {
                        return Err(RepositoryError::ParentNotPublished(format!(
                            "{} is new and must be published before {}",
                            ancestor,
                            root.path()
                        )));
                    }
                }
            }
            self.add_with_subtree(root.clone())?;
        }
        Ok(())
    }

    /// Adds every resource last modified in the builder's project, plus
    /// their NEW ancestor folders.
    pub(crate) fn add_project(&mut self) -> Result<(), StorageError> {
        for resource in self.store.read_resources_in_project(self.project)? {
            for ancestor in path::ancestors(resource.path()) {
                if let Some(folder) = self.store.read_resource_by_path(View::Offline, &ancestor)? {
                    if folder.state().is_new() {
                        self.consider(folder);
                    }
                }
            }
            self.consider(resource);
        }
        Ok(())
    }

    /// Adds the pending resources that link to members of `list`.
    pub(crate) fn add_related(&mut self, list: &PublishList) -> Result<(), StorageError> {
        for entry in list.entries() {
            let incoming =
                self.store
                    .read_relations_to(View::Offline, entry.structure_id, &entry.path)?;
            for relation in incoming {
                if list.contains(relation.source_id) {
                    continue;
                }
                let source = self.store.read_resource(View::Offline, relation.source_id)?;
                if let Some(resource) = source {
                    self.consider(resource);
                }
            }
        }
        Ok(())
    }

    /// Adds the pending resources the members of `list` link to.
    pub(crate) fn add_linked(&mut self, list: &PublishList) -> Result<(), StorageError> {
        for entry in list.entries() {
            for relation in self
                .store
                .read_relations_from(View::Offline, entry.structure_id)?
            {
                let Some(target) = relation.target.id() else {
                    continue;
                };
                if list.contains(target) {
                    continue;
                }
                if let Some(resource) = self.store.read_resource(View::Offline, target)? {
                    self.consider(resource);
                }
            }
        }
        Ok(())
    }

    /// Adds resources from existing list entries, without re-checking
    /// ancestors.
    pub(crate) fn add_entries<'e>(
        &mut self,
        entries: impl Iterator<Item = &'e PublishListEntry>,
    ) -> Result<(), StorageError> {
        for entry in entries {
            if let Some(resource) = self.store.read_resource(View::Offline, entry.structure_id)? {
                self.consider(resource);
            }
        }
        Ok(())
    }

    pub(crate) fn finish(
        mut self,
        id: PublishJobId,
        direct: bool,
    ) -> Result<PublishList, StorageError> {
        if self.options.publish_siblings {
            let changed_contents: Vec<ContentId> = self
                .candidates
                .values()
                .filter(|r| r.is_file() && !r.content.state.is_unchanged())
                .map(|r| r.content_id())
                .collect();
            for content_id in changed_contents {
                for sibling in self.store.read_siblings(View::Offline, content_id)? {
                    self.consider(sibling);
                }
            }
        }
        let resources: Vec<Resource> = self.candidates.into_values().collect();
        assemble(
            self.store,
            ListHeader {
                id,
                project: self.project,
                user: self.user,
                options: self.options,
                direct,
            },
            resources,
        )
    }
}

struct ListHeader {
    id: PublishJobId,
    project: ProjectId,
    user: UserId,
    options: PublishOptions,
    direct: bool,
}

fn assemble(
    store: &dyn ResourceStore,
    header: ListHeader,
    resources: Vec<Resource>,
) -> Result<PublishList, StorageError> {
    let mut folders = Vec::new();
    let mut deleted_folders = Vec::new();
    let mut files = Vec::new();
    for resource in resources {
        if !resource.is_folder() {
            files.push(resource);
        } else if resource.state().is_deleted() {
            deleted_folders.push(resource);
        } else {
            folders.push(resource);
        }
    }
    folders.sort_by(|a, b| {
        path::depth(a.path())
            .cmp(&path::depth(b.path()))
            .then_with(|| a.path().cmp(b.path()))
    });
    deleted_folders.sort_by(|a, b| {
        path::depth(b.path())
            .cmp(&path::depth(a.path()))
            .then_with(|| a.path().cmp(b.path()))
    });
    files.sort_by(|a, b| a.path().cmp(b.path()));
    let files = order_by_links(store, files)?;

    Ok(PublishList {
        id: header.id,
        project: header.project,
        user: header.user,
        folders: folders.iter().map(PublishListEntry::of).collect(),
        files: files.iter().map(PublishListEntry::of).collect(),
        deleted_folders: deleted_folders.iter().map(PublishListEntry::of).collect(),
        options: header.options,
        direct: header.direct,
    })
}

/// Orders files so link targets precede their sources. Files on a link
/// cycle keep their path order after the rest.
fn order_by_links(
    store: &dyn ResourceStore,
    files: Vec<Resource>,
) -> Result<Vec<Resource>, StorageError> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..files.len()).map(|i| graph.add_node(i)).collect();
    let index: HashMap<StructureId, usize> = files
        .iter()
        .enumerate()
        .map(|(i, file)| (file.structure_id(), i))
        .collect();
    for (source, file) in files.iter().enumerate() {
        for relation in store.read_relations_from(View::Offline, file.structure_id())? {
            if !relation.relation_type.is_strong() {
                continue;
            }
            let Some(&target) = relation.target.id().and_then(|id| index.get(&id)) else {
                continue;
            };
            if target != source {
                graph.update_edge(nodes[target], nodes[source], ());
            }
        }
    }

    let mut order = Vec::with_capacity(files.len());
    let mut placed = vec![false; files.len()];
    let mut topo = Topo::new(&graph);
    while let Some(node) = topo.next(&graph) {
        let i = graph[node];
        placed[i] = true;
        order.push(i);
    }
    order.extend((0..files.len()).filter(|i| !placed[*i]));

    let mut slots: Vec<Option<Resource>> = files.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// Combines two lists of the same project into one, re-reading every entry.
pub(crate) fn merge(
    store: &dyn ResourceStore,
    locks: &LockManager,
    ctx: &RequestContext,
    first: &PublishList,
    second: &PublishList,
) -> Result<PublishList, RepositoryError> {
    if first.project != second.project {
        return Err(RepositoryError::DataConsistency(format!(
            "cannot merge publish lists of projects {} and {}",
            first.project, second.project
        )));
    }
    let options = PublishOptions {
        include_subresources: first.options.include_subresources
            || second.options.include_subresources,
        publish_siblings: first.options.publish_siblings || second.options.publish_siblings,
        keep_locks: first.options.keep_locks && second.options.keep_locks,
    };
    let mut builder = ListBuilder::new(store, locks, ctx, options);
    builder.add_entries(first.entries().chain(second.entries()))?;
    let mut merged = builder.finish(first.id, first.direct || second.direct)?;
    merged.project = first.project;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> PublishListEntry {
        PublishListEntry {
            structure_id: StructureId::new(),
            content_id: ContentId::new(),
            path: path.to_string(),
            state: ResourceState::Changed,
        }
    }

    #[test]
    fn test_entries_order_and_lookup() {
        let list = PublishList {
            id: PublishJobId::new(),
            project: ProjectId::new(),
            user: UserId::new(),
            folders: vec![entry("/a/")],
            files: vec![entry("/a/x")],
            deleted_folders: vec![entry("/old/")],
            options: PublishOptions::default(),
            direct: true,
        };
        assert_eq!(list.paths(), vec!["/a/", "/a/x", "/old/"]);
        assert_eq!(list.len(), 3);
        assert!(list.contains(list.files[0].structure_id));
        assert!(!list.contains(StructureId::new()));
    }

    #[test]
    fn test_default_options() {
        let options = PublishOptions::default();
        assert!(options.include_subresources);
        assert!(!options.publish_siblings);
        assert!(!options.keep_locks);
    }
}
