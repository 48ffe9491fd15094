//! In-memory implementation of [`ResourceStore`].
//!
//! [`InMemoryStore`] is a first-class backend for tests and ephemeral
//! repositories. It keeps every table in ordinary collections with the same
//! semantics as the SQLite backend. Transactions snapshot the whole state
//! on `begin` and restore it on `rollback`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use folio_core::path;
use folio_core::{
    ContentAspect, ContentId, HistoryEntry, Project, ProjectId, PropertyDefinition, PublishJobId,
    PublishTag, Relation, RelationTarget, Resource, StructureAspect, StructureId,
};

use crate::error::StorageError;
use crate::traits::{PropertyMap, ResourceStore};
use crate::types::{PublishJobRecord, View};

/// One copy of the tree.
#[derive(Debug, Clone, Default)]
struct ViewData {
    structures: HashMap<StructureId, StructureAspect>,
    /// Path index; ordered so subtree reads are range scans.
    paths: BTreeMap<String, StructureId>,
    /// Content id to the structures sharing it.
    siblings: HashMap<ContentId, BTreeSet<StructureId>>,
    contents: HashMap<ContentId, ContentAspect>,
    bytes: HashMap<ContentId, Vec<u8>>,
    structure_properties: HashMap<StructureId, PropertyMap>,
    resource_properties: HashMap<ContentId, PropertyMap>,
    /// Outgoing relations keyed by source.
    relations: HashMap<StructureId, Vec<Relation>>,
}

impl ViewData {
    fn assemble(&self, structure: &StructureAspect) -> Result<Resource, StorageError> {
        let content = self
            .contents
            .get(&structure.content_id)
            .ok_or_else(|| {
                StorageError::integrity(format!(
                    "structure {} references missing content {}",
                    structure.structure_id, structure.content_id
                ))
            })?
            .clone();
        let sibling_count = self
            .siblings
            .get(&structure.content_id)
            .map(|set| set.len() as u32)
            .unwrap_or(0);
        Ok(Resource {
            structure: structure.clone(),
            content,
            sibling_count,
        })
    }

    fn resource(&self, id: StructureId) -> Result<Option<Resource>, StorageError> {
        match self.structures.get(&id) {
            Some(structure) => self.assemble(structure).map(Some),
            None => Ok(None),
        }
    }

    fn unlink_structure(&mut self, structure: &StructureAspect) {
        self.paths.remove(&structure.path);
        if let Some(set) = self.siblings.get_mut(&structure.content_id) {
            set.remove(&structure.structure_id);
            if set.is_empty() {
                self.siblings.remove(&structure.content_id);
            }
        }
    }

    /// Keeps denormalized relation paths in step with a moved structure.
    fn follow_move(&mut self, id: StructureId, new_path: &str) {
        for relations in self.relations.values_mut() {
            for relation in relations.iter_mut() {
                if relation.source_id == id {
                    relation.source_path = new_path.to_string();
                }
                if relation.target.id() == Some(id) {
                    relation.target = RelationTarget::Resolved {
                        id,
                        path: new_path.to_string(),
                    };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    offline: ViewData,
    online: ViewData,
    history: BTreeMap<(StructureId, PublishTag), HistoryEntry>,
    history_contents: HashMap<String, Vec<u8>>,
    projects: BTreeMap<ProjectId, Project>,
    property_definitions: BTreeMap<String, PropertyDefinition>,
    publish_jobs: HashMap<PublishJobId, PublishJobRecord>,
    counters: HashMap<String, u64>,
}

impl MemoryState {
    fn view(&self, view: View) -> &ViewData {
        match view {
            View::Offline => &self.offline,
            View::Online => &self.online,
        }
    }

    fn view_mut(&mut self, view: View) -> &mut ViewData {
        match view {
            View::Offline => &mut self.offline,
            View::Online => &mut self.online,
        }
    }
}

/// In-memory implementation of [`ResourceStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: MemoryState,
    /// State captured by `begin`, restored by `rollback`.
    snapshot: Option<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Sorts history entries oldest publish tag first, then by path.
fn sort_history(entries: &mut [HistoryEntry]) {
    entries.sort_by(|a, b| {
        a.publish_tag
            .cmp(&b.publish_tag)
            .then_with(|| a.path.cmp(&b.path))
    });
}

impl ResourceStore for InMemoryStore {
    // -------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------

    fn begin(&mut self) -> Result<(), StorageError> {
        if self.snapshot.is_some() {
            return Err(StorageError::Transaction {
                reason: "transaction already open".to_string(),
            });
        }
        self.snapshot = Some(self.state.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if self.snapshot.take().is_none() {
            return Err(StorageError::Transaction {
                reason: "commit without begin".to_string(),
            });
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        match self.snapshot.take() {
            Some(previous) => {
                self.state = previous;
                Ok(())
            }
            None => Err(StorageError::Transaction {
                reason: "rollback without begin".to_string(),
            }),
        }
    }

    // -------------------------------------------------------------------
    // Resources
    // -------------------------------------------------------------------

    fn read_resource(
        &self,
        view: View,
        id: StructureId,
    ) -> Result<Option<Resource>, StorageError> {
        self.state.view(view).resource(id)
    }

    fn read_resource_by_path(
        &self,
        view: View,
        path: &str,
    ) -> Result<Option<Resource>, StorageError> {
        let data = self.state.view(view);
        match data.paths.get(path) {
            Some(id) => data.resource(*id),
            None => Ok(None),
        }
    }

    fn read_siblings(
        &self,
        view: View,
        content_id: ContentId,
    ) -> Result<Vec<Resource>, StorageError> {
        let data = self.state.view(view);
        let mut result = Vec::new();
        if let Some(set) = data.siblings.get(&content_id) {
            for id in set {
                if let Some(resource) = data.resource(*id)? {
                    result.push(resource);
                }
            }
        }
        result.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(result)
    }

    fn read_subtree(
        &self,
        view: View,
        folder: &str,
        recursive: bool,
    ) -> Result<Vec<Resource>, StorageError> {
        let data = self.state.view(view);
        let mut result = Vec::new();
        for (candidate, id) in data.paths.range(folder.to_string()..) {
            if !candidate.starts_with(folder) {
                break;
            }
            if candidate == folder {
                continue;
            }
            if !recursive && !path::is_direct_child(candidate, folder) {
                continue;
            }
            if let Some(resource) = data.resource(*id)? {
                result.push(resource);
            }
        }
        Ok(result)
    }

    fn read_resources_in_project(
        &self,
        project: ProjectId,
    ) -> Result<Vec<Resource>, StorageError> {
        let data = &self.state.offline;
        let mut result = Vec::new();
        for id in data.paths.values() {
            if let Some(resource) = data.resource(*id)? {
                if resource.structure.project_last_modified == Some(project)
                    || resource.content.project_last_modified == Some(project)
                {
                    result.push(resource);
                }
            }
        }
        Ok(result)
    }

    fn write_structure(
        &mut self,
        view: View,
        structure: &StructureAspect,
    ) -> Result<(), StorageError> {
        let data = self.state.view_mut(view);
        if let Some(occupant) = data.paths.get(&structure.path) {
            if *occupant != structure.structure_id {
                return Err(StorageError::integrity(format!(
                    "path {} already occupied in the {} view",
                    structure.path, view
                )));
            }
        }
        let moved = match data.structures.get(&structure.structure_id).cloned() {
            Some(previous) => {
                data.unlink_structure(&previous);
                previous.path != structure.path
            }
            None => false,
        };
        data.paths
            .insert(structure.path.clone(), structure.structure_id);
        data.siblings
            .entry(structure.content_id)
            .or_default()
            .insert(structure.structure_id);
        data.structures
            .insert(structure.structure_id, structure.clone());
        if moved {
            data.follow_move(structure.structure_id, &structure.path);
        }
        Ok(())
    }

    fn remove_structure(&mut self, view: View, id: StructureId) -> Result<(), StorageError> {
        let data = self.state.view_mut(view);
        let Some(previous) = data.structures.remove(&id) else {
            return Ok(());
        };
        data.unlink_structure(&previous);
        data.structure_properties.remove(&id);
        data.relations.remove(&id);
        for relations in data.relations.values_mut() {
            for relation in relations.iter_mut() {
                if relation.target.id() == Some(id) {
                    relation.target = RelationTarget::Unresolved {
                        path: relation.target.path().to_string(),
                    };
                }
            }
        }
        Ok(())
    }

    fn read_content_aspect(
        &self,
        view: View,
        id: ContentId,
    ) -> Result<Option<ContentAspect>, StorageError> {
        Ok(self.state.view(view).contents.get(&id).cloned())
    }

    fn write_content_aspect(
        &mut self,
        view: View,
        content: &ContentAspect,
    ) -> Result<(), StorageError> {
        self.state
            .view_mut(view)
            .contents
            .insert(content.content_id, content.clone());
        Ok(())
    }

    fn remove_content_aspect(&mut self, view: View, id: ContentId) -> Result<(), StorageError> {
        let data = self.state.view_mut(view);
        data.contents.remove(&id);
        data.bytes.remove(&id);
        data.resource_properties.remove(&id);
        Ok(())
    }

    fn read_content(&self, view: View, id: ContentId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.state.view(view).bytes.get(&id).cloned())
    }

    fn write_content(
        &mut self,
        view: View,
        id: ContentId,
        bytes: &[u8],
    ) -> Result<(), StorageError> {
        self.state.view_mut(view).bytes.insert(id, bytes.to_vec());
        Ok(())
    }

    // -------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------

    fn read_structure_properties(
        &self,
        view: View,
        id: StructureId,
    ) -> Result<PropertyMap, StorageError> {
        Ok(self
            .state
            .view(view)
            .structure_properties
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    fn read_resource_properties(
        &self,
        view: View,
        id: ContentId,
    ) -> Result<PropertyMap, StorageError> {
        Ok(self
            .state
            .view(view)
            .resource_properties
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    fn write_structure_property(
        &mut self,
        view: View,
        id: StructureId,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), StorageError> {
        let map = self
            .state
            .view_mut(view)
            .structure_properties
            .entry(id)
            .or_default();
        match value {
            Some(value) => {
                map.insert(name.to_string(), value.to_string());
            }
            None => {
                map.remove(name);
            }
        }
        Ok(())
    }

    fn write_resource_property(
        &mut self,
        view: View,
        id: ContentId,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), StorageError> {
        let map = self
            .state
            .view_mut(view)
            .resource_properties
            .entry(id)
            .or_default();
        match value {
            Some(value) => {
                map.insert(name.to_string(), value.to_string());
            }
            None => {
                map.remove(name);
            }
        }
        Ok(())
    }

    fn replace_structure_properties(
        &mut self,
        view: View,
        id: StructureId,
        properties: &PropertyMap,
    ) -> Result<(), StorageError> {
        self.state
            .view_mut(view)
            .structure_properties
            .insert(id, properties.clone());
        Ok(())
    }

    fn replace_resource_properties(
        &mut self,
        view: View,
        id: ContentId,
        properties: &PropertyMap,
    ) -> Result<(), StorageError> {
        self.state
            .view_mut(view)
            .resource_properties
            .insert(id, properties.clone());
        Ok(())
    }

    fn read_property_definitions(&self) -> Result<Vec<PropertyDefinition>, StorageError> {
        Ok(self.state.property_definitions.values().cloned().collect())
    }

    fn read_property_definition(
        &self,
        name: &str,
    ) -> Result<Option<PropertyDefinition>, StorageError> {
        Ok(self.state.property_definitions.get(name).cloned())
    }

    fn write_property_definition(
        &mut self,
        definition: &PropertyDefinition,
    ) -> Result<(), StorageError> {
        self.state
            .property_definitions
            .insert(definition.name.clone(), definition.clone());
        Ok(())
    }

    // -------------------------------------------------------------------
    // Relations
    // -------------------------------------------------------------------

    fn read_relations_from(
        &self,
        view: View,
        source: StructureId,
    ) -> Result<Vec<Relation>, StorageError> {
        Ok(self
            .state
            .view(view)
            .relations
            .get(&source)
            .cloned()
            .unwrap_or_default())
    }

    fn read_relations_to(
        &self,
        view: View,
        target: StructureId,
        path: &str,
    ) -> Result<Vec<Relation>, StorageError> {
        let mut result: Vec<Relation> = self
            .state
            .view(view)
            .relations
            .values()
            .flatten()
            .filter(|relation| match &relation.target {
                RelationTarget::Resolved { id, .. } => *id == target,
                RelationTarget::Unresolved { path: p } => p == path,
            })
            .cloned()
            .collect();
        result.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        Ok(result)
    }

    fn write_relations(
        &mut self,
        view: View,
        source: StructureId,
        relations: &[Relation],
    ) -> Result<(), StorageError> {
        let data = self.state.view_mut(view);
        if relations.is_empty() {
            data.relations.remove(&source);
        } else {
            data.relations.insert(source, relations.to_vec());
        }
        Ok(())
    }

    fn retarget_relations(
        &mut self,
        view: View,
        path: &str,
        target: Option<StructureId>,
    ) -> Result<usize, StorageError> {
        let mut touched = 0;
        for relations in self.state.view_mut(view).relations.values_mut() {
            for relation in relations.iter_mut() {
                if relation.target.path() != path {
                    continue;
                }
                relation.target = match target {
                    Some(id) => RelationTarget::Resolved {
                        id,
                        path: path.to_string(),
                    },
                    None => RelationTarget::Unresolved {
                        path: path.to_string(),
                    },
                };
                touched += 1;
            }
        }
        Ok(touched)
    }

    // -------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------

    fn write_history_entry(&mut self, entry: &HistoryEntry) -> Result<(), StorageError> {
        self.state
            .history
            .insert((entry.structure_id, entry.publish_tag), entry.clone());
        Ok(())
    }

    fn write_history_content(&mut self, hash: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.state
            .history_contents
            .entry(hash.to_string())
            .or_insert_with(|| bytes.to_vec());
        Ok(())
    }

    fn read_history_content(&self, hash: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.state.history_contents.get(hash).cloned())
    }

    fn read_history_by_content(
        &self,
        content_id: ContentId,
    ) -> Result<Vec<HistoryEntry>, StorageError> {
        let mut entries: Vec<HistoryEntry> = self
            .state
            .history
            .values()
            .filter(|e| e.content_id == content_id)
            .cloned()
            .collect();
        sort_history(&mut entries);
        Ok(entries)
    }

    fn read_history_by_structure(
        &self,
        structure_id: StructureId,
    ) -> Result<Vec<HistoryEntry>, StorageError> {
        let mut entries: Vec<HistoryEntry> = self
            .state
            .history
            .range((structure_id, PublishTag::ZERO)..=(structure_id, PublishTag(u64::MAX)))
            .map(|(_, e)| e.clone())
            .collect();
        sort_history(&mut entries);
        Ok(entries)
    }

    fn read_deleted_history(
        &self,
        folder: &str,
        recursive: bool,
    ) -> Result<Vec<HistoryEntry>, StorageError> {
        let mut entries: Vec<HistoryEntry> = self
            .state
            .history
            .values()
            .filter(|e| e.deleted && path::is_descendant(&e.path, folder))
            .filter(|e| recursive || path::is_direct_child(&e.path, folder))
            .cloned()
            .collect();
        sort_history(&mut entries);
        Ok(entries)
    }

    fn read_history_content_ids(&self) -> Result<Vec<ContentId>, StorageError> {
        let ids: BTreeSet<ContentId> = self.state.history.values().map(|e| e.content_id).collect();
        Ok(ids.into_iter().collect())
    }

    fn delete_history_entry(
        &mut self,
        structure_id: StructureId,
        tag: PublishTag,
    ) -> Result<(), StorageError> {
        self.state.history.remove(&(structure_id, tag));
        Ok(())
    }

    fn delete_unreferenced_history_contents(&mut self) -> Result<usize, StorageError> {
        let referenced: BTreeSet<&str> = self
            .state
            .history
            .values()
            .map(|e| e.content_hash.as_str())
            .collect();
        let before = self.state.history_contents.len();
        let keep: HashMap<String, Vec<u8>> = self
            .state
            .history_contents
            .iter()
            .filter(|(hash, _)| referenced.contains(hash.as_str()))
            .map(|(hash, bytes)| (hash.clone(), bytes.clone()))
            .collect();
        let removed = before - keep.len();
        self.state.history_contents = keep;
        Ok(removed)
    }

    // -------------------------------------------------------------------
    // Projects
    // -------------------------------------------------------------------

    fn write_project(&mut self, project: &Project) -> Result<(), StorageError> {
        self.state.projects.insert(project.id, project.clone());
        Ok(())
    }

    fn read_project(&self, id: ProjectId) -> Result<Option<Project>, StorageError> {
        Ok(self.state.projects.get(&id).cloned())
    }

    fn read_projects(&self) -> Result<Vec<Project>, StorageError> {
        let mut projects: Vec<Project> = self.state.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    // -------------------------------------------------------------------
    // Publish jobs and counters
    // -------------------------------------------------------------------

    fn write_publish_job(&mut self, record: &PublishJobRecord) -> Result<(), StorageError> {
        self.state.publish_jobs.insert(record.id, record.clone());
        Ok(())
    }

    fn read_publish_jobs(&self) -> Result<Vec<PublishJobRecord>, StorageError> {
        let mut jobs: Vec<PublishJobRecord> = self.state.publish_jobs.values().cloned().collect();
        jobs.sort_by_key(|job| job.sequence);
        Ok(jobs)
    }

    fn delete_publish_job(&mut self, id: PublishJobId) -> Result<(), StorageError> {
        self.state.publish_jobs.remove(&id);
        Ok(())
    }

    fn read_counter(&self, name: &str) -> Result<u64, StorageError> {
        Ok(self.state.counters.get(name).copied().unwrap_or(0))
    }

    fn write_counter(&mut self, name: &str, value: u64) -> Result<(), StorageError> {
        self.state.counters.insert(name.to_string(), value);
        Ok(())
    }
}
