//! The [`ResourceStore`] trait defining the storage contract for the
//! resource repository.
//!
//! The trait is deliberately low level: one method per table operation,
//! no business rules. Versioning, locking and publish semantics live in
//! the repository crate, which drives a store through explicit
//! transactions (`begin` / `commit` / `rollback`).
//!
//! Every tree-shaped table is kept twice, once per [`View`].

use std::collections::BTreeMap;

use folio_core::{
    ContentAspect, ContentId, HistoryEntry, Project, ProjectId, PropertyDefinition, PublishJobId,
    PublishTag, Relation, Resource, StructureAspect, StructureId,
};

use crate::error::StorageError;
use crate::types::{PublishJobRecord, View};

/// Property values keyed by property name.
pub type PropertyMap = BTreeMap<String, String>;

/// The storage contract for the resource repository.
///
/// Implementations must be `Send` so the repository can move the store
/// behind a mutex shared with the publish worker.
pub trait ResourceStore: Send {
    // -------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------

    /// Starts a transaction. Nested transactions are an error.
    fn begin(&mut self) -> Result<(), StorageError>;

    /// Makes every write since `begin` durable.
    fn commit(&mut self) -> Result<(), StorageError>;

    /// Discards every write since `begin`.
    fn rollback(&mut self) -> Result<(), StorageError>;

    // -------------------------------------------------------------------
    // Resources
    // -------------------------------------------------------------------

    /// Reads a resource (structure joined with its content) by structure id.
    fn read_resource(
        &self,
        view: View,
        id: StructureId,
    ) -> Result<Option<Resource>, StorageError>;

    /// Reads the resource occupying `path`.
    fn read_resource_by_path(
        &self,
        view: View,
        path: &str,
    ) -> Result<Option<Resource>, StorageError>;

    /// All structures pointing at `content_id`, ordered by path.
    fn read_siblings(
        &self,
        view: View,
        content_id: ContentId,
    ) -> Result<Vec<Resource>, StorageError>;

    /// Resources below `folder` ordered by path, excluding the folder itself.
    /// With `recursive == false` only direct children are returned.
    fn read_subtree(
        &self,
        view: View,
        folder: &str,
        recursive: bool,
    ) -> Result<Vec<Resource>, StorageError>;

    /// Offline resources whose structure or content was last modified in
    /// `project` and not yet published, ordered by path.
    fn read_resources_in_project(
        &self,
        project: ProjectId,
    ) -> Result<Vec<Resource>, StorageError>;

    /// Inserts or replaces a structure record. Fails with an integrity error
    /// if a different structure already occupies the path.
    fn write_structure(
        &mut self,
        view: View,
        structure: &StructureAspect,
    ) -> Result<(), StorageError>;

    /// Removes a structure together with its structure properties and its
    /// outgoing relations. Incoming relations become unresolved.
    fn remove_structure(&mut self, view: View, id: StructureId) -> Result<(), StorageError>;

    fn read_content_aspect(
        &self,
        view: View,
        id: ContentId,
    ) -> Result<Option<ContentAspect>, StorageError>;

    fn write_content_aspect(
        &mut self,
        view: View,
        content: &ContentAspect,
    ) -> Result<(), StorageError>;

    /// Removes a content record, its bytes and its resource properties.
    fn remove_content_aspect(&mut self, view: View, id: ContentId) -> Result<(), StorageError>;

    fn read_content(&self, view: View, id: ContentId) -> Result<Option<Vec<u8>>, StorageError>;

    fn write_content(
        &mut self,
        view: View,
        id: ContentId,
        bytes: &[u8],
    ) -> Result<(), StorageError>;

    // -------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------

    fn read_structure_properties(
        &self,
        view: View,
        id: StructureId,
    ) -> Result<PropertyMap, StorageError>;

    fn read_resource_properties(
        &self,
        view: View,
        id: ContentId,
    ) -> Result<PropertyMap, StorageError>;

    /// Sets (`Some`) or removes (`None`) one structure property.
    fn write_structure_property(
        &mut self,
        view: View,
        id: StructureId,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Sets (`Some`) or removes (`None`) one resource property.
    fn write_resource_property(
        &mut self,
        view: View,
        id: ContentId,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Replaces every structure property of `id`.
    fn replace_structure_properties(
        &mut self,
        view: View,
        id: StructureId,
        properties: &PropertyMap,
    ) -> Result<(), StorageError>;

    /// Replaces every resource property of `id`.
    fn replace_resource_properties(
        &mut self,
        view: View,
        id: ContentId,
        properties: &PropertyMap,
    ) -> Result<(), StorageError>;

    fn read_property_definitions(&self) -> Result<Vec<PropertyDefinition>, StorageError>;

    fn read_property_definition(
        &self,
        name: &str,
    ) -> Result<Option<PropertyDefinition>, StorageError>;

    fn write_property_definition(
        &mut self,
        definition: &PropertyDefinition,
    ) -> Result<(), StorageError>;

    // -------------------------------------------------------------------
    // Relations
    // -------------------------------------------------------------------

    /// Relations whose source is `source`.
    fn read_relations_from(
        &self,
        view: View,
        source: StructureId,
    ) -> Result<Vec<Relation>, StorageError>;

    /// Relations resolved to `target`, plus unresolved relations pointing
    /// at `path`.
    fn read_relations_to(
        &self,
        view: View,
        target: StructureId,
        path: &str,
    ) -> Result<Vec<Relation>, StorageError>;

    /// Replaces every outgoing relation of `source`.
    fn write_relations(
        &mut self,
        view: View,
        source: StructureId,
        relations: &[Relation],
    ) -> Result<(), StorageError>;

    /// Points every relation whose target path is `path` at `target`
    /// (`None` makes them unresolved). Returns the number of relations
    /// touched.
    fn retarget_relations(
        &mut self,
        view: View,
        path: &str,
        target: Option<StructureId>,
    ) -> Result<usize, StorageError>;

    // -------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------

    fn write_history_entry(&mut self, entry: &HistoryEntry) -> Result<(), StorageError>;

    /// Stores a history blob under its hash; a no-op if already present.
    fn write_history_content(&mut self, hash: &str, bytes: &[u8]) -> Result<(), StorageError>;

    fn read_history_content(&self, hash: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// History of a content identity, oldest publish tag first.
    fn read_history_by_content(
        &self,
        content_id: ContentId,
    ) -> Result<Vec<HistoryEntry>, StorageError>;

    /// History of a structure identity, oldest publish tag first.
    fn read_history_by_structure(
        &self,
        structure_id: StructureId,
    ) -> Result<Vec<HistoryEntry>, StorageError>;

    /// Deleted-flagged entries whose path lies below `folder`, oldest first.
    fn read_deleted_history(
        &self,
        folder: &str,
        recursive: bool,
    ) -> Result<Vec<HistoryEntry>, StorageError>;

    /// Every content identity that has at least one history entry.
    fn read_history_content_ids(&self) -> Result<Vec<ContentId>, StorageError>;

    fn delete_history_entry(
        &mut self,
        structure_id: StructureId,
        tag: PublishTag,
    ) -> Result<(), StorageError>;

    /// Drops history blobs no entry references. Returns how many were dropped.
    fn delete_unreferenced_history_contents(&mut self) -> Result<usize, StorageError>;

    // -------------------------------------------------------------------
    // Projects
    // -------------------------------------------------------------------

    fn write_project(&mut self, project: &Project) -> Result<(), StorageError>;

    fn read_project(&self, id: ProjectId) -> Result<Option<Project>, StorageError>;

    /// All projects ordered by name.
    fn read_projects(&self) -> Result<Vec<Project>, StorageError>;

    // -------------------------------------------------------------------
    // Publish jobs and counters
    // -------------------------------------------------------------------

    fn write_publish_job(&mut self, record: &PublishJobRecord) -> Result<(), StorageError>;

    /// All persisted jobs ordered by sequence.
    fn read_publish_jobs(&self) -> Result<Vec<PublishJobRecord>, StorageError>;

    fn delete_publish_job(&mut self, id: PublishJobId) -> Result<(), StorageError>;

    /// Current value of a named counter, 0 if never written.
    fn read_counter(&self, name: &str) -> Result<u64, StorageError>;

    fn write_counter(&mut self, name: &str, value: u64) -> Result<(), StorageError>;
}
