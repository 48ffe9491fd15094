//! Domain model of the folio resource repository.
//!
//! Pure data types with no I/O: identities, tree paths, the two-aspect
//! resource record, properties, relations, history entries and projects.

pub mod error;
pub mod history;
pub mod id;
pub mod path;
pub mod project;
pub mod property;
pub mod publish;
pub mod relation;
pub mod resource;

// Re-export commonly used types
pub use error::CoreError;
pub use history::HistoryEntry;
pub use id::{ContentId, ProjectId, PublishJobId, PublishTag, StructureId, UserId};
pub use project::Project;
pub use property::{Property, PropertyDefinition};
pub use publish::{PublishJobState, PublishOutcome};
pub use relation::{BrokenRelation, Relation, RelationDirection, RelationTarget, RelationType};
pub use resource::{
    ContentAspect, File, Resource, ResourceFlags, ResourceState, ResourceTemplate, ResourceType,
    StructureAspect,
};
