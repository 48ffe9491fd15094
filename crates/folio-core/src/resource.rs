//! The resource model: a structure aspect (one slot in the tree) joined with
//! a content aspect (shared by every sibling of the slot).
//!
//! Each aspect carries its own [`ResourceState`] and its own version counter.
//! The state callers see is derived from both, see [`Resource::state`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ContentId, ProjectId, StructureId, UserId};
use crate::path;

/// Lifecycle state of a resource (or of one of its aspects).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceState {
    /// Created, never published.
    New,
    /// Published, no pending edits.
    Unchanged,
    /// Published once, now has pending edits.
    Changed,
    /// Marked for removal; removed from the online tree on publish.
    Deleted,
}

impl ResourceState {
    pub fn is_new(self) -> bool {
        self == ResourceState::New
    }

    pub fn is_unchanged(self) -> bool {
        self == ResourceState::Unchanged
    }

    pub fn is_deleted(self) -> bool {
        self == ResourceState::Deleted
    }

    /// State after an edit: NEW stays NEW, DELETED stays DELETED, anything
    /// else becomes CHANGED.
    pub fn touched(self) -> ResourceState {
        match self {
            ResourceState::New | ResourceState::Deleted => self,
            _ => ResourceState::Changed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceState::New => "NEW",
            ResourceState::Unchanged => "UNCHANGED",
            ResourceState::Changed => "CHANGED",
            ResourceState::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of a resource. Content engines interpret the bytes; the
/// repository only cares whether it is a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Folder,
    Plain,
    Binary,
    Image,
    XmlContent,
    Pointer,
}

impl ResourceType {
    pub fn is_folder(self) -> bool {
        self == ResourceType::Folder
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceType::Folder => "folder",
            ResourceType::Plain => "plain",
            ResourceType::Binary => "binary",
            ResourceType::Image => "image",
            ResourceType::XmlContent => "xmlcontent",
            ResourceType::Pointer => "pointer",
        };
        f.write_str(name)
    }
}

/// Bit set of resource flags (stored on the content aspect).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResourceFlags(pub u32);

impl ResourceFlags {
    pub const NONE: ResourceFlags = ResourceFlags(0);
    /// The resource is the target of a sibling created by label-aware tools.
    pub const LABELED: ResourceFlags = ResourceFlags(2);
    /// Hidden from non-administrative listings.
    pub const INTERNAL: ResourceFlags = ResourceFlags(512);
    /// Scratch copy written by an editor session.
    pub const TEMPFILE: ResourceFlags = ResourceFlags(1024);

    pub fn contains(self, other: ResourceFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: ResourceFlags) -> ResourceFlags {
        ResourceFlags(self.0 | other.0)
    }

    pub fn without(self, other: ResourceFlags) -> ResourceFlags {
        ResourceFlags(self.0 & !other.0)
    }
}

// ---------------------------------------------------------------------------
// Aspects
// ---------------------------------------------------------------------------

/// The per-path part of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureAspect {
    pub structure_id: StructureId,
    pub content_id: ContentId,
    pub path: String,
    /// Structure id of the parent folder; `None` only for the root.
    pub parent_id: Option<StructureId>,
    pub state: ResourceState,
    pub date_released: Option<DateTime<Utc>>,
    pub date_expired: Option<DateTime<Utc>>,
    pub date_last_modified: DateTime<Utc>,
    pub user_last_modified: UserId,
    /// Project of the last edit; `None` once published.
    pub project_last_modified: Option<ProjectId>,
    /// Number of structure-only publishes of this slot.
    pub structure_version: u32,
}

/// The part of a resource shared by every sibling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAspect {
    pub content_id: ContentId,
    pub resource_type: ResourceType,
    pub flags: ResourceFlags,
    pub state: ResourceState,
    pub length: u64,
    pub date_created: DateTime<Utc>,
    pub user_created: UserId,
    pub date_content: DateTime<Utc>,
    pub date_last_modified: DateTime<Utc>,
    pub user_last_modified: UserId,
    pub project_last_modified: Option<ProjectId>,
    /// Number of content publishes of this content identity.
    pub resource_version: u32,
}

/// A resource as callers see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub structure: StructureAspect,
    pub content: ContentAspect,
    /// Number of structures (including this one) pointing at the content.
    pub sibling_count: u32,
}

impl Resource {
    pub fn structure_id(&self) -> StructureId {
        self.structure.structure_id
    }

    pub fn content_id(&self) -> ContentId {
        self.content.content_id
    }

    pub fn path(&self) -> &str {
        &self.structure.path
    }

    pub fn name(&self) -> &str {
        path::name(&self.structure.path)
    }

    pub fn resource_type(&self) -> ResourceType {
        self.content.resource_type
    }

    pub fn flags(&self) -> ResourceFlags {
        self.content.flags
    }

    pub fn length(&self) -> u64 {
        self.content.length
    }

    pub fn is_folder(&self) -> bool {
        self.content.resource_type.is_folder()
    }

    pub fn is_file(&self) -> bool {
        !self.is_folder()
    }

    pub fn has_siblings(&self) -> bool {
        self.sibling_count > 1
    }

    /// The combined state.
    ///
    /// NEW and DELETED on the structure win; otherwise any pending change on
    /// either aspect makes the resource CHANGED.
    pub fn state(&self) -> ResourceState {
        match self.structure.state {
            ResourceState::New | ResourceState::Deleted | ResourceState::Changed => {
                self.structure.state
            }
            ResourceState::Unchanged => {
                if self.content.state.is_unchanged() {
                    ResourceState::Unchanged
                } else {
                    ResourceState::Changed
                }
            }
        }
    }

    /// Displayed version: structure version plus resource version.
    pub fn version(&self) -> u32 {
        self.structure.structure_version + self.content.resource_version
    }

    pub fn date_last_modified(&self) -> DateTime<Utc> {
        self.structure
            .date_last_modified
            .max(self.content.date_last_modified)
    }

    pub fn user_last_modified(&self) -> UserId {
        if self.content.date_last_modified > self.structure.date_last_modified {
            self.content.user_last_modified
        } else {
            self.structure.user_last_modified
        }
    }

    /// Project of the most recent pending edit on either aspect.
    pub fn project_last_modified(&self) -> Option<ProjectId> {
        self.structure
            .project_last_modified
            .or(self.content.project_last_modified)
    }
}

/// A file resource together with its bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub resource: Resource,
    pub contents: Vec<u8>,
}

/// Attributes supplied when importing a resource.
///
/// Unlike a plain create, an import may name the structure and content ids
/// to reuse, which is how a resource is reconnected to existing history.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourceTemplate {
    pub structure_id: Option<StructureId>,
    pub content_id: Option<ContentId>,
    pub resource_type: Option<ResourceType>,
    pub flags: ResourceFlags,
    pub date_released: Option<DateTime<Utc>>,
    pub date_expired: Option<DateTime<Utc>>,
    pub date_created: Option<DateTime<Utc>>,
    pub user_created: Option<UserId>,
}

impl ResourceTemplate {
    pub fn new(resource_type: ResourceType) -> Self {
        ResourceTemplate {
            resource_type: Some(resource_type),
            ..Default::default()
        }
    }

    /// Template carrying the identity and attributes of an existing resource.
    pub fn from_resource(resource: &Resource) -> Self {
        ResourceTemplate {
            structure_id: Some(resource.structure_id()),
            content_id: Some(resource.content_id()),
            resource_type: Some(resource.resource_type()),
            flags: resource.flags(),
            date_released: resource.structure.date_released,
            date_expired: resource.structure.date_expired,
            date_created: Some(resource.content.date_created),
            user_created: Some(resource.content.user_created),
        }
    }

    pub fn with_structure_id(mut self, id: StructureId) -> Self {
        self.structure_id = Some(id);
        self
    }

    pub fn with_content_id(mut self, id: ContentId) -> Self {
        self.content_id = Some(id);
        self
    }

    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(structure: ResourceState, content: ResourceState) -> Resource {
        let now = Utc::now();
        let user = UserId::new();
        let content_id = ContentId::new();
        Resource {
            structure: StructureAspect {
                structure_id: StructureId::new(),
                content_id,
                path: "/a/x.txt".to_string(),
                parent_id: Some(StructureId::new()),
                state: structure,
                date_released: None,
                date_expired: None,
                date_last_modified: now,
                user_last_modified: user,
                project_last_modified: None,
                structure_version: 2,
            },
            content: ContentAspect {
                content_id,
                resource_type: ResourceType::Plain,
                flags: ResourceFlags::NONE,
                state: content,
                length: 0,
                date_created: now,
                user_created: user,
                date_content: now,
                date_last_modified: now,
                user_last_modified: user,
                project_last_modified: None,
                resource_version: 3,
            },
            sibling_count: 1,
        }
    }

    #[test]
    fn test_combined_state() {
        use ResourceState::*;
        assert_eq!(sample(New, New).state(), New);
        assert_eq!(sample(Deleted, Changed).state(), Deleted);
        assert_eq!(sample(Unchanged, Unchanged).state(), Unchanged);
        assert_eq!(sample(Unchanged, Changed).state(), Changed);
        assert_eq!(sample(Changed, Unchanged).state(), Changed);
    }

    #[test]
    fn test_version_is_sum_of_counters() {
        let r = sample(ResourceState::Unchanged, ResourceState::Unchanged);
        assert_eq!(r.version(), 5);
        assert_eq!(r.name(), "x.txt");
    }

    #[test]
    fn test_touched_state() {
        assert_eq!(ResourceState::Unchanged.touched(), ResourceState::Changed);
        assert_eq!(ResourceState::New.touched(), ResourceState::New);
        assert_eq!(ResourceState::Deleted.touched(), ResourceState::Deleted);
    }

    #[test]
    fn test_flags() {
        let flags = ResourceFlags::NONE.with(ResourceFlags::INTERNAL);
        assert!(flags.contains(ResourceFlags::INTERNAL));
        assert!(!flags.contains(ResourceFlags::LABELED));
        assert_eq!(flags.without(ResourceFlags::INTERNAL), ResourceFlags::NONE);
    }
}
