//! Immutable history snapshots written by publish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ContentId, ProjectId, PublishTag, StructureId, UserId};
use crate::property::Property;
use crate::resource::{ResourceFlags, ResourceState, ResourceType};

/// One published version of a resource.
///
/// Entries are keyed by `(structure_id, publish_tag)` and grouped by
/// `content_id`, so history survives as long as the content identity does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub structure_id: StructureId,
    pub content_id: ContentId,
    pub path: String,
    pub resource_type: ResourceType,
    pub flags: ResourceFlags,
    /// State of the resource when it was published.
    pub state: ResourceState,
    pub deleted: bool,
    pub structure_version: u32,
    pub resource_version: u32,
    pub publish_tag: PublishTag,
    /// blake3 hex digest of the published bytes.
    pub content_hash: String,
    pub length: u64,
    pub date_last_modified: DateTime<Utc>,
    pub user_last_modified: UserId,
    pub date_content: DateTime<Utc>,
    pub date_released: Option<DateTime<Utc>>,
    pub date_expired: Option<DateTime<Utc>>,
    pub date_published: DateTime<Utc>,
    pub user_published: UserId,
    pub project: ProjectId,
    pub properties: Vec<Property>,
}

impl HistoryEntry {
    pub fn version(&self) -> u32 {
        self.structure_version + self.resource_version
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}
