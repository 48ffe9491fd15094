//! Record builders shared by the backend tests.

use chrono::Utc;

use folio_core::{
    ContentAspect, ContentId, HistoryEntry, ProjectId, PublishTag, ResourceFlags, ResourceState,
    ResourceType, StructureAspect, StructureId, UserId,
};

pub fn content_aspect() -> ContentAspect {
    let now = Utc::now();
    let user = UserId::new();
    ContentAspect {
        content_id: ContentId::new(),
        resource_type: ResourceType::Plain,
        flags: ResourceFlags::NONE,
        state: ResourceState::New,
        length: 0,
        date_created: now,
        user_created: user,
        date_content: now,
        date_last_modified: now,
        user_last_modified: user,
        project_last_modified: None,
        resource_version: 0,
    }
}

pub fn structure_aspect(path: &str, content_id: ContentId) -> StructureAspect {
    StructureAspect {
        structure_id: StructureId::new(),
        content_id,
        path: path.to_string(),
        parent_id: None,
        state: ResourceState::New,
        date_released: None,
        date_expired: None,
        date_last_modified: Utc::now(),
        user_last_modified: UserId::new(),
        project_last_modified: None,
        structure_version: 0,
    }
}

pub fn history_entry(content_id: ContentId, path: &str, tag: u64, hash: &str) -> HistoryEntry {
    let now = Utc::now();
    let user = UserId::new();
    HistoryEntry {
        structure_id: StructureId::new(),
        content_id,
        path: path.to_string(),
        resource_type: ResourceType::Plain,
        flags: ResourceFlags::NONE,
        state: ResourceState::New,
        deleted: false,
        structure_version: 0,
        resource_version: 1,
        publish_tag: PublishTag(tag),
        content_hash: hash.to_string(),
        length: 0,
        date_last_modified: now,
        user_last_modified: user,
        date_content: now,
        date_released: None,
        date_expired: None,
        date_published: now,
        user_published: user,
        project: ProjectId::new(),
        properties: Vec::new(),
    }
}
