//! The version/history ledger.
//!
//! History entries are appended by the publish engine, one per published
//! resource per publish tag, and are never modified afterwards. This module
//! holds the three algorithms built on top of the append-only table:
//!
//! - [`next_versions`]: the counters a resource is published with,
//! - [`list_versions`]: the versions visible from one structure, including
//!   content versions published through its siblings,
//! - [`prune`]: retention by keep-count per content identity.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use folio_core::{
    ContentId, HistoryEntry, ProjectId, Property, PublishTag, Resource, ResourceState,
    StructureId, UserId,
};
use folio_storage::{content_hash, ResourceStore, StorageError, View};

// ---------------------------------------------------------------------------
// Version numbering
// ---------------------------------------------------------------------------

/// Counters a resource is published with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PublishedVersions {
    pub structure_version: u32,
    pub resource_version: u32,
    /// True if this publish carries the content change of the content
    /// identity.
    pub content_bumped: bool,
}

/// Computes the counters for publishing `resource`.
///
/// The two counters move independently. A pending content change bumps the
/// resource version once per content identity per job, continuing from the
/// highest version ever recorded for that content so recreated resources
/// never reuse numbers. Siblings published after the content in the same
/// job share the new resource version. A pending structure change bumps the
/// structure version of this sibling only; the structure of a NEW resource
/// published together with its NEW content starts at 0.
pub(crate) fn next_versions(
    store: &dyn ResourceStore,
    resource: &Resource,
    content_published: &HashSet<ContentId>,
) -> Result<PublishedVersions, StorageError> {
    let structure_version = resource.structure.structure_version;
    let resource_version = resource.content.resource_version;
    let structure_pending = resource.structure.state != ResourceState::Unchanged;
    if content_published.contains(&resource.content_id()) {
        return Ok(PublishedVersions {
            structure_version: structure_version + u32::from(structure_pending),
            resource_version,
            content_bumped: false,
        });
    }
    if resource.content.state != ResourceState::Unchanged {
        let recorded = store
            .read_history_by_content(resource.content_id())?
            .iter()
            .map(|entry| entry.resource_version)
            .max()
            .unwrap_or(0);
        let structure_edited = matches!(
            resource.structure.state,
            ResourceState::Changed | ResourceState::Deleted
        );
        return Ok(PublishedVersions {
            structure_version: structure_version + u32::from(structure_edited),
            resource_version: resource_version.max(recorded) + 1,
            content_bumped: true,
        });
    }
    Ok(PublishedVersions {
        structure_version: structure_version + u32::from(structure_pending),
        resource_version,
        content_bumped: false,
    })
}

/// Publication metadata stamped on a history entry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Publication {
    pub tag: PublishTag,
    pub user: UserId,
    pub date: DateTime<Utc>,
}

/// Snapshot of `resource` as it is published.
pub(crate) fn snapshot(
    resource: &Resource,
    versions: PublishedVersions,
    publication: Publication,
    contents: &[u8],
    properties: Vec<Property>,
    deleted: bool,
) -> HistoryEntry {
    HistoryEntry {
        structure_id: resource.structure_id(),
        content_id: resource.content_id(),
        path: resource.path().to_string(),
        resource_type: resource.resource_type(),
        flags: resource.flags(),
        state: resource.state(),
        deleted,
        structure_version: versions.structure_version,
        resource_version: versions.resource_version,
        publish_tag: publication.tag,
        content_hash: content_hash(contents),
        length: contents.len() as u64,
        date_last_modified: resource.date_last_modified(),
        user_last_modified: resource.user_last_modified(),
        date_content: resource.content.date_content,
        date_released: resource.structure.date_released,
        date_expired: resource.structure.date_expired,
        date_published: publication.date,
        user_published: publication.user,
        project: resource
            .project_last_modified()
            .unwrap_or(ProjectId::ONLINE),
        properties,
    }
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Published versions of a structure, newest first.
///
/// Walks the history of the content identity one publish tag at a time.
/// At a tag where the structure has its own entry, that entry is listed.
/// At a tag where only siblings were published, the sibling entry is
/// listed in this structure's name if it raised the resource version: it
/// carries the structure id, path and last known structure version of the
/// structure being listed.
pub fn list_versions(
    store: &dyn ResourceStore,
    structure_id: StructureId,
    content_id: ContentId,
    path: &str,
) -> Result<Vec<HistoryEntry>, StorageError> {
    let mut by_tag: BTreeMap<PublishTag, Vec<HistoryEntry>> = BTreeMap::new();
    for entry in store.read_history_by_content(content_id)? {
        by_tag.entry(entry.publish_tag).or_default().push(entry);
    }

    let mut structure_version = 0;
    let mut resource_version = 0;
    let mut versions = Vec::new();
    for (_, entries) in by_tag {
        if let Some(own) = entries.iter().find(|e| e.structure_id == structure_id) {
            structure_version = own.structure_version;
            resource_version = resource_version.max(own.resource_version);
            versions.push(own.clone());
            continue;
        }
        let Some(newest) = entries.into_iter().max_by_key(|e| e.resource_version) else {
            continue;
        };
        if newest.resource_version <= resource_version {
            continue;
        }
        resource_version = newest.resource_version;
        versions.push(HistoryEntry {
            structure_id,
            path: path.to_string(),
            structure_version,
            ..newest
        });
    }
    versions.reverse();
    Ok(versions)
}

/// Published versions of a structure that may no longer be live.
///
/// Uses the offline resource when it exists, otherwise the structure's most
/// recent history entry. `None` if the structure id is unknown to both.
pub fn versions_for_structure(
    store: &dyn ResourceStore,
    structure_id: StructureId,
) -> Result<Option<Vec<HistoryEntry>>, StorageError> {
    if let Some(resource) = store.read_resource(View::Offline, structure_id)? {
        return list_versions(
            store,
            structure_id,
            resource.content_id(),
            resource.path(),
        )
        .map(Some);
    }
    match store.read_history_by_structure(structure_id)?.pop() {
        Some(latest) => {
            list_versions(store, structure_id, latest.content_id, &latest.path).map(Some)
        }
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneLimits {
    /// Publish tags kept per content identity that still has a live structure.
    pub keep_versions: usize,
    /// Publish tags kept per content identity with no live structure left.
    pub keep_deleted_versions: usize,
    /// Entries of deleted chains published before this instant are dropped
    /// regardless of the keep-count.
    pub max_age: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub entries_removed: usize,
    pub blobs_removed: usize,
}

/// Prunes the history of `content_ids` (every content identity with history
/// when `None`), then drops unreferenced history blobs.
///
/// The newest own entry of every live structure is always kept, so a live
/// sibling's structure version can still be reconstructed.
pub fn prune(
    store: &mut dyn ResourceStore,
    limits: PruneLimits,
    content_ids: Option<Vec<ContentId>>,
) -> Result<PruneStats, StorageError> {
    let content_ids = match content_ids {
        Some(ids) => ids,
        None => store.read_history_content_ids()?,
    };
    let mut stats = PruneStats::default();
    for content_id in content_ids {
        let entries = store.read_history_by_content(content_id)?;
        if entries.is_empty() {
            continue;
        }
        let live = store.read_siblings(View::Offline, content_id)?;
        let deleted_chain = live.is_empty();
        let keep = if deleted_chain {
            limits.keep_deleted_versions
        } else {
            limits.keep_versions
        };

        let mut tags: Vec<PublishTag> = entries.iter().map(|e| e.publish_tag).collect();
        tags.dedup();
        let expired: HashSet<PublishTag> = tags[..tags.len().saturating_sub(keep)]
            .iter()
            .copied()
            .collect();

        let protected: HashSet<(StructureId, PublishTag)> = live
            .iter()
            .filter_map(|resource| {
                entries
                    .iter()
                    .filter(|e| e.structure_id == resource.structure_id())
                    .map(|e| e.publish_tag)
                    .max()
                    .map(|tag| (resource.structure_id(), tag))
            })
            .collect();

        for entry in &entries {
            let too_old = deleted_chain
                && limits
                    .max_age
                    .is_some_and(|cutoff| entry.date_published < cutoff);
            if !(expired.contains(&entry.publish_tag) || too_old) {
                continue;
            }
            if protected.contains(&(entry.structure_id, entry.publish_tag)) {
                continue;
            }
            store.delete_history_entry(entry.structure_id, entry.publish_tag)?;
            stats.entries_removed += 1;
        }
    }
    stats.blobs_removed = store.delete_unreferenced_history_contents()?;
    if stats.entries_removed > 0 {
        tracing::debug!(
            entries = stats.entries_removed,
            blobs = stats.blobs_removed,
            "history pruned"
        );
    }
    Ok(stats)
}
