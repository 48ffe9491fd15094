//! Resource lock manager.
//!
//! [`LockManager`] stores only *direct* locks: one [`LockRecord`] per locked
//! structure, either a user's exclusive lock or the publish lock of a queued
//! job. Every other lock type is derived on query from the direct locks
//! around a resource:
//!
//! - an exclusive lock on an ancestor folder confers `INHERITED`,
//! - an exclusive lock on a sibling (same content id) confers
//!   `SHARED_EXCLUSIVE`,
//! - both at once give `SHARED_INHERITED`,
//! - a publish lock on a sibling reads as `PUBLISH` with the sibling named.
//!
//! Because nothing derived is stored, releasing a folder or sibling lock
//! reverts the derived locks of every affected resource at once.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use folio_core::path;
use folio_core::{ContentId, ProjectId, PublishJobId, Resource, StructureId, UserId};

/// Lock type of a resource as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockType {
    Unlocked,
    /// Direct write lock.
    Exclusive,
    /// A sibling holds the exclusive lock.
    SharedExclusive,
    /// An ancestor folder holds the exclusive lock.
    Inherited,
    /// An ancestor folder and a sibling both hold exclusive locks.
    SharedInherited,
    /// The resource, or a sibling sharing its content, belongs to a queued
    /// or running publish job.
    Publish,
}

impl LockType {
    pub fn is_unlocked(self) -> bool {
        self == LockType::Unlocked
    }

    pub fn is_shared(self) -> bool {
        matches!(self, LockType::SharedExclusive | LockType::SharedInherited)
    }
}

/// Kind of a stored (direct) lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LockKind {
    Exclusive,
    Publish,
}

/// A direct lock held on one structure.
#[derive(Debug, Clone, Serialize)]
pub struct LockRecord {
    pub structure_id: StructureId,
    pub content_id: ContentId,
    pub path: String,
    pub owner: UserId,
    pub project: ProjectId,
    pub kind: LockKind,
    /// Job holding a publish lock.
    pub job: Option<PublishJobId>,
    pub acquired_at: DateTime<Utc>,
    /// Exclusive lock displaced by a publish lock, restored on release.
    pub previous: Option<Box<LockRecord>>,
}

/// The lock state of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lock {
    pub lock_type: LockType,
    /// User whose lock applies; for shared types, the sibling's owner.
    pub owner: Option<UserId>,
    pub project: Option<ProjectId>,
    pub path: String,
    /// Folder conferring an inherited lock.
    pub folder: Option<String>,
    /// Sibling conferring a shared or publish lock.
    pub sibling: Option<String>,
}

impl Lock {
    fn unlocked(path: &str) -> Self {
        Lock {
            lock_type: LockType::Unlocked,
            owner: None,
            project: None,
            path: path.to_string(),
            folder: None,
            sibling: None,
        }
    }

    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner == Some(user)
    }
}

/// The identity of a resource as far as locking is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTarget {
    pub structure_id: StructureId,
    pub content_id: ContentId,
    pub path: String,
}

impl LockTarget {
    pub fn of(resource: &Resource) -> Self {
        LockTarget {
            structure_id: resource.structure_id(),
            content_id: resource.content_id(),
            path: resource.path().to_string(),
        }
    }
}

/// Errors from lock operations.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another user's lock applies.
    #[error("{path} is locked by user {owner}")]
    Conflict { path: String, owner: UserId },

    /// The resource is part of a queued or running publish job.
    #[error("{path} is locked for publishing")]
    Publishing { path: String },

    /// The lock comes from a folder lock and cannot be changed on the
    /// resource itself.
    #[error("{path} is locked through folder {folder}")]
    Inherited { path: String, folder: String },

    /// The caller does not hold a write lock on the resource.
    #[error("{path} is not locked by the current user")]
    NotHeld { path: String },
}

/// In-memory lock table.
///
/// Uses `DashMap` for concurrent queries; operations that touch several
/// records at once are serialized by an internal mutex.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: DashMap<StructureId, LockRecord>,
    write_guard: Mutex<()>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.write_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn direct(&self, id: StructureId) -> Option<LockRecord> {
        self.locks.get(&id).map(|entry| entry.value().clone())
    }

    /// Nearest ancestor folder holding an exclusive lock.
    fn folder_lock_for(&self, target_path: &str) -> Option<LockRecord> {
        self.locks
            .iter()
            .filter(|entry| {
                entry.kind == LockKind::Exclusive && path::is_descendant(target_path, &entry.path)
            })
            .max_by_key(|entry| entry.path.len())
            .map(|entry| entry.value().clone())
    }

    /// Exclusive lock held on another structure sharing the content.
    fn sibling_lock_for(&self, target: &LockTarget) -> Option<LockRecord> {
        self.locks
            .iter()
            .find(|entry| {
                entry.kind == LockKind::Exclusive
                    && entry.content_id == target.content_id
                    && entry.structure_id != target.structure_id
            })
            .map(|entry| entry.value().clone())
    }

    /// Publish lock held on another structure sharing the content.
    fn sibling_publish_for(&self, target: &LockTarget) -> Option<LockRecord> {
        self.locks
            .iter()
            .find(|entry| {
                entry.kind == LockKind::Publish
                    && entry.content_id == target.content_id
                    && entry.structure_id != target.structure_id
            })
            .map(|entry| entry.value().clone())
    }

    fn exclusive_record(
        &self,
        target: &LockTarget,
        user: UserId,
        project: ProjectId,
    ) -> LockRecord {
        LockRecord {
            structure_id: target.structure_id,
            content_id: target.content_id,
            path: target.path.clone(),
            owner: user,
            project,
            kind: LockKind::Exclusive,
            job: None,
            acquired_at: Utc::now(),
            previous: None,
        }
    }

    // -------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------

    /// Computes the lock of a resource.
    pub fn get_lock(&self, target: &LockTarget) -> Lock {
        if let Some(record) = self.direct(target.structure_id) {
            let lock_type = match record.kind {
                LockKind::Exclusive => LockType::Exclusive,
                LockKind::Publish => LockType::Publish,
            };
            return Lock {
                lock_type,
                owner: Some(record.owner),
                project: Some(record.project),
                path: target.path.clone(),
                folder: None,
                sibling: None,
            };
        }
        if let Some(publishing) = self.sibling_publish_for(target) {
            return Lock {
                lock_type: LockType::Publish,
                owner: Some(publishing.owner),
                project: Some(publishing.project),
                path: target.path.clone(),
                folder: None,
                sibling: Some(publishing.path),
            };
        }
        let folder = self.folder_lock_for(&target.path);
        let sibling = self.sibling_lock_for(target);
        match (folder, sibling) {
            (Some(folder), Some(sibling)) => Lock {
                lock_type: LockType::SharedInherited,
                owner: Some(sibling.owner),
                project: Some(sibling.project),
                path: target.path.clone(),
                folder: Some(folder.path),
                sibling: Some(sibling.path),
            },
            (Some(folder), None) => Lock {
                lock_type: LockType::Inherited,
                owner: Some(folder.owner),
                project: Some(folder.project),
                path: target.path.clone(),
                folder: Some(folder.path),
                sibling: None,
            },
            (None, Some(sibling)) => Lock {
                lock_type: LockType::SharedExclusive,
                owner: Some(sibling.owner),
                project: Some(sibling.project),
                path: target.path.clone(),
                folder: None,
                sibling: Some(sibling.path),
            },
            (None, None) => Lock::unlocked(&target.path),
        }
    }

    /// Succeeds if `user` may write the resource: an exclusive lock of
    /// their own, or an inherited lock from their own folder lock.
    pub fn check_write(&self, target: &LockTarget, user: UserId) -> Result<(), LockError> {
        let lock = self.get_lock(target);
        match lock.lock_type {
            LockType::Exclusive | LockType::Inherited if lock.is_owned_by(user) => Ok(()),
            LockType::Publish => Err(LockError::Publishing {
                path: target.path.clone(),
            }),
            LockType::Unlocked => Err(LockError::NotHeld {
                path: target.path.clone(),
            }),
            _ => match lock.owner {
                Some(owner) if owner != user => Err(LockError::Conflict {
                    path: target.path.clone(),
                    owner,
                }),
                _ => Err(LockError::NotHeld {
                    path: target.path.clone(),
                }),
            },
        }
    }

    /// Snapshot of every direct lock, ordered by path.
    pub fn records(&self) -> Vec<LockRecord> {
        let mut records: Vec<LockRecord> =
            self.locks.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }

    /// Direct locks held by `user`, ordered by path.
    pub fn records_of(&self, user: UserId) -> Vec<LockRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.owner == user)
            .collect()
    }

    // -------------------------------------------------------------------
    // User locks
    // -------------------------------------------------------------------

    /// Locks a resource for `user`.
    ///
    /// `siblings` are the other structures sharing the content. If the user
    /// already holds the lock on a sibling it moves to this resource; a
    /// sibling locked by anyone else is a conflict. Locking a folder fails
    /// while another user or a publish job holds a lock below it.
    pub fn lock(
        &self,
        target: &LockTarget,
        siblings: &[LockTarget],
        user: UserId,
        project: ProjectId,
    ) -> Result<Lock, LockError> {
        let _guard = self.guard();
        if let Some(record) = self.direct(target.structure_id) {
            return match record.kind {
                LockKind::Publish => Err(LockError::Publishing {
                    path: target.path.clone(),
                }),
                LockKind::Exclusive if record.owner == user => {
                    if let Some(mut entry) = self.locks.get_mut(&target.structure_id) {
                        entry.project = project;
                    }
                    Ok(self.get_lock(target))
                }
                LockKind::Exclusive => Err(LockError::Conflict {
                    path: target.path.clone(),
                    owner: record.owner,
                }),
            };
        }

        let own_folder = match self.folder_lock_for(&target.path) {
            Some(folder) if folder.owner != user => {
                return Err(LockError::Conflict {
                    path: target.path.clone(),
                    owner: folder.owner,
                })
            }
            Some(_) => true,
            None => false,
        };

        let mut transfer = Vec::new();
        for sibling in siblings
            .iter()
            .filter(|s| s.structure_id != target.structure_id)
        {
            if let Some(record) = self.direct(sibling.structure_id) {
                match record.kind {
                    LockKind::Publish => {
                        return Err(LockError::Publishing {
                            path: sibling.path.clone(),
                        })
                    }
                    LockKind::Exclusive if record.owner != user => {
                        return Err(LockError::Conflict {
                            path: sibling.path.clone(),
                            owner: record.owner,
                        })
                    }
                    LockKind::Exclusive => transfer.push(sibling.structure_id),
                }
            }
            if let Some(folder) = self.folder_lock_for(&sibling.path) {
                if folder.owner != user {
                    return Err(LockError::Conflict {
                        path: sibling.path.clone(),
                        owner: folder.owner,
                    });
                }
            }
        }

        if path::is_folder_path(&target.path) {
            for record in self.records() {
                if !path::is_descendant(&record.path, &target.path) {
                    continue;
                }
                if record.kind == LockKind::Publish {
                    return Err(LockError::Publishing { path: record.path });
                }
                if record.owner != user {
                    return Err(LockError::Conflict {
                        path: record.path,
                        owner: record.owner,
                    });
                }
            }
        }

        for id in transfer {
            self.locks.remove(&id);
        }
        if !own_folder {
            self.locks
                .insert(target.structure_id, self.exclusive_record(target, user, project));
        }
        tracing::debug!(path = %target.path, user = %user, "lock granted");
        Ok(self.get_lock(target))
    }

    /// Releases the caller's lock on a resource. Inherited locks cannot be
    /// released on the resource itself.
    pub fn unlock(
        &self,
        target: &LockTarget,
        siblings: &[LockTarget],
        user: UserId,
    ) -> Result<(), LockError> {
        let _guard = self.guard();
        if let Some(record) = self.direct(target.structure_id) {
            return match record.kind {
                LockKind::Publish => Err(LockError::Publishing {
                    path: target.path.clone(),
                }),
                LockKind::Exclusive if record.owner == user => {
                    self.locks.remove(&target.structure_id);
                    tracing::debug!(path = %target.path, user = %user, "lock released");
                    Ok(())
                }
                LockKind::Exclusive => Err(LockError::Conflict {
                    path: target.path.clone(),
                    owner: record.owner,
                }),
            };
        }
        if let Some(folder) = self.folder_lock_for(&target.path) {
            return Err(LockError::Inherited {
                path: target.path.clone(),
                folder: folder.path,
            });
        }
        for sibling in siblings {
            if let Some(record) = self.direct(sibling.structure_id) {
                if record.kind == LockKind::Exclusive {
                    if record.owner != user {
                        return Err(LockError::Conflict {
                            path: sibling.path.clone(),
                            owner: record.owner,
                        });
                    }
                    self.locks.remove(&sibling.structure_id);
                }
            }
        }
        Ok(())
    }

    /// Takes over the lock of a resource regardless of its owner.
    ///
    /// A lock conferred by another user's folder lock cannot be taken over
    /// through the resource; the folder itself must be stolen.
    pub fn change_lock(
        &self,
        target: &LockTarget,
        siblings: &[LockTarget],
        user: UserId,
        project: ProjectId,
    ) -> Result<Lock, LockError> {
        let _guard = self.guard();
        if let Some(record) = self.direct(target.structure_id) {
            if record.kind == LockKind::Publish {
                return Err(LockError::Publishing {
                    path: target.path.clone(),
                });
            }
            let previous_owner = record.owner;
            self.locks
                .insert(target.structure_id, self.exclusive_record(target, user, project));
            tracing::debug!(path = %target.path, from = %previous_owner, to = %user, "lock stolen");
            return Ok(self.get_lock(target));
        }

        let own_folder = match self.folder_lock_for(&target.path) {
            Some(folder) if folder.owner != user => {
                return Err(LockError::Inherited {
                    path: target.path.clone(),
                    folder: folder.path,
                })
            }
            Some(_) => true,
            None => false,
        };

        let mut stolen = Vec::new();
        for sibling in siblings
            .iter()
            .filter(|s| s.structure_id != target.structure_id)
        {
            if let Some(record) = self.direct(sibling.structure_id) {
                if record.kind == LockKind::Publish {
                    return Err(LockError::Publishing {
                        path: sibling.path.clone(),
                    });
                }
                stolen.push(sibling.structure_id);
            }
            if let Some(folder) = self.folder_lock_for(&sibling.path) {
                if folder.owner != user {
                    return Err(LockError::Inherited {
                        path: sibling.path.clone(),
                        folder: folder.path,
                    });
                }
            }
        }

        if path::is_folder_path(&target.path) {
            for record in self.records() {
                if !path::is_descendant(&record.path, &target.path) {
                    continue;
                }
                if record.kind == LockKind::Publish {
                    return Err(LockError::Publishing { path: record.path });
                }
                if record.owner != user {
                    stolen.push(record.structure_id);
                }
            }
        }

        for id in stolen {
            self.locks.remove(&id);
        }
        if !own_folder {
            self.locks
                .insert(target.structure_id, self.exclusive_record(target, user, project));
        }
        Ok(self.get_lock(target))
    }

    // -------------------------------------------------------------------
    // Bookkeeping for tree changes
    // -------------------------------------------------------------------

    /// Drops any direct lock of a structure (used when it is purged).
    pub fn remove(&self, id: StructureId) {
        let _guard = self.guard();
        self.locks.remove(&id);
    }

    /// Rewrites the paths of every direct lock at or below `old_prefix`.
    pub fn rebase(&self, old_prefix: &str, new_prefix: &str) {
        let _guard = self.guard();
        for mut entry in self.locks.iter_mut() {
            let rebased = if entry.path == old_prefix {
                Some(new_prefix.to_string())
            } else if path::is_folder_path(old_prefix) {
                path::rebase(&entry.path, old_prefix, new_prefix)
            } else {
                None
            };
            if let Some(new_path) = rebased {
                entry.path = new_path;
            }
        }
    }

    // -------------------------------------------------------------------
    // Publish locks
    // -------------------------------------------------------------------

    /// Marks a resource as part of a publish job. The user's own exclusive
    /// lock is kept aside and restored by [`release_publish`](Self::release_publish)
    /// on request.
    pub fn acquire_publish(
        &self,
        target: &LockTarget,
        user: UserId,
        project: ProjectId,
        job: PublishJobId,
    ) -> Result<(), LockError> {
        let _guard = self.guard();
        let previous = match self.direct(target.structure_id) {
            Some(record) if record.kind == LockKind::Publish => {
                return Err(LockError::Publishing {
                    path: target.path.clone(),
                })
            }
            Some(record) if record.owner != user => {
                return Err(LockError::Conflict {
                    path: target.path.clone(),
                    owner: record.owner,
                })
            }
            Some(record) => Some(Box::new(record)),
            None => None,
        };
        self.locks.insert(
            target.structure_id,
            LockRecord {
                structure_id: target.structure_id,
                content_id: target.content_id,
                path: target.path.clone(),
                owner: user,
                project,
                kind: LockKind::Publish,
                job: Some(job),
                acquired_at: Utc::now(),
                previous,
            },
        );
        Ok(())
    }

    /// Removes a publish lock; with `restore_previous` the displaced
    /// exclusive lock comes back.
    pub fn release_publish(&self, id: StructureId, restore_previous: bool) {
        let _guard = self.guard();
        let is_publish = self
            .locks
            .get(&id)
            .map(|entry| entry.kind == LockKind::Publish)
            .unwrap_or(false);
        if !is_publish {
            return;
        }
        if let Some((_, record)) = self.locks.remove(&id) {
            if restore_previous {
                if let Some(mut previous) = record.previous {
                    previous.path = record.path;
                    self.locks.insert(id, *previous);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(path: &str) -> LockTarget {
        LockTarget {
            structure_id: StructureId::new(),
            content_id: ContentId::new(),
            path: path.to_string(),
        }
    }

    fn sibling_of(other: &LockTarget, path: &str) -> LockTarget {
        LockTarget {
            structure_id: StructureId::new(),
            content_id: other.content_id,
            path: path.to_string(),
        }
    }

    #[test]
    fn test_lock_is_exclusive_and_idempotent() {
        let locks = LockManager::new();
        let (alice, bob, project) = (UserId::new(), UserId::new(), ProjectId::new());
        let file = target("/a.txt");
        let lock = locks.lock(&file, &[], alice, project).unwrap();
        assert_eq!(lock.lock_type, LockType::Exclusive);
        assert!(locks.lock(&file, &[], alice, project).is_ok());
        assert!(matches!(
            locks.lock(&file, &[], bob, project),
            Err(LockError::Conflict { .. })
        ));
        assert!(locks.check_write(&file, alice).is_ok());
        assert!(matches!(
            locks.check_write(&file, bob),
            Err(LockError::Conflict { .. })
        ));
    }

    #[test]
    fn test_siblings_share_the_lock() {
        let locks = LockManager::new();
        let (alice, bob, project) = (UserId::new(), UserId::new(), ProjectId::new());
        let a = target("/a");
        let b = sibling_of(&a, "/b");
        let family = vec![a.clone(), b.clone()];
        locks.lock(&a, &family, alice, project).unwrap();
        assert_eq!(locks.get_lock(&b).lock_type, LockType::SharedExclusive);
        assert!(matches!(
            locks.check_write(&b, alice),
            Err(LockError::NotHeld { .. })
        ));
        assert!(matches!(
            locks.lock(&b, &family, bob, project),
            Err(LockError::Conflict { .. })
        ));

        // Locking the sibling moves the lock.
        locks.lock(&b, &family, alice, project).unwrap();
        assert_eq!(locks.get_lock(&b).lock_type, LockType::Exclusive);
        assert_eq!(locks.get_lock(&a).lock_type, LockType::SharedExclusive);
    }

    #[test]
    fn test_folder_lock_confers_inherited_and_shared_inherited() {
        let locks = LockManager::new();
        let (alice, bob, project) = (UserId::new(), UserId::new(), ProjectId::new());
        let folder = target("/a/");
        let x = target("/a/x");
        let outside = target("/b/z");
        let y = sibling_of(&outside, "/a/y");
        let y_family = vec![outside.clone(), y.clone()];

        locks.lock(&outside, &y_family, bob, project).unwrap();
        assert_eq!(locks.get_lock(&y).lock_type, LockType::SharedExclusive);

        locks.lock(&folder, &[], alice, project).unwrap();
        assert_eq!(locks.get_lock(&x).lock_type, LockType::Inherited);
        assert_eq!(locks.get_lock(&y).lock_type, LockType::SharedInherited);
        assert_eq!(locks.get_lock(&outside).lock_type, LockType::Exclusive);
        assert!(locks.check_write(&x, alice).is_ok());

        locks.unlock(&folder, &[], alice).unwrap();
        assert_eq!(locks.get_lock(&x).lock_type, LockType::Unlocked);
        assert_eq!(locks.get_lock(&y).lock_type, LockType::SharedExclusive);
        assert_eq!(locks.get_lock(&outside).lock_type, LockType::Exclusive);
    }

    #[test]
    fn test_folder_lock_fails_over_foreign_descendant_lock() {
        let locks = LockManager::new();
        let (alice, bob, project) = (UserId::new(), UserId::new(), ProjectId::new());
        let folder = target("/a/");
        let child = target("/a/c");
        locks.lock(&child, &[], bob, project).unwrap();
        assert!(matches!(
            locks.lock(&folder, &[], alice, project),
            Err(LockError::Conflict { .. })
        ));
    }

    #[test]
    fn test_inherited_lock_cannot_be_released_or_stolen_per_resource() {
        let locks = LockManager::new();
        let (alice, bob, project) = (UserId::new(), UserId::new(), ProjectId::new());
        let folder = target("/a/");
        let child = target("/a/c");
        locks.lock(&folder, &[], alice, project).unwrap();
        assert!(matches!(
            locks.unlock(&child, &[], alice),
            Err(LockError::Inherited { .. })
        ));
        assert!(matches!(
            locks.change_lock(&child, &[], bob, project),
            Err(LockError::Inherited { .. })
        ));
        let stolen = locks.change_lock(&folder, &[], bob, project).unwrap();
        assert_eq!(stolen.owner, Some(bob));
        assert!(locks.check_write(&child, bob).is_ok());
    }

    #[test]
    fn test_publish_lock_blocks_and_restores() {
        let locks = LockManager::new();
        let (alice, project) = (UserId::new(), ProjectId::new());
        let file = target("/p");
        locks.lock(&file, &[], alice, project).unwrap();
        locks
            .acquire_publish(&file, alice, project, PublishJobId::new())
            .unwrap();
        assert_eq!(locks.get_lock(&file).lock_type, LockType::Publish);
        assert!(matches!(
            locks.check_write(&file, alice),
            Err(LockError::Publishing { .. })
        ));
        locks.release_publish(file.structure_id, true);
        assert_eq!(locks.get_lock(&file).lock_type, LockType::Exclusive);

        locks
            .acquire_publish(&file, alice, project, PublishJobId::new())
            .unwrap();
        locks.release_publish(file.structure_id, false);
        assert!(locks.get_lock(&file).lock_type.is_unlocked());
    }

    #[test]
    fn test_sibling_of_publish_locked_resource_reads_as_publishing() {
        let locks = LockManager::new();
        let (alice, bob, project) = (UserId::new(), UserId::new(), ProjectId::new());
        let a = target("/a");
        let b = sibling_of(&a, "/b");
        let family = vec![a.clone(), b.clone()];
        locks.lock(&a, &family, alice, project).unwrap();
        locks
            .acquire_publish(&a, alice, project, PublishJobId::new())
            .unwrap();

        let lock = locks.get_lock(&b);
        assert_eq!(lock.lock_type, LockType::Publish);
        assert_eq!(lock.sibling.as_deref(), Some("/a"));
        assert!(matches!(
            locks.check_write(&b, alice),
            Err(LockError::Publishing { .. })
        ));
        assert!(matches!(
            locks.lock(&b, &family, bob, project),
            Err(LockError::Publishing { .. })
        ));

        locks.release_publish(a.structure_id, false);
        assert!(locks.get_lock(&b).lock_type.is_unlocked());
    }

    #[test]
    fn test_rebase_moves_lock_paths() {
        let locks = LockManager::new();
        let (alice, project) = (UserId::new(), ProjectId::new());
        let folder = target("/a/");
        locks.lock(&folder, &[], alice, project).unwrap();
        locks.rebase("/a/", "/b/");
        assert_eq!(locks.records()[0].path, "/b/");
        let moved_child = target("/b/x");
        assert_eq!(locks.get_lock(&moved_child).lock_type, LockType::Inherited);
    }
}
