//! Lock operations on resources.

use folio_core::UserId;
use folio_storage::View;

use crate::collaborators::Permission;
use crate::concurrency::{Lock, LockRecord, LockTarget};
use crate::context::RequestContext;
use crate::error::RepositoryError;

use super::{ensure_writable, resolve, sibling_targets, Repository, ResourceFilter};

impl Repository {
    /// Locks a resource for the caller.
    ///
    /// Siblings read as `SHARED_EXCLUSIVE`; locking a folder gives every
    /// resource below it an inherited lock.
    pub fn lock_resource(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
    ) -> Result<Lock, RepositoryError> {
        ensure_writable(ctx)?;
        self.inner.read(|store| {
            let resource = resolve(store, View::Offline, raw_path, ResourceFilter::All)?;
            self.inner.require(ctx, &resource, Permission::Write)?;
            let siblings = sibling_targets(store, &resource)?;
            let lock = self.inner.locks.lock(
                &LockTarget::of(&resource),
                &siblings,
                ctx.user,
                ctx.project,
            )?;
            Ok(lock)
        })
    }

    /// Releases the caller's lock on a resource (or on the sibling holding
    /// it). Inherited locks are released by unlocking the folder.
    pub fn unlock_resource(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
    ) -> Result<(), RepositoryError> {
        ensure_writable(ctx)?;
        self.inner.read(|store| {
            let resource = resolve(store, View::Offline, raw_path, ResourceFilter::All)?;
            let siblings = sibling_targets(store, &resource)?;
            self.inner
                .locks
                .unlock(&LockTarget::of(&resource), &siblings, ctx.user)?;
            Ok(())
        })
    }

    /// Takes over the lock of a resource, whoever holds it. Requires write
    /// permission on the resource.
    pub fn change_lock(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
    ) -> Result<Lock, RepositoryError> {
        ensure_writable(ctx)?;
        self.inner.read(|store| {
            let resource = resolve(store, View::Offline, raw_path, ResourceFilter::All)?;
            self.inner.require(ctx, &resource, Permission::Write)?;
            let siblings = sibling_targets(store, &resource)?;
            let lock = self.inner.locks.change_lock(
                &LockTarget::of(&resource),
                &siblings,
                ctx.user,
                ctx.project,
            )?;
            tracing::info!(path = %resource.path(), user = %ctx.user, "lock taken over");
            Ok(lock)
        })
    }

    pub fn get_lock(&self, ctx: &RequestContext, raw_path: &str) -> Result<Lock, RepositoryError> {
        self.inner.read(|store| {
            let resource = resolve(store, View::Offline, raw_path, ResourceFilter::All)?;
            self.inner.require(ctx, &resource, Permission::Read)?;
            Ok(self.inner.locks.get_lock(&LockTarget::of(&resource)))
        })
    }

    /// Direct locks, optionally only those of one user, ordered by path.
    pub fn read_locks(&self, owner: Option<UserId>) -> Vec<LockRecord> {
        match owner {
            Some(user) => self.inner.locks.records_of(user),
            None => self.inner.locks.records(),
        }
    }
}
