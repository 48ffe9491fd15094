//! The publish surface: building and validating publish lists, submitting
//! them to the queue, and controlling the worker.

use std::collections::BTreeMap;

use folio_core::{BrokenRelation, PublishJobId, Resource};
use folio_storage::View;

use crate::context::RequestContext;
use crate::error::RepositoryError;
use crate::publish::list::{self, ListBuilder};
use crate::publish::{PublishJob, PublishList, PublishOptions, PublishReport};
use crate::relations;

use super::{ensure_project, ensure_writable, resolve, Repository, ResourceFilter};

impl Repository {
    /// The publish list a direct publish of `paths` would run.
    ///
    /// Fails with `ParentNotPublished` if a requested resource sits below a
    /// NEW folder that is not requested as well.
    pub fn get_publish_list(
        &self,
        ctx: &RequestContext,
        paths: &[&str],
        options: PublishOptions,
    ) -> Result<PublishList, RepositoryError> {
        ensure_writable(ctx)?;
        self.inner.read(|store| {
            ensure_project(store, ctx)?;
            let roots = paths
                .iter()
                .map(|raw| resolve(store, View::Offline, raw, ResourceFilter::All))
                .collect::<Result<Vec<Resource>, _>>()?;
            let mut builder = ListBuilder::new(store, &self.inner.locks, ctx, options);
            builder.add_direct(&roots)?;
            Ok(builder.finish(PublishJobId::new(), true)?)
        })
    }

    /// The publish list of every pending change in the caller's project.
    pub fn get_publish_list_all(
        &self,
        ctx: &RequestContext,
    ) -> Result<PublishList, RepositoryError> {
        ensure_writable(ctx)?;
        self.inner.read(|store| {
            ensure_project(store, ctx)?;
            let mut builder =
                ListBuilder::new(store, &self.inner.locks, ctx, PublishOptions::default());
            builder.add_project()?;
            Ok(builder.finish(PublishJobId::new(), false)?)
        })
    }

    /// Pending resources outside `list` whose relations point at its
    /// members.
    pub fn related_resources(
        &self,
        ctx: &RequestContext,
        list: &PublishList,
    ) -> Result<PublishList, RepositoryError> {
        self.inner.read(|store| {
            let mut builder = ListBuilder::new(store, &self.inner.locks, ctx, list.options);
            builder.add_related(list)?;
            Ok(builder.finish(PublishJobId::new(), false)?)
        })
    }

    /// Pending resources the members of `list` link to that are not in it.
    pub fn linked_resources(
        &self,
        ctx: &RequestContext,
        list: &PublishList,
    ) -> Result<PublishList, RepositoryError> {
        self.inner.read(|store| {
            let mut builder = ListBuilder::new(store, &self.inner.locks, ctx, list.options);
            builder.add_linked(list)?;
            Ok(builder.finish(PublishJobId::new(), false)?)
        })
    }

    pub fn merge_publish_lists(
        &self,
        ctx: &RequestContext,
        first: &PublishList,
        second: &PublishList,
    ) -> Result<PublishList, RepositoryError> {
        self.inner
            .read(|store| list::merge(store, &self.inner.locks, ctx, first, second))
    }

    /// Links that publishing `list` would leave broken, keyed by the path
    /// of the linking resource.
    pub fn validate_relations(
        &self,
        list: &PublishList,
    ) -> Result<BTreeMap<String, Vec<BrokenRelation>>, RepositoryError> {
        self.inner
            .read(|store| Ok(relations::validate(store, list)?))
    }

    /// Queues a publish job for `list` and returns its id.
    ///
    /// Every resource of the list gets a publish lock right away, so later
    /// requests see it as claimed; the job itself runs when the worker
    /// reaches it.
    pub fn publish_list(
        &self,
        ctx: &RequestContext,
        mut list: PublishList,
    ) -> Result<PublishJobId, RepositoryError> {
        ensure_writable(ctx)?;
        if list.project != ctx.project {
            return Err(RepositoryError::DataConsistency(format!(
                "publish list belongs to project {}, not {}",
                list.project, ctx.project
            )));
        }
        list.id = PublishJobId::new();
        list.user = ctx.user;

        let mut acquired = Vec::new();
        for entry in list.entries() {
            let result = self.inner.locks.acquire_publish(
                &entry.lock_target(),
                ctx.user,
                ctx.project,
                list.id,
            );
            if let Err(err) = result {
                for id in acquired {
                    self.inner.locks.release_publish(id, true);
                }
                return Err(err.into());
            }
            acquired.push(entry.structure_id);
        }

        let job = PublishJob::new(list, self.inner.next_sequence());
        if let Err(err) = self.inner.persist_job(&job) {
            for id in acquired {
                self.inner.locks.release_publish(id, true);
            }
            return Err(err);
        }
        let id = job.id;
        self.queue.enqueue(job);
        Ok(id)
    }

    /// Builds and queues a direct publish of `paths`.
    pub fn publish_resources(
        &self,
        ctx: &RequestContext,
        paths: &[&str],
        options: PublishOptions,
    ) -> Result<PublishJobId, RepositoryError> {
        let list = self.get_publish_list(ctx, paths, options)?;
        self.publish_list(ctx, list)
    }

    /// Builds and queues a publish of the caller's whole project.
    pub fn publish_project(&self, ctx: &RequestContext) -> Result<PublishJobId, RepositoryError> {
        let list = self.get_publish_list_all(ctx)?;
        self.publish_list(ctx, list)
    }

    // -------------------------------------------------------------------
    // Queue
    // -------------------------------------------------------------------

    /// The running job (if any) followed by the queued jobs.
    pub fn get_publish_queue(&self) -> Vec<PublishJob> {
        self.queue.snapshot()
    }

    /// Finished jobs, newest first.
    pub fn get_publish_history(&self) -> Vec<PublishJob> {
        self.queue.history()
    }

    pub fn get_publish_report(&self, id: PublishJobId) -> Result<PublishReport, RepositoryError> {
        self.queue
            .find(id)
            .and_then(|job| job.report)
            .ok_or_else(|| RepositoryError::not_found(format!("report of publish job {}", id)))
    }

    /// Waits until the queue is drained. Returns right away when the
    /// worker is stopped, even if jobs are queued.
    pub async fn wait_while_running(&self) {
        self.queue.wait_idle().await;
    }

    /// Stops the worker after the job it is running; queued jobs stay.
    pub fn stop_publishing(&self) {
        self.queue.pause();
    }

    pub fn start_publishing(&self) {
        self.queue.resume();
    }

    pub fn is_publishing_paused(&self) -> bool {
        self.queue.is_paused()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::LockType;
    use crate::publish::ResourceOutcome;
    use folio_core::{PublishJobState, ResourceType, UserId};

    async fn setup() -> (Repository, RequestContext) {
        let repo = Repository::in_memory().unwrap();
        let user = UserId::new();
        let project = repo
            .create_project(&RequestContext::online(user), "Work", "")
            .unwrap();
        (repo, RequestContext::new(user, project.id))
    }

    #[tokio::test]
    async fn test_publish_moves_resource_online() {
        let (repo, ctx) = setup().await;
        repo.create_resource(&ctx, "/a.txt", ResourceType::Plain, Some(b"hello"), &[])
            .unwrap();
        let id = repo
            .publish_resources(&ctx, &["/a.txt"], PublishOptions::default())
            .unwrap();
        repo.wait_while_running().await;

        let online = RequestContext::online(ctx.user);
        let file = repo
            .read_file(&online, "/a.txt", ResourceFilter::Default)
            .unwrap();
        assert_eq!(file.contents, b"hello");
        assert!(file.resource.state().is_unchanged());

        let report = repo.get_publish_report(id).unwrap();
        assert_eq!(report.published(), 1);
        assert_eq!(report.lines[0].outcome, ResourceOutcome::Published);
        assert!(repo
            .get_lock(&ctx, "/a.txt")
            .unwrap()
            .lock_type
            .is_unlocked());
        assert!(matches!(
            repo.get_publish_history()[0].state,
            PublishJobState::Finished(_)
        ));
    }

    #[tokio::test]
    async fn test_queued_resources_carry_publish_lock() {
        let (repo, ctx) = setup().await;
        repo.stop_publishing();
        repo.create_resource(&ctx, "/a.txt", ResourceType::Plain, None, &[])
            .unwrap();
        repo.publish_resources(&ctx, &["/a.txt"], PublishOptions::default())
            .unwrap();
        assert_eq!(
            repo.get_lock(&ctx, "/a.txt").unwrap().lock_type,
            LockType::Publish
        );
        let err = repo.write_file(&ctx, "/a.txt", b"x").unwrap_err();
        assert!(matches!(err, RepositoryError::LockConflict(_)));
        assert_eq!(repo.get_publish_queue().len(), 1);

        repo.start_publishing();
        repo.wait_while_running().await;
        assert!(repo.get_publish_queue().is_empty());
    }

    #[tokio::test]
    async fn test_keep_locks_restores_exclusive_lock() {
        let (repo, ctx) = setup().await;
        repo.create_resource(&ctx, "/a.txt", ResourceType::Plain, None, &[])
            .unwrap();
        let options = PublishOptions {
            keep_locks: true,
            ..Default::default()
        };
        repo.publish_resources(&ctx, &["/a.txt"], options).unwrap();
        repo.wait_while_running().await;
        let lock = repo.get_lock(&ctx, "/a.txt").unwrap();
        assert_eq!(lock.lock_type, LockType::Exclusive);
        assert_eq!(lock.owner, Some(ctx.user));
    }

    #[tokio::test]
    async fn test_list_of_another_project_is_rejected() {
        let (repo, ctx) = setup().await;
        let other = repo
            .create_project(&RequestContext::online(ctx.user), "Other", "")
            .unwrap();
        repo.create_resource(&ctx, "/a.txt", ResourceType::Plain, None, &[])
            .unwrap();
        let list = repo
            .get_publish_list(&ctx, &["/a.txt"], PublishOptions::default())
            .unwrap();
        let err = repo
            .publish_list(&RequestContext::new(ctx.user, other.id), list)
            .unwrap_err();
        assert!(matches!(err, RepositoryError::DataConsistency(_)));
        assert!(matches!(
            repo.get_publish_report(PublishJobId::new()),
            Err(RepositoryError::NotFound(_))
        ));
    }
}
