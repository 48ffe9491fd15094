//! Executes publish jobs against the store.
//!
//! Each resource of a job is published in its own store transaction, so a
//! failure leaves that resource in its pre-publish state without undoing
//! the resources already published by the job.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use folio_core::{
    ContentId, PublishJobState, PublishOutcome, Resource, ResourceState,
};
use folio_storage::{PropertyMap, ResourceStore, View};

use crate::collaborators::Permission;
use crate::context::RequestContext;
use crate::error::RepositoryError;
use crate::ledger::{self, PublishedVersions, Publication};
use crate::relations;
use crate::repository::{merge_properties, RepositoryInner};

use super::list::PublishListEntry;
use super::queue::{PublishExecutor, PublishJob};
use super::report::{PublishReport, ResourceOutcome};

pub(crate) struct PublishEngine {
    inner: Arc<RepositoryInner>,
}

/// Per-job bookkeeping.
struct JobRun {
    publication: Publication,
    ctx: RequestContext,
    keep_locks: bool,
    /// Content identities whose content change this job already published.
    content_published: HashSet<ContentId>,
    /// Content identities the job wrote history for.
    touched: HashSet<ContentId>,
    report: PublishReport,
}

impl PublishEngine {
    pub(crate) fn new(inner: Arc<RepositoryInner>) -> Self {
        PublishEngine { inner }
    }

    fn publish_entry(&self, run: &mut JobRun, entry: &PublishListEntry) {
        let result = self.inner.transaction(|store| {
            publish_one(&self.inner, store, run, entry)
        });
        match result {
            Ok((outcome, bumped)) => {
                if let Some(content_id) = bumped {
                    run.content_published.insert(content_id);
                }
                match &outcome {
                    ResourceOutcome::Published => {
                        run.touched.insert(entry.content_id);
                        self.inner
                            .locks
                            .release_publish(entry.structure_id, run.keep_locks);
                    }
                    ResourceOutcome::Deleted => {
                        run.touched.insert(entry.content_id);
                        self.inner.locks.release_publish(entry.structure_id, false);
                        self.inner.locks.remove(entry.structure_id);
                    }
                    ResourceOutcome::Skipped(_) | ResourceOutcome::Failed(_) => {
                        self.inner.locks.release_publish(entry.structure_id, true);
                    }
                }
                run.report.record(entry.path.clone(), outcome);
            }
            Err(err) => {
                tracing::warn!(path = %entry.path, error = %err, "resource not published");
                self.inner.locks.release_publish(entry.structure_id, true);
                run.report
                    .record(entry.path.clone(), ResourceOutcome::Failed(err.to_string()));
            }
        }
    }

    /// Deleted folders whose offline subtree holds nothing but other
    /// deleted folders of the list; they can go before anything else.
    fn split_deleted_folders<'a>(
        &self,
        entries: &'a [PublishListEntry],
    ) -> (Vec<&'a PublishListEntry>, Vec<&'a PublishListEntry>) {
        let listed: HashSet<_> = entries.iter().map(|e| e.structure_id).collect();
        let mut early = Vec::new();
        let mut late = Vec::new();
        for entry in entries {
            let empty = self
                .inner
                .read(|store| {
                    Ok(store
                        .read_subtree(View::Offline, &entry.path, true)?
                        .iter()
                        .all(|r| r.is_folder() && listed.contains(&r.structure_id())))
                })
                .unwrap_or(false);
            if empty {
                early.push(entry);
            } else {
                late.push(entry);
            }
        }
        (early, late)
    }
}

/// Publishes one resource inside the caller's transaction. Returns the
/// outcome and the content identity whose content change it published.
fn publish_one(
    inner: &RepositoryInner,
    store: &mut dyn ResourceStore,
    run: &JobRun,
    entry: &PublishListEntry,
) -> Result<(ResourceOutcome, Option<ContentId>), RepositoryError> {
    let Some(resource) = store.read_resource(View::Offline, entry.structure_id)? else {
        return Ok((ResourceOutcome::Skipped("no longer exists".to_string()), None));
    };
    if resource.state().is_unchanged() {
        return Ok((ResourceOutcome::Skipped("unchanged".to_string()), None));
    }
    inner.require(&run.ctx, &resource, Permission::Publish)?;
    let deleted = resource.state().is_deleted();
    if deleted && resource.is_folder() {
        let remaining = store.read_subtree(View::Offline, resource.path(), true)?;
        if !remaining.is_empty() {
            return Err(RepositoryError::DataConsistency(format!(
                "folder {} still contains {} resources",
                resource.path(),
                remaining.len()
            )));
        }
    }

    let versions = ledger::next_versions(&*store, &resource, &run.content_published)?;
    let bytes = store
        .read_content(View::Offline, resource.content_id())?
        .unwrap_or_default();
    let structure_props = store.read_structure_properties(View::Offline, resource.structure_id())?;
    let resource_props = store.read_resource_properties(View::Offline, resource.content_id())?;

    let entry = ledger::snapshot(
        &resource,
        versions,
        run.publication,
        &bytes,
        merge_properties(&structure_props, &resource_props),
        deleted,
    );
    store.write_history_content(&entry.content_hash, &bytes)?;
    store.write_history_entry(&entry)?;

    let published = Published {
        resource: &resource,
        versions,
        bytes: &bytes,
        structure_props: &structure_props,
        resource_props: &resource_props,
    };
    let outcome = if deleted {
        publish_deletion(store, &published)?;
        ResourceOutcome::Deleted
    } else {
        publish_live(store, &published)?;
        ResourceOutcome::Published
    };
    tracing::debug!(
        path = %resource.path(),
        version = versions.structure_version + versions.resource_version,
        "resource published"
    );
    Ok((outcome, versions.content_bumped.then_some(resource.content_id())))
}

struct Published<'a> {
    resource: &'a Resource,
    versions: PublishedVersions,
    bytes: &'a [u8],
    structure_props: &'a PropertyMap,
    resource_props: &'a PropertyMap,
}

impl Published<'_> {
    fn structure(&self) -> folio_core::StructureAspect {
        let mut structure = self.resource.structure.clone();
        structure.state = ResourceState::Unchanged;
        structure.project_last_modified = None;
        structure.structure_version = self.versions.structure_version;
        structure
    }

    fn content(&self) -> folio_core::ContentAspect {
        let mut content = self.resource.content.clone();
        content.state = ResourceState::Unchanged;
        content.project_last_modified = None;
        content.resource_version = self.versions.resource_version;
        content
    }

    /// Writes the shared content to both views.
    fn write_content(&self, store: &mut dyn ResourceStore) -> Result<(), RepositoryError> {
        let content = self.content();
        let id = content.content_id;
        store.write_content_aspect(View::Offline, &content)?;
        store.write_content_aspect(View::Online, &content)?;
        store.write_content(View::Online, id, self.bytes)?;
        store.replace_resource_properties(View::Online, id, self.resource_props)?;
        Ok(())
    }
}

fn publish_live(
    store: &mut dyn ResourceStore,
    published: &Published<'_>,
) -> Result<(), RepositoryError> {
    let resource = published.resource;
    let structure = published.structure();
    if let Some(occupant) = store.read_resource_by_path(View::Online, &structure.path)? {
        if occupant.structure_id() != structure.structure_id {
            return Err(RepositoryError::DataConsistency(format!(
                "{} is still occupied online by an unpublished move or deletion",
                structure.path
            )));
        }
    }

    published.write_content(store)?;
    store.write_structure(View::Online, &structure)?;
    store.replace_structure_properties(
        View::Online,
        structure.structure_id,
        published.structure_props,
    )?;
    let outgoing = store.read_relations_from(View::Offline, structure.structure_id)?;
    store.write_relations(View::Online, structure.structure_id, &outgoing)?;
    store.write_structure(View::Offline, &structure)?;

    if let Some(online) = store.read_resource(View::Online, resource.structure_id())? {
        relations::resolve_incoming(store, View::Online, &online)?;
    }
    Ok(())
}

fn publish_deletion(
    store: &mut dyn ResourceStore,
    published: &Published<'_>,
) -> Result<(), RepositoryError> {
    let resource = published.resource;
    store.remove_structure(View::Online, resource.structure_id())?;
    store.remove_structure(View::Offline, resource.structure_id())?;

    let content_id = resource.content_id();
    if store.read_siblings(View::Offline, content_id)?.is_empty() {
        store.remove_content_aspect(View::Offline, content_id)?;
    } else if published.versions.content_bumped {
        // The remaining siblings see the content this deletion carried.
        published.write_content(store)?;
    }
    if store.read_siblings(View::Online, content_id)?.is_empty() {
        store.remove_content_aspect(View::Online, content_id)?;
    }
    Ok(())
}

impl PublishExecutor for PublishEngine {
    fn job_started(&self, job: &mut PublishJob) {
        match self.inner.reserve_tag() {
            Ok(tag) => job.tag = Some(tag),
            Err(err) => tracing::error!(job = %job.id, error = %err, "no publish tag reserved"),
        }
        if let Err(err) = self.inner.persist_job(job) {
            tracing::warn!(job = %job.id, error = %err, "failed to persist running job");
        }
        tracing::info!(
            job = %job.id,
            tag = job.tag.map(|t| t.0),
            resources = job.list.len(),
            "publish job started"
        );
    }

    fn execute(&self, job: &mut PublishJob) {
        let mut report = PublishReport::new(job.id, job.tag);
        let Some(tag) = job.tag else {
            for entry in job.list.entries() {
                self.inner.locks.release_publish(entry.structure_id, true);
                report.record(
                    entry.path.clone(),
                    ResourceOutcome::Failed("no publish tag".to_string()),
                );
            }
            job.report = Some(report);
            job.state = PublishJobState::Finished(PublishOutcome::PartialFailure);
            job.finished_at = Some(Utc::now());
            return;
        };

        let mut run = JobRun {
            publication: Publication {
                tag,
                user: job.user,
                date: Utc::now(),
            },
            ctx: RequestContext::new(job.user, job.project),
            keep_locks: job.list.options.keep_locks,
            content_published: HashSet::new(),
            touched: HashSet::new(),
            report,
        };

        let list = &job.list;
        let (early, late) = self.split_deleted_folders(&list.deleted_folders);
        for entry in early {
            self.publish_entry(&mut run, entry);
        }
        for entry in list.folders.iter().chain(list.files.iter()) {
            self.publish_entry(&mut run, entry);
        }
        for entry in late {
            self.publish_entry(&mut run, entry);
        }

        if self.inner.config.history.prune_on_publish && !run.touched.is_empty() {
            let limits = self.inner.history_limits();
            let contents: Vec<ContentId> = run.touched.iter().copied().collect();
            let pruned = self
                .inner
                .transaction(|store| Ok(ledger::prune(store, limits, Some(contents))?));
            if let Err(err) = pruned {
                tracing::warn!(job = %job.id, error = %err, "history pruning failed");
            }
        }

        let outcome = if run.report.has_errors() {
            PublishOutcome::PartialFailure
        } else {
            PublishOutcome::Success
        };
        job.report = Some(run.report);
        job.state = PublishJobState::Finished(outcome);
        job.finished_at = Some(Utc::now());
    }

    fn job_finished(&self, job: &PublishJob) {
        if let Err(err) = self.inner.persist_job(job) {
            tracing::warn!(job = %job.id, error = %err, "failed to persist finished job");
        }
        if let Some(report) = &job.report {
            tracing::info!(
                job = %job.id,
                published = report.published(),
                deleted = report.deleted(),
                skipped = report.skipped(),
                failed = report.failed(),
                "publish job finished"
            );
        }
    }
}
