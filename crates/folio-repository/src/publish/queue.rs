//! The publish queue and its single worker.
//!
//! Jobs are drained strictly FIFO by one tokio task. The queue exposes
//! exactly the operations the worker model needs: `enqueue`, `wait_idle`,
//! `pause` and `resume`. The worker suspends only when the queue is empty
//! or paused; a job that has started always runs to completion.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use folio_core::{ProjectId, PublishJobId, PublishJobState, PublishOutcome, PublishTag, UserId};

use super::list::PublishList;
use super::report::PublishReport;

/// A queued, running or finished publish job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishJob {
    pub id: PublishJobId,
    /// Submission order.
    pub sequence: u64,
    pub list: PublishList,
    pub user: UserId,
    pub project: ProjectId,
    pub state: PublishJobState,
    /// Reserved when the job starts.
    pub tag: Option<PublishTag>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub report: Option<PublishReport>,
}

impl PublishJob {
    pub fn new(list: PublishList, sequence: u64) -> Self {
        PublishJob {
            id: list.id,
            sequence,
            user: list.user,
            project: list.project,
            list,
            state: PublishJobState::Queued,
            tag: None,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            report: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }
}

/// Runs jobs on behalf of the worker. Called on a blocking thread.
pub trait PublishExecutor: Send + Sync + 'static {
    /// Reserves the job's publish tag and records it as running.
    fn job_started(&self, job: &mut PublishJob);

    /// Publishes every resource of the job and fills in its report.
    fn execute(&self, job: &mut PublishJob);

    /// Persists the finished job and runs post-job maintenance.
    fn job_finished(&self, job: &PublishJob);
}

#[derive(Debug, Default)]
struct QueueState {
    queued: VecDeque<PublishJob>,
    running: Option<PublishJob>,
    /// Newest first.
    finished: VecDeque<PublishJob>,
    paused: bool,
    shutdown: bool,
}

impl QueueState {
    fn pending(&self) -> usize {
        let queued = if self.paused { 0 } else { self.queued.len() };
        queued + usize::from(self.running.is_some())
    }
}

/// FIFO queue of publish jobs.
pub struct PublishQueue {
    state: Mutex<QueueState>,
    wake: Notify,
    /// Jobs the worker still has to finish before it goes idle.
    pending: watch::Sender<usize>,
    history_size: usize,
}

impl PublishQueue {
    pub fn new(paused: bool, history_size: usize) -> Self {
        let (pending, _) = watch::channel(0);
        PublishQueue {
            state: Mutex::new(QueueState {
                paused,
                ..QueueState::default()
            }),
            wake: Notify::new(),
            pending,
            history_size,
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_pending(&self, state: &QueueState) {
        self.pending.send_replace(state.pending());
    }

    pub fn enqueue(&self, job: PublishJob) {
        let mut state = self.state();
        tracing::info!(job = %job.id, resources = job.list.len(), "publish job queued");
        state.queued.push_back(job);
        self.publish_pending(&state);
        drop(state);
        self.wake.notify_one();
    }

    /// The running job (if any) followed by the queued jobs in order.
    pub fn snapshot(&self) -> Vec<PublishJob> {
        let state = self.state();
        state
            .running
            .iter()
            .chain(state.queued.iter())
            .cloned()
            .collect()
    }

    /// Finished jobs, newest first.
    pub fn history(&self) -> Vec<PublishJob> {
        self.state().finished.iter().cloned().collect()
    }

    pub fn find(&self, id: PublishJobId) -> Option<PublishJob> {
        let state = self.state();
        state
            .running
            .iter()
            .chain(state.queued.iter())
            .chain(state.finished.iter())
            .find(|job| job.id == id)
            .cloned()
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    pub fn pause(&self) {
        let mut state = self.state();
        state.paused = true;
        self.publish_pending(&state);
        tracing::info!("publishing stopped");
    }

    pub fn resume(&self) {
        let mut state = self.state();
        state.paused = false;
        self.publish_pending(&state);
        drop(state);
        tracing::info!("publishing started");
        self.wake.notify_one();
    }

    pub fn shutdown(&self) {
        self.state().shutdown = true;
        self.wake.notify_one();
    }

    /// Seeds the finished history, newest first (used on startup).
    pub(crate) fn restore_history(&self, jobs: Vec<PublishJob>) {
        let mut state = self.state();
        state.finished = jobs.into_iter().take(self.history_size).collect();
    }

    /// Resolves once no job is running and no unpaused job is queued.
    pub async fn wait_idle(&self) {
        let mut pending = self.pending.subscribe();
        // An error means the sender is gone, in which case nothing is pending.
        let _ = pending.wait_for(|count| *count == 0).await;
    }

    /// Takes the next job and marks it running.
    fn next_job(&self) -> Option<PublishJob> {
        let mut state = self.state();
        if state.paused || state.shutdown || state.running.is_some() {
            return None;
        }
        let mut job = state.queued.pop_front()?;
        job.state = PublishJobState::Running;
        job.started_at = Some(Utc::now());
        state.running = Some(job.clone());
        self.publish_pending(&state);
        Some(job)
    }

    fn update_running(&self, job: &PublishJob) {
        let mut state = self.state();
        if let Some(running) = state.running.as_mut() {
            if running.id == job.id {
                *running = job.clone();
            }
        }
    }

    /// Moves the running job to the finished history. Jobs falling out of
    /// the history are handed to `on_trim` before waiters are released.
    fn finish(&self, job: PublishJob, on_trim: &dyn Fn(Vec<PublishJobId>)) {
        let mut dropped = Vec::new();
        {
            let mut state = self.state();
            state.running = None;
            state.finished.push_front(job);
            while state.finished.len() > self.history_size {
                if let Some(old) = state.finished.pop_back() {
                    dropped.push(old.id);
                }
            }
        }
        if !dropped.is_empty() {
            on_trim(dropped);
        }
        let state = self.state();
        self.publish_pending(&state);
    }

    fn is_shutdown(&self) -> bool {
        self.state().shutdown
    }
}

/// Spawns the worker draining `queue` with `executor`.
///
/// `on_trim` receives the ids of finished jobs that fell out of the
/// history so their persisted records can be removed.
pub(crate) fn spawn_worker<E, F>(
    queue: Arc<PublishQueue>,
    executor: Arc<E>,
    on_trim: F,
) -> JoinHandle<()>
where
    E: PublishExecutor,
    F: Fn(Vec<PublishJobId>) + Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            if queue.is_shutdown() {
                break;
            }
            let Some(job) = queue.next_job() else {
                queue.wake.notified().await;
                continue;
            };

            let fallback = job.clone();
            let worker_queue = Arc::clone(&queue);
            let worker_executor = Arc::clone(&executor);
            let result = tokio::task::spawn_blocking(move || {
                let mut job = job;
                worker_executor.job_started(&mut job);
                worker_queue.update_running(&job);
                worker_executor.execute(&mut job);
                worker_executor.job_finished(&job);
                job
            })
            .await;

            let job = match result {
                Ok(job) => job,
                Err(err) => {
                    tracing::error!(job = %fallback.id, error = %err, "publish job aborted");
                    let mut job = fallback;
                    job.state = PublishJobState::Finished(PublishOutcome::PartialFailure);
                    job.finished_at = Some(Utc::now());
                    job
                }
            };
            queue.finish(job, &on_trim);
        }
        tracing::debug!("publish worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::list::PublishOptions;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn list() -> PublishList {
        PublishList {
            id: PublishJobId::new(),
            project: ProjectId::new(),
            user: UserId::new(),
            folders: Vec::new(),
            files: Vec::new(),
            deleted_folders: Vec::new(),
            options: PublishOptions::default(),
            direct: true,
        }
    }

    /// Records the order jobs run in.
    #[derive(Default)]
    struct Recorder {
        tags: AtomicU64,
        order: Mutex<Vec<u64>>,
    }

    impl PublishExecutor for Recorder {
        fn job_started(&self, job: &mut PublishJob) {
            job.tag = Some(PublishTag(self.tags.fetch_add(1, Ordering::SeqCst) + 1));
        }

        fn execute(&self, job: &mut PublishJob) {
            self.order.lock().unwrap().push(job.sequence);
            job.report = Some(PublishReport::new(job.id, job.tag));
            job.state = PublishJobState::Finished(PublishOutcome::Success);
        }

        fn job_finished(&self, _job: &PublishJob) {}
    }

    #[tokio::test]
    async fn test_jobs_run_in_submission_order_after_resume() {
        let queue = Arc::new(PublishQueue::new(true, 10));
        let recorder = Arc::new(Recorder::default());
        let handle = spawn_worker(Arc::clone(&queue), Arc::clone(&recorder), |_| {});

        for sequence in 1..=3 {
            queue.enqueue(PublishJob::new(list(), sequence));
        }
        let queued: Vec<u64> = queue.snapshot().iter().map(|j| j.sequence).collect();
        assert_eq!(queued, vec![1, 2, 3]);
        // Paused: nothing counts as pending.
        queue.wait_idle().await;
        assert!(recorder.order.lock().unwrap().is_empty());

        queue.resume();
        queue.wait_idle().await;
        assert_eq!(*recorder.order.lock().unwrap(), vec![1, 2, 3]);

        let history = queue.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].sequence, 3);
        assert_eq!(history[2].tag, Some(PublishTag(1)));

        queue.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let queue = Arc::new(PublishQueue::new(false, 2));
        let recorder = Arc::new(Recorder::default());
        let trimmed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&trimmed);
        let handle = spawn_worker(Arc::clone(&queue), recorder, move |ids| {
            sink.lock().unwrap().extend(ids);
        });
        let first = PublishJob::new(list(), 1);
        let first_id = first.id;
        queue.enqueue(first);
        queue.enqueue(PublishJob::new(list(), 2));
        queue.enqueue(PublishJob::new(list(), 3));
        queue.wait_idle().await;
        assert_eq!(queue.history().len(), 2);
        assert_eq!(*trimmed.lock().unwrap(), vec![first_id]);
        queue.shutdown();
        handle.await.unwrap();
    }
}
