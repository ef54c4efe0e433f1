//! Job orchestrator: admission control, FIFO queue and the single active
//! worker slot.
//!
//! Exactly one job is active at any instant. Submissions enqueue immediately
//! and are promoted in FIFO order; cancellation of a queued job never starts
//! a crawl, cancellation of the active job is propagated cooperatively via
//! its token and the sticky `cancel_requested` flag. A job whose driver
//! settles - success, error or panic - is always finalized; the orchestrator
//! never leaves a job stuck in a non-terminal state.
//!
//! The registry is owned by the orchestrator instance (injectable, no
//! module-level singleton), so tests can run isolated orchestrators side by
//! side. Terminal jobs are retained for status polling and pruned lazily
//! once older than the configured retention window.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::error::CrawlError;
use crate::domain::job::{
    ExtractionMode, Job, JobId, JobProgress, JobSnapshot, JobStatus,
};
use crate::infrastructure::config::CrawlerConfig;
use crate::infrastructure::history::JobHistoryStore;
use crate::infrastructure::locks::{LockManager, PARSER_LOCK};

type Registry = Arc<RwLock<HashMap<JobId, Job>>>;

/// Drives one job from promotion to a terminal status. Implemented by the
/// crawl runner in production and by stubs in tests.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: JobHandle, cancel: CancellationToken) -> Result<(), CrawlError>;
}

struct ActiveJob {
    id: JobId,
    cancel: CancellationToken,
}

struct Inner {
    registry: Registry,
    queue: Mutex<VecDeque<JobId>>,
    active: Mutex<Option<ActiveJob>>,
    executor: Arc<dyn JobExecutor>,
    history: Arc<dyn JobHistoryStore>,
    locks: LockManager,
    config: Arc<CrawlerConfig>,
}

pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    pub fn new(
        executor: Arc<dyn JobExecutor>,
        history: Arc<dyn JobHistoryStore>,
        locks: LockManager,
        config: Arc<CrawlerConfig>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Arc::new(RwLock::new(HashMap::new())),
                queue: Mutex::new(VecDeque::new()),
                active: Mutex::new(None),
                executor,
                history,
                locks,
                config,
            }),
        }
    }

    /// Create a job in `queued`, append it to the pending queue and return
    /// immediately. When no job is active the new job is promoted on the
    /// spot.
    pub fn submit(&self, input_ref: impl Into<String>, mode: ExtractionMode) -> JobId {
        self.inner.prune_expired();

        let job = Job::new(input_ref, mode);
        let id = job.id.clone();
        {
            let mut registry = self.inner.write_registry();
            registry.insert(id.clone(), job);
        }
        self.inner.lock_queue().push_back(id.clone());
        self.inner.recompute_positions();
        info!("job {id} submitted");
        self.inner.mirror(&id);

        Inner::try_promote(&self.inner);
        id
    }

    /// Read-only snapshot; `None` maps to the HTTP collaborator's 404.
    pub fn status(&self, id: &str) -> Option<JobSnapshot> {
        self.inner
            .read_registry()
            .get(id)
            .map(Job::snapshot)
    }

    /// Cancel a job. Queued jobs are removed from the queue and become
    /// `cancelled` immediately; the active job moves to `cancelling` and is
    /// stopped cooperatively by its pipeline. Terminal or unknown jobs
    /// return `false`.
    pub fn cancel(&self, id: &str) -> bool {
        let accepted = {
            // Lock order everywhere: active -> queue -> registry.
            let active = self.inner.lock_active();
            let mut queue = self.inner.lock_queue();
            let mut registry = self.inner.write_registry();

            let Some(job) = registry.get_mut(id) else {
                return false;
            };
            if job.status.is_terminal() {
                return false;
            }

            let is_active = active.as_ref().is_some_and(|a| a.id == id);
            if is_active {
                job.request_cancel();
                job.set_status(JobStatus::Cancelling);
                if let Some(active) = active.as_ref() {
                    active.cancel.cancel();
                }
                info!("job {id} cancelling (active)");
            } else {
                queue.retain(|queued| queued != id);
                job.request_cancel();
                job.set_status(JobStatus::Cancelled);
                info!("job {id} cancelled while queued");
            }
            true
        };
        self.inner.recompute_positions();
        self.inner.mirror(id);
        accepted
    }

    /// Handle for driving or inspecting a job; used by executors and tests.
    pub fn handle(&self, id: &str) -> JobHandle {
        JobHandle {
            registry: Arc::clone(&self.inner.registry),
            id: id.to_string(),
        }
    }
}

impl Inner {
    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, HashMap<JobId, Job>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<JobId, Job>> {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<JobId>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveJob>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Promote the next startable queued job, skipping entries cancelled
    /// while they waited. Releases the parser lease once the queue drains.
    fn try_promote(inner: &Arc<Inner>) {
        let mut active = inner.lock_active();
        if active.is_some() {
            return;
        }

        loop {
            let next = inner.lock_queue().pop_front();
            let Some(id) = next else {
                inner.locks.release(PARSER_LOCK);
                return;
            };

            let startable = {
                let mut registry = inner.write_registry();
                match registry.get_mut(&id) {
                    Some(job) if job.status == JobStatus::Queued && !job.cancel_requested => {
                        job.started_at = Some(chrono::Utc::now());
                        job.touch();
                        true
                    }
                    _ => false,
                }
            };
            if !startable {
                continue;
            }

            let cancel = CancellationToken::new();
            *active = Some(ActiveJob {
                id: id.clone(),
                cancel: cancel.clone(),
            });
            drop(active);

            let ttl = Duration::from_secs(inner.config.parser_lock_ttl_min * 60);
            if let Err(err) = inner.locks.acquire(
                PARSER_LOCK,
                ttl,
                HashMap::from([("job".to_string(), id.clone())]),
            ) {
                warn!("could not acquire parser lease: {err}");
            }

            inner.recompute_positions();
            info!("job {id} promoted to active");

            let task_inner = Arc::clone(inner);
            let handle = JobHandle {
                registry: Arc::clone(&inner.registry),
                id: id.clone(),
            };
            tokio::spawn(async move {
                let outcome = AssertUnwindSafe(task_inner.executor.execute(handle, cancel))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => task_inner.finalize_if_stuck(&id, &err.to_string()),
                    Err(_) => task_inner.finalize_if_stuck(&id, "job driver panicked"),
                }
                Inner::on_job_finished(&task_inner, &id).await;
            });
            return;
        }
    }

    /// Invoked once per job after its driver settles: clears the active
    /// slot, lets transient state settle, then chains to the next queued
    /// job.
    async fn on_job_finished(inner: &Arc<Inner>, id: &JobId) {
        // The driver must have finalized; this is the safety net that keeps
        // the invariant "a settled job is never non-terminal".
        inner.finalize_if_stuck(id, "job pipeline ended without a terminal status");

        {
            let mut active = inner.lock_active();
            if active.as_ref().is_some_and(|a| &a.id == id) {
                *active = None;
            }
        }
        inner.mirror(id);
        inner.prune_expired();
        info!("job {id} finished");

        tokio::time::sleep(Duration::from_millis(inner.config.settle_delay_ms)).await;
        Inner::try_promote(inner);
        inner.recompute_positions();
    }

    fn finalize_if_stuck(&self, id: &JobId, message: &str) {
        let mut registry = self.write_registry();
        if let Some(job) = registry.get_mut(id) {
            if !job.status.is_terminal() {
                warn!("job {id} settled non-terminal, finalizing as error: {message}");
                if job.error.is_none() {
                    job.error = Some(message.to_string());
                }
                job.set_status(JobStatus::Error);
            }
        }
    }

    /// Queue positions are recomputed and exposed on every mutation so the
    /// status endpoint can render them without extra locking.
    fn recompute_positions(&self) {
        let queue = self.lock_queue();
        let mut registry = self.write_registry();
        for job in registry.values_mut() {
            job.queue_position = None;
        }
        for (index, id) in queue.iter().enumerate() {
            if let Some(job) = registry.get_mut(id) {
                job.queue_position = Some(index + 1);
            }
        }
    }

    /// Terminal jobs are kept for status polling and evicted once older
    /// than the retention window.
    fn prune_expired(&self) {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::hours(self.config.retention_hours as i64);
        let mut registry = self.write_registry();
        registry.retain(|_, job| {
            !job.status.is_terminal() || job.finished_at.is_none_or(|at| at > cutoff)
        });
    }

    /// Mirror the snapshot to the durable history store, fire-and-forget.
    fn mirror(&self, id: &str) {
        let Some(snapshot) = self.read_registry().get(id).map(Job::snapshot) else {
            return;
        };
        let history = Arc::clone(&self.history);
        tokio::spawn(async move {
            history.upsert(&snapshot).await;
        });
    }
}

/// Mutation/inspection handle for one job, shared by the orchestrator's
/// driver task and the crawl pipeline. All mutations take the registry lock
/// for the whole read-modify-write, with no await inside.
#[derive(Clone)]
pub struct JobHandle {
    registry: Registry,
    id: JobId,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn read<T>(&self, f: impl FnOnce(&Job) -> T) -> Option<T> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.id)
            .map(f)
    }

    fn mutate(&self, f: impl FnOnce(&mut Job)) {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(job) = registry.get_mut(&self.id) {
            f(job);
            job.touch();
        }
    }

    pub fn snapshot(&self) -> Option<JobSnapshot> {
        self.read(Job::snapshot)
    }

    pub fn status(&self) -> Option<JobStatus> {
        self.read(|job| job.status)
    }

    pub fn mode(&self) -> ExtractionMode {
        self.read(|job| job.mode).unwrap_or_default()
    }

    pub fn input_ref(&self) -> Option<String> {
        self.read(|job| job.input_ref.clone())
    }

    pub fn set_status(&self, status: JobStatus) {
        self.mutate(|job| {
            job.set_status(status);
        });
    }

    pub fn set_totals(&self, total_urls: u64) {
        self.mutate(|job| {
            job.total_urls = total_urls;
            job.processed_urls = 0;
        });
    }

    pub fn begin_product(&self, url: &str) {
        self.mutate(|job| {
            job.current_url = Some(url.to_string());
            job.current_page = 0;
            job.collected_reviews = 0;
            job.total_reviews_count = 0;
        });
    }

    pub fn product_done(&self) {
        self.mutate(|job| {
            // processed never exceeds the announced total.
            job.processed_urls = (job.processed_urls + 1).min(job.total_urls);
        });
    }

    pub fn set_output(&self, location: String) {
        self.mutate(|job| job.output_ref = Some(location));
    }

    /// Record the terminal status exactly once; the first recorded error is
    /// the one surfaced, later failures never overwrite it.
    pub fn finalize(&self, status: JobStatus, error: Option<String>) {
        self.mutate(|job| {
            if let Some(message) = error {
                if job.error.is_none() {
                    job.error = Some(message);
                }
            }
            job.set_status(status);
        });
    }
}

impl JobProgress for JobHandle {
    fn set_current_page(&self, page: u32) {
        self.mutate(|job| job.current_page = page);
    }

    fn set_collected(&self, count: u64) {
        self.mutate(|job| job.collected_reviews = count);
    }

    fn set_total_reviews(&self, count: u64) {
        self.mutate(|job| job.total_reviews_count = count);
    }

    fn seen_fingerprint(&self, hash: &str) -> Option<String> {
        self.read(|job| {
            job.processed_products
                .iter()
                .find(|product| product.hash == hash)
                .map(|product| product.url.clone())
        })
        .flatten()
    }

    fn register_fingerprint(&self, hash: &str, url: &str) {
        self.mutate(|job| {
            job.processed_products
                .push(crate::domain::job::ProcessedProduct {
                    hash: hash.to_string(),
                    url: url.to_string(),
                });
        });
    }

    fn cancel_requested(&self) -> bool {
        self.read(|job| job.cancel_requested).unwrap_or(false)
    }
}
