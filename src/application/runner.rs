//! Per-job driver: input fetch, product loop, output assembly.
//!
//! A product failure records the job's first error and moves on to the next
//! URL; only input-stage errors abort the job. The output dataset is always
//! assembled from whatever results exist, so partial work survives every
//! failure mode.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::orchestrator::{JobExecutor, JobHandle};
use crate::application::pipeline::{ProductPipeline, CANCELLED};
use crate::domain::error::CrawlError;
use crate::domain::job::{JobProgress, JobStatus};
use crate::domain::review::ProductResult;
use crate::infrastructure::config::CrawlerConfig;
use crate::infrastructure::history::JobHistoryStore;
use crate::infrastructure::locks::{LockManager, PARSER_LOCK};
use crate::infrastructure::pagination::debug_artifact_paths;
use crate::infrastructure::storage::ReviewStorage;

pub struct CrawlJobExecutor {
    pipeline: Arc<ProductPipeline>,
    storage: Arc<dyn ReviewStorage>,
    history: Arc<dyn JobHistoryStore>,
    locks: LockManager,
    config: Arc<CrawlerConfig>,
}

impl CrawlJobExecutor {
    pub fn new(
        pipeline: Arc<ProductPipeline>,
        storage: Arc<dyn ReviewStorage>,
        history: Arc<dyn JobHistoryStore>,
        locks: LockManager,
        config: Arc<CrawlerConfig>,
    ) -> Self {
        Self {
            pipeline,
            storage,
            history,
            locks,
            config,
        }
    }

    async fn mirror(&self, job: &JobHandle) {
        if let Some(snapshot) = job.snapshot() {
            self.history.upsert(&snapshot).await;
        }
    }

    /// Download the input and resolve the product URL list. Failures here
    /// are job-fatal.
    async fn load_urls(&self, job: &JobHandle) -> Result<Vec<String>, CrawlError> {
        job.set_status(JobStatus::Downloading);
        self.mirror(job).await;

        let input_ref = job
            .input_ref()
            .ok_or_else(|| CrawlError::InputUnreadable("job vanished from registry".into()))?;
        let local = self.storage.fetch_input(&input_ref).await?;
        let urls = self.storage.read_links(&local).await?;
        if urls.is_empty() {
            return Err(CrawlError::NoLinks);
        }

        job.set_totals(urls.len() as u64);
        job.set_status(JobStatus::Parsing);
        self.mirror(job).await;
        info!("[job {}] found {} product links", job.id(), urls.len());
        Ok(urls)
    }
}

#[async_trait]
impl JobExecutor for CrawlJobExecutor {
    async fn execute(&self, job: JobHandle, cancel: CancellationToken) -> Result<(), CrawlError> {
        // Cancelled while still queued: nothing ever started.
        if job.cancel_requested() {
            info!("[job {}] cancelled before start, skipping", job.id());
            job.finalize(JobStatus::Cancelled, None);
            return Ok(());
        }

        let ttl = Duration::from_secs(self.config.parser_lock_ttl_min * 60);
        if let Err(err) = self.locks.acquire(
            PARSER_LOCK,
            ttl,
            HashMap::from([("job".to_string(), job.id().to_string())]),
        ) {
            warn!("[job {}] could not refresh parser lease: {err}", job.id());
        }

        let mut results: Vec<ProductResult> = Vec::new();
        let mut first_error: Option<String> = None;

        match self.load_urls(&job).await {
            Ok(urls) => {
                let mode = job.mode();
                for url in urls {
                    if job.cancel_requested() || cancel.is_cancelled() {
                        info!("[job {}] cancellation observed, stopping", job.id());
                        break;
                    }
                    let result = self
                        .pipeline
                        .process_product(&url, mode, &job, &cancel)
                        .await;
                    if result.error_occurred && result.error.as_deref() != Some(CANCELLED) {
                        // First error wins; the job still continues with the
                        // remaining URLs.
                        if first_error.is_none() {
                            first_error = result.error.clone();
                        }
                    }
                    results.push(result);
                }
            }
            Err(err) => {
                error!("[job {}] {err}", job.id());
                first_error.get_or_insert(err.to_string());
            }
        }

        // Output stage: always attempted, never overwrites an earlier error.
        match self.storage.write_output(&results).await {
            Ok(location) => {
                info!("[job {}] output dataset at {location}", job.id());
                job.set_output(location);
            }
            Err(err) => {
                error!("[job {}] output assembly failed: {err}", job.id());
                first_error.get_or_insert(err.to_string());
            }
        }

        // Debug screenshots, best effort.
        let uploads: Vec<_> = debug_artifact_paths(&self.config)
            .into_iter()
            .filter(|path| path.exists())
            .map(|path| {
                let storage = Arc::clone(&self.storage);
                async move {
                    if let Err(err) = storage.upload_debug_artifact(&path).await {
                        warn!("debug artifact {} upload failed: {err}", path.display());
                    }
                }
            })
            .collect();
        futures::future::join_all(uploads).await;

        let final_status = if job.cancel_requested() {
            JobStatus::Cancelled
        } else if first_error.is_some() {
            JobStatus::Error
        } else {
            JobStatus::Completed
        };
        job.finalize(final_status, first_error);
        self.mirror(&job).await;
        info!(
            "[job {}] finished: {}",
            job.id(),
            job.status().map(|s| s.to_string()).unwrap_or_default()
        );
        Ok(())
    }
}
