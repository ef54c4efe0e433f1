//! In-memory job state.
//!
//! A [`Job`] is one unit of work processing one input batch of product URLs.
//! At most one job is active system-wide; the rest wait in the orchestrator's
//! FIFO queue. Jobs are mutated only by the orchestrator and the pipeline it
//! drives, and reach a terminal status exactly once.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type JobId = String;

/// Lifecycle status of a job.
///
/// Transitions are monotonic (each status only moves forward in rank) with
/// the single exception of `Cancelling -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Parsing,
    Cancelling,
    Cancelled,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Error)
    }

    /// Actively processing, in the admission-control sense.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Downloading | Self::Parsing | Self::Cancelling)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Downloading => 1,
            Self::Parsing => 2,
            Self::Cancelling => 3,
            Self::Cancelled | Self::Completed | Self::Error => 4,
        }
    }

    /// Whether moving to `next` respects the monotonic transition rule.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Parsing => "parsing",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Extraction strictness level, chosen at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExtractionMode {
    /// Keep every review regardless of comment presence.
    #[serde(rename = "all")]
    All,
    /// Silently skip reviews with empty comments.
    #[serde(rename = "text-only")]
    TextOnly,
    /// Stop the whole product at the first empty comment
    /// (precision-over-recall: nothing past that point is trusted).
    #[serde(rename = "strict-text")]
    #[default]
    StrictText,
}

impl FromStr for ExtractionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "text-only" => Ok(Self::TextOnly),
            "strict-text" => Ok(Self::StrictText),
            other => Err(format!("unknown extraction mode: {other}")),
        }
    }
}

impl std::fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::All => "all",
            Self::TextOnly => "text-only",
            Self::StrictText => "strict-text",
        };
        f.write_str(s)
    }
}

/// A product already crawled (or registered) within the current job,
/// keyed by its content fingerprint for intra-job dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedProduct {
    pub hash: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub cancel_requested: bool,
    pub input_ref: String,
    pub output_ref: Option<String>,
    pub mode: ExtractionMode,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_urls: u64,
    pub processed_urls: u64,
    pub current_url: Option<String>,
    pub current_page: u32,
    pub collected_reviews: u64,
    /// Site-reported review total for the current product, best effort.
    pub total_reviews_count: u64,
    pub queue_position: Option<usize>,
    pub processed_products: Vec<ProcessedProduct>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(input_ref: impl Into<String>, mode: ExtractionMode) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Queued,
            cancel_requested: false,
            input_ref: input_ref.into(),
            output_ref: None,
            mode,
            created_at: now,
            started_at: None,
            updated_at: now,
            finished_at: None,
            total_urls: 0,
            processed_urls: 0,
            current_url: None,
            current_page: 0,
            collected_reviews: 0,
            total_reviews_count: 0,
            queue_position: None,
            processed_products: Vec::new(),
            error: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Move to `next`, ignoring transitions that would violate monotonicity.
    /// Returns whether the transition was applied.
    pub fn set_status(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.touch();
        true
    }

    pub fn request_cancel(&mut self) {
        // Once set, never cleared.
        self.cancel_requested = true;
        self.touch();
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            status: self.status,
            error: self.error.clone(),
            input_ref: self.input_ref.clone(),
            output_ref: self.output_ref.clone(),
            mode: self.mode,
            created_at: self.created_at,
            started_at: self.started_at,
            updated_at: self.updated_at,
            finished_at: self.finished_at,
            total_urls: self.total_urls,
            processed_urls: self.processed_urls,
            current_url: self.current_url.clone(),
            current_page: self.current_page,
            collected_reviews: self.collected_reviews,
            total_reviews_count: self.total_reviews_count,
            queue_position: self.queue_position,
        }
    }
}

/// Read-only view of a job, shaped for the status endpoint of the HTTP
/// collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub error: Option<String>,
    pub input_ref: String,
    pub output_ref: Option<String>,
    pub mode: ExtractionMode,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_urls: u64,
    pub processed_urls: u64,
    pub current_url: Option<String>,
    pub current_page: u32,
    pub collected_reviews: u64,
    pub total_reviews_count: u64,
    pub queue_position: Option<usize>,
}

/// Progress surface the pagination engine sees while crawling one product.
///
/// Implemented by the orchestrator's [`crate::application::orchestrator::JobHandle`];
/// keeps the engine independent of the registry internals.
pub trait JobProgress: Send + Sync {
    fn set_current_page(&self, page: u32);
    fn set_collected(&self, count: u64);
    fn set_total_reviews(&self, count: u64);
    /// URL of a previously registered product with the same fingerprint, if any.
    fn seen_fingerprint(&self, hash: &str) -> Option<String>;
    /// Register a fingerprint against the job before committing to the full
    /// crawl, so closely-timed duplicate URLs cannot race past the check.
    fn register_fingerprint(&self, hash: &str, url: &str);
    fn cancel_requested(&self) -> bool;
}
