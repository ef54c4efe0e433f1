//! review-harvester - anti-bot-aware e-commerce review crawling engine
//!
//! The crate is the crawl-orchestration core of a review harvesting service:
//! a single-active-job queue, a per-product pagination state machine with
//! anti-bot evasion, heuristic DOM review extraction, and content-fingerprint
//! deduplication across visually distinct but content-identical listings.
//!
//! The HTTP front door, the concrete browser driver and the concrete storage
//! backend are collaborators reached through the narrow interfaces in
//! [`infrastructure::driver`] and [`infrastructure::storage`].

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::orchestrator::{JobHandle, JobOrchestrator};
pub use domain::error::CrawlError;
pub use domain::job::{ExtractionMode, JobSnapshot, JobStatus};
pub use infrastructure::config::CrawlerConfig;
