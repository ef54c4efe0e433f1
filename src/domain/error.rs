//! Crawl error taxonomy.
//!
//! Errors carry their own classification so the retry helper, the per-product
//! pipeline and the job runner can agree on what is retryable, what kills one
//! product, and what kills the whole job.

use thiserror::Error;

/// How a [`CrawlError`] propagates through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bounded retries with randomized backoff, then escalate.
    Transient,
    /// Aborts the current product; the job continues with the next URL.
    ProductFatal,
    /// Aborts the entire job immediately.
    JobFatal,
    /// Cooperative cancellation, not a failure.
    Cancelled,
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("bot challenge page encountered at {url}")]
    BotChallenge { url: String },

    #[error("review container not present on page")]
    ContainerMissing,

    #[error("next-page control not found")]
    NextControlMissing,

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script evaluation failed: {0}")]
    Evaluate(String),

    #[error("pagination loop: page number did not change ({page})")]
    PaginationLoop { page: u32 },

    #[error("pagination skip: expected page {expected}, got {actual}")]
    PaginationSkip { expected: u32, actual: u32 },

    #[error("could not establish fingerprint for {url}")]
    FingerprintUnavailable { url: String },

    #[error("browser session error: {0}")]
    Session(String),

    #[error("input file unreadable: {0}")]
    InputUnreadable(String),

    #[error("no product links found in input file")]
    NoLinks,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid site profile: {0}")]
    Profile(String),

    #[error("cancelled by user")]
    Cancelled,
}

impl CrawlError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::BotChallenge { .. }
            | Self::ContainerMissing
            | Self::NextControlMissing
            | Self::Navigation(_)
            | Self::Evaluate(_) => ErrorClass::Transient,

            Self::PaginationLoop { .. }
            | Self::PaginationSkip { .. }
            | Self::FingerprintUnavailable { .. }
            | Self::Session(_)
            | Self::Profile(_) => ErrorClass::ProductFatal,

            Self::InputUnreadable(_) | Self::NoLinks | Self::Storage(_) => ErrorClass::JobFatal,

            Self::Cancelled => ErrorClass::Cancelled,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<crate::infrastructure::driver::DriverError> for CrawlError {
    fn from(err: crate::infrastructure::driver::DriverError) -> Self {
        Self::Session(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_classify_as_retryable() {
        assert!(CrawlError::ContainerMissing.is_transient());
        assert!(
            CrawlError::BotChallenge {
                url: "https://x/captcha".into()
            }
            .is_transient()
        );
        assert!(CrawlError::Navigation("timeout".into()).is_transient());
    }

    #[test]
    fn pagination_mismatch_is_product_fatal_not_retryable() {
        let err = CrawlError::PaginationSkip {
            expected: 4,
            actual: 5,
        };
        assert_eq!(err.class(), ErrorClass::ProductFatal);
        assert!(!err.is_transient());
    }

    #[test]
    fn input_errors_kill_the_job() {
        assert_eq!(
            CrawlError::InputUnreadable("404".into()).class(),
            ErrorClass::JobFatal
        );
        assert_eq!(CrawlError::NoLinks.class(), ErrorClass::JobFatal);
    }
}
