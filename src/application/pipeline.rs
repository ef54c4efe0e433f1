//! Per-product crawl pipeline.
//!
//! Composes the evasion layer (session bootstrap), the pagination engine and
//! the fingerprint dedup into one product's result. Never fails: any error
//! is folded into a `ProductResult` so the job can carry on with the next
//! URL and the output dataset stays inspectable.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::application::orchestrator::JobHandle;
use crate::domain::error::CrawlError;
use crate::domain::job::ExtractionMode;
use crate::domain::product_url;
use crate::domain::review::ProductResult;
use crate::infrastructure::config::CrawlerConfig;
use crate::infrastructure::evasion::EvasionLayer;
use crate::infrastructure::logging::CaptureLog;
use crate::infrastructure::pagination::{PaginationEngine, ProductCrawl};

/// Error marker for products stopped by user cancellation; the runner treats
/// it as "not a real failure".
pub const CANCELLED: &str = "cancelled";

pub struct ProductPipeline {
    evasion: Arc<EvasionLayer>,
    engine: Arc<PaginationEngine>,
    config: Arc<CrawlerConfig>,
}

impl ProductPipeline {
    pub fn new(
        evasion: Arc<EvasionLayer>,
        engine: Arc<PaginationEngine>,
        config: Arc<CrawlerConfig>,
    ) -> Self {
        Self {
            evasion,
            engine,
            config,
        }
    }

    /// Crawl one product URL to a result, counting it as processed whatever
    /// the outcome.
    pub async fn process_product(
        &self,
        url: &str,
        mode: ExtractionMode,
        job: &JobHandle,
        cancel: &CancellationToken,
    ) -> ProductResult {
        let capture = CaptureLog::new();
        job.begin_product(url);
        capture.info(format!("[job {}] crawling product: {url}", job.id()));

        let product_name = product_url::product_name(url)
            .unwrap_or_else(|| self.config.site.default_product_name.clone());

        let outcome = self.crawl(url, mode, job, cancel, &capture).await;
        job.product_done();

        match outcome {
            Ok(ProductCrawl::Complete {
                total_count,
                mut reviews,
                fingerprint,
            }) => {
                // Ordinals are computed post-hoc over the final count.
                let denominator = if total_count > 0 {
                    total_count
                } else {
                    reviews.len() as u64
                };
                for (index, review) in reviews.iter_mut().enumerate() {
                    review.source_url = url.to_string();
                    review.ordinal = format!("{}/{denominator}", index + 1);
                }
                ProductResult {
                    url: url.to_string(),
                    product_name,
                    total_count,
                    reviews,
                    fingerprint: Some(fingerprint),
                    skipped: false,
                    duplicate_of_url: None,
                    error_occurred: false,
                    error: None,
                    logs: capture.snapshot(),
                }
            }
            Ok(ProductCrawl::Duplicate {
                fingerprint,
                duplicate_of,
            }) => ProductResult::duplicate(url, product_name, fingerprint, duplicate_of, capture.snapshot()),
            Err(err) if err.is_cancelled() => {
                capture.info("product crawl cancelled");
                ProductResult::failed(url, product_name, CANCELLED, capture.snapshot())
            }
            Err(err) => {
                capture.error(format!("product crawl failed: {err}"));
                ProductResult::failed(url, product_name, err.to_string(), capture.snapshot())
            }
        }
    }

    async fn crawl(
        &self,
        url: &str,
        mode: ExtractionMode,
        job: &JobHandle,
        cancel: &CancellationToken,
        capture: &CaptureLog,
    ) -> Result<ProductCrawl, CrawlError> {
        let mut session = self.evasion.open_session(capture).await?;
        let result = self
            .engine
            .crawl_product(session.as_mut(), url, mode, job, cancel, capture)
            .await;
        // Cookies are persisted and the browser closed however the crawl
        // ended.
        self.evasion.teardown(session.as_mut(), capture).await;
        result
    }
}
