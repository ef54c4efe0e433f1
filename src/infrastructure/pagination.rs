//! Per-product pagination engine.
//!
//! Drives one exclusive browser session through a product's review pages:
//! `HashProbe -> DedupCheck -> MainLoad -> PageLoop(n) -> Done`. The probe
//! establishes a content fingerprint on a stable sort order before any real
//! crawling happens, so variant URLs of an already-seen product short-circuit
//! without burning pages. Page advancement is strictly monotonic: a next-page
//! control pointing anywhere but `current + 1` means the UI is looping or a
//! chunk of data would be skipped, and the product is failed loudly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::domain::error::CrawlError;
use crate::domain::fingerprint;
use crate::domain::job::{ExtractionMode, JobProgress};
use crate::domain::product_url;
use crate::domain::review::Review;
use crate::infrastructure::config::CrawlerConfig;
use crate::infrastructure::driver::BrowserSession;
use crate::infrastructure::evasion::ChallengeDetector;
use crate::infrastructure::extractor::ReviewExtractor;
use crate::infrastructure::humanize;
use crate::infrastructure::logging::CaptureLog;
use crate::infrastructure::retry::{retry, sleep_jitter, RetryPolicy};

pub const FIRST_PAGE_SCREENSHOT: &str = "debug_first_page.png";
pub const LAST_PAGE_SCREENSHOT: &str = "debug_last_page.png";

/// Debug screenshots the runner uploads after a job, in capture order.
pub fn debug_artifact_paths(config: &CrawlerConfig) -> [PathBuf; 2] {
    [
        config.artifacts_dir.join(FIRST_PAGE_SCREENSHOT),
        config.artifacts_dir.join(LAST_PAGE_SCREENSHOT),
    ]
}

/// Outcome of one product's crawl.
#[derive(Debug)]
pub enum ProductCrawl {
    Complete {
        /// Site-reported total, 0 when the title gave nothing away.
        total_count: u64,
        reviews: Vec<Review>,
        fingerprint: String,
    },
    /// Fingerprint matched a product already crawled within this job.
    Duplicate {
        fingerprint: String,
        duplicate_of: String,
    },
}

pub struct PaginationEngine {
    config: Arc<CrawlerConfig>,
    extractor: Arc<ReviewExtractor>,
    detector: ChallengeDetector,
    total_re: Regex,
}

impl PaginationEngine {
    pub fn new(
        config: Arc<CrawlerConfig>,
        extractor: Arc<ReviewExtractor>,
    ) -> Result<Self, CrawlError> {
        let total_re = Regex::new(&config.site.total_reviews_pattern)
            .map_err(|e| CrawlError::Profile(format!("total reviews pattern: {e}")))?;
        let detector = ChallengeDetector::new(&config.site.challenge_markers);
        Ok(Self {
            config,
            extractor,
            detector,
            total_re,
        })
    }

    pub async fn crawl_product(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
        mode: ExtractionMode,
        progress: &dyn JobProgress,
        cancel: &CancellationToken,
        capture: &CaptureLog,
    ) -> Result<ProductCrawl, CrawlError> {
        let site = &self.config.site;
        let container = site.review_container_selector.as_str();

        // ===== HashProbe =====
        let probe_url = product_url::reviews_url_with_sort(url, &site.fingerprint_sort)?;
        self.load_probe_page(session, &probe_url, capture)
            .await
            .map_err(|err| {
                capture.error(format!("fingerprint probe failed: {err}"));
                CrawlError::FingerprintUnavailable {
                    url: url.to_string(),
                }
            })?;

        let markup = self
            .container_markup(session, container)
            .await?;
        let sample = self.extractor.extract(&markup, mode);
        let hash = fingerprint::fingerprint(&sample.reviews);

        // ===== DedupCheck =====
        if let Some(prior) = progress.seen_fingerprint(&hash) {
            capture.info(format!("content fingerprint matches {prior}, skipping"));
            return Ok(ProductCrawl::Duplicate {
                fingerprint: hash,
                duplicate_of: prior,
            });
        }
        // Register before the main crawl so a closely-timed duplicate URL
        // cannot race past this check.
        progress.register_fingerprint(&hash, url);

        // ===== MainLoad =====
        let main_url = product_url::reviews_url(url);
        self.load_main_page(session, &main_url, container, capture)
            .await?;
        capture.info(format!("review page loaded: {main_url}"));

        humanize::human_mouse(session).await;
        humanize::human_scroll(session).await;
        humanize::human_keyboard(session).await;
        sleep_jitter(800, 1200).await;
        if fastrand::f64() < 0.2 {
            capture.info("pausing like a reader before the first page");
            sleep_jitter(2000, 3000).await;
        }

        std::fs::create_dir_all(&self.config.artifacts_dir).ok();
        let first_shot = self.config.artifacts_dir.join(FIRST_PAGE_SCREENSHOT);
        match session.screenshot(&first_shot).await {
            Ok(()) => capture.info(format!("first page screenshot: {}", first_shot.display())),
            Err(err) => capture.warn(format!("first page screenshot failed: {err}")),
        }

        let mut total_count = 0u64;
        match session.title().await {
            Ok(title) => {
                if let Some(total) = self.total_from_title(&title) {
                    total_count = total;
                    progress.set_total_reviews(total);
                    capture.info(format!("site reports {total} reviews"));
                }
            }
            Err(err) => capture.warn(format!("could not read page title: {err}")),
        }

        // ===== PageLoop =====
        let mut reviews_all: Vec<Review> = Vec::new();
        let mut page_index: u32 = 1;

        loop {
            if self.cancelled(progress, cancel) {
                capture.info("cancellation requested, stopping the paginator");
                break;
            }

            progress.set_current_page(page_index);
            capture.info(format!("parsing page #{page_index}"));

            humanize::human_mouse(session).await;
            humanize::human_scroll(session).await;
            sleep_jitter(300, 600).await;
            humanize::auto_scroll(session, self.config.evaluate_timeout()).await;
            humanize::human_keyboard(session).await;
            if fastrand::f64() < 0.2 {
                capture.info("idle pause between pages");
                sleep_jitter(3000, 5000).await;
            }

            humanize::expand_spoilers(
                session,
                site,
                self.config.evaluate_timeout(),
                capture,
            )
            .await;
            sleep_jitter(350, 0).await;

            if page_index > self.config.max_pages_per_product {
                capture.warn(format!(
                    "page limit reached ({}), ending product",
                    self.config.max_pages_per_product
                ));
                break;
            }

            let markup = self.container_markup(session, container).await?;
            let extraction = self.extractor.extract(&markup, mode);

            if extraction.reviews.is_empty() {
                capture.warn("empty page, reviews exhausted");
                break;
            }

            let mut page_reviews = extraction.reviews;
            for review in &mut page_reviews {
                review.fingerprint = hash.clone();
            }
            reviews_all.extend(page_reviews);
            progress.set_collected(reviews_all.len() as u64);
            capture.info(format!("collected so far: {}", reviews_all.len()));

            if extraction.stop {
                capture.warn("strict-text stop: empty comment, ending product");
                break;
            }

            humanize::human_mouse(session).await;
            humanize::human_scroll(session).await;

            if self.cancelled(progress, cancel) {
                capture.info("cancellation requested before page advance");
                break;
            }

            match self.advance(session, capture).await? {
                Some(_) => page_index += 1,
                None => break,
            }

            sleep_jitter(2000, 1000).await;
        }

        // Final debug screenshot, best effort only.
        let last_shot = self.config.artifacts_dir.join(LAST_PAGE_SCREENSHOT);
        match session.screenshot(&last_shot).await {
            Ok(()) => capture.info(format!("last page screenshot: {}", last_shot.display())),
            Err(err) => capture.warn(format!("last page screenshot failed: {err}")),
        }

        Ok(ProductCrawl::Complete {
            total_count,
            reviews: reviews_all,
            fingerprint: hash,
        })
    }

    /// HashProbe load: bounded retries over challenge, missing container and
    /// navigation failures, randomized backoff between attempts.
    async fn load_probe_page(
        &self,
        session: &mut dyn BrowserSession,
        probe_url: &str,
        capture: &CaptureLog,
    ) -> Result<(), CrawlError> {
        let attempts = self.config.probe_attempts;
        let policy = RetryPolicy::new(
            attempts,
            Duration::from_millis(2000),
            Duration::from_millis(3000),
        );
        retry(&policy, "fingerprint probe", CrawlError::is_transient, |attempt| {
            let session = &mut *session;
            async move {
            capture.info(format!("loading fingerprint page (attempt {attempt}/{attempts})"));
            session
                .navigate(probe_url, self.config.nav_timeout())
                .await
                .map_err(|e| CrawlError::Navigation(e.to_string()))?;

            let landed = session.current_url().await?;
            if self.detector.is_challenge(&landed) {
                capture.warn("bot challenge while establishing fingerprint");
                return Err(CrawlError::BotChallenge { url: landed });
            }

            let selector = &self.config.site.review_container_selector;
            if !session.query_exists(selector).await? {
                capture.warn("review container missing, possibly a disguised bot page");
                return Err(CrawlError::ContainerMissing);
            }
            session
                .wait_for_selector(selector, self.config.probe_selector_timeout())
                .await
                .map_err(|e| CrawlError::Navigation(e.to_string()))?;

            capture.info("fingerprint page loaded");
            Ok(())
            }
        })
        .await
    }

    /// MainLoad: navigation and container-render lag are retried, but a
    /// challenge here is fatal for the product - the evasion layer already
    /// did its best at session creation.
    async fn load_main_page(
        &self,
        session: &mut dyn BrowserSession,
        main_url: &str,
        container: &str,
        capture: &CaptureLog,
    ) -> Result<(), CrawlError> {
        let policy = RetryPolicy::new(
            self.config.main_load_attempts,
            Duration::from_millis(2000),
            Duration::from_millis(2500),
        );
        let retryable = |err: &CrawlError| {
            err.is_transient() && !matches!(err, CrawlError::BotChallenge { .. })
        };
        retry(&policy, "main review page", retryable, |_| {
            let session = &mut *session;
            async move {
            session
                .navigate(main_url, self.config.nav_timeout())
                .await
                .map_err(|e| CrawlError::Navigation(e.to_string()))?;

            let landed = session.current_url().await?;
            if self.detector.is_challenge(&landed) {
                capture.error("bot challenge on the main review page, aborting product");
                return Err(CrawlError::BotChallenge { url: landed });
            }

            session
                .wait_for_selector(container, self.config.selector_timeout())
                .await
                .map_err(|_| CrawlError::ContainerMissing)?;
            Ok(())
            }
        })
        .await
    }

    /// Advance by "clicking next": read the target page number from the
    /// control's link and require exactly `current + 1`. A missing control
    /// is retried a bounded number of times (transient render lag) and then
    /// treated as the natural end of pagination.
    async fn advance(
        &self,
        session: &mut dyn BrowserSession,
        capture: &CaptureLog,
    ) -> Result<Option<u32>, CrawlError> {
        let current_url = session.current_url().await?;
        let current = product_url::page_number(&current_url);

        let script = next_link_script(&self.config.site.next_label);
        let policy = RetryPolicy::new(
            self.config.next_control_attempts,
            Duration::from_millis(1500),
            Duration::ZERO,
        );
        let found = retry(
            &policy,
            "next-page control",
            |err| matches!(err, CrawlError::NextControlMissing),
            |attempt| {
                let session = &mut *session;
                let script = script.as_str();
                async move {
                let value = self
                    .safe_evaluate(session, script)
                    .await?;
                match value.as_str() {
                    Some(href) if !href.is_empty() => Ok(href.to_string()),
                    _ => {
                        capture.warn(format!("attempt {attempt}: next-page control not found"));
                        Err(CrawlError::NextControlMissing)
                    }
                }
                }
            },
        )
        .await;

        let href = match found {
            Ok(href) => href,
            Err(CrawlError::NextControlMissing) => {
                capture.info("no next-page control, natural end of pagination");
                return Ok(None);
            }
            Err(other) => return Err(other),
        };

        let next = product_url::page_number(&href);
        if next == current {
            return Err(CrawlError::PaginationLoop { page: current });
        }
        if next != current + 1 {
            return Err(CrawlError::PaginationSkip {
                expected: current + 1,
                actual: next,
            });
        }

        capture.info(format!("advancing to page {next}: {href}"));
        session
            .navigate(&href, self.config.nav_timeout())
            .await
            .map_err(|e| CrawlError::Navigation(e.to_string()))?;
        Ok(Some(next))
    }

    async fn container_markup(
        &self,
        session: &mut dyn BrowserSession,
        container: &str,
    ) -> Result<String, CrawlError> {
        let script = container_markup_script(container);
        let value = self.safe_evaluate(session, &script).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Evaluate with an engine-side timeout on top of whatever the driver
    /// enforces - an evaluation never hangs the crawl silently.
    async fn safe_evaluate(
        &self,
        session: &mut dyn BrowserSession,
        script: &str,
    ) -> Result<serde_json::Value, CrawlError> {
        let timeout = self.config.evaluate_timeout();
        match tokio::time::timeout(timeout, session.evaluate(script, timeout)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(CrawlError::Evaluate(err.to_string())),
            Err(_) => Err(CrawlError::Evaluate("evaluate timeout exceeded".into())),
        }
    }

    fn total_from_title(&self, title: &str) -> Option<u64> {
        let captures = self.total_re.captures(title)?;
        let digits: String = captures
            .get(1)?
            .as_str()
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    }

    fn cancelled(&self, progress: &dyn JobProgress, cancel: &CancellationToken) -> bool {
        cancel.is_cancelled() || progress.cancel_requested()
    }
}

fn container_markup_script(container: &str) -> String {
    format!(
        r#"(() => {{
  const container = document.querySelector('{container}') || document.body;
  return container.innerHTML;
}})()"#
    )
}

fn next_link_script(label: &str) -> String {
    format!(
        r#"(() => {{
  const links = Array.from(document.querySelectorAll('a'));
  const next = links.find((link) => link.innerText.trim().toLowerCase() === '{label}');
  return next ? next.href : null;
}})()"#
    )
}
