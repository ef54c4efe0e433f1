//! Out-of-band cookie refresh.
//!
//! Periodically warms the persisted cookie jar by visiting the account page
//! with the full evasion stack and some humanized browsing. Mutual exclusion
//! with the crawl pipeline is purely advisory: the routine skips itself when
//! the parser lease is active and guards its own run with a cookie lease.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::error::CrawlError;
use crate::infrastructure::config::CrawlerConfig;
use crate::infrastructure::evasion::EvasionLayer;
use crate::infrastructure::humanize;
use crate::infrastructure::locks::{LockManager, COOKIE_LOCK, PARSER_LOCK};
use crate::infrastructure::logging::CaptureLog;
use crate::infrastructure::retry::sleep_jitter;

pub struct CookieRefresher {
    evasion: Arc<EvasionLayer>,
    locks: LockManager,
    config: Arc<CrawlerConfig>,
}

impl CookieRefresher {
    pub fn new(evasion: Arc<EvasionLayer>, locks: LockManager, config: Arc<CrawlerConfig>) -> Self {
        Self {
            evasion,
            locks,
            config,
        }
    }

    /// Refresh the cookie jar unless a conflicting routine holds a lease.
    /// The cookie lease is always released, even when the refresh fails.
    pub async fn refresh(&self) -> Result<(), CrawlError> {
        let capture = CaptureLog::new();

        if self.locks.is_active(PARSER_LOCK) {
            capture.info("parser lease active, skipping cookie refresh");
            return Ok(());
        }
        if self.locks.is_active(COOKIE_LOCK) {
            capture.info("cookie refresh already running, skipping");
            return Ok(());
        }

        let ttl = Duration::from_secs(self.config.cookie_lock_ttl_min * 60);
        self.locks
            .acquire(
                COOKIE_LOCK,
                ttl,
                HashMap::from([("type".to_string(), "cookie-refresh".to_string())]),
            )
            .map_err(|e| CrawlError::Session(format!("acquiring cookie lease: {e}")))?;

        let result = self.run(&capture).await;
        self.locks.release(COOKIE_LOCK);
        result
    }

    async fn run(&self, capture: &CaptureLog) -> Result<(), CrawlError> {
        capture.info("cookie refresh started");
        let mut session = self.evasion.open_session(capture).await?;

        session
            .navigate(&self.config.account_url, self.config.nav_timeout())
            .await
            .map_err(|e| CrawlError::Navigation(e.to_string()))?;

        let landed = session.current_url().await?;
        if self.evasion.detector().is_challenge(&landed) {
            capture.warn("bot challenge on account page, waiting before retrying");
            sleep_jitter(10_000, 0).await;
        }

        humanize::human_mouse(session.as_mut()).await;
        sleep_jitter(500, 1000).await;
        humanize::human_scroll(session.as_mut()).await;
        sleep_jitter(1000, 2000).await;
        humanize::human_keyboard(session.as_mut()).await;
        humanize::auto_scroll(session.as_mut(), self.config.evaluate_timeout()).await;
        sleep_jitter(800, 0).await;

        let landed = session.current_url().await?;
        if self.evasion.detector().is_challenge(&landed) {
            // Close without persisting: a challenged session's cookies are
            // known-bad and must not overwrite the jar.
            if let Err(err) = session.close().await {
                capture.warn(format!("browser close failed: {err}"));
            }
            return Err(CrawlError::BotChallenge { url: landed });
        }

        // Teardown persists the fresh cookie set.
        self.evasion.teardown(session.as_mut(), capture).await;
        capture.info("cookie refresh finished");
        Ok(())
    }
}
