//! Crawler configuration.
//!
//! Defaults mirror production values; a JSON config file and `RH__`-prefixed
//! environment variables can override any field. Proxy credentials are read
//! from the conventional `PROXY_URL`/`PROXY_USER`/`PROXY_PASS` variables.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::infrastructure::driver::ProxyConfig;

/// Everything the engine needs to know about the target site: selectors,
/// locale-specific labels and patterns, and anti-bot challenge markers.
/// All heuristics that would otherwise be hard-coded strings live here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    /// Container that holds the review list widget.
    pub review_container_selector: String,
    /// One review block.
    pub review_block_selector: String,
    /// Avatar image inside a block (its presence changes name detection).
    pub avatar_selector: String,
    /// Control that opens an image gallery (marks image-only reviews).
    pub gallery_selector: String,
    /// Star icon elements, inspected for the rating heuristic.
    pub star_selector: String,
    /// Source-locale month-name date pattern.
    pub date_pattern: String,
    /// "Was this helpful?" trailing prompt; text after it is never comment.
    pub helpful_prompt_pattern: String,
    /// Helper vote labels ("yes N" / "no N") excluded from comments.
    pub vote_patterns: Vec<String>,
    /// Boilerplate labels excluded from comments (variant labels, "reply",
    /// bare timestamps).
    pub banned_patterns: Vec<String>,
    /// Visible label of the next-page control, lower-case.
    pub next_label: String,
    /// Visible label of collapsed-text expanders, lower-case.
    pub spoiler_label: String,
    /// URL substrings that identify a bot-challenge interstitial.
    pub challenge_markers: Vec<String>,
    /// Pattern extracting the site-reported review total from the page title.
    pub total_reviews_pattern: String,
    /// Sort key for fingerprint probes (stable, low-volatility ordering).
    pub fingerprint_sort: String,
    /// Substituted for missing user names and dates.
    pub unknown_label: String,
    /// Substituted comment for reviews that only carry images.
    pub image_only_sentinel: String,
    /// Substituted comment when a kept review has no text at all.
    pub no_text_label: String,
    /// Product name fallback when the URL carries no slug.
    pub default_product_name: String,
    /// Recognized product-URL prefix for input rows.
    pub link_prefix: String,
    /// Accept-Language header value for sessions.
    pub accept_language: String,
    /// navigator.languages values for the stealth script.
    pub languages: Vec<String>,
    /// navigator.platform value for the stealth script.
    pub platform: String,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            review_container_selector: r#"[data-widget="webListReviews"]"#.to_string(),
            review_block_selector: "[data-review-uuid]".to_string(),
            avatar_selector: r#"img[src*="fs-my-account-avatar"]"#.to_string(),
            gallery_selector: r#"button[aria-label="Открыть галерею"]"#.to_string(),
            star_selector: "svg".to_string(),
            date_pattern: r"(?i)\b\d{1,2}\s+(января|февраля|марта|апреля|мая|июня|июля|августа|сентября|октября|ноября|декабря)\s+\d{4}\b".to_string(),
            helpful_prompt_pattern: r"(?i)^Вам помог".to_string(),
            vote_patterns: vec![r"(?i)^да\s*\d*$".to_string(), r"(?i)^нет\s*\d*$".to_string()],
            banned_patterns: vec![
                r"(?i)^Цвет товара".to_string(),
                r"(?i)^Название цвета".to_string(),
                r"(?i)^Российский размер".to_string(),
                r"(?i)^Размер производителя".to_string(),
                r"(?i)^Ответить$".to_string(),
                r"^\d{1,2}:\d{2}$".to_string(),
            ],
            next_label: "дальше".to_string(),
            spoiler_label: "читать полностью".to_string(),
            challenge_markers: vec!["captcha".to_string(), "antibot".to_string()],
            total_reviews_pattern: r"(?i)([\d\s]+)\s+отзыв".to_string(),
            fingerprint_sort: "score_asc".to_string(),
            unknown_label: "Неизвестно".to_string(),
            image_only_sentinel: "Пользователь загрузил изображение. Текст отсутствует.".to_string(),
            no_text_label: "Нет текста".to_string(),
            default_product_name: "Товар".to_string(),
            link_prefix: "https://www.ozon.ru/product/".to_string(),
            accept_language: "ru-RU,ru;q=0.9,en;q=0.8".to_string(),
            languages: vec!["ru-RU".to_string(), "ru".to_string()],
            platform: "Win32".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub headless: bool,
    /// Navigation timeout, also used for next-page transitions.
    pub nav_timeout_ms: u64,
    /// Wait bound for the review container on the main load.
    pub selector_timeout_ms: u64,
    /// Wait bound for the review container on fingerprint probes.
    pub probe_selector_timeout_ms: u64,
    /// Bound on any in-page script evaluation.
    pub evaluate_timeout_ms: u64,
    /// Runaway-session guard: hard cap on pages per product.
    pub max_pages_per_product: u32,
    /// Attempts for the fingerprint probe load.
    pub probe_attempts: u32,
    /// Attempts for the main review page load (challenges are never retried).
    pub main_load_attempts: u32,
    /// "Not found yet" retries for the next-page control before treating the
    /// absence as natural end of pagination.
    pub next_control_attempts: u32,
    /// Pause between finishing one job and promoting the next.
    pub settle_delay_ms: u64,
    /// Terminal jobs older than this are pruned from the registry.
    pub retention_hours: u64,
    /// Shared directory for advisory lock leases.
    pub lock_dir: PathBuf,
    pub parser_lock_ttl_min: u64,
    pub cookie_lock_ttl_min: u64,
    /// Persisted cookie jar location.
    pub cookie_path: PathBuf,
    /// Debug screenshots land here before upload.
    pub artifacts_dir: PathBuf,
    /// Lightweight post-creation probe to verify the session is not
    /// immediately challenged. Empty disables the probe.
    pub probe_url: String,
    /// Account page visited by the out-of-band cookie refresh routine.
    pub account_url: String,
    /// Optional sqlite mirror of job metadata; empty disables it.
    pub history_db_path: String,
    #[serde(skip)]
    pub proxy: Option<ProxyConfig>,
    pub site: SiteProfile,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            headless: true,
            nav_timeout_ms: 30_000,
            selector_timeout_ms: 20_000,
            probe_selector_timeout_ms: 15_000,
            evaluate_timeout_ms: 15_000,
            max_pages_per_product: 400,
            probe_attempts: 3,
            main_load_attempts: 2,
            next_control_attempts: 3,
            settle_delay_ms: 1_500,
            retention_hours: 24,
            lock_dir: PathBuf::from("/tmp/review-harvester"),
            parser_lock_ttl_min: 30,
            cookie_lock_ttl_min: 10,
            cookie_path: default_data_dir().join("cookies.json"),
            artifacts_dir: PathBuf::from("/tmp/review-harvester/artifacts"),
            probe_url: String::new(),
            account_url: "https://www.ozon.ru/my/main".to_string(),
            history_db_path: String::new(),
            proxy: None,
            site: SiteProfile::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("review-harvester")
}

impl CrawlerConfig {
    /// Load configuration: defaults, then an optional JSON file, then
    /// `RH__`-prefixed environment variables, then proxy env vars.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let raw = builder
            .add_source(config::Environment::with_prefix("RH").separator("__"))
            .build()
            .context("building configuration")?;

        let mut cfg: CrawlerConfig = raw
            .try_deserialize()
            .context("deserializing configuration")?;
        cfg.proxy = ProxyConfig::from_env();
        Ok(cfg)
    }

    pub fn nav_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.nav_timeout_ms)
    }

    pub fn selector_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.selector_timeout_ms)
    }

    pub fn probe_selector_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.probe_selector_timeout_ms)
    }

    pub fn evaluate_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.evaluate_timeout_ms)
    }
}
