//! Shared test doubles: a scripted browser driver and an in-memory storage
//! backend, plus HTML builders for review pages.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use review_harvester::domain::error::CrawlError;
use review_harvester::domain::job::JobProgress;
use review_harvester::domain::review::ProductResult;
use review_harvester::infrastructure::config::CrawlerConfig;
use review_harvester::infrastructure::driver::{
    BrowserDriver, BrowserSession, Cookie, DriverError, SessionOptions,
};
use review_harvester::infrastructure::storage::ReviewStorage;

// ===== page scripting =====

#[derive(Debug, Clone, Default)]
pub struct PageDef {
    /// URL the session reports after landing here (e.g. a captcha redirect).
    pub final_url: Option<String>,
    /// Markup returned for the container-innerHTML evaluation.
    pub html: String,
    pub has_container: bool,
    pub title: String,
    /// href of the next-page control, when rendered.
    pub next_href: Option<String>,
}

impl PageDef {
    pub fn reviews(html: String) -> Self {
        Self {
            final_url: None,
            html,
            has_container: true,
            title: String::new(),
            next_href: None,
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn with_next(mut self, href: &str) -> Self {
        self.next_href = Some(href.to_string());
        self
    }

    pub fn challenge(challenge_url: &str) -> Self {
        Self {
            final_url: Some(challenge_url.to_string()),
            has_container: false,
            ..Default::default()
        }
    }
}

#[derive(Default)]
pub struct SiteMap {
    pub pages: HashMap<String, PageDef>,
    /// Every URL any session navigated to, in order.
    pub nav_log: Vec<String>,
}

/// Driver whose sessions serve pages from a shared scripted site.
#[derive(Clone, Default)]
pub struct ScriptedDriver {
    pub site: Arc<Mutex<SiteMap>>,
}

impl ScriptedDriver {
    pub fn new(pages: HashMap<String, PageDef>) -> Self {
        Self {
            site: Arc::new(Mutex::new(SiteMap {
                pages,
                nav_log: Vec::new(),
            })),
        }
    }

    pub fn nav_log(&self) -> Vec<String> {
        self.site.lock().unwrap().nav_log.clone()
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn open_session(
        &self,
        _options: SessionOptions,
    ) -> Result<Box<dyn BrowserSession>, DriverError> {
        Ok(Box::new(ScriptedSession {
            site: Arc::clone(&self.site),
            current: "about:blank".to_string(),
        }))
    }
}

pub struct ScriptedSession {
    site: Arc<Mutex<SiteMap>>,
    current: String,
}

impl ScriptedSession {
    fn page(&self) -> Result<PageDef, DriverError> {
        let site = self.site.lock().unwrap();
        site.pages
            .get(&self.current)
            .cloned()
            .ok_or_else(|| DriverError::Navigation(format!("no such page: {}", self.current)))
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), DriverError> {
        let mut site = self.site.lock().unwrap();
        site.nav_log.push(url.to_string());
        let Some(page) = site.pages.get(url) else {
            return Err(DriverError::Navigation(format!("no such page: {url}")));
        };
        self.current = page.final_url.clone().unwrap_or_else(|| url.to_string());
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, DriverError> {
        Ok(self.current.clone())
    }

    async fn title(&mut self) -> Result<String, DriverError> {
        self.page().map(|p| p.title)
    }

    async fn query_exists(&mut self, _selector: &str) -> Result<bool, DriverError> {
        // The engine only ever asks about the review container.
        Ok(self.page().map(|p| p.has_container).unwrap_or(false))
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        if self.page()?.has_container {
            Ok(())
        } else {
            Err(DriverError::Timeout(selector.to_string()))
        }
    }

    async fn evaluate(
        &mut self,
        script: &str,
        _timeout: Duration,
    ) -> Result<serde_json::Value, DriverError> {
        // The challenge page serves nothing; evaluations against the actual
        // current page use its scripted content.
        let page = self
            .site
            .lock()
            .unwrap()
            .pages
            .get(&self.current)
            .cloned()
            .unwrap_or_default();

        if script.contains("innerHTML") {
            Ok(serde_json::Value::String(page.html))
        } else if script.contains("querySelectorAll('a')") {
            Ok(page
                .next_href
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null))
        } else if script.contains("scrollBy") {
            Ok(serde_json::Value::Null)
        } else {
            // Spoiler expansion reports a count.
            Ok(serde_json::json!(0))
        }
    }

    async fn screenshot(&mut self, path: &Path) -> Result<(), DriverError> {
        std::fs::write(path, b"png")?;
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<Cookie>, DriverError> {
        Ok(Vec::new())
    }

    async fn set_cookies(&mut self, _cookies: &[Cookie]) -> Result<(), DriverError> {
        Ok(())
    }

    async fn move_pointer(&mut self, _x: f64, _y: f64, _steps: u32) -> Result<(), DriverError> {
        Ok(())
    }

    async fn wheel(&mut self, _delta_y: f64) -> Result<(), DriverError> {
        Ok(())
    }

    async fn press_key(&mut self, _key: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

// ===== storage =====

/// In-memory storage: fixed link list in, captured results out.
#[derive(Default)]
pub struct MemoryStorage {
    pub links: Vec<String>,
    pub written: Mutex<Vec<Vec<ProductResult>>>,
    pub uploaded: Mutex<Vec<PathBuf>>,
}

impl MemoryStorage {
    pub fn new(links: Vec<String>) -> Self {
        Self {
            links,
            ..Default::default()
        }
    }

    pub fn last_results(&self) -> Vec<ProductResult> {
        self.written.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ReviewStorage for MemoryStorage {
    async fn fetch_input(&self, location: &str) -> Result<PathBuf, CrawlError> {
        if location == "missing" {
            return Err(CrawlError::InputUnreadable(location.to_string()));
        }
        Ok(PathBuf::from(location))
    }

    async fn read_links(&self, _path: &Path) -> Result<Vec<String>, CrawlError> {
        Ok(self.links.clone())
    }

    async fn write_output(&self, results: &[ProductResult]) -> Result<String, CrawlError> {
        self.written.lock().unwrap().push(results.to_vec());
        Ok("mem://output.csv".to_string())
    }

    async fn upload_debug_artifact(&self, path: &Path) -> Result<(), CrawlError> {
        self.uploaded.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

// ===== progress =====

/// Standalone progress sink for engine-level tests.
#[derive(Default)]
pub struct TestProgress {
    pub pages: Mutex<Vec<u32>>,
    pub collected: AtomicU64,
    pub site_total: AtomicU64,
    pub fingerprints: Mutex<Vec<(String, String)>>,
    pub cancel: AtomicBool,
}

impl JobProgress for TestProgress {
    fn set_current_page(&self, page: u32) {
        self.pages.lock().unwrap().push(page);
    }

    fn set_collected(&self, count: u64) {
        self.collected.store(count, Ordering::SeqCst);
    }

    fn set_total_reviews(&self, count: u64) {
        self.site_total.store(count, Ordering::SeqCst);
    }

    fn seen_fingerprint(&self, hash: &str) -> Option<String> {
        self.fingerprints
            .lock()
            .unwrap()
            .iter()
            .find(|(seen, _)| seen == hash)
            .map(|(_, url)| url.clone())
    }

    fn register_fingerprint(&self, hash: &str, url: &str) {
        self.fingerprints
            .lock()
            .unwrap()
            .push((hash.to_string(), url.to_string()));
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

// ===== fixtures =====

const FILLED_STAR: &str = "color: rgb(255, 168, 0);";
const EMPTY_STAR: &str = "color: rgb(204, 204, 204);";

/// One review block in the site's markup shape.
pub fn review_block(user: &str, comment: &str, stars: usize) -> String {
    let star_markup: String = (0..5)
        .map(|i| {
            let style = if i < stars { FILLED_STAR } else { EMPTY_STAR };
            format!(r#"<svg style="{style}"></svg>"#)
        })
        .collect();
    let comment_markup = if comment.is_empty() {
        String::new()
    } else {
        format!("<span>{comment}</span>")
    };
    format!(
        r#"<div data-review-uuid="u-{user}">
             <span>{user}</span>
             <span>12 мая 2024</span>
             {star_markup}
             <a href="/product/v/">Синий / XL</a>
             {comment_markup}
             <span>Вам помог этот отзыв?</span>
             <span>Да 3</span>
             <span>Нет 1</span>
           </div>"#
    )
}

pub fn page_html(blocks: &[String]) -> String {
    blocks.concat()
}

/// Config pointed at throwaway directories, with production timings kept
/// (tests run under paused tokio time).
pub fn test_config(dir: &Path) -> CrawlerConfig {
    CrawlerConfig {
        lock_dir: dir.join("locks"),
        cookie_path: dir.join("cookies.json"),
        artifacts_dir: dir.join("artifacts"),
        probe_url: String::new(),
        history_db_path: String::new(),
        ..CrawlerConfig::default()
    }
}
