//! Anti-bot evasion around browser-session creation.
//!
//! Every session gets a randomized realistic persona (user agent, locale
//! headers, spoofed navigator properties), optional upstream proxy, and the
//! previously persisted cookie jar. A lightweight probe navigation verifies
//! the session is not immediately challenged; a challenged probe clears the
//! persisted cookies so the next run starts fresh instead of retrying with
//! known-bad state. Teardown always tries to persist the current cookie set.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::error::CrawlError;
use crate::infrastructure::config::CrawlerConfig;
use crate::infrastructure::driver::{
    BrowserDriver, BrowserSession, Cookie, SessionOptions,
};
use crate::infrastructure::logging::CaptureLog;

/// Real, current-generation user agents only.
const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:117.0) Gecko/20100101 Firefox/117.0",
];

/// Detects bot-challenge interstitials from URL markers. The marker set is
/// site-specific and configurable.
#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    markers: Vec<String>,
}

impl ChallengeDetector {
    pub fn new(markers: &[String]) -> Self {
        Self {
            markers: markers.to_vec(),
        }
    }

    pub fn is_challenge(&self, url: &str) -> bool {
        self.markers.iter().any(|marker| url.contains(marker))
    }
}

/// JSON-file cookie jar shared between crawl runs and the out-of-band
/// refresh routine.
pub struct CookieStore;

impl CookieStore {
    pub fn load(path: &Path) -> Option<Vec<Cookie>> {
        let raw = std::fs::read_to_string(path).ok()?;
        let cookies: Vec<Cookie> = serde_json::from_str(&raw).ok()?;
        (!cookies.is_empty()).then_some(cookies)
    }

    pub fn save(path: &Path, cookies: &[Cookie]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(cookies)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        std::fs::write(path, payload)
    }

    pub fn clear(path: &Path) {
        let _ = std::fs::remove_file(path);
    }
}

fn stealth_script(languages: &[String], platform: &str) -> String {
    let langs = languages
        .iter()
        .map(|l| format!("'{l}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r"Object.defineProperty(navigator, 'webdriver', {{ get: () => false }});
Object.defineProperty(navigator, 'plugins', {{ get: () => [1, 2, 3] }});
Object.defineProperty(navigator, 'languages', {{ get: () => [{langs}] }});
Object.defineProperty(navigator, 'platform', {{ get: () => '{platform}' }});
window.chrome = {{ runtime: {{}} }};"
    )
}

/// Wraps session creation and teardown for the crawl pipeline and the
/// cookie-refresh routine.
pub struct EvasionLayer {
    driver: Arc<dyn BrowserDriver>,
    config: Arc<CrawlerConfig>,
    detector: ChallengeDetector,
}

impl EvasionLayer {
    pub fn new(driver: Arc<dyn BrowserDriver>, config: Arc<CrawlerConfig>) -> Self {
        let detector = ChallengeDetector::new(&config.site.challenge_markers);
        Self {
            driver,
            config,
            detector,
        }
    }

    pub fn detector(&self) -> &ChallengeDetector {
        &self.detector
    }

    pub fn cookie_path(&self) -> &PathBuf {
        &self.config.cookie_path
    }

    fn session_options(&self) -> SessionOptions {
        let user_agent = USER_AGENTS[fastrand::usize(..USER_AGENTS.len())].to_string();
        SessionOptions {
            headless: self.config.headless,
            user_agent,
            headers: vec![(
                "Accept-Language".to_string(),
                self.config.site.accept_language.clone(),
            )],
            init_script: stealth_script(&self.config.site.languages, &self.config.site.platform),
            viewport: (1920, 1080),
            proxy: self.config.proxy.clone(),
        }
    }

    /// Open a disguised session with persisted cookies loaded and verified.
    pub async fn open_session(
        &self,
        capture: &CaptureLog,
    ) -> Result<Box<dyn BrowserSession>, CrawlError> {
        let mut session = self
            .driver
            .open_session(self.session_options())
            .await
            .map_err(|e| CrawlError::Session(format!("launching browser: {e}")))?;

        if let Some(cookies) = CookieStore::load(&self.config.cookie_path) {
            match session.set_cookies(&cookies).await {
                Ok(()) => capture.info(format!("cookies loaded ({})", cookies.len())),
                Err(err) => capture.warn(format!("cookie load failed: {err}")),
            }
        }

        if !self.config.probe_url.is_empty() {
            self.verify_not_challenged(session.as_mut(), capture).await;
        }

        capture.info("browser session ready (stealth + proxy + cookies + random UA)");
        Ok(session)
    }

    /// Lightweight probe: if the session lands on a challenge right away,
    /// the persisted cookies are known-bad - drop them so the next run
    /// starts clean. The current session proceeds either way; the pagination
    /// engine has its own challenge handling.
    async fn verify_not_challenged(&self, session: &mut dyn BrowserSession, capture: &CaptureLog) {
        let nav = session
            .navigate(&self.config.probe_url, self.config.nav_timeout())
            .await;
        if let Err(err) = nav {
            capture.warn(format!("session probe failed: {err}"));
            return;
        }
        match session.current_url().await {
            Ok(url) if self.detector.is_challenge(&url) => {
                capture.warn("session probe hit a bot challenge, clearing persisted cookies");
                CookieStore::clear(&self.config.cookie_path);
            }
            Ok(_) => capture.info("session probe clean"),
            Err(err) => capture.warn(format!("session probe url check failed: {err}")),
        }
    }

    /// Persist the current cookie set (best effort) and close the session.
    /// Never fails: teardown problems are logged, not thrown.
    pub async fn teardown(&self, session: &mut dyn BrowserSession, capture: &CaptureLog) {
        match session.cookies().await {
            Ok(cookies) => match CookieStore::save(&self.config.cookie_path, &cookies) {
                Ok(()) => capture.info(format!("cookies updated ({})", cookies.len())),
                Err(err) => capture.warn(format!("cookie save failed: {err}")),
            },
            Err(err) => capture.warn(format!("cookie read failed: {err}")),
        }
        if let Err(err) = session.close().await {
            capture.warn(format!("browser close failed: {err}"));
        } else {
            capture.info("browser closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detector_matches_configured_markers() {
        let detector =
            ChallengeDetector::new(&["captcha".to_string(), "antibot".to_string()]);
        assert!(detector.is_challenge("https://shop.example/captcha?return=/product/x"));
        assert!(detector.is_challenge("https://shop.example/antibot/challenge"));
        assert!(!detector.is_challenge("https://shop.example/product/x/reviews"));
    }

    #[test]
    fn cookie_store_round_trip_and_clear() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("jar/cookies.json");

        assert!(CookieStore::load(&path).is_none());

        let cookies = vec![Cookie {
            name: "session".into(),
            value: "abc".into(),
            domain: ".shop.example".into(),
            path: "/".into(),
            expires: None,
            http_only: true,
            secure: true,
        }];
        CookieStore::save(&path, &cookies).unwrap();
        let loaded = CookieStore::load(&path).unwrap();
        assert_eq!(loaded, cookies);

        CookieStore::clear(&path);
        assert!(CookieStore::load(&path).is_none());
    }

    #[test]
    fn empty_jar_reads_as_absent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(CookieStore::load(&path).is_none());
    }

    #[test]
    fn stealth_script_embeds_profile_values() {
        let script = stealth_script(&["ru-RU".to_string(), "ru".to_string()], "Win32");
        assert!(script.contains("'ru-RU', 'ru'"));
        assert!(script.contains("'Win32'"));
        assert!(script.contains("webdriver"));
    }
}
