//! Narrow browser-driver interface.
//!
//! The engine never talks to a concrete automation backend; it drives a
//! session through these traits. Anything able to navigate, query the DOM,
//! evaluate scripts, take screenshots and manage cookies can back a crawl -
//! production wires in a CDP-based implementation, tests wire in scripted
//! sessions.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("script evaluation failed: {0}")]
    Evaluate(String),

    #[error("browser session crashed: {0}")]
    Session(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Upstream proxy with optional credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Conventional environment variables, matching the deployment setup.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("PROXY_URL").ok()?;
        Some(Self {
            url,
            username: std::env::var("PROXY_USER").ok(),
            password: std::env::var("PROXY_PASS").ok(),
        })
    }
}

/// Session-creation options assembled by the evasion layer.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub headless: bool,
    pub user_agent: String,
    /// Extra HTTP headers, e.g. Accept-Language.
    pub headers: Vec<(String, String)>,
    /// Script injected before any page script runs.
    pub init_script: String,
    pub viewport: (u32, u32),
    pub proxy: Option<ProxyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open_session(
        &self,
        options: SessionOptions,
    ) -> Result<Box<dyn BrowserSession>, DriverError>;
}

/// One exclusive browser session. All calls carry bounded timeouts; a
/// timeout surfaces as an error, never as a silent hang.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), DriverError>;

    /// URL the session actually landed on (after redirects).
    async fn current_url(&mut self) -> Result<String, DriverError>;

    async fn title(&mut self) -> Result<String, DriverError>;

    /// Non-waiting existence check.
    async fn query_exists(&mut self, selector: &str) -> Result<bool, DriverError>;

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    async fn evaluate(
        &mut self,
        script: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, DriverError>;

    async fn screenshot(&mut self, path: &Path) -> Result<(), DriverError>;

    async fn cookies(&mut self) -> Result<Vec<Cookie>, DriverError>;

    async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<(), DriverError>;

    // Humanized-input primitives.
    async fn move_pointer(&mut self, x: f64, y: f64, steps: u32) -> Result<(), DriverError>;

    async fn wheel(&mut self, delta_y: f64) -> Result<(), DriverError>;

    async fn press_key(&mut self, key: &str) -> Result<(), DriverError>;

    async fn close(&mut self) -> Result<(), DriverError>;
}
