//! File-leased advisory locks with TTL.
//!
//! The crawl pipeline and the out-of-band cookie-refresh routine exclude
//! each other through named lease files in a shared directory - no central
//! coordinator. Leases are advisory: correctness depends on all routines
//! checking them before starting conflicting work. Expired leases are
//! treated as absent and cleaned up lazily on read.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lease held by the crawl pipeline while a job is active.
pub const PARSER_LOCK: &str = "parser";
/// Lease held by the cookie-refresh routine while it runs.
pub const COOKIE_LOCK: &str = "cookies";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub owner_pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl Lease {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.lock"))
    }

    /// Take (or overwrite) the named lease. Always succeeds when the shared
    /// directory is writable.
    pub fn acquire(
        &self,
        name: &str,
        ttl: Duration,
        meta: HashMap<String, String>,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating lock directory {}", self.dir.display()))?;
        let now = Utc::now();
        let lease = Lease {
            owner_pid: std::process::id(),
            acquired_at: now,
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::minutes(30)),
            meta,
        };
        let path = self.lock_path(name);
        let payload = serde_json::to_string_pretty(&lease).context("serializing lease")?;
        std::fs::write(&path, payload)
            .with_context(|| format!("writing lease {}", path.display()))?;
        debug!("acquired lease '{name}' until {}", lease.expires_at);
        Ok(())
    }

    fn read(&self, name: &str) -> Option<Lease> {
        let raw = std::fs::read_to_string(self.lock_path(name)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// True iff the lease file exists and is unexpired. Expired or
    /// unparseable files are deleted on the way.
    pub fn is_active(&self, name: &str) -> bool {
        let path = self.lock_path(name);
        if !path.exists() {
            return false;
        }
        match self.read(name) {
            Some(lease) if !lease.is_expired() => true,
            _ => {
                let _ = std::fs::remove_file(&path);
                false
            }
        }
    }

    /// Idempotent release.
    pub fn release(&self, name: &str) {
        let path = self.lock_path(name);
        if path.exists() {
            if let Err(err) = std::fs::remove_file(&path) {
                debug!("releasing lease '{name}': {err}");
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
