//! Logging setup and per-product log capture.
//!
//! Tracing goes to the console (and optionally a rolling file). Separately,
//! each product crawl carries a [`CaptureLog`]: a timestamped line buffer
//! that ends up in the `ProductResult` and, when a job errors, in the output
//! dataset's log sheet.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::Utc;
use once_cell::sync::OnceCell;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Initialize tracing with an env-filter (default `info`) and console output.
/// When `log_dir` is given, a daily-rolling file layer is added; the writer
/// guard is kept alive for the process lifetime.
pub fn init_logging(log_dir: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    let registry = tracing_subscriber::registry().with(filter).with(console);

    if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating log directory {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, "review-harvester.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .try_init()
            .context("installing tracing subscriber")?;
    } else {
        registry.try_init().context("installing tracing subscriber")?;
    }
    Ok(())
}

/// Shared, cloneable buffer of timestamped log lines for one product crawl.
#[derive(Debug, Clone, Default)]
pub struct CaptureLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CaptureLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, level: &str, message: &str) {
        let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        let line = if level.is_empty() {
            format!("{stamp} {message}")
        } else {
            format!("{stamp} [{level}] {message}")
        };
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!("{message}");
        self.push("", message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::warn!("{message}");
        self.push("WARN", message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::error!("{message}");
        self.push("ERROR", message);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
