//! Storage collaborator interface and the shipped filesystem/CSV backend.
//!
//! The engine consumes storage through [`ReviewStorage`]; deployments swap
//! in object-store or spreadsheet implementations. The default [`FsStorage`]
//! fetches inputs over HTTP(S) or from local paths, reads link rows from
//! CSV, and writes the output dataset as CSV - a main review sheet plus a
//! log/error sheet whenever any product errored.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::domain::error::CrawlError;
use crate::domain::review::{dataset_rows, OutputRow, ProductResult};

#[async_trait]
pub trait ReviewStorage: Send + Sync {
    /// Materialize the input reference as a local file.
    async fn fetch_input(&self, location: &str) -> Result<PathBuf, CrawlError>;

    /// Rows matching the recognized product-URL prefix, in input order.
    async fn read_links(&self, path: &Path) -> Result<Vec<String>, CrawlError>;

    /// Assemble and persist the output dataset; returns its location. Must
    /// also persist a log/error sheet when any product errored.
    async fn write_output(&self, results: &[ProductResult]) -> Result<String, CrawlError>;

    /// Best-effort upload of a debug artifact (screenshots etc.).
    async fn upload_debug_artifact(&self, path: &Path) -> Result<(), CrawlError>;
}

/// Keep only cells that look like product links.
pub fn filter_product_links<I: IntoIterator<Item = String>>(cells: I, prefix: &str) -> Vec<String> {
    cells
        .into_iter()
        .map(|cell| cell.trim().to_string())
        .filter(|cell| cell.starts_with(prefix))
        .collect()
}

pub struct FsStorage {
    http: reqwest::Client,
    work_dir: PathBuf,
    output_dir: PathBuf,
    link_prefix: String,
}

impl FsStorage {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        link_prefix: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            work_dir: work_dir.into(),
            output_dir: output_dir.into(),
            link_prefix: link_prefix.into(),
        }
    }

    fn local_name(location: &str) -> String {
        location
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("input.csv")
            .to_string()
    }
}

#[async_trait]
impl ReviewStorage for FsStorage {
    async fn fetch_input(&self, location: &str) -> Result<PathBuf, CrawlError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            tokio::fs::create_dir_all(&self.work_dir)
                .await
                .map_err(|e| CrawlError::InputUnreadable(e.to_string()))?;
            let response = self
                .http
                .get(location)
                .send()
                .await
                .map_err(|e| CrawlError::InputUnreadable(format!("{location}: {e}")))?
                .error_for_status()
                .map_err(|e| CrawlError::InputUnreadable(format!("{location}: {e}")))?;
            let bytes = response
                .bytes()
                .await
                .map_err(|e| CrawlError::InputUnreadable(e.to_string()))?;
            let target = self.work_dir.join(Self::local_name(location));
            tokio::fs::write(&target, &bytes)
                .await
                .map_err(|e| CrawlError::InputUnreadable(e.to_string()))?;
            info!("downloaded input to {}", target.display());
            Ok(target)
        } else {
            let path = PathBuf::from(location);
            if !path.exists() {
                return Err(CrawlError::InputUnreadable(format!(
                    "file not found: {location}"
                )));
            }
            Ok(path)
        }
    }

    async fn read_links(&self, path: &Path) -> Result<Vec<String>, CrawlError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CrawlError::InputUnreadable(format!("{}: {e}", path.display())))?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(raw.as_bytes());

        let mut cells = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| CrawlError::InputUnreadable(e.to_string()))?;
            cells.extend(record.iter().map(String::from));
        }

        let links = filter_product_links(cells, &self.link_prefix);
        info!("found {} product links in {}", links.len(), path.display());
        Ok(links)
    }

    async fn write_output(&self, results: &[ProductResult]) -> Result<String, CrawlError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;

        let has_error = results.iter().any(|r| r.error_occurred || r.error.is_some());
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let name = if has_error {
            format!("result_{stamp}_ERROR.csv")
        } else {
            format!("result_{stamp}.csv")
        };
        let target = self.output_dir.join(&name);

        let rows = dataset_rows(results);
        let mut writer = csv::Writer::from_path(&target)
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        writer
            .write_record(OutputRow::HEADERS)
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        for row in &rows {
            writer
                .write_record([
                    row.link.as_str(),
                    row.product_variant.as_str(),
                    row.comment.as_str(),
                    row.rating.as_str(),
                    row.date.as_str(),
                    row.user.as_str(),
                    row.ordinal.as_str(),
                    row.fingerprint.as_str(),
                    row.duplicate_of.as_str(),
                ])
                .map_err(|e| CrawlError::Storage(e.to_string()))?;
        }
        writer
            .flush()
            .map_err(|e| CrawlError::Storage(e.to_string()))?;

        if has_error {
            let log_target = self.output_dir.join(format!("result_{stamp}_log.csv"));
            let mut log_writer = csv::Writer::from_path(&log_target)
                .map_err(|e| CrawlError::Storage(e.to_string()))?;
            for result in results.iter().filter(|r| r.error_occurred) {
                log_writer
                    .write_record([
                        result.url.as_str(),
                        result.product_name.as_str(),
                        result.error.as_deref().unwrap_or("unknown error"),
                    ])
                    .map_err(|e| CrawlError::Storage(e.to_string()))?;
                for line in &result.logs {
                    log_writer
                        .write_record(["", "", line.as_str()])
                        .map_err(|e| CrawlError::Storage(e.to_string()))?;
                }
            }
            log_writer
                .flush()
                .map_err(|e| CrawlError::Storage(e.to_string()))?;
        }

        info!("output dataset written: {} ({} rows)", target.display(), rows.len());
        Ok(target.display().to_string())
    }

    async fn upload_debug_artifact(&self, path: &Path) -> Result<(), CrawlError> {
        let artifacts = self.output_dir.join("artifacts");
        tokio::fs::create_dir_all(&artifacts)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        let name = path
            .file_name()
            .ok_or_else(|| CrawlError::Storage(format!("bad artifact path {}", path.display())))?;
        tokio::fs::copy(path, artifacts.join(name))
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        Ok(())
    }
}
