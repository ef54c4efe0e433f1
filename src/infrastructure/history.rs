//! Optional durable mirror of job metadata.
//!
//! Crawl state lives in memory; this store only mirrors snapshots for
//! history/status queries across restarts. It is strictly best-effort: an
//! unavailable database is logged and never fails the crawl itself.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::warn;

use crate::domain::job::JobSnapshot;

#[async_trait]
pub trait JobHistoryStore: Send + Sync {
    /// Mirror the snapshot; must never propagate failures.
    async fn upsert(&self, snapshot: &JobSnapshot);
}

/// Used when no durable mirror is configured.
pub struct NullJobHistory;

#[async_trait]
impl JobHistoryStore for NullJobHistory {
    async fn upsert(&self, _snapshot: &JobSnapshot) {}
}

pub struct SqliteJobHistory {
    pool: SqlitePool,
}

impl SqliteJobHistory {
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        sqlx::query(
            r"CREATE TABLE IF NOT EXISTS parser_jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                error TEXT,
                input_ref TEXT NOT NULL,
                output_ref TEXT,
                mode TEXT NOT NULL,
                total_urls INTEGER NOT NULL DEFAULT 0,
                processed_urls INTEGER NOT NULL DEFAULT 0,
                collected_reviews INTEGER NOT NULL DEFAULT 0,
                total_reviews_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                finished_at TEXT
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl JobHistoryStore for SqliteJobHistory {
    async fn upsert(&self, snapshot: &JobSnapshot) {
        let result = sqlx::query(
            r"INSERT INTO parser_jobs (
                id, status, error, input_ref, output_ref, mode,
                total_urls, processed_urls, collected_reviews,
                total_reviews_count, created_at, updated_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                error = excluded.error,
                output_ref = excluded.output_ref,
                total_urls = excluded.total_urls,
                processed_urls = excluded.processed_urls,
                collected_reviews = excluded.collected_reviews,
                total_reviews_count = excluded.total_reviews_count,
                updated_at = excluded.updated_at,
                finished_at = excluded.finished_at",
        )
        .bind(&snapshot.id)
        .bind(snapshot.status.to_string())
        .bind(&snapshot.error)
        .bind(&snapshot.input_ref)
        .bind(&snapshot.output_ref)
        .bind(snapshot.mode.to_string())
        .bind(snapshot.total_urls as i64)
        .bind(snapshot.processed_urls as i64)
        .bind(snapshot.collected_reviews as i64)
        .bind(snapshot.total_reviews_count as i64)
        .bind(snapshot.created_at.to_rfc3339())
        .bind(snapshot.updated_at.to_rfc3339())
        .bind(snapshot.finished_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            warn!("job history mirror unavailable: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{ExtractionMode, Job, JobStatus};

    #[tokio::test]
    async fn upsert_inserts_then_updates() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("history.db");
        let store = SqliteJobHistory::connect(db_path.to_str().unwrap())
            .await
            .unwrap();

        let mut job = Job::new("in.csv", ExtractionMode::StrictText);
        store.upsert(&job.snapshot()).await;

        job.set_status(JobStatus::Downloading);
        job.total_urls = 3;
        store.upsert(&job.snapshot()).await;

        let (status, total): (String, i64) =
            sqlx::query_as("SELECT status, total_urls FROM parser_jobs WHERE id = ?")
                .bind(&job.id)
                .fetch_one(&store.pool)
                .await
                .unwrap();
        assert_eq!(status, "downloading");
        assert_eq!(total, 3);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM parser_jobs")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
