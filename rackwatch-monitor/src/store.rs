//! Local history in SQLite. Append only: rows are never read back by the
//! daemon.

use async_trait::async_trait;
use rackwatch_core::{Sample, Sink, SinkError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use tracing::info;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS readings (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    captured_at TEXT NOT NULL,
    temperature REAL,
    humidity    REAL,
    status      TEXT NOT NULL
)";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("cannot format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (or creates) the database file and makes sure the table exists.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        info!(path = %path.display(), "readings database ready");
        Ok(Self { pool })
    }

    pub async fn append(&self, sample: &Sample) -> Result<(), StoreError> {
        let captured_at = sample.captured_at.format(&Rfc3339)?;
        sqlx::query(
            "INSERT INTO readings (captured_at, temperature, humidity, status) VALUES (?, ?, ?, ?)",
        )
        .bind(captured_at)
        .bind(sample.temperature())
        .bind(sample.humidity())
        .bind(sample.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Sink for SqliteStore {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn deliver(&self, sample: &Sample) -> Result<(), SinkError> {
        self.append(sample).await.map_err(SinkError::delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rackwatch_core::{Reading, SensorError, Status};
    use std::time::Duration;

    type Row = (String, Option<f64>, Option<f64>, String);

    async fn rows(store: &SqliteStore) -> Vec<Row> {
        sqlx::query_as("SELECT captured_at, temperature, humidity, status FROM readings ORDER BY id")
            .fetch_all(&store.pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn appends_one_row_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("rack.db")).await.unwrap();

        let ok = Sample::from_acquisition(1, &Ok(Reading::new(23.5, 41.0)), Status::Normal);
        let failed = Sample::from_acquisition(
            2,
            &Err(SensorError::Timeout(Duration::from_secs(5))),
            Status::Error,
        );
        store.deliver(&ok).await.unwrap();
        store.deliver(&failed).await.unwrap();

        let rows = rows(&store).await;
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].1, rows[0].2, rows[0].3.as_str()), (Some(23.5), Some(41.0), "NORMAL"));
        assert_eq!((rows[1].1, rows[1].2, rows[1].3.as_str()), (None, None, "ERROR"));
    }

    #[tokio::test]
    async fn reopening_keeps_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rack.db");

        let first = SqliteStore::open(&path).await.unwrap();
        first
            .append(&Sample::from_acquisition(1, &Ok(Reading::new(20.0, 30.0)), Status::Normal))
            .await
            .unwrap();
        first.pool.close().await;

        let second = SqliteStore::open(&path).await.unwrap();
        assert_eq!(rows(&second).await.len(), 1);
    }

    #[tokio::test]
    async fn unopenable_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/rack.db");
        assert!(SqliteStore::open(&path).await.is_err());
    }
}
