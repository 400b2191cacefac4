//! Relational store using SQLite
//!
//! This module owns the `profiles` table:
//! - Connection setup (WAL journal, bounded lock wait)
//! - Schema creation
//! - Loaded-source scan used for dedup
//! - Transactional appends
//! - Summary statistics for operators

mod schema;

pub use schema::*;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::record::StagedRow;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Handle on the relational store
#[derive(Clone)]
pub struct ProfileStore {
    pool: SqlitePool,
}

impl ProfileStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn connect(db_path: &Path, config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout());

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.busy_timeout())
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create the profiles table and its index if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        if !self.table_exists().await? {
            info!("Creating {} table", PROFILES_TABLE);
        }
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check whether the profiles table exists
    pub async fn table_exists(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name=?")
                .bind(PROFILES_TABLE)
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    /// Distinct source files already loaded; empty when the table is absent
    pub async fn loaded_sources(&self) -> Result<HashSet<String>> {
        if !self.table_exists().await? {
            return Ok(HashSet::new());
        }

        let sources: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT SOURCE_FILE FROM profiles WHERE SOURCE_FILE IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sources.into_iter().collect())
    }

    /// Append rows in a single transaction.
    ///
    /// Any failure drops the transaction, which rolls it back, so readers
    /// never observe a partial batch.
    pub async fn append_rows(&self, rows: &[StagedRow]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for row in rows {
            let result = sqlx::query(INSERT_SQL)
                .bind(row.n_prof)
                .bind(row.n_levels)
                .bind(row.juld)
                .bind(row.latitude)
                .bind(row.longitude)
                .bind(row.pres)
                .bind(row.temp)
                .bind(row.psal)
                .bind(row.pres_adjusted)
                .bind(row.temp_adjusted)
                .bind(row.psal_adjusted)
                .bind(row.source_file.as_str())
                .execute(&mut *tx)
                .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Total rows in the table (0 when absent)
    pub async fn row_count(&self) -> Result<i64> {
        if !self.table_exists().await? {
            return Ok(0);
        }
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Rows loaded from one source file
    pub async fn rows_for_source(&self, source_file: &str) -> Result<i64> {
        if !self.table_exists().await? {
            return Ok(0);
        }
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles WHERE SOURCE_FILE = ?")
            .bind(source_file)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Summary statistics over the whole table
    pub async fn summary(&self) -> Result<StoreSummary> {
        if !self.table_exists().await? {
            return Ok(StoreSummary::default());
        }

        let total_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles")
            .fetch_one(&self.pool)
            .await?;

        let source_files: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT SOURCE_FILE) FROM profiles")
                .fetch_one(&self.pool)
                .await?;

        let unique_locations: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT LATITUDE || ',' || LONGITUDE) FROM profiles",
        )
        .fetch_one(&self.pool)
        .await?;

        let per_source: Vec<(Option<String>, i64)> = sqlx::query_as(
            "SELECT SOURCE_FILE, COUNT(*) FROM profiles GROUP BY SOURCE_FILE ORDER BY SOURCE_FILE",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(StoreSummary {
            total_rows,
            source_files,
            unique_locations,
            temperature: self.column_range("TEMP").await?,
            salinity: self.column_range("PSAL").await?,
            pressure: self.column_range("PRES").await?,
            per_source: per_source
                .into_iter()
                .map(|(source_file, rows)| SourceCount {
                    source_file: source_file.unwrap_or_default(),
                    rows,
                })
                .collect(),
        })
    }

    async fn column_range(&self, column: &'static str) -> Result<ColumnRange> {
        let sql = format!(
            "SELECT MIN({column}), MAX({column}), AVG({column}) FROM profiles"
        );
        let (min, max, avg): (Option<f64>, Option<f64>, Option<f64>) =
            sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(ColumnRange { min, max, avg })
    }

    /// Close the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Min/max/mean of one measurement column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
}

/// Row count for one source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCount {
    pub source_file: String,
    pub rows: i64,
}

/// Summary of the relational store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSummary {
    pub total_rows: i64,
    pub source_files: i64,
    pub unique_locations: i64,
    pub temperature: ColumnRange,
    pub salinity: ColumnRange,
    pub pressure: ColumnRange,
    pub per_source: Vec<SourceCount>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    async fn setup_test_store(busy_timeout_secs: u64) -> (ProfileStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig {
            busy_timeout_secs,
            ..Default::default()
        };
        let store = ProfileStore::connect(&tmp.path().join("test.db"), &config)
            .await
            .unwrap();
        (store, tmp)
    }

    fn row(source: &str, level: i64, temp: Option<f64>) -> StagedRow {
        StagedRow {
            n_prof: Some(0),
            n_levels: Some(level),
            latitude: Some(10.0),
            longitude: Some(20.0),
            pres: Some(level as f64 * 10.0),
            temp,
            source_file: source.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_table_reads_as_empty() {
        let (store, _tmp) = setup_test_store(5).await;
        assert!(!store.table_exists().await.unwrap());
        assert!(store.loaded_sources().await.unwrap().is_empty());
        assert_eq!(store.row_count().await.unwrap(), 0);
        assert_eq!(store.summary().await.unwrap().total_rows, 0);
    }

    #[tokio::test]
    async fn test_append_and_scan_sources() {
        let (store, _tmp) = setup_test_store(5).await;
        store.ensure_schema().await.unwrap();

        let inserted = store
            .append_rows(&[
                row("a.nc", 0, Some(12.0)),
                row("a.nc", 1, None),
                row("b.nc", 0, Some(8.0)),
            ])
            .await
            .unwrap();
        assert_eq!(inserted, 3);

        let sources = store.loaded_sources().await.unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources.contains("a.nc"));
        assert_eq!(store.rows_for_source("a.nc").await.unwrap(), 2);
        assert_eq!(store.row_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_summary() {
        let (store, _tmp) = setup_test_store(5).await;
        store.ensure_schema().await.unwrap();
        store
            .append_rows(&[row("a.nc", 0, Some(12.0)), row("b.nc", 1, Some(8.0))])
            .await
            .unwrap();

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.total_rows, 2);
        assert_eq!(summary.source_files, 2);
        assert_eq!(summary.unique_locations, 1);
        assert_eq!(summary.temperature.min, Some(8.0));
        assert_eq!(summary.temperature.max, Some(12.0));
        assert_eq!(summary.temperature.avg, Some(10.0));
        assert_eq!(summary.salinity.min, None);
        assert_eq!(
            summary.per_source,
            vec![
                SourceCount { source_file: "a.nc".to_string(), rows: 1 },
                SourceCount { source_file: "b.nc".to_string(), rows: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_write_lock_contention_is_busy_and_rolled_back() {
        let (store, tmp) = setup_test_store(1).await;
        store.ensure_schema().await.unwrap();

        let other = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(tmp.path().join("test.db"))
                    .journal_mode(SqliteJournalMode::Wal),
            )
            .await
            .unwrap();
        let mut holder = other.acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *holder)
            .await
            .unwrap();

        let err = store
            .append_rows(&[row("a.nc", 0, None)])
            .await
            .unwrap_err();
        assert!(err.is_busy(), "expected busy error, got {err:?}");
        assert!(matches!(err, Error::StoreBusy(_)));

        sqlx::query("ROLLBACK").execute(&mut *holder).await.unwrap();
        drop(holder);
        assert_eq!(store.row_count().await.unwrap(), 0);
    }
}
