//! Loader: accumulation rows into the relational store
//!
//! Only rows whose source file is not yet present in the store are
//! inserted, all in one transaction.

use crate::consolidate::AccumulationStore;
use crate::error::Result;
use crate::record::StagedRow;
use crate::store::ProfileStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Statistics from a load pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadStats {
    pub rows_in_accumulation: usize,
    pub rows_inserted: u64,
    pub files_loaded: Vec<String>,
    pub total_rows: i64,
}

/// Moves new accumulation rows into the relational store
pub struct Loader {
    accumulation: AccumulationStore,
    store: ProfileStore,
}

impl Loader {
    pub fn new(accumulation: AccumulationStore, store: ProfileStore) -> Self {
        Self {
            accumulation,
            store,
        }
    }

    /// Run one load pass
    pub async fn run(&self) -> Result<LoadStats> {
        let mut stats = LoadStats::default();

        let accumulation = self.accumulation.clone();
        let rows = tokio::task::spawn_blocking(move || accumulation.read_rows()).await??;
        stats.rows_in_accumulation = rows.len();

        self.store.ensure_schema().await?;
        let loaded = self.store.loaded_sources().await?;
        debug!(
            rows = rows.len(),
            loaded_sources = loaded.len(),
            "Scanned accumulation and store"
        );

        let new_rows: Vec<StagedRow> = rows
            .into_iter()
            .filter(|row| !loaded.contains(&row.source_file))
            .collect();

        if new_rows.is_empty() {
            stats.total_rows = self.store.row_count().await?;
            info!(total_rows = stats.total_rows, "No new rows to load");
            return Ok(stats);
        }

        let files: BTreeSet<&str> = new_rows.iter().map(|r| r.source_file.as_str()).collect();
        stats.files_loaded = files.into_iter().map(str::to_string).collect();

        stats.rows_inserted = self.store.append_rows(&new_rows).await?;
        stats.total_rows = self.store.row_count().await?;

        info!(
            rows = stats.rows_inserted,
            files = stats.files_loaded.len(),
            total_rows = stats.total_rows,
            "Loaded new rows"
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::record::ProfileRecord;
    use tempfile::TempDir;

    fn record(source: &str, level: i64) -> ProfileRecord {
        ProfileRecord {
            n_prof: 0,
            n_levels: level,
            juld: Some(25000.0),
            latitude: Some(-5.0),
            longitude: Some(150.0),
            pres: Some(level as f64),
            temp: None,
            psal: None,
            pres_adjusted: None,
            temp_adjusted: None,
            psal_adjusted: None,
            source_file: source.to_string(),
        }
    }

    async fn setup(tmp: &TempDir) -> (AccumulationStore, ProfileStore) {
        let accumulation = AccumulationStore::new(tmp.path().join("acc.csv"));
        let store = ProfileStore::connect(&tmp.path().join("db.sqlite"), &StoreConfig::default())
            .await
            .unwrap();
        (accumulation, store)
    }

    #[tokio::test]
    async fn test_missing_accumulation_creates_table_only() {
        let tmp = TempDir::new().unwrap();
        let (accumulation, store) = setup(&tmp).await;

        let stats = Loader::new(accumulation, store.clone()).run().await.unwrap();
        assert_eq!(stats.rows_inserted, 0);
        assert_eq!(stats.total_rows, 0);
        assert!(store.table_exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_only_new_sources_are_loaded() {
        let tmp = TempDir::new().unwrap();
        let (accumulation, store) = setup(&tmp).await;
        accumulation
            .append(&[record("a.nc", 0), record("a.nc", 1)])
            .unwrap();

        let loader = Loader::new(accumulation.clone(), store.clone());
        let first = loader.run().await.unwrap();
        assert_eq!(first.rows_inserted, 2);
        assert_eq!(first.files_loaded, vec!["a.nc".to_string()]);

        accumulation.append(&[record("c.nc", 0)]).unwrap();
        let second = loader.run().await.unwrap();
        assert_eq!(second.rows_in_accumulation, 3);
        assert_eq!(second.rows_inserted, 1);
        assert_eq!(second.files_loaded, vec!["c.nc".to_string()]);
        assert_eq!(second.total_rows, 3);

        let third = loader.run().await.unwrap();
        assert_eq!(third.rows_inserted, 0);
        assert_eq!(store.rows_for_source("a.nc").await.unwrap(), 2);
    }
}
