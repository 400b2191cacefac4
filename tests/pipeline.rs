//! End-to-end job runs over a temporary working directory.
//!
//! Archives are JSON fixtures read through a custom `ArchiveOpener`, so
//! these tests exercise every stage without NetCDF files on disk.

use argo_ingest::archive::{ArchiveOpener, ProfileArchive, Variable, VariableInfo};
use argo_ingest::config::Config;
use argo_ingest::consolidate::AccumulationStore;
use argo_ingest::error::{Error, Result};
use argo_ingest::pipeline::{JobReport, Pipeline};
use argo_ingest::record::{StagedRow, COLUMNS};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Serialize, Deserialize)]
struct FixtureVar {
    shape: Vec<usize>,
    values: Vec<Option<f64>>,
}

struct JsonArchive(HashMap<String, FixtureVar>);

impl ProfileArchive for JsonArchive {
    fn variable(&mut self, name: &str) -> Result<Option<Variable>> {
        Ok(self
            .0
            .get(name)
            .map(|v| Variable::new(v.shape.clone(), v.values.clone())))
    }

    fn describe(&self) -> Vec<VariableInfo> {
        self.0
            .iter()
            .map(|(name, v)| VariableInfo {
                name: name.clone(),
                shape: v.shape.clone(),
                data_type: "f64".to_string(),
            })
            .collect()
    }
}

struct JsonOpener;

impl ArchiveOpener for JsonOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ProfileArchive>> {
        let content = std::fs::read_to_string(path)?;
        let vars: HashMap<String, FixtureVar> = serde_json::from_str(&content)
            .map_err(|e| Error::Archive(format!("{}: {}", path.display(), e)))?;
        Ok(Box::new(JsonArchive(vars)))
    }
}

/// Write a fixture whose profile `i` has `levels[i]` depth levels
fn write_archive(dir: &Path, name: &str, levels: &[usize]) {
    let n_prof = levels.len();
    let max_levels = levels.iter().copied().max().unwrap_or(0);

    let per_level = |scale: f64| {
        let mut values = Vec::with_capacity(n_prof * max_levels);
        for &count in levels {
            for level in 0..max_levels {
                values.push((level < count).then(|| (level as f64 + 1.0) * scale));
            }
        }
        FixtureVar {
            shape: vec![n_prof, max_levels],
            values,
        }
    };
    let per_profile = |base: f64| FixtureVar {
        shape: vec![n_prof],
        values: (0..n_prof).map(|i| Some(base + i as f64)).collect(),
    };

    let mut vars = HashMap::new();
    vars.insert("JULD", per_profile(25_000.0));
    vars.insert("LATITUDE", per_profile(-10.0));
    vars.insert("LONGITUDE", per_profile(150.0));
    vars.insert("PRES", per_level(10.0));
    vars.insert("TEMP", per_level(0.5));
    vars.insert("PSAL", per_level(3.5));

    std::fs::write(dir.join(name), serde_json::to_string(&vars).unwrap()).unwrap();
}

/// Drops `late` into the input directory while `trigger` is being read
struct ArrivingOpener {
    trigger: &'static str,
    late: &'static str,
}

impl ArchiveOpener for ArrivingOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ProfileArchive>> {
        if path.file_name().is_some_and(|n| n == self.trigger) {
            if let Some(dir) = path.parent() {
                if !dir.join(self.late).exists() {
                    write_archive(dir, self.late, &[2]);
                }
            }
        }
        JsonOpener.open(path)
    }
}

fn write_corrupt(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), b"\x89HDF not really").unwrap();
}

async fn pipeline(tmp: &TempDir, configure: impl FnOnce(&mut Config)) -> Pipeline {
    pipeline_with(tmp, Arc::new(JsonOpener), configure).await
}

async fn pipeline_with(
    tmp: &TempDir,
    opener: Arc<dyn ArchiveOpener>,
    configure: impl FnOnce(&mut Config),
) -> Pipeline {
    let mut config = Config::with_base_dir(tmp.path());
    config.extract.archive_extension = "bin".to_string();
    config.scheduler.stage_delay_secs = 0;
    config.store.busy_timeout_secs = 1;
    configure(&mut config);
    std::fs::create_dir_all(&config.paths.input_dir).unwrap();
    Pipeline::with_opener(config, opener).await.unwrap()
}

fn input_dir(pipeline: &Pipeline) -> &Path {
    &pipeline.config().paths.input_dir
}

async fn run(pipeline: &Pipeline) -> Result<JobReport> {
    pipeline
        .run_job(Uuid::new_v4(), &CancellationToken::new())
        .await
}

#[tokio::test]
async fn test_two_files_load_and_empty_the_input_dir() {
    let tmp = TempDir::new().unwrap();
    let pipeline = pipeline(&tmp, |_| {}).await;
    write_archive(input_dir(&pipeline), "A.bin", &[3, 2]);
    write_archive(input_dir(&pipeline), "B.bin", &[4]);

    let first = run(&pipeline).await.unwrap();
    assert_eq!(pipeline.accumulation().row_count().unwrap(), 9);
    assert_eq!(first.load.total_rows, 9);
    assert_eq!(std::fs::read_dir(input_dir(&pipeline)).unwrap().count(), 0);

    let second = run(&pipeline).await.unwrap();
    assert_eq!(pipeline.accumulation().row_count().unwrap(), 9);
    assert_eq!(second.load.total_rows, 9);
    assert_eq!(second.cleanup.unwrap().files_deleted, 0);
}

#[tokio::test]
async fn test_valid_corrupt_valid_batch() {
    let tmp = TempDir::new().unwrap();
    let pipeline = pipeline(&tmp, |_| {}).await;
    write_archive(input_dir(&pipeline), "A.bin", &[3, 2]);
    write_corrupt(input_dir(&pipeline), "B.bin");
    write_archive(input_dir(&pipeline), "C.bin", &[4]);

    let report = run(&pipeline).await.unwrap();
    assert_eq!(report.consolidate.files_consolidated, 2);
    assert_eq!(report.consolidate.files_failed, 1);
    assert!(report.consolidate.errors[0].starts_with("B.bin"));
    assert_eq!(report.load.rows_inserted, 9);
    assert_eq!(report.load.total_rows, 9);
    let cleanup = report.cleanup.as_ref().unwrap();
    assert_eq!(cleanup.files_deleted, 2);
    assert_eq!(cleanup.files_retained, 1);
    assert!(input_dir(&pipeline).join("B.bin").exists());

    let store = pipeline.store();
    assert_eq!(store.rows_for_source("A.bin").await.unwrap(), 5);
    assert_eq!(store.rows_for_source("B.bin").await.unwrap(), 0);
    assert_eq!(store.rows_for_source("C.bin").await.unwrap(), 4);

    // Only the corrupt file is retried on the next tick
    let second = run(&pipeline).await.unwrap();
    assert_eq!(second.consolidate.candidates, 1);
    assert_eq!(second.consolidate.files_failed, 1);
    assert_eq!(second.load.rows_inserted, 0);
    assert_eq!(second.cleanup.unwrap().files_deleted, 0);
    assert_eq!(store.row_count().await.unwrap(), 9);
}

#[tokio::test]
async fn test_sweep_mode_removes_failed_archives() {
    let tmp = TempDir::new().unwrap();
    let pipeline = pipeline(&tmp, |c| c.cleanup.retain_unloaded = false).await;
    write_archive(input_dir(&pipeline), "A.bin", &[3, 2]);
    write_corrupt(input_dir(&pipeline), "B.bin");

    let report = run(&pipeline).await.unwrap();
    assert_eq!(report.consolidate.files_failed, 1);
    assert_eq!(report.cleanup.unwrap().files_deleted, 2);
    assert_eq!(std::fs::read_dir(input_dir(&pipeline)).unwrap().count(), 0);
}

#[tokio::test]
async fn test_archive_arriving_mid_job_is_kept_for_the_next_run() {
    let tmp = TempDir::new().unwrap();
    let opener = Arc::new(ArrivingOpener {
        trigger: "A.bin",
        late: "D.bin",
    });
    let pipeline = pipeline_with(&tmp, opener, |c| c.cleanup.retain_unloaded = false).await;
    write_archive(input_dir(&pipeline), "A.bin", &[3, 2]);

    let first = run(&pipeline).await.unwrap();
    assert_eq!(first.consolidate.candidates, 1);
    let cleanup = first.cleanup.unwrap();
    assert_eq!(cleanup.files_deleted, 1);
    assert_eq!(cleanup.files_retained, 1);
    assert!(!input_dir(&pipeline).join("A.bin").exists());
    assert!(input_dir(&pipeline).join("D.bin").exists());
    assert_eq!(pipeline.store().rows_for_source("D.bin").await.unwrap(), 0);

    let second = run(&pipeline).await.unwrap();
    assert_eq!(second.consolidate.files_consolidated, 1);
    assert_eq!(second.load.files_loaded, vec!["D.bin".to_string()]);
    assert_eq!(pipeline.store().rows_for_source("D.bin").await.unwrap(), 2);
    assert_eq!(second.cleanup.unwrap().files_deleted, 1);
    assert!(!input_dir(&pipeline).join("D.bin").exists());
}

#[tokio::test]
async fn test_partial_accumulation_row_does_not_block_later_jobs() {
    let tmp = TempDir::new().unwrap();
    let pipeline = pipeline(&tmp, |_| {}).await;
    let accumulation = pipeline.accumulation();
    std::fs::write(
        accumulation.path(),
        format!(
            "{}\n0,0,1.0,2.0,3.0,4.0,5.0,6.0,,,,Z.bin\n0,1,1.0",
            COLUMNS.join(",")
        ),
    )
    .unwrap();
    write_archive(input_dir(&pipeline), "A.bin", &[2]);

    let report = run(&pipeline).await.unwrap();
    assert_eq!(report.consolidate.rows_appended, 2);
    assert_eq!(report.load.rows_inserted, 3);
    assert_eq!(pipeline.store().rows_for_source("Z.bin").await.unwrap(), 1);
    assert_eq!(pipeline.store().rows_for_source("A.bin").await.unwrap(), 2);
    assert_eq!(accumulation.row_count().unwrap(), 3);

    let second = run(&pipeline).await.unwrap();
    assert_eq!(second.load.rows_inserted, 0);
}

#[tokio::test]
async fn test_rerun_with_same_files_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let pipeline = pipeline(&tmp, |c| c.cleanup.enabled = false).await;
    write_archive(input_dir(&pipeline), "A.bin", &[3, 2]);
    write_archive(input_dir(&pipeline), "C.bin", &[4]);

    run(&pipeline).await.unwrap();
    let accumulation = pipeline.accumulation();
    let staged = accumulation.row_count().unwrap();
    let loaded = pipeline.store().row_count().await.unwrap();

    let second = run(&pipeline).await.unwrap();
    assert!(second.cleanup.is_none());
    assert_eq!(second.consolidate.already_consolidated, 2);
    assert_eq!(second.consolidate.rows_appended, 0);
    assert_eq!(second.load.rows_inserted, 0);
    assert_eq!(accumulation.row_count().unwrap(), staged);
    assert_eq!(pipeline.store().row_count().await.unwrap(), loaded);
    assert!(input_dir(&pipeline).join("A.bin").exists());
}

#[tokio::test]
async fn test_already_loaded_source_is_not_inserted_again() {
    let tmp = TempDir::new().unwrap();
    let pipeline = pipeline(&tmp, |_| {}).await;

    let store = pipeline.store();
    store.ensure_schema().await.unwrap();
    store
        .append_rows(&[StagedRow {
            n_prof: Some(0),
            n_levels: Some(0),
            source_file: "A.bin".to_string(),
            ..Default::default()
        }])
        .await
        .unwrap();

    write_archive(input_dir(&pipeline), "A.bin", &[3, 2]);
    write_archive(input_dir(&pipeline), "C.bin", &[4]);

    let report = run(&pipeline).await.unwrap();
    assert_eq!(report.consolidate.rows_appended, 9);
    assert_eq!(report.load.rows_inserted, 4);
    assert_eq!(report.load.files_loaded, vec!["C.bin".to_string()]);
    assert_eq!(store.rows_for_source("A.bin").await.unwrap(), 1);
}

#[tokio::test]
async fn test_level_counts_are_consistent() {
    let tmp = TempDir::new().unwrap();
    let pipeline = pipeline(&tmp, |c| c.cleanup.enabled = false).await;
    write_archive(input_dir(&pipeline), "A.bin", &[3, 2, 5]);

    run(&pipeline).await.unwrap();

    let rows = AccumulationStore::new(&pipeline.config().paths.accumulation_file)
        .read_rows()
        .unwrap();
    let mut by_profile: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for row in &rows {
        by_profile
            .entry(row.n_prof.unwrap())
            .or_default()
            .push(row.n_levels.unwrap());
    }

    assert_eq!(by_profile.len(), 3);
    for (profile, levels) in by_profile {
        let max = *levels.iter().max().unwrap();
        assert_eq!(levels.len() as i64, max + 1, "profile {}", profile);
        assert_eq!(levels, (0..=max).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_locked_store_fails_load_and_retries_next_run() {
    let tmp = TempDir::new().unwrap();
    let pipeline = pipeline(&tmp, |_| {}).await;
    pipeline.store().ensure_schema().await.unwrap();
    write_archive(input_dir(&pipeline), "A.bin", &[2]);

    let other = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(&pipeline.config().paths.db_file)
                .journal_mode(SqliteJournalMode::Wal),
        )
        .await
        .unwrap();
    let mut holder = other.acquire().await.unwrap();
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *holder)
        .await
        .unwrap();

    let err = run(&pipeline).await.unwrap_err();
    assert_eq!(err.stage(), Some("load"));
    assert!(err.is_busy());
    // Cleanup never ran, so the raw file is still there
    assert!(input_dir(&pipeline).join("A.bin").exists());
    assert_eq!(pipeline.accumulation().row_count().unwrap(), 2);

    sqlx::query("ROLLBACK").execute(&mut *holder).await.unwrap();
    drop(holder);
    other.close().await;

    let report = run(&pipeline).await.unwrap();
    assert_eq!(report.consolidate.rows_appended, 0);
    assert_eq!(report.load.rows_inserted, 2);
    assert_eq!(report.cleanup.unwrap().files_deleted, 1);
}

#[tokio::test]
async fn test_cancel_stops_before_next_stage() {
    let tmp = TempDir::new().unwrap();
    let pipeline = pipeline(&tmp, |_| {}).await;
    write_archive(input_dir(&pipeline), "A.bin", &[2]);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = pipeline
        .run_job(Uuid::new_v4(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled(_)));
    assert!(!pipeline.accumulation().exists());
    assert!(input_dir(&pipeline).join("A.bin").exists());
}
