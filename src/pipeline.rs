//! One ETL job: consolidate, pause, load, clean up
//!
//! Stages run strictly in sequence. Cancellation is honoured between
//! stages only, so a stage that has started always runs to completion.

use crate::archive::{default_opener, ArchiveOpener};
use crate::cleanup::{purge_archives, CleanupStats};
use crate::config::Config;
use crate::consolidate::{AccumulationStore, ConsolidateStats, Consolidator};
use crate::error::{Error, Result};
use crate::load::{LoadStats, Loader};
use crate::scheduler::Job;
use crate::store::ProfileStore;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

pub const STAGE_CONSOLIDATE: &str = "consolidate";
pub const STAGE_LOAD: &str = "load";
pub const STAGE_CLEANUP: &str = "cleanup";

/// Outcome of one successful job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub consolidate: ConsolidateStats,
    pub load: LoadStats,
    pub cleanup: Option<CleanupStats>,
}

/// The ETL pipeline bound to one configuration
pub struct Pipeline {
    config: Config,
    opener: Arc<dyn ArchiveOpener>,
    store: ProfileStore,
}

impl Pipeline {
    /// Build a pipeline reading NetCDF archives
    pub async fn new(config: Config) -> Result<Self> {
        Self::with_opener(config, Arc::from(default_opener())).await
    }

    /// Build a pipeline with a custom archive reader
    pub async fn with_opener(config: Config, opener: Arc<dyn ArchiveOpener>) -> Result<Self> {
        config.validate()?;
        let store = ProfileStore::connect(&config.paths.db_file, &config.store).await?;
        Ok(Self {
            config,
            opener,
            store,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    pub fn accumulation(&self) -> AccumulationStore {
        AccumulationStore::new(&self.config.paths.accumulation_file)
    }

    /// Run every stage once
    pub async fn run_job(&self, job_id: Uuid, cancel: &CancellationToken) -> Result<JobReport> {
        let mut report = JobReport {
            job_id: job_id.to_string(),
            started_at: Utc::now().to_rfc3339(),
            ..Default::default()
        };

        checkpoint(cancel, STAGE_CONSOLIDATE)?;
        report.consolidate = self
            .consolidate()
            .await
            .map_err(|e| e.in_stage(STAGE_CONSOLIDATE))?;

        let delay = self.config.scheduler.stage_delay();
        debug!(job_id = %job_id, delay_secs = delay.as_secs(), "Waiting before load");
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled(STAGE_LOAD)),
            _ = tokio::time::sleep(delay) => {}
        }

        checkpoint(cancel, STAGE_LOAD)?;
        report.load = Loader::new(self.accumulation(), self.store.clone())
            .run()
            .await
            .map_err(|e| e.in_stage(STAGE_LOAD))?;

        if self.config.cleanup.enabled {
            checkpoint(cancel, STAGE_CLEANUP)?;
            report.cleanup = Some(
                self.cleanup(&report.consolidate.listed)
                    .await
                    .map_err(|e| e.in_stage(STAGE_CLEANUP))?,
            );
        } else {
            debug!(job_id = %job_id, "Cleanup disabled; keeping raw archives");
        }

        report.finished_at = Utc::now().to_rfc3339();
        info!(
            job_id = %job_id,
            consolidated = report.consolidate.files_consolidated,
            inserted = report.load.rows_inserted,
            total_rows = report.load.total_rows,
            "Job finished"
        );
        Ok(report)
    }

    async fn consolidate(&self) -> Result<ConsolidateStats> {
        let consolidator = Consolidator::new(
            Arc::clone(&self.opener),
            self.config.paths.input_dir.clone(),
            self.config.archive_extension(),
            self.accumulation(),
        );
        tokio::task::spawn_blocking(move || consolidator.run()).await?
    }

    async fn cleanup(&self, listed: &[String]) -> Result<CleanupStats> {
        let listed: HashSet<String> = listed.iter().cloned().collect();
        let loaded = if self.config.cleanup.retain_unloaded {
            Some(self.store.loaded_sources().await?)
        } else {
            None
        };
        let input_dir = self.config.paths.input_dir.clone();
        let extension = self.config.archive_extension().to_string();
        tokio::task::spawn_blocking(move || {
            purge_archives(&input_dir, &extension, &listed, loaded.as_ref())
        })
        .await?
    }
}

fn checkpoint(cancel: &CancellationToken, next_stage: &'static str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled(next_stage));
    }
    Ok(())
}

#[async_trait]
impl Job for Pipeline {
    async fn run(&self, job_id: Uuid, cancel: CancellationToken) -> Result<JobReport> {
        self.run_job(job_id, &cancel).await
    }
}
