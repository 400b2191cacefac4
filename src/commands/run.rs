//! Scheduled and one-shot pipeline execution

use crate::config::Config;
use crate::error::Result;
use crate::pipeline::{JobReport, Pipeline};
use crate::scheduler::{Scheduler, SchedulerStats};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Run the scheduler until `cancel` fires
pub async fn cmd_run(config: Config, cancel: CancellationToken) -> Result<SchedulerStats> {
    prepare_dirs(&config)?;
    info!(
        input_dir = %config.paths.input_dir.display(),
        db = %config.paths.db_file.display(),
        interval_minutes = config.scheduler.interval_minutes,
        "Starting scheduled ingestion"
    );

    let scheduler_config = config.scheduler.clone();
    let pipeline = Arc::new(Pipeline::new(config).await?);
    let scheduler = Scheduler::new(pipeline.clone(), &scheduler_config, cancel);
    let stats = scheduler.run().await?;

    pipeline.store().close().await;
    Ok(stats)
}

/// Run a single job now
pub async fn cmd_once(config: Config, cancel: CancellationToken) -> Result<JobReport> {
    prepare_dirs(&config)?;
    let pipeline = Pipeline::new(config).await?;
    let report = pipeline.run_job(Uuid::new_v4(), &cancel).await;
    pipeline.store().close().await;
    report
}

fn prepare_dirs(config: &Config) -> Result<()> {
    if !config.paths.input_dir.exists() {
        warn!(
            "Input directory {:?} does not exist; creating it",
            config.paths.input_dir
        );
        std::fs::create_dir_all(&config.paths.input_dir)?;
    }
    Ok(())
}

/// Print a job report to console
pub fn print_job_report(report: &JobReport) {
    println!("\n🌊 Job {}\n", report.job_id);
    println!("Consolidate:");
    println!("  Candidates: {}", report.consolidate.candidates);
    println!("  Already consolidated: {}", report.consolidate.already_consolidated);
    println!("  Consolidated: {}", report.consolidate.files_consolidated);
    println!("  Failed: {}", report.consolidate.files_failed);
    println!("  Rows appended: {}", report.consolidate.rows_appended);
    if report.consolidate.profiles_skipped > 0 {
        println!("  Profiles skipped: {}", report.consolidate.profiles_skipped);
    }

    println!("\nLoad:");
    println!("  Rows inserted: {}", report.load.rows_inserted);
    println!("  Files loaded: {}", report.load.files_loaded.len());
    println!("  Total rows: {}", report.load.total_rows);

    match &report.cleanup {
        Some(cleanup) => {
            println!("\nCleanup:");
            println!("  Deleted: {}", cleanup.files_deleted);
            if cleanup.files_retained > 0 {
                println!("  Retained: {}", cleanup.files_retained);
            }
        }
        None => println!("\nCleanup: disabled"),
    }

    let errors: Vec<&String> = report
        .consolidate
        .errors
        .iter()
        .chain(report.cleanup.iter().flat_map(|c| c.errors.iter()))
        .collect();
    if !errors.is_empty() {
        println!("\nErrors:");
        for error in errors {
            println!("  ✗ {}", error);
        }
    }
}

/// Print scheduler counters to console
pub fn print_scheduler_stats(stats: &SchedulerStats) {
    println!("\n⏱  Scheduler stopped\n");
    println!("Jobs started: {}", stats.started);
    println!("Succeeded: {}", stats.succeeded);
    println!("Failed: {}", stats.failed);
    println!("Skipped (overlap): {}", stats.skipped);
    println!("Missed ticks: {}", stats.missed_ticks);
}
