//! Store summary command implementation

use crate::config::Config;
use crate::error::Result;
use crate::store::{ColumnRange, ProfileStore, StoreSummary};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Summary report including where it was read from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryInfo {
    pub db_path: String,
    pub store_exists: bool,
    pub summary: StoreSummary,
}

/// Read summary statistics from the relational store
pub async fn cmd_summary(config: &Config) -> Result<SummaryInfo> {
    info!("Summarizing store");

    let db_path = config.paths.db_file.display().to_string();
    if !config.paths.db_file.exists() {
        return Ok(SummaryInfo {
            db_path,
            store_exists: false,
            summary: StoreSummary::default(),
        });
    }

    let store = ProfileStore::connect(&config.paths.db_file, &config.store).await?;
    let summary = store.summary().await?;
    store.close().await;

    Ok(SummaryInfo {
        db_path,
        store_exists: true,
        summary,
    })
}

fn format_range(range: &ColumnRange) -> String {
    match (range.min, range.max, range.avg) {
        (Some(min), Some(max), Some(avg)) => {
            format!("min {:.3}, max {:.3}, mean {:.3}", min, max, avg)
        }
        _ => "no data".to_string(),
    }
}

/// Print store summary to console
pub fn print_summary(info: &SummaryInfo) {
    println!("\n📊 Argo profile store\n");
    println!("Database: {}", info.db_path);

    if !info.store_exists {
        println!("\nNo database yet. Run 'argo-ingest once' to load profiles.");
        return;
    }

    let summary = &info.summary;
    println!("\nRows: {}", summary.total_rows);
    println!("Source files: {}", summary.source_files);
    println!("Unique locations: {}", summary.unique_locations);
    println!("\nMeasurements:");
    println!("  Temperature: {}", format_range(&summary.temperature));
    println!("  Salinity:    {}", format_range(&summary.salinity));
    println!("  Pressure:    {}", format_range(&summary.pressure));

    if !summary.per_source.is_empty() {
        println!("\nPer source file:");
        for source in &summary.per_source {
            println!("  • {} ({} rows)", source.source_file, source.rows);
        }
    }
}
