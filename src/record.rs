//! Flat per-level profile rows shared by every pipeline stage

use serde::{Deserialize, Serialize};

/// Column order of the consolidation accumulation
pub const COLUMNS: [&str; 12] = [
    "N_PROF",
    "N_LEVELS",
    "JULD",
    "LATITUDE",
    "LONGITUDE",
    "PRES",
    "TEMP",
    "PSAL",
    "PRES_ADJUSTED",
    "TEMP_ADJUSTED",
    "PSAL_ADJUSTED",
    "SOURCE_FILE",
];

/// Per-level measurement variables, in column order
pub const LEVEL_VARIABLES: [&str; 6] = [
    "PRES",
    "TEMP",
    "PSAL",
    "PRES_ADJUSTED",
    "TEMP_ADJUSTED",
    "PSAL_ADJUSTED",
];

/// One row per (source file, profile index, depth level)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ProfileRecord {
    pub n_prof: i64,
    pub n_levels: i64,
    pub juld: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub pres: Option<f64>,
    pub temp: Option<f64>,
    pub psal: Option<f64>,
    pub pres_adjusted: Option<f64>,
    pub temp_adjusted: Option<f64>,
    pub psal_adjusted: Option<f64>,
    pub source_file: String,
}

/// A row read back from the accumulation.
///
/// Every column except `SOURCE_FILE` may be absent from an older or
/// hand-edited accumulation, so all of them are nullable here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagedRow {
    pub n_prof: Option<i64>,
    pub n_levels: Option<i64>,
    pub juld: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub pres: Option<f64>,
    pub temp: Option<f64>,
    pub psal: Option<f64>,
    pub pres_adjusted: Option<f64>,
    pub temp_adjusted: Option<f64>,
    pub psal_adjusted: Option<f64>,
    pub source_file: String,
}

impl From<ProfileRecord> for StagedRow {
    fn from(r: ProfileRecord) -> Self {
        Self {
            n_prof: Some(r.n_prof),
            n_levels: Some(r.n_levels),
            juld: r.juld,
            latitude: r.latitude,
            longitude: r.longitude,
            pres: r.pres,
            temp: r.temp,
            psal: r.psal,
            pres_adjusted: r.pres_adjusted,
            temp_adjusted: r.temp_adjusted,
            psal_adjusted: r.psal_adjusted,
            source_file: r.source_file,
        }
    }
}
