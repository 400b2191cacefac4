//! Inspect a single archive without touching any store

use crate::archive::{default_opener, ArchiveOpener, VariableInfo};
use crate::consolidate::source_name;
use crate::error::Result;
use crate::extract::extract_file;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

const PREVIEW_VARIABLES: [&str; 5] = ["TEMP", "PSAL", "PRES", "LATITUDE", "LONGITUDE"];
const PREVIEW_LEN: usize = 5;

/// What the extractor would produce for one archive
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub source_file: String,
    pub variables: Vec<VariableInfo>,
    pub preview: BTreeMap<String, Vec<Option<f64>>>,
    pub profiles: usize,
    pub profiles_skipped: usize,
    pub rows: usize,
    pub levels_per_profile: Vec<usize>,
}

/// Inspect `path` with the NetCDF reader
pub fn cmd_inspect(path: &Path) -> Result<Inspection> {
    inspect_with(default_opener().as_ref(), path)
}

/// Inspect `path` with a given archive reader
pub fn inspect_with(opener: &dyn ArchiveOpener, path: &Path) -> Result<Inspection> {
    info!("Inspecting {:?}", path);

    let source_file = source_name(path);
    let mut archive = opener.open(path)?;
    let variables = archive.describe();

    let mut preview = BTreeMap::new();
    for name in PREVIEW_VARIABLES {
        if let Some(var) = archive.variable(name)? {
            let head: Vec<Option<f64>> = var.values.into_iter().take(PREVIEW_LEN).collect();
            preview.insert(name.to_string(), head);
        }
    }
    drop(archive);

    let mut extraction = extract_file(opener, path, &source_file)?;
    let profiles = extraction.profile_count();
    let levels_per_profile: Vec<usize> = extraction.by_ref().map(|set| set.records.len()).collect();

    Ok(Inspection {
        source_file,
        variables,
        preview,
        profiles,
        profiles_skipped: extraction.skipped(),
        rows: levels_per_profile.iter().sum(),
        levels_per_profile,
    })
}

/// Print an inspection to console
pub fn print_inspection(inspection: &Inspection) {
    println!("\n🔎 {}\n", inspection.source_file);

    println!("Variables:");
    for var in &inspection.variables {
        println!("  {} {:?} ({})", var.name, var.shape, var.data_type);
    }

    if !inspection.preview.is_empty() {
        println!("\nFirst values:");
        for (name, values) in &inspection.preview {
            let shown: Vec<String> = values
                .iter()
                .map(|v| v.map_or_else(|| "--".to_string(), |x| format!("{:.3}", x)))
                .collect();
            println!("  {}: [{}]", name, shown.join(", "));
        }
    }

    println!("\nProfiles: {}", inspection.profiles);
    if inspection.profiles_skipped > 0 {
        println!("Skipped: {}", inspection.profiles_skipped);
    }
    println!("Rows: {}", inspection.rows);
    for (index, levels) in inspection.levels_per_profile.iter().enumerate() {
        println!("  profile {}: {} levels", index, levels);
    }
}
