//! Consolidation accumulation and the Consolidator stage
//!
//! The accumulation is one append-only CSV file with a fixed header. Rows
//! are appended one source file at a time, so a failure on one archive never
//! loses or duplicates the rows of archives that were already written.

use crate::archive::ArchiveOpener;
use crate::error::{Error, Result};
use crate::extract::extract_file;
use crate::record::{ProfileRecord, StagedRow, COLUMNS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

const SOURCE_FILE: &str = "SOURCE_FILE";

/// Handle on the accumulation CSV
#[derive(Debug, Clone)]
pub struct AccumulationStore {
    path: PathBuf,
}

impl AccumulationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Missing or zero-length
    fn is_empty(&self) -> bool {
        std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true)
    }

    fn reader(&self) -> Result<csv::Reader<File>> {
        Ok(csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)?)
    }

    /// Truncate a partial last row left behind by an interrupted append.
    ///
    /// Returns whether anything was dropped.
    pub fn repair_tail(&self) -> Result<bool> {
        if !self.exists() {
            return Ok(false);
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(false);
        }

        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))?;
        file.read_exact(&mut last)?;
        if last[0] == b'\n' {
            return Ok(false);
        }

        let keep = end_of_last_line(&mut file, len)?;
        warn!(
            file = %self.path.display(),
            dropped_bytes = len - keep,
            "Dropping partial row at the end of the accumulation"
        );
        file.set_len(keep)?;
        file.sync_all()?;
        Ok(true)
    }

    /// Distinct `SOURCE_FILE` values already accumulated
    pub fn consolidated_sources(&self) -> Result<BTreeSet<String>> {
        if self.is_empty() {
            return Ok(BTreeSet::new());
        }

        let mut reader = self.reader()?;
        let headers = reader.headers()?.clone();
        let idx = column_index(&headers, SOURCE_FILE).ok_or_else(|| {
            Error::Schema(format!(
                "{} has no {} column",
                self.path.display(),
                SOURCE_FILE
            ))
        })?;

        let mut sources = BTreeSet::new();
        let mut malformed = 0usize;
        for record in reader.records() {
            let record = record?;
            if record.len() != headers.len() {
                malformed += 1;
                continue;
            }
            if let Some(source) = record.get(idx).filter(|s| !s.is_empty()) {
                if !sources.contains(source) {
                    sources.insert(source.to_string());
                }
            }
        }
        warn_malformed(&self.path, malformed);
        Ok(sources)
    }

    /// Append rows, writing the header first if the file is new or empty
    pub fn append(&self, records: &[ProfileRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.repair_tail()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            debug!("Creating accumulation {:?}", self.path);
            writer.write_record(COLUMNS)?;
        }
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;

        let file = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;

        Ok(records.len())
    }

    /// Read every accumulated row.
    ///
    /// Expected columns that are absent are logged and read as null.
    /// `SOURCE_FILE` is mandatory since it is the dedup key.
    pub fn read_rows(&self) -> Result<Vec<StagedRow>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let mut reader = self.reader()?;
        let headers = reader.headers()?.clone();
        let map = ColumnMap::new(&headers);

        let missing = map.missing();
        if !missing.is_empty() {
            warn!(
                file = %self.path.display(),
                columns = ?missing,
                "Accumulation is missing expected columns; loading them as null"
            );
        }

        let source_idx = map.index(SOURCE_FILE).ok_or_else(|| {
            Error::Schema(format!(
                "{} has no {} column",
                self.path.display(),
                SOURCE_FILE
            ))
        })?;

        let mut rows = Vec::new();
        let mut unparsed = 0usize;
        let mut malformed = 0usize;
        for record in reader.records() {
            let record = record?;
            if record.len() != headers.len() {
                malformed += 1;
                continue;
            }
            let source_file = record.get(source_idx).unwrap_or_default().to_string();
            if source_file.is_empty() {
                unparsed += 1;
                continue;
            }

            let mut float = |col: &str| -> Option<f64> {
                let raw = map.index(col).and_then(|i| record.get(i))?.trim();
                if raw.is_empty() {
                    return None;
                }
                let parsed = raw.parse::<f64>().ok();
                if parsed.is_none() {
                    unparsed += 1;
                }
                parsed
            };

            let n_prof = float("N_PROF").map(|v| v as i64);
            let n_levels = float("N_LEVELS").map(|v| v as i64);
            rows.push(StagedRow {
                n_prof,
                n_levels,
                juld: float("JULD"),
                latitude: float("LATITUDE"),
                longitude: float("LONGITUDE"),
                pres: float("PRES"),
                temp: float("TEMP"),
                psal: float("PSAL"),
                pres_adjusted: float("PRES_ADJUSTED"),
                temp_adjusted: float("TEMP_ADJUSTED"),
                psal_adjusted: float("PSAL_ADJUSTED"),
                source_file,
            });
        }

        if unparsed > 0 {
            warn!(
                file = %self.path.display(),
                count = unparsed,
                "Unreadable accumulation values were treated as null or skipped"
            );
        }
        warn_malformed(&self.path, malformed);

        Ok(rows)
    }

    /// Number of data rows (excluding the header)
    pub fn row_count(&self) -> Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }
        let mut reader = self.reader()?;
        let width = reader.headers()?.len();
        let mut count = 0;
        for record in reader.records() {
            if record?.len() == width {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Byte offset just past the last newline in the first `len` bytes
fn end_of_last_line(file: &mut File, len: u64) -> Result<u64> {
    const BLOCK: u64 = 8192;
    let mut buf = vec![0u8; BLOCK as usize];
    let mut end = len;
    while end > 0 {
        let start = end.saturating_sub(BLOCK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

fn warn_malformed(path: &Path, count: usize) {
    if count > 0 {
        warn!(
            file = %path.display(),
            count,
            "Skipped accumulation rows with the wrong number of fields"
        );
    }
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name))
}

/// Header positions of the expected columns
struct ColumnMap {
    positions: Vec<(&'static str, Option<usize>)>,
}

impl ColumnMap {
    fn new(headers: &csv::StringRecord) -> Self {
        Self {
            positions: COLUMNS
                .iter()
                .map(|&col| (col, column_index(headers, col)))
                .collect(),
        }
    }

    fn index(&self, col: &str) -> Option<usize> {
        self.positions
            .iter()
            .find(|(name, _)| *name == col)
            .and_then(|(_, idx)| *idx)
    }

    fn missing(&self) -> Vec<&'static str> {
        self.positions
            .iter()
            .filter(|(_, idx)| idx.is_none())
            .map(|(name, _)| *name)
            .collect()
    }
}

/// List archives directly inside `dir` whose extension matches, sorted by name
pub fn list_archives(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::InvalidPath(format!(
            "input directory {} is not a readable directory",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        match entry {
            Ok(e) if e.file_type().is_file() => {
                let matches = e
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case(extension))
                    .unwrap_or(false);
                if matches {
                    files.push(e.into_path());
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Skipping unreadable input entry: {}", e),
        }
    }
    Ok(files)
}

/// Provenance label for a raw file: its file name
pub fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Statistics from a consolidation pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidateStats {
    pub candidates: usize,
    pub already_consolidated: usize,
    pub files_consolidated: usize,
    pub files_failed: usize,
    pub files_empty: usize,
    pub profiles_skipped: usize,
    pub rows_appended: usize,
    pub errors: Vec<String>,
    /// Archive names this pass listed in the input directory
    #[serde(skip)]
    pub listed: Vec<String>,
}

/// Extract new archives and append them to the accumulation
pub struct Consolidator {
    opener: Arc<dyn ArchiveOpener>,
    input_dir: PathBuf,
    extension: String,
    accumulation: AccumulationStore,
}

impl Consolidator {
    pub fn new(
        opener: Arc<dyn ArchiveOpener>,
        input_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        accumulation: AccumulationStore,
    ) -> Self {
        Self {
            opener,
            input_dir: input_dir.into(),
            extension: extension.into(),
            accumulation,
        }
    }

    /// Run one consolidation pass.
    ///
    /// Per-file extraction failures are recorded in the stats and do not
    /// stop the batch. A failure to write the accumulation is returned.
    pub fn run(&self) -> Result<ConsolidateStats> {
        let mut stats = ConsolidateStats::default();

        let candidates = list_archives(&self.input_dir, &self.extension)?;
        self.accumulation.repair_tail()?;
        let mut consolidated = self.accumulation.consolidated_sources()?;
        stats.candidates = candidates.len();
        stats.listed = candidates.iter().map(|p| source_name(p)).collect();

        let new_files: Vec<PathBuf> = candidates
            .into_iter()
            .filter(|p| !consolidated.contains(&source_name(p)))
            .collect();
        stats.already_consolidated = stats.candidates - new_files.len();

        if new_files.is_empty() {
            info!(
                candidates = stats.candidates,
                "No new archives to consolidate"
            );
            return Ok(stats);
        }

        info!("Found {} new archives to consolidate", new_files.len());

        for path in new_files {
            let name = source_name(&path);
            if consolidated.contains(&name) {
                stats.already_consolidated += 1;
                continue;
            }

            let mut extraction = match extract_file(self.opener.as_ref(), &path, &name) {
                Ok(extraction) => extraction,
                Err(e) => {
                    let error_msg = format!("{}: {}", name, e);
                    error!(file = %name, stage = "extract", "Extraction failed: {}", e);
                    stats.errors.push(error_msg);
                    stats.files_failed += 1;
                    continue;
                }
            };

            let records: Vec<ProfileRecord> = extraction
                .by_ref()
                .flat_map(|set| set.records)
                .collect();
            stats.profiles_skipped += extraction.skipped();

            if records.is_empty() {
                warn!(file = %name, "No rows extracted; file left for the next run");
                stats.files_empty += 1;
                continue;
            }

            let written = self.accumulation.append(&records)?;
            consolidated.insert(name.clone());
            stats.files_consolidated += 1;
            stats.rows_appended += written;
            info!(file = %name, rows = written, "Consolidated archive");
        }

        info!(
            files = stats.files_consolidated,
            failed = stats.files_failed,
            rows = stats.rows_appended,
            "Consolidation complete"
        );

        Ok(stats)
    }
}
