//! Extractor: one profile archive in, per-profile record sets out
//!
//! Variables are read lazily and cached per file. A profile whose arrays
//! cannot be sliced is skipped with a warning; missing variables become
//! nulls (scalars) or empty arrays (per-level fields).

use crate::archive::{ArchiveOpener, ProfileArchive, Variable};
use crate::error::{Error, Result};
use crate::record::{ProfileRecord, LEVEL_VARIABLES};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

const SCALAR_VARIABLES: [&str; 3] = ["JULD", "LATITUDE", "LONGITUDE"];

/// All rows extracted for one profile index
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSet {
    pub n_prof: usize,
    pub records: Vec<ProfileRecord>,
}

type CachedVariable = std::result::Result<Option<Variable>, String>;

/// Lazy per-profile extraction over one opened archive
pub struct Extraction {
    archive: Box<dyn ProfileArchive>,
    source_file: String,
    cache: HashMap<&'static str, CachedVariable>,
    n_profiles: usize,
    next: usize,
    skipped: usize,
}

/// Open `path` and prepare a lazy extraction stamped with `source_file`.
///
/// Failing to open the archive is the only error returned here; everything
/// past that point degrades per profile.
pub fn extract_file(
    opener: &dyn ArchiveOpener,
    path: &Path,
    source_file: &str,
) -> Result<Extraction> {
    let archive = opener.open(path)?;
    let mut extraction = Extraction {
        archive,
        source_file: source_file.to_string(),
        cache: HashMap::new(),
        n_profiles: 0,
        next: 0,
        skipped: 0,
    };
    extraction.n_profiles = extraction.count_profiles();
    debug!(
        file = %source_file,
        profiles = extraction.n_profiles,
        "Prepared extraction"
    );
    Ok(extraction)
}

impl Extraction {
    /// Number of profiles detected in the archive
    pub fn profile_count(&self) -> usize {
        self.n_profiles
    }

    /// Profiles skipped so far because of read errors
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn variable(&mut self, name: &'static str) -> &CachedVariable {
        if !self.cache.contains_key(name) {
            let loaded = self.archive.variable(name).map_err(|e| e.to_string());
            if let Err(e) = &loaded {
                warn!(file = %self.source_file, variable = name, "Failed to read variable: {}", e);
            }
            self.cache.insert(name, loaded);
        }
        &self.cache[name]
    }

    /// Profile count from JULD, else the first 2-D measurement array
    fn count_profiles(&mut self) -> usize {
        if let Ok(Some(juld)) = self.variable("JULD") {
            return juld.leading_dim();
        }

        for name in LEVEL_VARIABLES {
            if let Ok(Some(var)) = self.variable(name) {
                if var.rank() >= 2 {
                    return var.leading_dim();
                }
            }
        }

        warn!(
            file = %self.source_file,
            "No JULD or 2-D measurement variable found; extracting zero profiles"
        );
        0
    }

    fn scalar(&mut self, name: &'static str, profile: usize) -> Option<f64> {
        match self.variable(name) {
            Ok(Some(var)) => var.scalar_at(profile),
            _ => None,
        }
    }

    fn level_array(&mut self, name: &'static str, profile: usize) -> Result<Vec<Option<f64>>> {
        match self.variable(name) {
            Ok(None) => Ok(Vec::new()),
            Ok(Some(var)) => var.row(profile).map(<[Option<f64>]>::to_vec).ok_or_else(|| {
                Error::Archive(format!(
                    "{} has no row {} (shape {:?})",
                    name, profile, var.shape
                ))
            }),
            Err(e) => Err(Error::Archive(format!("{}: {}", name, e))),
        }
    }

    /// Build all level rows of one profile
    fn read_profile(&mut self, profile: usize) -> Result<ProfileSet> {
        let [juld, latitude, longitude] = SCALAR_VARIABLES.map(|name| self.scalar(name, profile));

        let mut arrays = Vec::with_capacity(LEVEL_VARIABLES.len());
        for name in LEVEL_VARIABLES {
            arrays.push(self.level_array(name, profile)?);
        }

        // Trailing fill in PRES is padding up to the file-wide N_LEVELS
        let n_levels = arrays[0]
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |last| last + 1);
        let at = |field: usize, level: usize| arrays[field].get(level).copied().flatten();

        let records = (0..n_levels)
            .map(|level| ProfileRecord {
                n_prof: profile as i64,
                n_levels: level as i64,
                juld,
                latitude,
                longitude,
                pres: at(0, level),
                temp: at(1, level),
                psal: at(2, level),
                pres_adjusted: at(3, level),
                temp_adjusted: at(4, level),
                psal_adjusted: at(5, level),
                source_file: self.source_file.clone(),
            })
            .collect();

        Ok(ProfileSet {
            n_prof: profile,
            records,
        })
    }
}

impl Iterator for Extraction {
    type Item = ProfileSet;

    fn next(&mut self) -> Option<ProfileSet> {
        while self.next < self.n_profiles {
            let profile = self.next;
            self.next += 1;

            match self.read_profile(profile) {
                Ok(set) => return Some(set),
                Err(e) => {
                    self.skipped += 1;
                    warn!(
                        file = %self.source_file,
                        profile,
                        "Skipping profile: {}",
                        e
                    );
                }
            }
        }
        None
    }
}
