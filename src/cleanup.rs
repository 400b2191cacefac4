//! Raw archive cleanup after a successful load

use crate::consolidate::{list_archives, source_name};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Statistics from a cleanup pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupStats {
    pub files_deleted: usize,
    pub files_retained: usize,
    pub errors: Vec<String>,
}

/// Delete matching archives from `input_dir`.
///
/// Only archives named in `listed` (the files this job's consolidation saw)
/// are candidates; anything that arrived later is kept for the next job.
/// With `loaded` set, candidates whose name is not present in it are kept
/// too. A file that cannot be deleted is logged and skipped.
pub fn purge_archives(
    input_dir: &Path,
    extension: &str,
    listed: &HashSet<String>,
    loaded: Option<&HashSet<String>>,
) -> Result<CleanupStats> {
    let mut stats = CleanupStats::default();

    for path in list_archives(input_dir, extension)? {
        let name = source_name(&path);

        if !listed.contains(&name) {
            debug!(file = %name, "Archive arrived after consolidation; keeping it");
            stats.files_retained += 1;
            continue;
        }

        if let Some(loaded) = loaded {
            if !loaded.contains(&name) {
                warn!(file = %name, "Archive not in store; keeping it");
                stats.files_retained += 1;
                continue;
            }
        }

        match std::fs::remove_file(&path) {
            Ok(()) => stats.files_deleted += 1,
            Err(e) => {
                error!(file = %name, stage = "cleanup", "Failed to delete archive: {}", e);
                stats.errors.push(format!("{}: {}", name, e));
            }
        }
    }

    info!(
        deleted = stats.files_deleted,
        retained = stats.files_retained,
        failed = stats.errors.len(),
        "Cleanup complete"
    );

    Ok(stats)
}
