//! Default values for configuration

/// Environment variable overriding the scheduler interval
pub const INTERVAL_ENV: &str = "ARGO_INGEST_INTERVAL_MINUTES";

/// Upper bound on the scheduler interval (one year)
pub const MAX_INTERVAL_MINUTES: u64 = 525_600;

/// Default archive extension (NetCDF)
pub fn default_archive_extension() -> String {
    "nc".to_string()
}

/// Default scheduler interval in minutes
pub fn default_interval_minutes() -> u64 {
    60
}

/// Default delay between consolidation and load, in seconds
pub fn default_stage_delay_secs() -> u64 {
    5
}

/// Default grace window for a late tick, in seconds
pub fn default_grace_secs() -> u64 {
    30
}

/// Default: run one job immediately on startup
pub fn default_run_on_startup() -> bool {
    true
}

/// Default bounded wait for the store lock, in seconds
pub fn default_busy_timeout_secs() -> u64 {
    30
}

/// Default SQLite pool size
pub fn default_max_connections() -> u32 {
    4
}

/// Default: cleanup enabled
pub fn default_cleanup_enabled() -> bool {
    true
}

/// Default: keep raw archives that never reached the store
pub fn default_retain_unloaded() -> bool {
    true
}
