//! SQLite schema definition

/// Name of the profile table read by query-serving clients
pub const PROFILES_TABLE: &str = "profiles";

/// SQL schema for the relational store
pub const SCHEMA_SQL: &str = r#"
-- One row per (source file, profile, depth level)
CREATE TABLE IF NOT EXISTS profiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    N_PROF INTEGER,
    N_LEVELS INTEGER,
    JULD REAL,
    LATITUDE REAL,
    LONGITUDE REAL,
    PRES REAL,
    TEMP REAL,
    PSAL REAL,
    PRES_ADJUSTED REAL,
    TEMP_ADJUSTED REAL,
    PSAL_ADJUSTED REAL,
    SOURCE_FILE TEXT
);

-- Loaded-source scan
CREATE INDEX IF NOT EXISTS idx_profiles_source ON profiles(SOURCE_FILE);
"#;

pub(crate) const INSERT_SQL: &str = r#"
INSERT INTO profiles (
    N_PROF, N_LEVELS, JULD, LATITUDE, LONGITUDE,
    PRES, TEMP, PSAL, PRES_ADJUSTED, TEMP_ADJUSTED, PSAL_ADJUSTED, SOURCE_FILE
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;
