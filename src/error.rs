//! Custom error types for argo-ingest

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Store busy: {0}")]
    StoreBusy(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Cancelled before stage '{0}'")]
    Cancelled(&'static str),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is transient lock contention on the relational store
    pub fn is_busy(&self) -> bool {
        match self {
            Error::StoreBusy(_) => true,
            Error::Stage { source, .. } => source.is_busy(),
            _ => false,
        }
    }

    /// Pipeline stage this error was raised in, if known
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Error::Stage { stage, .. } | Error::Cancelled(stage) => Some(*stage),
            _ => None,
        }
    }

    /// Attach the pipeline stage to an error
    pub fn in_stage(self, stage: &'static str) -> Self {
        match self {
            Error::Stage { .. } | Error::Cancelled(_) => self,
            other => Error::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes
        let busy = match &err {
            sqlx::Error::Database(db_err) => db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| matches!(code & 0xff, 5 | 6))
                .unwrap_or(false),
            sqlx::Error::PoolTimedOut => true,
            _ => false,
        };
        if busy {
            Error::StoreBusy(err.to_string())
        } else {
            Error::Database(err)
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Result type alias for argo-ingest
pub type Result<T> = std::result::Result<T, Error>;
