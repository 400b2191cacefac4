//! argo-ingest: incremental ETL from Argo float profile archives into SQLite
//!
//! A job consolidates new archives into an append-only CSV accumulation,
//! loads rows from not-yet-loaded source files into the `profiles` table,
//! then removes the processed raw archives. A single-flight scheduler runs
//! jobs periodically.

pub mod archive;
pub mod cleanup;
pub mod commands;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod extract;
pub mod load;
pub mod logging;
pub mod pipeline;
pub mod record;
pub mod scheduler;
pub mod store;

pub use error::{Error, Result};
