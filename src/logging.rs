//! Logging setup: console plus per-stage append-only log files
//!
//! - `extract.log`: extraction and consolidation events
//! - `load.log`: load, store and cleanup events
//! - `error.log`: every ERROR event, whatever its origin

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::Level;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::{prelude::*, EnvFilter, Layer, Registry};

pub const EXTRACT_LOG: &str = "extract.log";
pub const LOAD_LOG: &str = "load.log";
pub const ERROR_LOG: &str = "error.log";

/// Shared handle on one append-only log file
#[derive(Clone)]
pub struct AppendLog {
    file: Arc<Mutex<File>>,
}

impl AppendLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }
}

/// Buffers one event and writes it in a single call on flush/drop
pub struct AppendLogWriter {
    file: Arc<Mutex<File>>,
    buffer: Vec<u8>,
}

impl AppendLogWriter {
    fn flush_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }
}

impl Write for AppendLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer()
    }
}

impl Drop for AppendLogWriter {
    fn drop(&mut self) {
        let _ = self.flush_buffer();
    }
}

impl<'a> MakeWriter<'a> for AppendLog {
    type Writer = AppendLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        AppendLogWriter {
            file: Arc::clone(&self.file),
            buffer: Vec::new(),
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// File layers routing events into the three operational logs
pub fn file_layers(log_dir: &Path) -> Result<Vec<BoxedLayer>> {
    let extract_targets = Targets::new()
        .with_target("argo_ingest::extract", Level::INFO)
        .with_target("argo_ingest::consolidate", Level::INFO)
        .with_target("argo_ingest::archive", Level::INFO);

    let load_targets = Targets::new()
        .with_target("argo_ingest::load", Level::INFO)
        .with_target("argo_ingest::store", Level::INFO)
        .with_target("argo_ingest::cleanup", Level::INFO);

    Ok(vec![
        file_layer(&log_dir.join(EXTRACT_LOG))?
            .with_filter(extract_targets)
            .boxed(),
        file_layer(&log_dir.join(LOAD_LOG))?
            .with_filter(load_targets)
            .boxed(),
        file_layer(&log_dir.join(ERROR_LOG))?
            .with_filter(LevelFilter::ERROR)
            .boxed(),
    ])
}

fn file_layer(path: &Path) -> Result<impl Layer<Registry> + Send + Sync> {
    Ok(fmt::layer()
        .with_ansi(false)
        .with_writer(AppendLog::open(path)?))
}

/// Install the global subscriber.
///
/// Console output honours `RUST_LOG`; file logs are written only when
/// `log_dir` is given.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let files = match log_dir {
        Some(dir) => file_layers(dir)?,
        None => Vec::new(),
    };

    tracing_subscriber::registry()
        .with(files)
        .with(fmt::layer().with_writer(io::stderr).with_filter(filter))
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to initialize logging: {}", e)))
}
