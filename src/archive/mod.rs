//! Binary profile-archive access
//!
//! This module provides:
//! - A trait over array-based archives, so the extractor never touches a file format
//! - An opener trait so the pipeline can be pointed at a different backend
//! - The NetCDF-3 classic backend used for Argo profile files

mod netcdf;

pub use netcdf::*;

use crate::error::Result;
use serde::Serialize;
use std::path::Path;

/// Argo fill values (99999, 999999) and anything above are missing data
pub const FILL_THRESHOLD: f64 = 99_999.0;

/// True if `value` is a fill value or NaN
pub fn is_fill(value: f64) -> bool {
    value.is_nan() || value.abs() >= FILL_THRESHOLD
}

/// Mask fill values to `None`
pub fn mask(value: f64) -> Option<f64> {
    if is_fill(value) {
        None
    } else {
        Some(value)
    }
}

/// A fully-read numeric variable in row-major order
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub shape: Vec<usize>,
    pub values: Vec<Option<f64>>,
}

impl Variable {
    pub fn new(shape: Vec<usize>, values: Vec<Option<f64>>) -> Self {
        Self { shape, values }
    }

    /// Size of the leading dimension
    pub fn leading_dim(&self) -> usize {
        self.shape.first().copied().unwrap_or(self.values.len())
    }

    /// Number of dimensions
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Element `index` of a one-dimensional variable
    pub fn scalar_at(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }

    /// Row `index` of a variable with at least two dimensions, flattened.
    ///
    /// Returns `None` when the variable is not at least 2-D or the row lies
    /// outside the stored values.
    pub fn row(&self, index: usize) -> Option<&[Option<f64>]> {
        if self.shape.len() < 2 {
            return None;
        }
        let row_len: usize = self.shape[1..].iter().product();
        let start = index.checked_mul(row_len)?;
        let end = start.checked_add(row_len)?;
        self.values.get(start..end)
    }
}

/// Name, shape and element type of an archive variable
#[derive(Debug, Clone, Serialize)]
pub struct VariableInfo {
    pub name: String,
    pub shape: Vec<usize>,
    pub data_type: String,
}

/// Read access to one opened archive
pub trait ProfileArchive {
    /// Read a numeric variable; `Ok(None)` when the archive has no such variable
    fn variable(&mut self, name: &str) -> Result<Option<Variable>>;

    /// All variables in the archive
    fn describe(&self) -> Vec<VariableInfo>;
}

/// Opens archives from paths
pub trait ArchiveOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn ProfileArchive>>;
}

/// Create the default opener (NetCDF-3 classic)
pub fn default_opener() -> Box<dyn ArchiveOpener> {
    Box::new(NetcdfOpener)
}
