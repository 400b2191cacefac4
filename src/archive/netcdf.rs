//! NetCDF-3 classic archive backend

use super::{mask, ArchiveOpener, ProfileArchive, Variable, VariableInfo};
use crate::error::{Error, Result};
use netcdf3::{DataVector, FileReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Opens `.nc` profile files with the pure-Rust NetCDF-3 reader
#[derive(Debug, Default, Clone, Copy)]
pub struct NetcdfOpener;

impl ArchiveOpener for NetcdfOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ProfileArchive>> {
        let reader = FileReader::open(path)
            .map_err(|e| Error::Archive(format!("{}: {:?}", path.display(), e)))?;
        debug!("Opened NetCDF archive {:?}", path);
        Ok(Box::new(NetcdfArchive {
            reader,
            path: path.to_path_buf(),
        }))
    }
}

/// An open NetCDF-3 file
pub struct NetcdfArchive {
    reader: FileReader,
    path: PathBuf,
}

impl ProfileArchive for NetcdfArchive {
    fn variable(&mut self, name: &str) -> Result<Option<Variable>> {
        let shape: Vec<usize> = match self.reader.data_set().get_var(name) {
            Some(var) => var.get_dims().iter().map(|d| d.size()).collect(),
            None => return Ok(None),
        };

        let data = self.reader.read_var(name).map_err(|e| {
            Error::Archive(format!("{}: variable {}: {:?}", self.path.display(), name, e))
        })?;

        Ok(Some(Variable::new(shape, masked_values(data))))
    }

    fn describe(&self) -> Vec<VariableInfo> {
        self.reader
            .data_set()
            .get_vars()
            .into_iter()
            .map(|var| VariableInfo {
                name: var.name().to_string(),
                shape: var.get_dims().iter().map(|d| d.size()).collect(),
                data_type: format!("{:?}", var.data_type()),
            })
            .collect()
    }
}

fn masked_values(data: DataVector) -> Vec<Option<f64>> {
    match data {
        DataVector::I8(v) => v.into_iter().map(|x| mask(f64::from(x))).collect(),
        DataVector::U8(v) => v.into_iter().map(|x| mask(f64::from(x))).collect(),
        DataVector::I16(v) => v.into_iter().map(|x| mask(f64::from(x))).collect(),
        DataVector::I32(v) => v.into_iter().map(|x| mask(f64::from(x))).collect(),
        DataVector::F32(v) => v.into_iter().map(|x| mask(f64::from(x))).collect(),
        DataVector::F64(v) => v.into_iter().map(mask).collect(),
    }
}
