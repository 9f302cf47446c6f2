//! NumPy `.npy` files for `f32` arrays, backed by `npyz`.
//!
//! Arrays are written in C order with the native `<f4` dtype, which is what
//! the pipeline produces for depth maps and density grids.

use crate::error::{DataError, Result};
use crate::json::ensure_parent_dir;
use npyz::{Order, WriterBuilder};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::debug;

/// A dense `f32` array with its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl NpyArray {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        Self { shape, data }
    }
}

/// Write `data` with the given `shape` to `path`.
pub fn write_npy(path: &Path, shape: &[usize], data: &[f32]) -> Result<()> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
        return Err(DataError::InvalidNpy {
            path: path.to_path_buf(),
            reason: format!("shape {shape:?} needs {expected} values, got {}", data.len()),
        });
    }

    ensure_parent_dir(path)?;
    let file = File::create(path).map_err(|e| DataError::io(path, e))?;
    let dims: Vec<u64> = shape.iter().map(|&d| d as u64).collect();

    let mut writer = npyz::WriteOptions::new()
        .default_dtype()
        .shape(&dims)
        .writer(BufWriter::new(file))
        .begin_nd()
        .map_err(|e| DataError::io(path, e))?;
    writer
        .extend(data.iter().copied())
        .map_err(|e| DataError::io(path, e))?;
    writer.finish().map_err(|e| DataError::io(path, e))?;

    debug!(path = %path.display(), ?shape, "Wrote npy array");
    Ok(())
}

/// Read an `f32` array from `path`.
pub fn read_npy(path: &Path) -> Result<NpyArray> {
    let invalid = |reason: String| DataError::InvalidNpy {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| DataError::io(path, e))?;
    let npy = npyz::NpyFile::new(BufReader::new(file)).map_err(|e| invalid(e.to_string()))?;
    if matches!(npy.order(), Order::Fortran) {
        return Err(invalid("fortran ordered arrays are not supported".into()));
    }

    let shape = npy.shape().iter().map(|&d| d as usize).collect();
    let data = npy.into_vec::<f32>().map_err(|e| invalid(e.to_string()))?;
    Ok(NpyArray { shape, data })
}
