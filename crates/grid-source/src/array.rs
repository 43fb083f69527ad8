//! Reading and writing single 2-D float32 Zarr arrays.

use std::path::Path;
use std::sync::Arc;

use storm_common::{GridSpec, StormError, StormResult};
use zarrs::array::{Array, ArrayBuilder, ChunkGrid, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

/// Read a whole `[ny, nx]` float32 array, checking its shape against `spec`.
///
/// Failures after the array directory is found are reported as
/// [`StormError::SourceUnavailable`] so callers may retry them.
pub fn read_grid(path: &Path, spec: &GridSpec) -> StormResult<Vec<f32>> {
    let store = FilesystemStore::new(path).map_err(|e| {
        StormError::SourceUnavailable(format!("{}: {}", path.display(), e))
    })?;
    let array = Array::open(Arc::new(store), "/").map_err(|e| {
        StormError::SourceUnavailable(format!("failed to open {}: {}", path.display(), e))
    })?;

    let expected = [spec.ny as u64, spec.nx as u64];
    if array.shape() != expected.as_slice() {
        return Err(StormError::InvalidGrid(format!(
            "{} has shape {:?}, expected {:?}",
            path.display(),
            array.shape(),
            expected
        )));
    }

    // Zarr uses [row, col] indexing
    let subset = ArraySubset::new_with_start_shape(vec![0, 0], expected.to_vec())
        .map_err(|e| StormError::InvalidGrid(e.to_string()))?;

    array
        .retrieve_array_subset_elements::<f32>(&subset)
        .map_err(|e| {
            StormError::SourceUnavailable(format!("failed to read {}: {}", path.display(), e))
        })
}

/// Write a `[ny, nx]` float32 array as a single chunk, NaN fill.
pub fn write_grid(path: &Path, spec: &GridSpec, values: &[f32]) -> StormResult<()> {
    if values.len() != spec.len() || spec.is_empty() {
        return Err(StormError::InvalidGrid(format!(
            "cannot write {} values to a {}x{} grid",
            values.len(),
            spec.nx,
            spec.ny
        )));
    }

    std::fs::create_dir_all(path)?;
    let store = FilesystemStore::new(path)
        .map_err(|e| StormError::Io(format!("{}: {}", path.display(), e)))?;

    let shape = vec![spec.ny as u64, spec.nx as u64];
    let chunk_grid: ChunkGrid = shape
        .clone()
        .try_into()
        .map_err(|e| StormError::InvalidGrid(format!("invalid chunk shape: {:?}", e)))?;

    let array = ArrayBuilder::new(
        shape.clone(),
        DataType::Float32,
        chunk_grid,
        FillValue::from(f32::NAN),
    )
    .build(Arc::new(store), "/")
    .map_err(|e| StormError::Io(format!("failed to create array: {}", e)))?;

    array
        .store_metadata()
        .map_err(|e| StormError::Io(format!("failed to write metadata: {}", e)))?;

    let subset = ArraySubset::new_with_start_shape(vec![0, 0], shape)
        .map_err(|e| StormError::InvalidGrid(e.to_string()))?;
    array
        .store_array_subset_elements(&subset, values)
        .map_err(|e| StormError::Io(format!("failed to write data: {}", e)))?;

    Ok(())
}
