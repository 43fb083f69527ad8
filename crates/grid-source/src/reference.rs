//! Precipitation-frequency reference raster.

use std::path::Path;

use storm_common::{GridSpec, StormError, StormResult};
use storm_processor::ReferenceGrid;
use tracing::info;

use crate::array::read_grid;

/// A reference grid held in memory, usually at a finer resolution than
/// the precipitation grid.
#[derive(Debug, Clone)]
pub struct ReferenceRaster {
    spec: GridSpec,
    values: Vec<f32>,
}

impl ReferenceRaster {
    pub fn new(spec: GridSpec, values: Vec<f32>) -> StormResult<Self> {
        if values.len() != spec.len() {
            return Err(StormError::InvalidGrid(format!(
                "reference raster has {} values, grid has {}",
                values.len(),
                spec.len()
            )));
        }
        Ok(Self { spec, values })
    }

    /// Load a reference raster stored as a 2-D Zarr array.
    pub fn open_zarr(path: &Path, spec: GridSpec) -> StormResult<Self> {
        if !path.exists() {
            return Err(StormError::Io(format!(
                "reference grid not found: {}",
                path.display()
            )));
        }
        let values = read_grid(path, &spec)?;
        info!(
            path = %path.display(),
            nx = spec.nx,
            ny = spec.ny,
            "Loaded reference grid"
        );
        Self::new(spec, values)
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }
}

impl ReferenceGrid for ReferenceRaster {
    fn reference_value(&self, x: f64, y: f64) -> Option<f64> {
        let index = self.spec.coord_to_index(x, y)?;
        let value = *self.values.get(index)?;
        value.is_finite().then_some(value as f64)
    }
}
