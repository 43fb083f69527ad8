//! Normalization against a precipitation-frequency reference grid.

use std::sync::Arc;

use storm_common::{GridSpec, RankedStorm, WindowStorm};

/// Finer-resolution reference values (e.g. a precipitation-frequency
/// estimate), looked up by coordinate.
pub trait ReferenceGrid: Send + Sync {
    /// Reference value at a coordinate, or `None` outside coverage.
    fn reference_value(&self, x: f64, y: f64) -> Option<f64>;
}

/// Divides storm accumulations by the mean reference value under each cell.
#[derive(Clone)]
pub struct Normalizer {
    reference: Arc<dyn ReferenceGrid>,
    spec: GridSpec,
    subdivisions: usize,
}

impl Normalizer {
    /// `subdivisions` is the number of reference cells per storm cell edge;
    /// 4 gives 16 reference cells per storm cell.
    pub fn new(reference: Arc<dyn ReferenceGrid>, spec: GridSpec, subdivisions: usize) -> Self {
        Self {
            reference,
            spec,
            subdivisions: subdivisions.max(1),
        }
    }

    /// Mean reference value under a storm cell, if fully covered.
    pub fn cell_reference(&self, cell: usize) -> Option<f64> {
        let centers = self.spec.subcell_centers(cell, self.subdivisions);
        let mut sum = 0.0;
        for (x, y) in &centers {
            let value = self.reference.reference_value(*x, *y)?;
            if !value.is_finite() {
                return None;
            }
            sum += value;
        }
        let mean = sum / centers.len() as f64;
        (mean > 0.0).then_some(mean)
    }

    /// Mean of per-cell accumulation / reference ratios.
    ///
    /// `None` when any storm cell lacks reference coverage.
    pub fn normalized_mean(&self, storm: &WindowStorm) -> Option<f64> {
        if storm.cells.is_empty() {
            return None;
        }
        let mut total = 0.0;
        for (&cell, &value) in storm.cells.iter().zip(&storm.values) {
            total += value / self.cell_reference(cell)?;
        }
        Some(total / storm.cells.len() as f64)
    }

    /// Record the normalized mean in the storm's statistics.
    pub fn annotate(&self, storm: &mut WindowStorm) {
        storm.stats.norm_mean = self.normalized_mean(storm);
    }

    pub fn apply(&self, ranked: &mut RankedStorm) {
        self.annotate(&mut ranked.storm);
    }
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer")
            .field("spec", &self.spec)
            .field("subdivisions", &self.subdivisions)
            .finish()
    }
}
