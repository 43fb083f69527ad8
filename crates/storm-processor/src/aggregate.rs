//! Per-window accumulation over the transposition area.

use storm_common::{AreaMask, GridSpec, StormError, StormResult, Window};
use tracing::debug;

use crate::config::RetryConfig;
use crate::source::{GridSource, HourlyGrid, RetryPolicy};

/// Accumulated precipitation (mm) for one window.
///
/// Cells outside the mask, and cells without a single finite hourly value,
/// hold `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedWindow {
    pub window: Window,
    pub spec: GridSpec,
    pub values: Vec<f64>,
}

impl AggregatedWindow {
    /// Sum hourly grids cell by cell, in the order given.
    pub fn from_grids(window: Window, mask: &AreaMask, grids: &[HourlyGrid]) -> StormResult<Self> {
        let spec = *mask.spec();
        let mut values = vec![f64::NAN; spec.len()];

        for grid in grids {
            if grid.spec != spec || grid.values.len() != spec.len() {
                return Err(StormError::InvalidGrid(format!(
                    "hourly grid {}x{} does not match mask grid {}x{}",
                    grid.spec.nx, grid.spec.ny, spec.nx, spec.ny
                )));
            }
            for cell in mask.valid_indices() {
                let v = grid.values[cell];
                if !v.is_finite() {
                    continue;
                }
                let acc = &mut values[cell];
                *acc = if acc.is_nan() { v as f64 } else { *acc + v as f64 };
            }
        }

        Ok(Self {
            window,
            spec,
            values,
        })
    }

    /// Accumulation of a cell, if it is inside the area and has data.
    pub fn value(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().filter(|v| !v.is_nan())
    }

    /// Indices and accumulations of every cell with data, ascending.
    pub fn valid_values(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nan())
            .map(|(i, v)| (i, *v))
    }
}

/// Fetch every hour of a window and accumulate it over the mask.
///
/// Transient retrieval failures are retried per hour; a missing hour
/// fails the whole window with [`StormError::DataGap`].
pub async fn aggregate_window(
    source: &dyn GridSource,
    mask: &AreaMask,
    window: Window,
    retry: &RetryConfig,
) -> StormResult<AggregatedWindow> {
    if source.spec() != mask.spec() {
        return Err(StormError::InvalidGrid(
            "grid source and mask use different grids".to_string(),
        ));
    }

    let policy = RetryPolicy::from(retry);
    let mut grids = Vec::with_capacity(window.duration_hours as usize);
    for hour in window.hours() {
        let label = hour.format("%Y%m%d%H").to_string();
        let grid = policy.run(&label, || source.hourly_grid(hour)).await?;
        grids.push(grid);
    }

    debug!(
        window_start = %window.start,
        hours = grids.len(),
        "Fetched hourly grids"
    );

    AggregatedWindow::from_grids(window, mask, &grids)
}
