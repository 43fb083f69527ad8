//! Hourly precipitation grids stored as one Zarr array per hour.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use storm_common::{GridSpec, StormError, StormResult};
use storm_processor::{GridSource, HourlyGrid};
use tracing::{debug, instrument};

use crate::array::{read_grid, write_grid};

/// Hourly grids laid out as `{root}/{YYYY}/{YYYYMMDDHH}.zarr`.
///
/// Files are stamped with the end of the hour they cover: the hour
/// beginning 1979-02-01 00:00 lives in `1979/1979020101.zarr`.
#[derive(Debug, Clone)]
pub struct ZarrGridSource {
    root: PathBuf,
    spec: GridSpec,
}

impl ZarrGridSource {
    pub fn new(root: impl Into<PathBuf>, spec: GridSpec) -> Self {
        Self {
            root: root.into(),
            spec,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Array directory for the hour beginning at `hour_start`.
    pub fn hour_path(&self, hour_start: DateTime<Utc>) -> PathBuf {
        let stamp = hour_start + Duration::hours(1);
        self.root
            .join(stamp.format("%Y").to_string())
            .join(format!("{}.zarr", stamp.format("%Y%m%d%H")))
    }

    /// Store the grid for the hour beginning at `hour_start`.
    pub fn write_hour(&self, hour_start: DateTime<Utc>, grid: &HourlyGrid) -> StormResult<()> {
        if grid.spec != self.spec {
            return Err(StormError::InvalidGrid(
                "grid does not match the source layout".to_string(),
            ));
        }
        write_grid(&self.hour_path(hour_start), &self.spec, &grid.values)
    }
}

#[async_trait]
impl GridSource for ZarrGridSource {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn hourly_grid(&self, timestamp: DateTime<Utc>) -> StormResult<HourlyGrid> {
        let path = self.hour_path(timestamp);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => {}
            Ok(false) => return Err(StormError::DataGap { timestamp }),
            Err(e) => {
                return Err(StormError::SourceUnavailable(format!(
                    "cannot check {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        let spec = self.spec;
        let read_path = path.clone();
        let values = tokio::task::spawn_blocking(move || read_grid(&read_path, &spec))
            .await
            .map_err(|e| StormError::SourceUnavailable(format!("read task failed: {}", e)))??;

        debug!(path = %path.display(), "Read hourly grid");
        HourlyGrid::new(spec, values)
    }

    fn spec(&self) -> &GridSpec {
        &self.spec
    }
}
