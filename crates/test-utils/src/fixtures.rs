//! Common test fixtures for storm identification tests.

use chrono::{DateTime, TimeZone, Utc};
use storm_common::GridSpec;
use tempfile::TempDir;

/// Common grid specifications for testing.
pub mod grid {
    use super::GridSpec;

    /// 4 km cells in a projected CRS, 12 columns x 10 rows
    pub const SMALL_4KM: GridSpec = GridSpec {
        nx: 12,
        ny: 10,
        dx: 4000.0,
        dy: -4000.0,
        first_x: 1_002_000.0,
        first_y: 2_038_000.0,
    };

    /// Unit cells with the origin cell centered at (0.5, ny - 0.5)
    pub fn unit(nx: usize, ny: usize) -> GridSpec {
        GridSpec {
            nx,
            ny,
            dx: 1.0,
            dy: -1.0,
            first_x: 0.5,
            first_y: ny as f64 - 0.5,
        }
    }
}

/// Common time anchors for testing.
pub mod time {
    use super::*;

    /// First hour of the hourly precipitation record
    pub fn por_start() -> DateTime<Utc> {
        hour(1979, 2, 1, 0)
    }

    pub fn hour(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
        match Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).single() {
            Some(dt) => dt,
            None => panic!("invalid fixture time {}-{}-{} {}h", year, month, day, hour),
        }
    }
}

/// Closed polygon ring around the interior of a grid, one cell in from
/// each edge.
pub fn interior_ring(spec: &GridSpec) -> Vec<(f64, f64)> {
    let x0 = spec.first_x + spec.dx * 0.5;
    let x1 = spec.first_x + spec.dx * (spec.nx as f64 - 1.5);
    let y0 = spec.first_y + spec.dy * 0.5;
    let y1 = spec.first_y + spec.dy * (spec.ny as f64 - 1.5);
    vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]
}

/// Fresh temporary directory for on-disk fixtures.
pub fn scratch_dir() -> TempDir {
    match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => panic!("failed to create temp dir: {}", e),
    }
}
