//! Synthetic precipitation generators.
//!
//! These generators create predictable, verifiable accumulation patterns
//! that can be used across the test suite. All grids are `Vec<f32>` in
//! row-major order (row 0 first).

use chrono::{DateTime, Duration, Utc};

/// Creates a grid whose values are all distinct.
///
/// Each cell is a pseudo-random integer in `0..1000` from a seeded LCG plus
/// `index * 0.001`, so no two cells tie on grids under 1000 cells.
pub fn create_distinct_grid(width: usize, height: usize, seed: u64) -> Vec<f32> {
    let mut state = seed;
    (0..width * height)
        .map(|i| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 33) % 1000) as f32 + i as f32 * 0.001
        })
        .collect()
}

/// Creates a single Gaussian rain cell on a uniform background.
///
/// # Arguments
///
/// * `center` - `(col, row)` of the peak
/// * `peak` - Value added at the peak (mm)
/// * `sigma` - Spread in cells
/// * `background` - Value everywhere else (mm)
pub fn create_storm_grid(
    width: usize,
    height: usize,
    center: (usize, usize),
    peak: f32,
    sigma: f32,
    background: f32,
) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    let two_s2 = 2.0 * sigma * sigma;
    for row in 0..height {
        for col in 0..width {
            let dx = col as f32 - center.0 as f32;
            let dy = row as f32 - center.1 as f32;
            let bump = peak * (-(dx * dx + dy * dy) / two_s2).exp();
            data.push(background + bump);
        }
    }
    data
}

/// Consecutive hourly timestamps paired with generated grids.
///
/// `grid_for` receives the hour offset from `start`.
pub fn hourly_series<F>(
    start: DateTime<Utc>,
    hours: usize,
    mut grid_for: F,
) -> Vec<(DateTime<Utc>, Vec<f32>)>
where
    F: FnMut(usize) -> Vec<f32>,
{
    (0..hours)
        .map(|h| (start + Duration::hours(h as i64), grid_for(h)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_distinct_grid_has_no_ties() {
        let mut grid = create_distinct_grid(20, 20, 7);
        grid.sort_by(f32::total_cmp);
        assert!(grid.windows(2).all(|w| w[0] != w[1]));
    }

    #[test]
    fn test_distinct_grid_is_seeded() {
        assert_eq!(create_distinct_grid(5, 4, 3), create_distinct_grid(5, 4, 3));
        assert_ne!(create_distinct_grid(5, 4, 3), create_distinct_grid(5, 4, 4));
    }

    #[test]
    fn test_storm_grid_peak() {
        let grid = create_storm_grid(9, 9, (4, 4), 10.0, 1.5, 0.5);
        let max = grid.iter().copied().fold(f32::MIN, f32::max);
        assert_eq!(grid[4 * 9 + 4], max);
        assert!((max - 10.5).abs() < 1e-6);
        assert!(grid[0] < 1.0);
    }

    #[test]
    fn test_hourly_series() {
        let start = Utc.with_ymd_and_hms(1979, 2, 1, 0, 0, 0).unwrap();
        let series = hourly_series(start, 3, |h| vec![h as f32; 4]);
        assert_eq!(series.len(), 3);
        assert_eq!(series[2].0, start + Duration::hours(2));
        assert_eq!(series[2].1, vec![2.0; 4]);
    }
}
