//! Adaptive threshold selection for an aggregated window.

use std::collections::VecDeque;

use storm_common::{StormError, StormResult, Window};
use tracing::{debug, warn};

use crate::aggregate::AggregatedWindow;

/// Result of threshold estimation for one window.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdEstimate {
    /// Threshold used for the exceedance set (after the minimum floor)
    pub threshold: f64,
    /// Percentile of the initial guess, in [0, 100]
    pub percentile: f64,
    /// Value at that percentile
    pub initial_threshold: f64,
    /// Number of cells with accumulation >= `threshold`
    pub exceedance: usize,
    /// Number of cells with data
    pub total_cells: usize,
}

/// Find the accumulation whose exceedance count is nearest `target`.
///
/// Every distinct value in the window is a candidate cutoff. Equal
/// distances resolve to the higher cutoff, i.e. the smaller set. A
/// `minimum` above the chosen cutoff replaces it. Returns `None` when the
/// window has no cell with data.
pub fn estimate_threshold(
    aggregated: &AggregatedWindow,
    target: usize,
    minimum: f64,
) -> Option<ThresholdEstimate> {
    let mut sorted: Vec<f64> = aggregated.valid_values().map(|(_, v)| v).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();

    // Initial guess: lower-interpolated percentile of the top `target` cells
    let percentile = (100.0 - target as f64 / n as f64 * 100.0).clamp(0.0, 100.0);
    let rank = (percentile / 100.0 * (n - 1) as f64).floor() as usize;
    let initial_threshold = sorted[rank.min(n - 1)];

    // Scan distinct values from the top; count(>= v) grows as v falls
    let mut best = sorted[n - 1];
    let mut best_diff = usize::MAX;
    let mut idx = n;
    while idx > 0 {
        let value = sorted[idx - 1];
        let first = sorted.partition_point(|x| *x < value);
        let count = n - first;
        let diff = count.abs_diff(target);
        if diff < best_diff {
            best = value;
            best_diff = diff;
        }
        if count >= target {
            break;
        }
        idx = first;
    }

    let threshold = if minimum > best { minimum } else { best };
    let exceedance = n - sorted.partition_point(|x| *x < threshold);

    debug!(
        window_start = %aggregated.window.start,
        initial_threshold,
        threshold,
        exceedance,
        total_cells = n,
        "Estimated threshold"
    );

    Some(ThresholdEstimate {
        threshold,
        percentile,
        initial_threshold,
        exceedance,
        total_cells: n,
    })
}

/// Cells whose accumulation is at or above `threshold`, ascending.
pub fn exceedance_set(aggregated: &AggregatedWindow, threshold: f64) -> Vec<usize> {
    aggregated
        .valid_values()
        .filter(|(_, v)| *v >= threshold)
        .map(|(i, _)| i)
        .collect()
}

const ROOK_OFFSETS: [(isize, isize); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

/// Add below-threshold pockets enclosed by the exceedance set.
///
/// Pockets are 4-connected groups of non-member cells. A pocket that
/// reaches the grid edge or a cell without data stays open; every other
/// pocket is filled. Returns the filled set, ascending.
pub fn fill_voids(aggregated: &AggregatedWindow, cells: &[usize]) -> Vec<usize> {
    let spec = &aggregated.spec;
    let mut member = vec![false; spec.len()];
    for &cell in cells {
        if let Some(m) = member.get_mut(cell) {
            *m = true;
        }
    }

    // Flood the open region from the edge and from cells without data
    let mut open = vec![false; spec.len()];
    let mut queue = VecDeque::new();
    for cell in 0..spec.len() {
        if member[cell] {
            continue;
        }
        let (col, row) = spec.cell(cell);
        let on_edge = col == 0 || row == 0 || col + 1 == spec.nx || row + 1 == spec.ny;
        if on_edge || aggregated.value(cell).is_none() {
            open[cell] = true;
            queue.push_back(cell);
        }
    }
    while let Some(cell) = queue.pop_front() {
        for &(dcol, drow) in &ROOK_OFFSETS {
            if let Some(n) = spec.offset(cell, dcol, drow) {
                if !member[n] && !open[n] {
                    open[n] = true;
                    queue.push_back(n);
                }
            }
        }
    }

    let filled: Vec<usize> = (0..spec.len())
        .filter(|&cell| member[cell] || !open[cell])
        .collect();
    if filled.len() > cells.len() {
        debug!(
            window_start = %aggregated.window.start,
            filled = filled.len() - cells.len(),
            "Filled enclosed voids"
        );
    }
    filled
}

/// Reject exceedance sets too large to cluster meaningfully.
pub fn check_degenerate(
    window: &Window,
    exceedance: usize,
    target: usize,
    max_multiple: usize,
) -> StormResult<()> {
    let limit = target.saturating_mul(max_multiple);
    if exceedance > limit {
        warn!(
            window_start = %window.start,
            exceedance,
            limit,
            "Degenerate window, skipping clustering"
        );
        return Err(StormError::DegenerateWindow {
            start: window.start,
            exceedance,
            limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use storm_common::GridSpec;

    fn aggregated(values: Vec<f64>) -> AggregatedWindow {
        let n = values.len();
        AggregatedWindow {
            window: Window::new(Utc.with_ymd_and_hms(1990, 6, 1, 0, 0, 0).unwrap(), 72),
            spec: GridSpec::new(n, 1, 1.0, -1.0, 0.5, 0.5),
            values,
        }
    }

    fn count_at_least(values: &[f64], t: f64) -> usize {
        values.iter().filter(|v| **v >= t).count()
    }

    fn square(side: usize, values: Vec<f64>) -> AggregatedWindow {
        AggregatedWindow {
            window: Window::new(Utc.with_ymd_and_hms(1990, 6, 1, 0, 0, 0).unwrap(), 72),
            spec: GridSpec::new(side, side, 1.0, -1.0, 0.5, side as f64 - 0.5),
            values,
        }
    }

    /// Ring of exceedance cells around (col 1..=3, row 1..=3) of a 6x6 grid.
    fn ring() -> Vec<usize> {
        let mut cells = Vec::new();
        for row in 1..=3 {
            for col in 1..=3 {
                if (row, col) != (2, 2) {
                    cells.push(row * 6 + col);
                }
            }
        }
        cells
    }

    #[test]
    fn test_fill_voids_closes_ring() {
        let mut values = vec![1.0; 36];
        for &c in &ring() {
            values[c] = 9.0;
        }
        let agg = square(6, values);
        let cells = exceedance_set(&agg, 5.0);
        assert_eq!(cells.len(), 8);

        let filled = fill_voids(&agg, &cells);
        assert_eq!(filled.len(), 9);
        assert!(filled.contains(&(2 * 6 + 2)));
        assert!(filled.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_fill_voids_leaves_open_pockets() {
        // A gap in the top of the ring opens the hole to the border
        let mut cells = ring();
        cells.retain(|&c| c != 6 + 2);
        let agg = square(6, vec![1.0; 36]);
        assert_eq!(fill_voids(&agg, &cells), cells);

        // A hole without data is not part of the area
        let mut values = vec![1.0; 36];
        values[2 * 6 + 2] = f64::NAN;
        let agg = square(6, values);
        assert_eq!(fill_voids(&agg, &ring()), ring());
    }

    #[test]
    fn test_exact_target() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let est = estimate_threshold(&aggregated(values), 16, 0.0).unwrap();
        assert_eq!(est.threshold, 85.0);
        assert_eq!(est.exceedance, 16);
        assert_eq!(est.total_cells, 100);
    }

    #[test]
    fn test_closest_with_duplicates() {
        // 10 cells at 9.0, 10 at 5.0, 80 at 1.0; target 16
        let mut values = vec![9.0; 10];
        values.extend(vec![5.0; 10]);
        values.extend(vec![1.0; 80]);
        let est = estimate_threshold(&aggregated(values.clone()), 16, 0.0).unwrap();

        // 9.0 -> 10 cells (|6|), 5.0 -> 20 cells (|4|)
        assert_eq!(est.threshold, 5.0);
        assert_eq!(est.exceedance, 20);
        assert_eq!(est.exceedance, count_at_least(&values, est.threshold));
    }

    #[test]
    fn test_tie_prefers_fewer_cells() {
        // 9.0 -> 14 cells, 5.0 -> 18 cells; both 2 away from 16
        let mut values = vec![9.0; 14];
        values.extend(vec![5.0; 4]);
        values.extend(vec![1.0; 30]);
        let est = estimate_threshold(&aggregated(values), 16, 0.0).unwrap();
        assert_eq!(est.threshold, 9.0);
        assert_eq!(est.exceedance, 14);
    }

    #[test]
    fn test_closest_among_all_distinct_values() {
        let values: Vec<f64> = (0..60).map(|i| ((i * 37) % 23) as f64 * 0.5).collect();
        let target = 16;
        let est = estimate_threshold(&aggregated(values.clone()), target, 0.0).unwrap();
        let chosen = count_at_least(&values, est.threshold).abs_diff(target);

        let mut distinct = values.clone();
        distinct.sort_by(f64::total_cmp);
        distinct.dedup();
        for &v in &distinct {
            assert!(count_at_least(&values, v).abs_diff(target) >= chosen);
        }
        // Raising the cutoff never adds cells
        for pair in distinct.windows(2) {
            assert!(count_at_least(&values, pair[1]) <= count_at_least(&values, pair[0]));
        }
    }

    #[test]
    fn test_minimum_floor() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64 * 0.1).collect();
        let est = estimate_threshold(&aggregated(values), 16, 9.55).unwrap();
        assert_eq!(est.threshold, 9.55);
        assert_eq!(est.exceedance, 5);
    }

    #[test]
    fn test_ignores_missing_cells() {
        let mut values = vec![f64::NAN; 10];
        values[3] = 4.0;
        values[7] = 2.0;
        let agg = aggregated(values);
        let est = estimate_threshold(&agg, 1, 0.0).unwrap();
        assert_eq!(est.threshold, 4.0);
        assert_eq!(exceedance_set(&agg, est.threshold), vec![3]);
        assert_eq!(exceedance_set(&agg, 0.0), vec![3, 7]);

        assert!(estimate_threshold(&aggregated(vec![f64::NAN; 4]), 1, 0.0).is_none());
    }

    #[test]
    fn test_uniform_window_is_degenerate() {
        let agg = aggregated(vec![3.0; 400]);
        let est = estimate_threshold(&agg, 16, 0.0).unwrap();
        assert_eq!(est.exceedance, 400);

        let err = check_degenerate(&agg.window, est.exceedance, 16, 10).unwrap_err();
        assert!(matches!(
            err,
            StormError::DegenerateWindow { exceedance: 400, limit: 160, .. }
        ));
        assert!(check_degenerate(&agg.window, 160, 16, 10).is_ok());
    }
}
