//! Per-window storm selection.

use std::cmp::Ordering;

use storm_common::{StormError, WindowOutcome, WindowStorm};
use tracing::{debug, info};

use crate::aggregate::AggregatedWindow;
use crate::cluster::{find_clusters, reconcile_clusters, Cluster};
use crate::config::ExtractionConfig;
use crate::threshold::{check_degenerate, estimate_threshold, exceedance_set, fill_voids};

/// Pick the reconciled cluster with the highest mean accumulation.
///
/// Equal means resolve to the cluster whose sorted cells compare lowest.
pub fn select_window_storm(
    grid: &AggregatedWindow,
    clusters: &[Cluster],
    threshold: f64,
) -> Option<WindowStorm> {
    let mut best: Option<(&Cluster, f64)> = None;
    for cluster in clusters {
        let mean = cluster.mean(grid);
        if mean.is_nan() {
            continue;
        }
        let better = match best {
            None => true,
            Some((current, current_mean)) => match mean.total_cmp(&current_mean) {
                Ordering::Greater => true,
                Ordering::Equal => cluster < current,
                Ordering::Less => false,
            },
        };
        if better {
            best = Some((cluster, mean));
        }
    }

    let (cluster, _) = best?;
    let cells: Vec<usize> = cluster.cells().collect();
    let values: Vec<f64> = cells
        .iter()
        .map(|&c| grid.value(c).unwrap_or(f64::NAN))
        .collect();

    Some(WindowStorm::new(grid.window, &grid.spec, cells, values, threshold))
}

/// Run threshold, clustering and selection for one aggregated window.
pub fn identify_window_storm(
    aggregated: &AggregatedWindow,
    config: &ExtractionConfig,
) -> WindowOutcome {
    let window = aggregated.window;
    let target = config.target_cell_count;

    let Some(estimate) = estimate_threshold(aggregated, target, config.minimum_threshold) else {
        info!(window_start = %window.start, "Window has no data in the transposition area");
        return WindowOutcome::NoCandidate;
    };

    if let Err(StormError::DegenerateWindow {
        exceedance, limit, ..
    }) = check_degenerate(
        &window,
        estimate.exceedance,
        target,
        config.max_exceedance_multiple,
    ) {
        return WindowOutcome::Degenerate { exceedance, limit };
    }

    let cells = exceedance_set(aggregated, estimate.threshold);
    if cells.is_empty() {
        info!(
            window_start = %window.start,
            threshold = estimate.threshold,
            "No cells exceed threshold"
        );
        return WindowOutcome::NoCandidate;
    }

    let cells = if config.fill_voids {
        fill_voids(aggregated, &cells)
    } else {
        cells
    };

    let clusters = find_clusters(aggregated, &cells, config.adjacency_radius);
    let found = clusters.len();
    let reconciled = reconcile_clusters(aggregated, clusters, target);

    debug!(
        window_start = %window.start,
        clusters = found,
        reconciled = reconciled.clusters.len(),
        growth_failures = reconciled.growth_failures,
        disconnections = reconciled.disconnections,
        "Reconciled clusters"
    );

    match select_window_storm(aggregated, &reconciled.clusters, estimate.threshold) {
        Some(storm) => WindowOutcome::Storm(storm),
        None => {
            info!(
                window_start = %window.start,
                clusters = found,
                growth_failures = reconciled.growth_failures,
                "No cluster reached the target size"
            );
            WindowOutcome::NoCandidate
        }
    }
}
