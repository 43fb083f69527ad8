//! Connected-component clustering and size reconciliation.
//!
//! Clusters are sets of dense cell indices into an [`AggregatedWindow`].
//! A cell is usable when it is inside the transposition area and has an
//! accumulation; growth never adds any other cell.
//!
//! Reconciliation drives every cluster to exactly the target size:
//!
//! - smaller clusters grow by their highest-valued 8-neighbor,
//! - larger clusters shrink by their lowest-valued boundary member,
//! - a removal that splits a cluster discards it and queues the pieces.
//!
//! Equal values always resolve to the lowest cell index, so a given
//! window reconciles identically on every run.

use std::collections::{BTreeSet, VecDeque};

use storm_common::{neighbor_offsets, StormError, StormResult, KING_OFFSETS};
use tracing::debug;

use crate::aggregate::AggregatedWindow;

/// A set of grid cells being reconciled to the target size.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cluster {
    cells: BTreeSet<usize>,
}

/// What a single shrink step did.
#[derive(Debug, Clone, PartialEq)]
pub enum ShrinkStep {
    /// A boundary cell was removed and the cluster is still one piece.
    Removed(usize),
    /// Removing the cell split the cluster into `pieces`.
    Disconnected { removed: usize, pieces: Vec<Cluster> },
}

impl Cluster {
    pub fn new(cells: impl IntoIterator<Item = usize>) -> Self {
        Self {
            cells: cells.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, cell: usize) -> bool {
        self.cells.contains(&cell)
    }

    /// Member cells, ascending.
    pub fn cells(&self) -> impl Iterator<Item = usize> + '_ {
        self.cells.iter().copied()
    }

    /// Mean accumulation over the members, summed in cell order.
    pub fn mean(&self, grid: &AggregatedWindow) -> f64 {
        if self.cells.is_empty() {
            return f64::NAN;
        }
        let sum: f64 = self.cells().filter_map(|c| grid.value(c)).sum();
        sum / self.cells.len() as f64
    }

    /// Usable non-member cells 8-adjacent to the cluster, ascending.
    pub fn frontier(&self, grid: &AggregatedWindow) -> BTreeSet<usize> {
        let mut frontier = BTreeSet::new();
        for &cell in &self.cells {
            for &(dcol, drow) in &KING_OFFSETS {
                if let Some(n) = grid.spec.offset(cell, dcol, drow) {
                    if !self.cells.contains(&n) && grid.value(n).is_some() {
                        frontier.insert(n);
                    }
                }
            }
        }
        frontier
    }

    /// Members with at least one 8-neighbor outside the cluster, ascending.
    pub fn boundary(&self, grid: &AggregatedWindow) -> Vec<usize> {
        self.cells()
            .filter(|&cell| {
                KING_OFFSETS.iter().any(|&(dcol, drow)| {
                    match grid.spec.offset(cell, dcol, drow) {
                        Some(n) => !self.cells.contains(&n),
                        None => true,
                    }
                })
            })
            .collect()
    }

    /// Add the highest-valued frontier cell until the cluster has `target`
    /// members. Returns the added cells in order.
    ///
    /// On failure the cluster is left at the size it reached.
    pub fn grow_to(&mut self, grid: &AggregatedWindow, target: usize) -> StormResult<Vec<usize>> {
        let mut added = Vec::new();
        while self.cells.len() < target {
            let mut best: Option<(usize, f64)> = None;
            for cell in self.frontier(grid) {
                let Some(value) = grid.value(cell) else {
                    continue;
                };
                // Frontier is ascending, so `>` keeps the lowest index on ties
                if best.map_or(true, |(_, b)| value > b) {
                    best = Some((cell, value));
                }
            }

            match best {
                Some((cell, _)) => {
                    self.cells.insert(cell);
                    added.push(cell);
                }
                None => {
                    return Err(StormError::ClusterGrowthFailure {
                        size: self.cells.len(),
                        target,
                    })
                }
            }
        }
        Ok(added)
    }

    /// Remove the lowest-valued boundary member.
    ///
    /// Returns `None` for an empty cluster.
    pub fn shrink_step(&mut self, grid: &AggregatedWindow) -> Option<ShrinkStep> {
        let mut worst: Option<(usize, f64)> = None;
        for cell in self.boundary(grid) {
            let value = grid.value(cell).unwrap_or(f64::NEG_INFINITY);
            if worst.map_or(true, |(_, w)| value < w) {
                worst = Some((cell, value));
            }
        }
        let (removed, _) = worst?;
        self.cells.remove(&removed);

        let pieces = self.components(grid);
        if pieces.len() > 1 && self.splits_at(grid, removed, &pieces) {
            return Some(ShrinkStep::Disconnected { removed, pieces });
        }
        Some(ShrinkStep::Removed(removed))
    }

    /// 8-connected components of the cluster, ordered by lowest member.
    pub fn components(&self, grid: &AggregatedWindow) -> Vec<Cluster> {
        let members: Vec<usize> = self.cells().collect();
        let mut seen = BTreeSet::new();
        let mut pieces = Vec::new();

        for &seed in &members {
            if !seen.insert(seed) {
                continue;
            }
            let mut piece = BTreeSet::new();
            let mut queue = VecDeque::new();
            queue.push_back(seed);
            while let Some(cell) = queue.pop_front() {
                piece.insert(cell);
                for &(dcol, drow) in &KING_OFFSETS {
                    if let Some(n) = grid.spec.offset(cell, dcol, drow) {
                        if self.cells.contains(&n) && seen.insert(n) {
                            queue.push_back(n);
                        }
                    }
                }
            }
            pieces.push(Cluster { cells: piece });
        }
        pieces
    }

    /// Whether the former neighbors of `removed` now lie in different pieces.
    fn splits_at(&self, grid: &AggregatedWindow, removed: usize, pieces: &[Cluster]) -> bool {
        let mut owners = BTreeSet::new();
        for &(dcol, drow) in &KING_OFFSETS {
            if let Some(n) = grid.spec.offset(removed, dcol, drow) {
                if let Some(owner) = pieces.iter().position(|p| p.contains(n)) {
                    owners.insert(owner);
                }
            }
        }
        owners.len() > 1
    }
}

/// Group exceedance cells into clusters of cells within `radius` of each other.
///
/// Clusters come out ordered by their lowest cell index.
pub fn find_clusters(grid: &AggregatedWindow, cells: &[usize], radius: f64) -> Vec<Cluster> {
    let offsets = neighbor_offsets(radius);
    let mut in_set = vec![false; grid.spec.len()];
    for &cell in cells {
        if let Some(flag) = in_set.get_mut(cell) {
            *flag = true;
        }
    }

    let mut seeds: Vec<usize> = cells.iter().copied().filter(|&c| c < in_set.len()).collect();
    seeds.sort_unstable();

    let mut visited = vec![false; grid.spec.len()];
    let mut clusters = Vec::new();

    for seed in seeds {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;

        let mut members = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(seed);
        while let Some(cell) = queue.pop_front() {
            members.insert(cell);
            for &(dcol, drow) in &offsets {
                if let Some(n) = grid.spec.offset(cell, dcol, drow) {
                    if in_set[n] && !visited[n] {
                        visited[n] = true;
                        queue.push_back(n);
                    }
                }
            }
        }
        clusters.push(Cluster { cells: members });
    }

    clusters
}

/// Clusters of exactly the target size, with reconciliation counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub clusters: Vec<Cluster>,
    /// Clusters discarded because they could not grow to the target
    pub growth_failures: usize,
    /// Shrinks that split a cluster into re-queued pieces
    pub disconnections: usize,
}

/// Drive every cluster to exactly `target` cells.
///
/// Clusters are processed from a FIFO worklist. A split cluster is
/// discarded and its pieces are appended to the worklist; each piece is
/// strictly smaller than its parent, so the loop terminates.
pub fn reconcile_clusters(
    grid: &AggregatedWindow,
    clusters: Vec<Cluster>,
    target: usize,
) -> Reconciliation {
    let mut worklist: VecDeque<Cluster> = clusters.into();
    let mut result = Reconciliation::default();

    while let Some(mut cluster) = worklist.pop_front() {
        if cluster.is_empty() {
            continue;
        }

        if cluster.len() < target {
            match cluster.grow_to(grid, target) {
                Ok(_) => result.clusters.push(cluster),
                Err(e) => {
                    debug!(
                        window_start = %grid.window.start,
                        error = %e,
                        "Discarding cluster"
                    );
                    result.growth_failures += 1;
                }
            }
            continue;
        }

        let mut split = false;
        while cluster.len() > target {
            match cluster.shrink_step(grid) {
                Some(ShrinkStep::Removed(_)) => {}
                Some(ShrinkStep::Disconnected { removed, pieces }) => {
                    debug!(
                        window_start = %grid.window.start,
                        removed,
                        pieces = pieces.len(),
                        "Shrink disconnected cluster, re-queueing pieces"
                    );
                    result.disconnections += 1;
                    worklist.extend(pieces);
                    split = true;
                    break;
                }
                None => break,
            }
        }

        if !split && cluster.len() == target {
            result.clusters.push(cluster);
        }
    }

    result
}
