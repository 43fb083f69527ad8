//! Ranking and temporal declustering of window storms.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use storm_common::{Partition, RankStatistic, RankedStorm, WindowStorm};
use tracing::debug;

/// Decides whether two storms are separate events.
///
/// Only accepted storms are compared against later candidates.
pub trait StormSeparation: Send + Sync {
    fn distinct(&self, candidate: &WindowStorm, accepted: &WindowStorm) -> bool;
}

/// Storms are distinct when their windows do not overlap in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalSeparation;

impl StormSeparation for TemporalSeparation {
    fn distinct(&self, candidate: &WindowStorm, accepted: &WindowStorm) -> bool {
        !candidate.window.overlaps(&accepted.window)
    }
}

/// Descending by statistic, storms without it last, earlier start first on ties.
fn compare(statistic: RankStatistic, a: &WindowStorm, b: &WindowStorm) -> Ordering {
    match (statistic.value(&a.stats), statistic.value(&b.stats)) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.window.cmp(&b.window))
}

/// Rank one partition's storms and decluster the top `n`.
///
/// Every storm visited before the `n`-th acceptance is returned, in sort
/// order, with `true_rank` set to its sort position. Storms that are not
/// distinct from an already accepted storm get `declustered_rank = -1`.
pub fn rank_partition(
    mut storms: Vec<WindowStorm>,
    partition: i32,
    statistic: RankStatistic,
    n: usize,
    separation: &dyn StormSeparation,
) -> Vec<RankedStorm> {
    storms.sort_by(|a, b| compare(statistic, a, b));

    let mut ranked: Vec<RankedStorm> = Vec::new();
    let mut accepted: Vec<usize> = Vec::new();

    for (position, storm) in storms.into_iter().enumerate() {
        if accepted.len() >= n {
            break;
        }

        let distinct = accepted
            .iter()
            .all(|&i| separation.distinct(&storm, &ranked[i].storm));

        let declustered_rank = if distinct {
            accepted.push(ranked.len());
            accepted.len() as i32
        } else {
            -1
        };

        ranked.push(RankedStorm {
            storm,
            partition,
            true_rank: position as u32 + 1,
            declustered_rank,
        });
    }

    debug!(
        partition,
        ranked = ranked.len(),
        accepted = accepted.len(),
        "Ranked partition"
    );

    ranked
}

/// Group storms by partition key and rank each group.
pub fn rank_all(
    storms: Vec<WindowStorm>,
    partition: Partition,
    statistic: RankStatistic,
    n: usize,
    separation: &dyn StormSeparation,
) -> BTreeMap<i32, Vec<RankedStorm>> {
    let mut groups: BTreeMap<i32, Vec<WindowStorm>> = BTreeMap::new();
    for storm in storms {
        groups
            .entry(partition.key(&storm.window.start))
            .or_default()
            .push(storm);
    }

    groups
        .into_iter()
        .map(|(key, group)| (key, rank_partition(group, key, statistic, n, separation)))
        .collect()
}
