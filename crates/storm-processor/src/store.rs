//! Persistence contract for ranked storms and window checkpoints.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storm_common::{RankedStorm, StormResult, WindowRecord};
use tokio::sync::RwLock;

/// Server-side ordering of a storm query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StormOrder {
    /// Ascending true rank
    #[default]
    TrueRank,
    /// Ascending declustered rank, suppressed storms last
    DeclusteredRank,
    /// Descending mean accumulation
    Mean,
    /// Descending maximum accumulation
    Max,
    /// Descending total accumulation
    Sum,
    /// Descending normalized mean, storms without one last
    NormMean,
    /// Ascending start time
    Start,
}

impl StormOrder {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "true_rank" | "rank" => Some(Self::TrueRank),
            "declustered_rank" | "declustered" => Some(Self::DeclusteredRank),
            "mean" => Some(Self::Mean),
            "max" => Some(Self::Max),
            "sum" => Some(Self::Sum),
            "norm_mean" | "normalized_mean" => Some(Self::NormMean),
            "start" => Some(Self::Start),
            _ => None,
        }
    }

    /// Ordering used by in-memory stores; ties fall back to start time.
    pub fn compare(&self, a: &RankedStorm, b: &RankedStorm) -> Ordering {
        let primary = match self {
            StormOrder::TrueRank => a.true_rank.cmp(&b.true_rank),
            StormOrder::DeclusteredRank => {
                match (a.is_suppressed(), b.is_suppressed()) {
                    (false, true) => Ordering::Less,
                    (true, false) => Ordering::Greater,
                    _ => a.declustered_rank.cmp(&b.declustered_rank),
                }
            }
            StormOrder::Mean => b.storm.stats.mean.total_cmp(&a.storm.stats.mean),
            StormOrder::Max => b.storm.stats.max.total_cmp(&a.storm.stats.max),
            StormOrder::Sum => b.storm.stats.sum.total_cmp(&a.storm.stats.sum),
            StormOrder::NormMean => match (a.normalized_mean(), b.normalized_mean()) {
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
            StormOrder::Start => Ordering::Equal,
        };
        primary.then_with(|| a.storm.window.cmp(&b.storm.window))
    }
}

/// Filter and ordering for [`StormStore::query_storms`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StormQuery {
    /// Partition key (calendar or water year)
    pub partition: Option<i32>,
    pub duration_hours: Option<u32>,
    /// Exclude storms suppressed by declustering
    pub declustered_only: bool,
    pub order_by: StormOrder,
    pub limit: Option<usize>,
}

impl StormQuery {
    pub fn partition(key: i32) -> Self {
        Self {
            partition: Some(key),
            ..Default::default()
        }
    }

    pub fn duration(mut self, hours: u32) -> Self {
        self.duration_hours = Some(hours);
        self
    }

    pub fn declustered_only(mut self) -> Self {
        self.declustered_only = true;
        self
    }

    pub fn order_by(mut self, order: StormOrder) -> Self {
        self.order_by = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a storm passes the filters.
    pub fn matches(&self, storm: &RankedStorm) -> bool {
        self.partition.map_or(true, |p| storm.partition == p)
            && self
                .duration_hours
                .map_or(true, |d| storm.storm.window.duration_hours == d)
            && (!self.declustered_only || !storm.is_suppressed())
    }
}

/// Storage of ranked storms and per-window outcomes.
#[async_trait]
pub trait StormStore: Send + Sync {
    /// Insert or replace a ranked storm, keyed by duration and start.
    async fn put_storm(&self, storm: &RankedStorm) -> StormResult<()>;

    /// Ranked storms matching the query, in the requested order.
    async fn query_storms(&self, query: &StormQuery) -> StormResult<Vec<RankedStorm>>;

    /// Remove every ranked storm of a window duration before re-ranking.
    async fn delete_storms(&self, duration_hours: u32) -> StormResult<()>;

    /// Checkpoint the outcome of one window.
    async fn put_window_outcome(&self, record: &WindowRecord) -> StormResult<()>;

    /// Every checkpointed outcome for a window duration, by start time.
    async fn window_outcomes(&self, duration_hours: u32) -> StormResult<Vec<WindowRecord>>;
}

type StormKey = (u32, DateTime<Utc>);

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStormStore {
    storms: RwLock<BTreeMap<StormKey, RankedStorm>>,
    outcomes: RwLock<BTreeMap<StormKey, WindowRecord>>,
}

impl MemoryStormStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StormStore for MemoryStormStore {
    async fn put_storm(&self, storm: &RankedStorm) -> StormResult<()> {
        let window = storm.storm.window;
        self.storms
            .write()
            .await
            .insert((window.duration_hours, window.start), storm.clone());
        Ok(())
    }

    async fn query_storms(&self, query: &StormQuery) -> StormResult<Vec<RankedStorm>> {
        let storms = self.storms.read().await;
        let mut matching: Vec<RankedStorm> =
            storms.values().filter(|s| query.matches(s)).cloned().collect();
        matching.sort_by(|a, b| query.order_by.compare(a, b));
        if let Some(limit) = query.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn delete_storms(&self, duration_hours: u32) -> StormResult<()> {
        self.storms
            .write()
            .await
            .retain(|(d, _), _| *d != duration_hours);
        Ok(())
    }

    async fn put_window_outcome(&self, record: &WindowRecord) -> StormResult<()> {
        self.outcomes.write().await.insert(
            (record.window.duration_hours, record.window.start),
            record.clone(),
        );
        Ok(())
    }

    async fn window_outcomes(&self, duration_hours: u32) -> StormResult<Vec<WindowRecord>> {
        let outcomes = self.outcomes.read().await;
        Ok(outcomes
            .iter()
            .filter(|((d, _), _)| *d == duration_hours)
            .map(|(_, r)| r.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use storm_common::{GridSpec, Window, WindowOutcome, WindowStorm};

    fn ranked(day: i64, mean: f64, true_rank: u32, declustered_rank: i32) -> RankedStorm {
        let spec = GridSpec::new(2, 2, 1.0, -1.0, 0.5, 1.5);
        let start = Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap() + Duration::days(day);
        RankedStorm {
            storm: WindowStorm::new(Window::new(start, 72), &spec, vec![0], vec![mean], 0.0),
            partition: 1999,
            true_rank,
            declustered_rank,
        }
    }

    #[tokio::test]
    async fn test_query_order_and_filter() {
        let store = MemoryStormStore::new();
        store.put_storm(&ranked(0, 5.0, 1, 1)).await.unwrap();
        store.put_storm(&ranked(1, 4.0, 2, -1)).await.unwrap();
        store.put_storm(&ranked(10, 3.0, 3, 2)).await.unwrap();

        let all = store
            .query_storms(&StormQuery::partition(1999).order_by(StormOrder::DeclusteredRank))
            .await
            .unwrap();
        let ranks: Vec<i32> = all.iter().map(|s| s.declustered_rank).collect();
        assert_eq!(ranks, vec![1, 2, -1]);

        let top = store
            .query_storms(&StormQuery::partition(1999).declustered_only().limit(1))
            .await
            .unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].true_rank, 1);

        let none = store.query_storms(&StormQuery::partition(2000)).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_put_storm_replaces() {
        let store = MemoryStormStore::new();
        store.put_storm(&ranked(0, 5.0, 1, 1)).await.unwrap();
        store.put_storm(&ranked(0, 5.0, 2, -1)).await.unwrap();

        let all = store.query_storms(&StormQuery::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].true_rank, 2);
    }

    #[tokio::test]
    async fn test_window_outcomes_by_duration() {
        let store = MemoryStormStore::new();
        let start = Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap();
        for (duration, day) in [(72, 1), (72, 0), (48, 0)] {
            let record = WindowRecord {
                window: Window::new(start + Duration::days(day), duration),
                outcome: WindowOutcome::NoCandidate,
            };
            store.put_window_outcome(&record).await.unwrap();
        }

        let records = store.window_outcomes(72).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].window.start < records[1].window.start);
    }
}
