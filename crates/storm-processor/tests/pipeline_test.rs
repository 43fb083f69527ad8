//! End-to-end tests of the storm identification pipeline over synthetic
//! hourly grids.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use storm_processor::{
    AreaMask, ExtractionConfig, GridSource, GridSpec, HourlyGrid, MemoryGridSource,
    MemoryStormStore, Normalizer, ReferenceGrid, RetryConfig, StormOrder, StormPipeline,
    StormQuery, StormStore, WindowOutcome,
};
use test_utils::{assert_approx_eq, create_storm_grid, grid, hourly_series, interior_ring, time};

const NX: usize = 14;
const NY: usize = 12;

fn spec() -> GridSpec {
    grid::unit(NX, NY)
}

fn quick_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_delay_ms: 1,
        max_delay_ms: 2,
    }
}

fn config() -> ExtractionConfig {
    ExtractionConfig {
        target_cell_count: 9,
        duration_hours: 48,
        step_hours: 24,
        top_n: 3,
        concurrency: 3,
        retry: quick_retry(),
        ..Default::default()
    }
}

/// Ten days of rain: a storm cell drifts east one column per day and
/// peaks on day 6.
fn ten_days(start: DateTime<Utc>) -> MemoryGridSource {
    let mut source = MemoryGridSource::new(spec());
    for (ts, values) in hourly_series(start, 10 * 24, |h| {
        let day = h / 24;
        let peak = 1.0 + (6 - (day as i32 - 6).abs()) as f32;
        create_storm_grid(NX, NY, (2 + day, 5), peak, 1.2, 0.05)
    }) {
        if let Ok(grid) = HourlyGrid::new(spec(), values) {
            source.insert(ts, grid);
        }
    }
    source
}

fn por_end(start: DateTime<Utc>) -> DateTime<Utc> {
    start + Duration::hours(10 * 24 - 1)
}

fn pipeline(source: Arc<dyn GridSource>, store: Arc<dyn StormStore>) -> StormPipeline {
    let mask = AreaMask::from_polygon(spec(), &interior_ring(&spec())).unwrap();
    StormPipeline::new(config(), source, Arc::new(mask), store).unwrap()
}

#[tokio::test]
async fn test_every_storm_has_target_size() {
    let start = time::por_start();
    let store = Arc::new(MemoryStormStore::new());
    let summary = pipeline(Arc::new(ten_days(start)), store.clone())
        .run(start, por_end(start))
        .await
        .unwrap();

    assert_eq!(summary.windows_total, 9);
    assert_eq!(summary.storms, 9);
    assert_eq!(summary.failed, 0);

    let records = store.window_outcomes(48).await.unwrap();
    assert_eq!(records.len(), 9);
    for record in &records {
        let storm = record.outcome.storm().unwrap();
        assert_eq!(storm.cells.len(), 9);
        assert_eq!(storm.stats.count, 9);
        assert!(storm.cells.windows(2).all(|w| w[0] < w[1]));
        // Cells on the outer ring are outside the transposition area
        for &cell in &storm.cells {
            let (col, row) = spec().cell(cell);
            assert!(col > 0 && col < NX - 1 && row > 0 && row < NY - 1);
        }
    }
}

#[tokio::test]
async fn test_ranking_declusters_overlapping_windows() {
    let start = time::por_start();
    let store = Arc::new(MemoryStormStore::new());
    pipeline(Arc::new(ten_days(start)), store.clone())
        .run(start, por_end(start))
        .await
        .unwrap();

    let ranked = store
        .query_storms(&StormQuery::partition(1979).order_by(StormOrder::TrueRank))
        .await
        .unwrap();

    // Windows starting day 5 and day 6 both contain the peak day
    assert_eq!(ranked[0].true_rank, 1);
    assert_eq!(ranked[0].declustered_rank, 1);
    let accepted: Vec<_> = ranked.iter().filter(|r| !r.is_suppressed()).collect();
    assert_eq!(accepted.len(), 3);
    for (i, a) in accepted.iter().enumerate() {
        assert_eq!(a.declustered_rank, i as i32 + 1);
        for b in accepted.iter().skip(i + 1) {
            assert!(!a.storm.window.overlaps(&b.storm.window));
        }
    }
    assert!(ranked.iter().any(|r| r.is_suppressed()));

    let mean_order = store
        .query_storms(
            &StormQuery::partition(1979)
                .declustered_only()
                .order_by(StormOrder::Mean)
                .limit(2),
        )
        .await
        .unwrap();
    assert_eq!(mean_order.len(), 2);
    assert!(mean_order[0].storm.stats.mean >= mean_order[1].storm.stats.mean);
}

#[tokio::test]
async fn test_identical_runs_are_identical() {
    let start = time::por_start();

    let mut results = Vec::new();
    for _ in 0..2 {
        let store = Arc::new(MemoryStormStore::new());
        pipeline(Arc::new(ten_days(start)), store.clone())
            .run(start, por_end(start))
            .await
            .unwrap();
        results.push(store.query_storms(&StormQuery::default()).await.unwrap());
    }

    assert!(!results[0].is_empty());
    assert_eq!(results[0], results[1]);
}

#[tokio::test]
async fn test_resume_skips_recorded_windows() {
    let start = time::por_start();
    let source: Arc<dyn GridSource> = Arc::new(ten_days(start));
    let store = Arc::new(MemoryStormStore::new());

    let first = pipeline(source.clone(), store.clone())
        .extract(start, start + Duration::hours(5 * 24 - 1))
        .await
        .unwrap();
    assert_eq!(first.windows_total, 4);
    assert_eq!(first.resumed, 0);

    let second = pipeline(source, store.clone())
        .run(start, por_end(start))
        .await
        .unwrap();
    assert_eq!(second.windows_total, 9);
    assert_eq!(second.resumed, 4);
    assert_eq!(second.storms, 5);
    assert_eq!(store.window_outcomes(48).await.unwrap().len(), 9);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let start = time::por_start();
    let source = ten_days(start);
    source.fail_transiently(start + Duration::hours(3), 2);

    let store = Arc::new(MemoryStormStore::new());
    let summary = pipeline(Arc::new(source), store.clone())
        .extract(start, por_end(start))
        .await
        .unwrap();
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.storms, 9);
}

#[tokio::test]
async fn test_exhausted_retries_leave_window_unrecorded() {
    let start = time::por_start();
    let source = ten_days(start);
    // Hour 3 belongs only to the first window
    source.fail_transiently(start + Duration::hours(3), 10);

    let store = Arc::new(MemoryStormStore::new());
    let summary = pipeline(Arc::new(source), store.clone())
        .extract(start, por_end(start))
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.storms, 8);

    let recorded = store.window_outcomes(48).await.unwrap();
    assert!(recorded.iter().all(|r| r.window.start != start));
}

#[tokio::test]
async fn test_missing_hour_recorded_as_gap() {
    let start = time::por_start();
    let mut source = ten_days(start);
    let missing = start + Duration::hours(24 * 9 + 5);
    source.remove(&missing);

    let store = Arc::new(MemoryStormStore::new());
    let summary = pipeline(Arc::new(source), store.clone())
        .extract(start, por_end(start))
        .await
        .unwrap();
    assert_eq!(summary.data_gaps, 1);

    let records = store.window_outcomes(48).await.unwrap();
    let gap = records
        .iter()
        .find(|r| matches!(r.outcome, WindowOutcome::DataGap { .. }))
        .unwrap();
    assert_eq!(gap.window.start, start + Duration::days(8));
}

#[tokio::test]
async fn test_misshaped_hour_skips_only_its_windows() {
    let start = time::por_start();
    let mut source = ten_days(start);
    // Hour on day 4 falls in the windows starting day 3 and day 4
    let bad = start + Duration::hours(24 * 4 + 5);
    source.insert(bad, HourlyGrid::filled(grid::unit(5, 5), 1.0));

    let store = Arc::new(MemoryStormStore::new());
    let summary = pipeline(Arc::new(source), store.clone())
        .extract(start, por_end(start))
        .await
        .unwrap();
    assert_eq!(summary.invalid_grids, 2);
    assert_eq!(summary.storms, 7);
    assert_eq!(summary.failed, 0);

    let records = store.window_outcomes(48).await.unwrap();
    assert_eq!(records.len(), 9);
    let invalid: Vec<_> = records
        .iter()
        .filter(|r| matches!(r.outcome, WindowOutcome::InvalidGrid { .. }))
        .map(|r| r.window.start)
        .collect();
    assert_eq!(invalid, vec![start + Duration::days(3), start + Duration::days(4)]);
}

struct Uniform(f64);

impl ReferenceGrid for Uniform {
    fn reference_value(&self, _x: f64, _y: f64) -> Option<f64> {
        Some(self.0)
    }
}

#[tokio::test]
async fn test_normalized_mean_recorded() {
    let start = time::por_start();
    let store = Arc::new(MemoryStormStore::new());
    let normalizer = Normalizer::new(Arc::new(Uniform(2.0)), spec(), 4);
    pipeline(Arc::new(ten_days(start)), store.clone())
        .with_normalizer(normalizer)
        .run(start, por_end(start))
        .await
        .unwrap();

    let storms = store.query_storms(&StormQuery::default()).await.unwrap();
    assert!(!storms.is_empty());
    for ranked in storms {
        let norm = ranked.normalized_mean().unwrap();
        assert_approx_eq!(norm, ranked.storm.stats.mean / 2.0, 1e-9);
    }
}
