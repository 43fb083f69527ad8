//! SQLite catalog of ranked storms and window checkpoints.
//!
//! Two tables back the [`StormStore`] contract:
//!
//! - `ranked_storms`: one row per (duration, window start), with the
//!   ranking columns broken out for filtering and ordering and the full
//!   storm kept as JSON.
//! - `window_records`: the outcome of every processed window, used to
//!   resume an interrupted extraction.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use storm_common::{RankedStorm, StormError, StormResult, WindowRecord};
use storm_processor::{StormOrder, StormQuery, StormStore};
use tracing::{debug, info};

fn db_err(err: sqlx::Error) -> StormError {
    StormError::Storage(err.to_string())
}

/// Storm catalog backed by a SQLite database.
#[derive(Clone)]
pub struct StormCatalog {
    pool: SqlitePool,
}

impl StormCatalog {
    /// Open or create the catalog at `path`.
    pub async fn open(path: &Path) -> StormResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let catalog = Self { pool };
        catalog.init_schema().await?;

        info!(path = %path.display(), "Opened storm catalog");
        Ok(catalog)
    }

    /// In-memory catalog, mostly for tests.
    pub async fn open_memory() -> StormResult<Self> {
        let options = SqliteConnectOptions::new().filename(":memory:");

        // A single connection so every query sees the same database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let catalog = Self { pool };
        catalog.init_schema().await?;
        Ok(catalog)
    }

    async fn init_schema(&self) -> StormResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ranked_storms (
                duration_hours INTEGER NOT NULL,
                start_ts INTEGER NOT NULL,
                partition_key INTEGER NOT NULL,
                true_rank INTEGER NOT NULL,
                declustered_rank INTEGER NOT NULL,
                mean REAL NOT NULL,
                max REAL NOT NULL,
                sum REAL NOT NULL,
                norm_mean REAL,
                storm_json TEXT NOT NULL,
                PRIMARY KEY (duration_hours, start_ts)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS window_records (
                duration_hours INTEGER NOT NULL,
                start_ts INTEGER NOT NULL,
                kind TEXT NOT NULL,
                record_json TEXT NOT NULL,
                PRIMARY KEY (duration_hours, start_ts)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_storms_partition ON ranked_storms(partition_key, duration_hours)",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_kind ON window_records(kind)")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        debug!("Storm catalog schema initialized");
        Ok(())
    }

    /// Number of checkpointed windows per outcome kind.
    pub async fn outcome_counts(&self, duration_hours: u32) -> StormResult<BTreeMap<String, u64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT kind, COUNT(*) FROM window_records WHERE duration_hours = ? GROUP BY kind",
        )
        .bind(duration_hours as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(kind, count)| (kind, count as u64))
            .collect())
    }
}

fn order_clause(order: StormOrder) -> &'static str {
    match order {
        StormOrder::TrueRank => "true_rank ASC, start_ts ASC, duration_hours ASC",
        StormOrder::DeclusteredRank => {
            "declustered_rank < 0, declustered_rank ASC, start_ts ASC, duration_hours ASC"
        }
        StormOrder::Mean => "mean DESC, start_ts ASC, duration_hours ASC",
        StormOrder::Max => "max DESC, start_ts ASC, duration_hours ASC",
        StormOrder::Sum => "sum DESC, start_ts ASC, duration_hours ASC",
        StormOrder::NormMean => {
            "norm_mean IS NULL, norm_mean DESC, start_ts ASC, duration_hours ASC"
        }
        StormOrder::Start => "start_ts ASC, duration_hours ASC",
    }
}

fn select_sql(query: &StormQuery) -> String {
    let mut filters = Vec::new();
    if query.partition.is_some() {
        filters.push("partition_key = ?");
    }
    if query.duration_hours.is_some() {
        filters.push("duration_hours = ?");
    }
    if query.declustered_only {
        filters.push("declustered_rank > 0");
    }

    let mut sql = String::from("SELECT storm_json FROM ranked_storms");
    if !filters.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&filters.join(" AND "));
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(order_clause(query.order_by));
    if query.limit.is_some() {
        sql.push_str(" LIMIT ?");
    }
    sql
}

#[async_trait]
impl StormStore for StormCatalog {
    async fn put_storm(&self, storm: &RankedStorm) -> StormResult<()> {
        let window = storm.storm.window;
        let json = serde_json::to_string(storm)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO ranked_storms
                (duration_hours, start_ts, partition_key, true_rank, declustered_rank,
                 mean, max, sum, norm_mean, storm_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(window.duration_hours as i64)
        .bind(window.start.timestamp())
        .bind(storm.partition as i64)
        .bind(storm.true_rank as i64)
        .bind(storm.declustered_rank as i64)
        .bind(storm.storm.stats.mean)
        .bind(storm.storm.stats.max)
        .bind(storm.storm.stats.sum)
        .bind(storm.normalized_mean())
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn query_storms(&self, query: &StormQuery) -> StormResult<Vec<RankedStorm>> {
        let sql = select_sql(query);
        let mut q = sqlx::query_as::<_, (String,)>(&sql);
        if let Some(partition) = query.partition {
            q = q.bind(partition as i64);
        }
        if let Some(duration) = query.duration_hours {
            q = q.bind(duration as i64);
        }
        if let Some(limit) = query.limit {
            q = q.bind(limit as i64);
        }

        let rows = q.fetch_all(&self.pool).await.map_err(db_err)?;
        rows.into_iter()
            .map(|(json,)| serde_json::from_str(&json).map_err(StormError::from))
            .collect()
    }

    async fn delete_storms(&self, duration_hours: u32) -> StormResult<()> {
        let result = sqlx::query("DELETE FROM ranked_storms WHERE duration_hours = ?")
            .bind(duration_hours as i64)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        debug!(
            duration_hours,
            removed = result.rows_affected(),
            "Cleared ranked storms"
        );
        Ok(())
    }

    async fn put_window_outcome(&self, record: &WindowRecord) -> StormResult<()> {
        let json = serde_json::to_string(record)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO window_records (duration_hours, start_ts, kind, record_json)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(record.window.duration_hours as i64)
        .bind(record.window.start.timestamp())
        .bind(record.outcome.kind())
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn window_outcomes(&self, duration_hours: u32) -> StormResult<Vec<WindowRecord>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT record_json FROM window_records WHERE duration_hours = ? ORDER BY start_ts",
        )
        .bind(duration_hours as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|(json,)| serde_json::from_str(&json).map_err(StormError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use storm_common::{GridSpec, Window, WindowOutcome, WindowStorm};
    use test_utils::time;

    fn ranked(
        start: DateTime<Utc>,
        values: &[f64],
        true_rank: u32,
        declustered_rank: i32,
    ) -> RankedStorm {
        let spec = GridSpec::new(4, 4, 1.0, -1.0, 0.5, 3.5);
        let cells: Vec<usize> = (0..values.len()).collect();
        let storm = WindowStorm::new(Window::new(start, 72), &spec, cells, values.to_vec(), 1.0);
        RankedStorm {
            storm,
            partition: 1979,
            true_rank,
            declustered_rank,
        }
    }

    async fn seeded() -> StormCatalog {
        let catalog = StormCatalog::open_memory().await.unwrap();
        let start = time::por_start();
        catalog
            .put_storm(&ranked(start, &[5.0, 5.0], 2, -1))
            .await
            .unwrap();
        catalog
            .put_storm(&ranked(start + Duration::days(1), &[9.0, 1.0], 1, 1))
            .await
            .unwrap();
        catalog
            .put_storm(&ranked(start + Duration::days(5), &[2.0, 4.0], 3, 2))
            .await
            .unwrap();
        catalog
    }

    #[tokio::test]
    async fn test_query_orders() {
        let catalog = seeded().await;

        let by_rank = catalog.query_storms(&StormQuery::default()).await.unwrap();
        let ranks: Vec<u32> = by_rank.iter().map(|s| s.true_rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);

        let by_declustered = catalog
            .query_storms(&StormQuery::default().order_by(StormOrder::DeclusteredRank))
            .await
            .unwrap();
        let ranks: Vec<i32> = by_declustered.iter().map(|s| s.declustered_rank).collect();
        assert_eq!(ranks, vec![1, 2, -1]);

        let by_max = catalog
            .query_storms(&StormQuery::default().order_by(StormOrder::Max))
            .await
            .unwrap();
        assert_eq!(by_max[0].storm.stats.max, 9.0);

        // Equal means fall back to the earlier start
        let by_mean = catalog
            .query_storms(&StormQuery::default().order_by(StormOrder::Mean))
            .await
            .unwrap();
        assert_eq!(by_mean[0].true_rank, 2);
        assert_eq!(by_mean[1].true_rank, 1);
    }

    #[tokio::test]
    async fn test_filters_and_limit() {
        let catalog = seeded().await;

        let declustered = catalog
            .query_storms(&StormQuery::partition(1979).declustered_only())
            .await
            .unwrap();
        assert_eq!(declustered.len(), 2);
        assert!(declustered.iter().all(|s| !s.is_suppressed()));

        let top = catalog
            .query_storms(&StormQuery::partition(1979).limit(1))
            .await
            .unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].true_rank, 1);

        let other_year = catalog
            .query_storms(&StormQuery::partition(1980))
            .await
            .unwrap();
        assert!(other_year.is_empty());

        let other_duration = catalog
            .query_storms(&StormQuery::default().duration(24))
            .await
            .unwrap();
        assert!(other_duration.is_empty());
    }

    #[tokio::test]
    async fn test_norm_mean_missing_sorts_last() {
        let catalog = StormCatalog::open_memory().await.unwrap();
        let start = time::por_start();

        let mut with_norm = ranked(start + Duration::days(3), &[1.0], 2, 2);
        with_norm.storm.stats.norm_mean = Some(0.5);
        catalog.put_storm(&with_norm).await.unwrap();
        catalog
            .put_storm(&ranked(start, &[8.0], 1, 1))
            .await
            .unwrap();

        let storms = catalog
            .query_storms(&StormQuery::default().order_by(StormOrder::NormMean))
            .await
            .unwrap();
        assert_eq!(storms[0].normalized_mean(), Some(0.5));
        assert_eq!(storms[1].normalized_mean(), None);
    }

    #[tokio::test]
    async fn test_put_replaces_and_delete_clears() {
        let catalog = seeded().await;
        let start = time::por_start();

        catalog
            .put_storm(&ranked(start, &[5.0, 5.0], 7, 4))
            .await
            .unwrap();
        let storms = catalog.query_storms(&StormQuery::default()).await.unwrap();
        assert_eq!(storms.len(), 3);
        assert!(storms.iter().any(|s| s.true_rank == 7));

        catalog.delete_storms(24).await.unwrap();
        assert_eq!(
            catalog
                .query_storms(&StormQuery::default())
                .await
                .unwrap()
                .len(),
            3
        );

        catalog.delete_storms(72).await.unwrap();
        assert!(catalog
            .query_storms(&StormQuery::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_window_outcomes_round_trip() {
        let catalog = StormCatalog::open_memory().await.unwrap();
        let start = time::por_start();

        let later = WindowRecord {
            window: Window::new(start + Duration::days(1), 72),
            outcome: WindowOutcome::NoCandidate,
        };
        let earlier = WindowRecord {
            window: Window::new(start, 72),
            outcome: WindowOutcome::Degenerate {
                exceedance: 400,
                limit: 200,
            },
        };
        catalog.put_window_outcome(&later).await.unwrap();
        catalog.put_window_outcome(&earlier).await.unwrap();

        let records = catalog.window_outcomes(72).await.unwrap();
        assert_eq!(records, vec![earlier, later]);
        assert!(catalog.window_outcomes(24).await.unwrap().is_empty());

        let counts = catalog.outcome_counts(72).await.unwrap();
        assert_eq!(counts.get("degenerate"), Some(&1));
        assert_eq!(counts.get("no_candidate"), Some(&1));
    }

    #[tokio::test]
    async fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("storms.db");
        let start = time::por_start();

        {
            let catalog = StormCatalog::open(&path).await.unwrap();
            catalog
                .put_storm(&ranked(start, &[3.0, 4.0], 1, 1))
                .await
                .unwrap();
        }

        let reopened = StormCatalog::open(&path).await.unwrap();
        let storms = reopened.query_storms(&StormQuery::default()).await.unwrap();
        assert_eq!(storms.len(), 1);
        assert_eq!(storms[0].storm.window.start, start);
        assert_eq!(storms[0].storm.stats.mean, 3.5);
    }
}
