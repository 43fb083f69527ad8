//! Storm identification pipeline.
//!
//! Windows are independent, so they are aggregated and clustered
//! concurrently (bounded by `concurrency`). Every finished window is
//! checkpointed in the store; a later run over the same period skips
//! the recorded windows. Ranking waits for all windows and reads the
//! checkpoints back.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use storm_common::{AreaMask, StormError, StormResult, Window, WindowOutcome, WindowRecord};
use tracing::{error, info, warn};

use crate::aggregate::aggregate_window;
use crate::config::{ExtractionConfig, GapPolicy};
use crate::normalize::Normalizer;
use crate::rank::{rank_all, StormSeparation, TemporalSeparation};
use crate::select::identify_window_storm;
use crate::source::GridSource;
use crate::store::StormStore;
use crate::window::WindowGenerator;

/// Counts of what an extraction run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Windows in the period of record
    pub windows_total: usize,
    /// Windows skipped because a previous run recorded them
    pub resumed: usize,
    pub storms: usize,
    pub degenerate: usize,
    pub no_candidate: usize,
    pub data_gaps: usize,
    /// Windows recorded with a mis-shaped hourly grid
    pub invalid_grids: usize,
    /// Windows that failed transiently and were left unrecorded
    pub failed: usize,
    /// Ranked storms written to the store
    pub ranked: usize,
}

impl RunSummary {
    fn count(&mut self, outcome: &WindowOutcome) {
        match outcome {
            WindowOutcome::Storm(_) => self.storms += 1,
            WindowOutcome::Degenerate { .. } => self.degenerate += 1,
            WindowOutcome::NoCandidate => self.no_candidate += 1,
            WindowOutcome::DataGap { .. } => self.data_gaps += 1,
            WindowOutcome::InvalidGrid { .. } => self.invalid_grids += 1,
        }
    }
}

pub struct StormPipeline {
    config: ExtractionConfig,
    source: Arc<dyn GridSource>,
    mask: Arc<AreaMask>,
    store: Arc<dyn StormStore>,
    normalizer: Option<Normalizer>,
    separation: Arc<dyn StormSeparation>,
}

impl StormPipeline {
    pub fn new(
        config: ExtractionConfig,
        source: Arc<dyn GridSource>,
        mask: Arc<AreaMask>,
        store: Arc<dyn StormStore>,
    ) -> StormResult<Self> {
        config.validate()?;
        if source.spec() != mask.spec() {
            return Err(StormError::MalformedMask(
                "mask grid does not match the grid source".to_string(),
            ));
        }

        Ok(Self {
            config,
            source,
            mask,
            store,
            normalizer: None,
            separation: Arc::new(TemporalSeparation),
        })
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Replace the predicate that decides whether two storms are distinct.
    pub fn with_separation(mut self, separation: Arc<dyn StormSeparation>) -> Self {
        self.separation = separation;
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract every window of the period of record, then rank.
    pub async fn run(
        &self,
        por_start: DateTime<Utc>,
        por_end: DateTime<Utc>,
    ) -> StormResult<RunSummary> {
        let mut summary = self.extract(por_start, por_end).await?;
        summary.ranked = self.rank_and_store().await?;

        info!(
            windows = summary.windows_total,
            resumed = summary.resumed,
            storms = summary.storms,
            degenerate = summary.degenerate,
            no_candidate = summary.no_candidate,
            data_gaps = summary.data_gaps,
            invalid_grids = summary.invalid_grids,
            failed = summary.failed,
            ranked = summary.ranked,
            "Storm identification complete"
        );

        Ok(summary)
    }

    /// Identify one storm candidate per window and checkpoint each outcome.
    pub async fn extract(
        &self,
        por_start: DateTime<Utc>,
        por_end: DateTime<Utc>,
    ) -> StormResult<RunSummary> {
        let generator = WindowGenerator::new(
            por_start,
            por_end,
            self.config.duration_hours,
            self.config.step_hours,
        )?;

        let done: HashSet<DateTime<Utc>> = self
            .store
            .window_outcomes(self.config.duration_hours)
            .await?
            .into_iter()
            .map(|r| r.window.start)
            .collect();

        let mut summary = RunSummary::default();
        let mut pending = Vec::new();
        for window in &generator {
            summary.windows_total += 1;
            if done.contains(&window.start) {
                summary.resumed += 1;
            } else {
                pending.push(window);
            }
        }

        info!(
            windows = summary.windows_total,
            resumed = summary.resumed,
            pending = pending.len(),
            duration_hours = self.config.duration_hours,
            concurrency = self.config.concurrency,
            "Starting window extraction"
        );

        let mut results = stream::iter(pending)
            .map(|window| async move { (window, self.process_window(window).await) })
            .buffer_unordered(self.config.concurrency);

        while let Some((window, result)) = results.next().await {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(StormError::DataGap { timestamp }) => match self.config.gap_policy {
                    GapPolicy::Skip => {
                        warn!(
                            window_start = %window.start,
                            missing = %timestamp,
                            "Skipping window with missing data"
                        );
                        WindowOutcome::DataGap {
                            missing: timestamp.to_rfc3339(),
                        }
                    }
                    GapPolicy::Abort => {
                        error!(
                            window_start = %window.start,
                            missing = %timestamp,
                            "Aborting run on missing data"
                        );
                        return Err(StormError::DataGap { timestamp });
                    }
                },
                Err(StormError::InvalidGrid(reason)) => {
                    warn!(
                        window_start = %window.start,
                        reason = %reason,
                        "Skipping window with a mis-shaped grid"
                    );
                    WindowOutcome::InvalidGrid { reason }
                }
                Err(e) if e.is_transient() => {
                    error!(
                        window_start = %window.start,
                        error = %e,
                        "Window failed after retries, leaving it for the next run"
                    );
                    summary.failed += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            summary.count(&outcome);
            self.store
                .put_window_outcome(&WindowRecord { window, outcome })
                .await?;
        }

        Ok(summary)
    }

    /// Rank every checkpointed storm and write the ranked storms.
    ///
    /// Returns the number of ranked storms written.
    pub async fn rank_and_store(&self) -> StormResult<usize> {
        let storms: Vec<_> = self
            .store
            .window_outcomes(self.config.duration_hours)
            .await?
            .into_iter()
            .filter_map(|r| match r.outcome {
                WindowOutcome::Storm(storm) => Some(storm),
                _ => None,
            })
            .collect();

        let by_partition = rank_all(
            storms,
            self.config.partition,
            self.config.ranking_statistic,
            self.config.top_n,
            self.separation.as_ref(),
        );

        self.store.delete_storms(self.config.duration_hours).await?;

        let mut written = 0;
        for (partition, ranked) in by_partition {
            let accepted = ranked.iter().filter(|r| !r.is_suppressed()).count();
            for storm in &ranked {
                self.store.put_storm(storm).await?;
            }
            written += ranked.len();
            info!(
                partition,
                ranked = ranked.len(),
                accepted,
                "Stored ranked storms"
            );
        }

        Ok(written)
    }

    async fn process_window(&self, window: Window) -> StormResult<WindowOutcome> {
        let aggregated =
            aggregate_window(self.source.as_ref(), &self.mask, window, &self.config.retry).await?;

        let config = self.config.clone();
        let mut outcome =
            tokio::task::spawn_blocking(move || identify_window_storm(&aggregated, &config))
                .await
                .map_err(|e| StormError::Io(format!("window task failed: {}", e)))?;

        if let (Some(normalizer), WindowOutcome::Storm(storm)) = (&self.normalizer, &mut outcome) {
            normalizer.annotate(storm);
        }

        Ok(outcome)
    }
}
