//! Per-run configuration for storm extraction.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use storm_common::{Partition, RankStatistic, StormError, StormResult};
use tracing::warn;

/// What to do when a window is missing an hourly grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapPolicy {
    /// Record the gap and move on to the next window.
    #[default]
    Skip,
    /// Stop the run.
    Abort,
}

impl GapPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "skip" => Some(Self::Skip),
            "abort" => Some(Self::Abort),
            _ => None,
        }
    }
}

/// Bounded exponential backoff for grid retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first failure
    pub max_retries: u32,
    /// Initial retry delay in milliseconds (doubles each retry)
    pub initial_delay_ms: u64,
    /// Maximum retry delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Parameters of one extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Storm size in grid cells (storm area / cell area)
    pub target_cell_count: usize,

    /// Accumulation window length in hours.
    pub duration_hours: u32,

    /// Spacing between window starts in hours, anchored to midnight.
    pub step_hours: u32,

    /// Neighbor distance, in cells, for initial clustering (1.5 = 8-connectivity).
    pub adjacency_radius: f64,

    /// Exceedance sets larger than this multiple of the target mark a window degenerate.
    pub max_exceedance_multiple: usize,

    /// Lowest accumulation (mm) allowed into the exceedance set.
    pub minimum_threshold: f64,

    /// Add below-threshold pockets enclosed by the exceedance set before clustering.
    pub fill_voids: bool,

    /// Statistic used to rank storms.
    pub ranking_statistic: RankStatistic,

    /// Number of non-suppressed storms to select per partition.
    pub top_n: usize,

    /// Partitioning of storms before ranking.
    pub partition: Partition,

    /// Handling of missing hourly grids.
    pub gap_policy: GapPolicy,

    /// Number of windows processed concurrently.
    pub concurrency: usize,

    /// Retry policy for transient grid retrieval failures.
    pub retry: RetryConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            target_cell_count: 16,
            duration_hours: 72,
            step_hours: 24,
            adjacency_radius: 1.5,
            max_exceedance_multiple: 10,
            minimum_threshold: 0.0,
            fill_voids: true,
            ranking_statistic: RankStatistic::Mean,
            top_n: 10,
            partition: Partition::CalendarYear,
            gap_policy: GapPolicy::Skip,
            concurrency: 4,
            retry: RetryConfig::default(),
        }
    }
}

impl ExtractionConfig {
    /// Override fields from environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("STORM_TARGET_CELLS") {
            if let Ok(n) = val.parse() {
                self.target_cell_count = n;
            }
        }

        if let Ok(val) = std::env::var("STORM_DURATION_HOURS") {
            if let Ok(h) = val.parse() {
                self.duration_hours = h;
            }
        }

        if let Ok(val) = std::env::var("STORM_STEP_HOURS") {
            if let Ok(h) = val.parse() {
                self.step_hours = h;
            }
        }

        if let Ok(val) = std::env::var("STORM_ADJACENCY_RADIUS") {
            if let Ok(r) = val.parse() {
                self.adjacency_radius = r;
            }
        }

        if let Ok(val) = std::env::var("STORM_MAX_EXCEEDANCE_MULTIPLE") {
            if let Ok(m) = val.parse() {
                self.max_exceedance_multiple = m;
            }
        }

        if let Ok(val) = std::env::var("STORM_MINIMUM_THRESHOLD") {
            if let Ok(t) = val.parse() {
                self.minimum_threshold = t;
            }
        }

        if let Ok(val) = std::env::var("STORM_FILL_VOIDS") {
            if let Ok(b) = val.parse() {
                self.fill_voids = b;
            }
        }

        if let Ok(val) = std::env::var("STORM_RANKING_STATISTIC") {
            if let Some(stat) = RankStatistic::from_str(&val) {
                self.ranking_statistic = stat;
            }
        }

        if let Ok(val) = std::env::var("STORM_TOP_N") {
            if let Ok(n) = val.parse() {
                self.top_n = n;
            }
        }

        if let Ok(val) = std::env::var("STORM_PARTITION") {
            if let Some(p) = Partition::from_str(&val) {
                self.partition = p;
            }
        }

        if let Ok(val) = std::env::var("STORM_GAP_POLICY") {
            match GapPolicy::from_str(&val) {
                Some(policy) => self.gap_policy = policy,
                None => warn!(value = %val, "Ignoring unknown STORM_GAP_POLICY"),
            }
        }

        if let Ok(val) = std::env::var("STORM_CONCURRENCY") {
            if let Ok(n) = val.parse() {
                self.concurrency = n;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> StormResult<()> {
        if self.target_cell_count == 0 {
            return Err(invalid("target_cell_count must be > 0"));
        }

        if self.duration_hours == 0 {
            return Err(invalid("duration_hours must be > 0"));
        }

        if self.step_hours == 0 {
            return Err(invalid("step_hours must be > 0"));
        }

        if !(self.adjacency_radius >= 1.0) {
            return Err(invalid("adjacency_radius must be >= 1"));
        }

        if self.max_exceedance_multiple == 0 {
            return Err(invalid("max_exceedance_multiple must be >= 1"));
        }

        if !self.minimum_threshold.is_finite() {
            return Err(invalid("minimum_threshold must be finite"));
        }

        if self.top_n == 0 {
            return Err(invalid("top_n must be > 0"));
        }

        if self.concurrency == 0 {
            return Err(invalid("concurrency must be > 0"));
        }

        Ok(())
    }

    /// Largest exceedance set that is still clustered.
    pub fn exceedance_limit(&self) -> usize {
        self.target_cell_count
            .saturating_mul(self.max_exceedance_multiple)
    }
}

fn invalid(msg: &str) -> StormError {
    StormError::InvalidConfig(msg.to_string())
}
