//! Hourly grid retrieval: the source contract and its retry policy.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use storm_common::{GridSpec, StormError, StormResult};
use tracing::warn;

use crate::config::RetryConfig;

/// One hour of precipitation (mm), row-major, `NaN` where there is no data.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyGrid {
    pub spec: GridSpec,
    pub values: Vec<f32>,
}

impl HourlyGrid {
    pub fn new(spec: GridSpec, values: Vec<f32>) -> StormResult<Self> {
        if values.len() != spec.len() {
            return Err(StormError::InvalidGrid(format!(
                "expected {} values for {}x{} grid, got {}",
                spec.len(),
                spec.nx,
                spec.ny,
                values.len()
            )));
        }
        Ok(Self { spec, values })
    }

    /// Grid of a single constant value.
    pub fn filled(spec: GridSpec, value: f32) -> Self {
        Self {
            spec,
            values: vec![value; spec.len()],
        }
    }
}

/// Source of hourly precipitation grids for one transposition area.
///
/// Implementations return [`StormError::DataGap`] when the hour is
/// permanently missing and a transient error (see
/// [`StormError::is_transient`]) when a retry may succeed.
#[async_trait]
pub trait GridSource: Send + Sync {
    /// Grid for the hour beginning at `timestamp`.
    async fn hourly_grid(&self, timestamp: DateTime<Utc>) -> StormResult<HourlyGrid>;

    /// Layout shared by every grid this source returns.
    fn spec(&self) -> &GridSpec;
}

/// In-memory grid source, keyed by hour.
pub struct MemoryGridSource {
    spec: GridSpec,
    grids: HashMap<DateTime<Utc>, HourlyGrid>,
    transient_failures: Mutex<HashMap<DateTime<Utc>, u32>>,
}

impl MemoryGridSource {
    pub fn new(spec: GridSpec) -> Self {
        Self {
            spec,
            grids: HashMap::new(),
            transient_failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&mut self, timestamp: DateTime<Utc>, grid: HourlyGrid) {
        self.grids.insert(timestamp, grid);
    }

    pub fn remove(&mut self, timestamp: &DateTime<Utc>) -> Option<HourlyGrid> {
        self.grids.remove(timestamp)
    }

    /// Fail the next `count` requests for `timestamp` with a transient error.
    pub fn fail_transiently(&self, timestamp: DateTime<Utc>, count: u32) {
        if let Ok(mut failures) = self.transient_failures.lock() {
            failures.insert(timestamp, count);
        }
    }

    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }
}

#[async_trait]
impl GridSource for MemoryGridSource {
    async fn hourly_grid(&self, timestamp: DateTime<Utc>) -> StormResult<HourlyGrid> {
        if let Ok(mut failures) = self.transient_failures.lock() {
            if let Some(remaining) = failures.get_mut(&timestamp) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StormError::SourceUnavailable(format!(
                        "simulated outage at {}",
                        timestamp
                    )));
                }
            }
        }

        self.grids
            .get(&timestamp)
            .cloned()
            .ok_or(StormError::DataGap { timestamp })
    }

    fn spec(&self) -> &GridSpec {
        &self.spec
    }
}

/// Retries transient failures with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial retry delay (doubles each retry)
    pub initial_delay: Duration,
    /// Maximum retry delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
        }
    }
}

impl RetryPolicy {
    /// No retries; every failure is returned immediately.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the retry budget
    /// is spent.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> StormResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StormResult<T>>,
    {
        let mut retry_count = 0;
        let mut delay = self.initial_delay;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry_count < self.max_retries => {
                    retry_count += 1;
                    warn!(
                        what = %what,
                        error = %e,
                        retry = retry_count,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrieval failed, retrying"
                    );

                    tokio::time::sleep(delay).await;

                    // Exponential backoff
                    delay = std::cmp::min(delay * 2, self.max_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
