//! Storm identification for stochastic storm transposition.
//!
//! Scans a gridded hourly precipitation record over a transposition area
//! and produces one storm candidate per accumulation window, then ranks
//! and declusters the candidates per year.
//!
//! # Architecture
//!
//! ```text
//! WindowGenerator ──► aggregate_window ──► estimate_threshold
//!                       (GridSource)             │
//!                                                ▼
//!                     select_window_storm ◄── find_clusters
//!                              │              reconcile_clusters
//!                              ▼
//!                    StormStore (checkpoint) ──► rank_all ──► StormStore
//! ```
//!
//! # Example
//!
//! ```ignore
//! use storm_processor::{ExtractionConfig, MemoryStormStore, StormPipeline};
//!
//! let pipeline = StormPipeline::new(config, source, mask, Arc::new(MemoryStormStore::new()))?;
//! let summary = pipeline.run(por_start, por_end).await?;
//! println!("{} storms", summary.storms);
//! ```

pub mod aggregate;
pub mod cluster;
pub mod config;
pub mod normalize;
pub mod pipeline;
pub mod rank;
pub mod select;
pub mod source;
pub mod store;
pub mod threshold;
pub mod window;

// Re-export commonly used types at crate root
pub use aggregate::{aggregate_window, AggregatedWindow};
pub use cluster::{find_clusters, reconcile_clusters, Cluster, Reconciliation, ShrinkStep};
pub use config::{ExtractionConfig, GapPolicy, RetryConfig};
pub use normalize::{Normalizer, ReferenceGrid};
pub use pipeline::{RunSummary, StormPipeline};
pub use rank::{rank_all, rank_partition, StormSeparation, TemporalSeparation};
pub use select::{identify_window_storm, select_window_storm};
pub use source::{GridSource, HourlyGrid, MemoryGridSource, RetryPolicy};
pub use store::{MemoryStormStore, StormOrder, StormQuery, StormStore};
pub use threshold::{
    check_degenerate, estimate_threshold, exceedance_set, fill_voids, ThresholdEstimate,
};
pub use window::{WindowGenerator, Windows};

pub use storm_common::{
    AreaMask, GridSpec, Partition, RankStatistic, RankedStorm, StormError, StormResult,
    WindowOutcome, WindowStorm,
};
