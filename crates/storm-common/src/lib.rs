//! Common types shared across the storm identification crates.

pub mod error;
pub mod grid;
pub mod storm;
pub mod time;

pub use error::{StormError, StormResult};
pub use grid::{neighbor_offsets, AreaMask, GridSpec, KING_OFFSETS};
pub use storm::{
    RankStatistic, RankedStorm, StormGeometry, StormStats, WindowOutcome, WindowRecord,
    WindowStorm,
};
pub use time::{Partition, Season, StormStart, Window};
