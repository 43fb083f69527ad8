//! Zarr V3 storage for hourly precipitation and reference grids.
//!
//! Each hourly grid is a single 2-D float32 array (`[ny, nx]`, NaN fill)
//! written under a year directory:
//!
//! ```text
//! {root}/
//!   1979/
//!     1979020101.zarr/   hour 1979-02-01 00:00 to 01:00
//!     1979020102.zarr/
//!     ...
//! ```
//!
//! Reads run on the blocking pool so many windows can be aggregated
//! concurrently.

mod array;
pub mod hourly;
pub mod reference;

pub use array::{read_grid, write_grid};
pub use hourly::ZarrGridSource;
pub use reference::ReferenceRaster;
