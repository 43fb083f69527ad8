//! Storm candidates and ranked storms.

use serde::{Deserialize, Serialize};

use crate::grid::GridSpec;
use crate::time::{StormStart, Window};

/// Summary statistics over a storm's cell accumulations (mm).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormStats {
    pub count: usize,
    pub mean: f64,
    pub max: f64,
    pub min: f64,
    pub sum: f64,
    /// Mean of accumulations divided by the reference frequency grid.
    pub norm_mean: Option<f64>,
}

impl StormStats {
    /// Compute statistics over a non-empty value slice.
    pub fn from_values(values: &[f64]) -> Self {
        let count = values.len();
        let sum: f64 = values.iter().sum();
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let mean = if count == 0 { 0.0 } else { sum / count as f64 };
        Self {
            count,
            mean,
            max,
            min,
            sum,
            norm_mean: None,
        }
    }
}

/// Spatial footprint of a storm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormGeometry {
    /// Number of columns spanned
    pub x_delta: usize,
    /// Number of rows spanned
    pub y_delta: usize,
    pub center_x: f64,
    pub center_y: f64,
}

impl StormGeometry {
    /// Footprint of a set of cells; center is the mean of cell centers.
    pub fn from_cells(spec: &GridSpec, cells: &[usize]) -> Self {
        if cells.is_empty() {
            return Self {
                x_delta: 0,
                y_delta: 0,
                center_x: f64::NAN,
                center_y: f64::NAN,
            };
        }

        let (mut min_col, mut max_col) = (usize::MAX, 0);
        let (mut min_row, mut max_row) = (usize::MAX, 0);
        let (mut sum_x, mut sum_y) = (0.0, 0.0);
        for &cell in cells {
            let (col, row) = spec.cell(cell);
            min_col = min_col.min(col);
            max_col = max_col.max(col);
            min_row = min_row.min(row);
            max_row = max_row.max(row);
            let (x, y) = spec.cell_center(cell);
            sum_x += x;
            sum_y += y;
        }

        Self {
            x_delta: max_col - min_col + 1,
            y_delta: max_row - min_row + 1,
            center_x: sum_x / cells.len() as f64,
            center_y: sum_y / cells.len() as f64,
        }
    }
}

/// The best cluster found for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStorm {
    pub window: Window,
    pub start: StormStart,
    /// Member cell indices, ascending
    pub cells: Vec<usize>,
    /// Accumulation per member cell, aligned with `cells`
    pub values: Vec<f64>,
    pub stats: StormStats,
    pub geometry: StormGeometry,
    /// Threshold used to build the exceedance set
    pub threshold: f64,
}

impl WindowStorm {
    pub fn new(
        window: Window,
        spec: &GridSpec,
        cells: Vec<usize>,
        values: Vec<f64>,
        threshold: f64,
    ) -> Self {
        let stats = StormStats::from_values(&values);
        let geometry = StormGeometry::from_cells(spec, &cells);
        Self {
            start: StormStart::from_datetime(&window.start),
            window,
            cells,
            values,
            stats,
            geometry,
            threshold,
        }
    }
}

/// Statistic used to order storms within a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankStatistic {
    #[default]
    Mean,
    Max,
    Sum,
    NormMean,
}

impl RankStatistic {
    /// Value of this statistic, if the storm has one.
    pub fn value(&self, stats: &StormStats) -> Option<f64> {
        match self {
            RankStatistic::Mean => Some(stats.mean),
            RankStatistic::Max => Some(stats.max),
            RankStatistic::Sum => Some(stats.sum),
            RankStatistic::NormMean => stats.norm_mean,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mean" => Some(RankStatistic::Mean),
            "max" => Some(RankStatistic::Max),
            "sum" => Some(RankStatistic::Sum),
            "norm_mean" | "normalized_mean" => Some(RankStatistic::NormMean),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RankStatistic::Mean => "mean",
            RankStatistic::Max => "max",
            RankStatistic::Sum => "sum",
            RankStatistic::NormMean => "norm_mean",
        }
    }
}

/// A storm with its ranks inside a partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedStorm {
    pub storm: WindowStorm,
    /// Partition key (calendar or water year)
    pub partition: i32,
    /// 1-based position in the sorted candidate sequence
    pub true_rank: u32,
    /// 1-based position among non-suppressed storms, or -1 when suppressed
    pub declustered_rank: i32,
}

impl RankedStorm {
    pub fn is_suppressed(&self) -> bool {
        self.declustered_rank < 0
    }

    pub fn normalized_mean(&self) -> Option<f64> {
        self.storm.stats.norm_mean
    }

    /// Stable identifier: duration and start date.
    pub fn id(&self) -> String {
        format!(
            "{}h_{}",
            self.storm.window.duration_hours,
            self.storm.window.start.format("%Y%m%d%H")
        )
    }
}

/// What a window produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowOutcome {
    Storm(WindowStorm),
    /// Exceedance set was too large to cluster meaningfully
    Degenerate { exceedance: usize, limit: usize },
    /// No cluster reached the target size
    NoCandidate,
    /// An hourly grid was permanently missing
    DataGap { missing: String },
    /// An hourly grid did not match the area layout
    InvalidGrid { reason: String },
}

impl WindowOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            WindowOutcome::Storm(_) => "storm",
            WindowOutcome::Degenerate { .. } => "degenerate",
            WindowOutcome::NoCandidate => "no_candidate",
            WindowOutcome::DataGap { .. } => "data_gap",
            WindowOutcome::InvalidGrid { .. } => "invalid_grid",
        }
    }

    pub fn storm(&self) -> Option<&WindowStorm> {
        match self {
            WindowOutcome::Storm(s) => Some(s),
            _ => None,
        }
    }
}

/// A window and its outcome, as checkpointed by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRecord {
    pub window: Window,
    pub outcome: WindowOutcome,
}
