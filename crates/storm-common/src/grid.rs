//! Grid specifications and transposition-area masks.
//!
//! Every grid for a transposition area shares one [`GridSpec`]. Cells are
//! addressed by a dense row-major index (`row * nx + col`); coordinates are
//! only computed when needed for output.

use geo::{Contains, Coord, LineString, Point, Polygon};
use serde::{Deserialize, Serialize};

use crate::error::{StormError, StormResult};

/// The 8-neighborhood as `(dcol, drow)` offsets, in row-major order.
pub const KING_OFFSETS: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Specification of a regular grid, north-up, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Number of columns
    pub nx: usize,
    /// Number of rows
    pub ny: usize,
    /// Cell width (coordinate units)
    pub dx: f64,
    /// Cell height; negative when rows run north to south
    pub dy: f64,
    /// X coordinate of the center of cell (0, 0)
    pub first_x: f64,
    /// Y coordinate of the center of cell (0, 0)
    pub first_y: f64,
}

impl GridSpec {
    pub fn new(nx: usize, ny: usize, dx: f64, dy: f64, first_x: f64, first_y: f64) -> Self {
        Self {
            nx,
            ny,
            dx,
            dy,
            first_x,
            first_y,
        }
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.nx * self.ny
    }

    /// Check if grid is empty.
    pub fn is_empty(&self) -> bool {
        self.nx == 0 || self.ny == 0
    }

    /// Flat index for a column/row pair.
    pub fn index(&self, col: usize, row: usize) -> Option<usize> {
        if col >= self.nx || row >= self.ny {
            return None;
        }
        Some(row * self.nx + col)
    }

    /// Column/row pair for a flat index.
    pub fn cell(&self, index: usize) -> (usize, usize) {
        (index % self.nx, index / self.nx)
    }

    /// Index of the cell displaced by `(dcol, drow)`, if it lies on the grid.
    pub fn offset(&self, index: usize, dcol: isize, drow: isize) -> Option<usize> {
        let (col, row) = self.cell(index);
        let col = col as isize + dcol;
        let row = row as isize + drow;
        if col < 0 || row < 0 || col >= self.nx as isize || row >= self.ny as isize {
            return None;
        }
        Some(row as usize * self.nx + col as usize)
    }

    /// Coordinates of the center of a cell.
    pub fn cell_center(&self, index: usize) -> (f64, f64) {
        let (col, row) = self.cell(index);
        (
            self.first_x + col as f64 * self.dx,
            self.first_y + row as f64 * self.dy,
        )
    }

    /// Index of the cell containing a coordinate.
    pub fn coord_to_index(&self, x: f64, y: f64) -> Option<usize> {
        let col = ((x - self.first_x) / self.dx).round();
        let row = ((y - self.first_y) / self.dy).round();
        if col < 0.0 || row < 0.0 {
            return None;
        }
        self.index(col as usize, row as usize)
    }

    /// Sub-cell center coordinates when a cell is split into `n x n` pieces.
    pub fn subcell_centers(&self, index: usize, n: usize) -> Vec<(f64, f64)> {
        let (cx, cy) = self.cell_center(index);
        let step_x = self.dx / n as f64;
        let step_y = self.dy / n as f64;
        let origin_x = cx - self.dx / 2.0 + step_x / 2.0;
        let origin_y = cy - self.dy / 2.0 + step_y / 2.0;

        let mut centers = Vec::with_capacity(n * n);
        for r in 0..n {
            for c in 0..n {
                centers.push((origin_x + c as f64 * step_x, origin_y + r as f64 * step_y));
            }
        }
        centers
    }
}

/// Neighbor offsets within a Euclidean radius (in cells), excluding the
/// center, in row-major order. A radius of 1.5 yields the 8-neighborhood.
pub fn neighbor_offsets(radius: f64) -> Vec<(isize, isize)> {
    let reach = radius.floor() as isize;
    let limit = radius * radius + 1e-9;
    let mut offsets = Vec::new();
    for drow in -reach..=reach {
        for dcol in -reach..=reach {
            if dcol == 0 && drow == 0 {
                continue;
            }
            if (dcol * dcol + drow * drow) as f64 <= limit {
                offsets.push((dcol, drow));
            }
        }
    }
    offsets
}

/// Cells of a grid that fall inside the transposition area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaMask {
    spec: GridSpec,
    valid: Vec<bool>,
    valid_count: usize,
}

impl AreaMask {
    /// Build a mask from a per-cell flag vector.
    ///
    /// Fails if the vector does not match the grid or selects no cells.
    pub fn from_cells(spec: GridSpec, valid: Vec<bool>) -> StormResult<Self> {
        if valid.len() != spec.len() {
            return Err(StormError::MalformedMask(format!(
                "mask has {} cells, grid has {}",
                valid.len(),
                spec.len()
            )));
        }
        let valid_count = valid.iter().filter(|v| **v).count();
        if valid_count == 0 {
            return Err(StormError::MalformedMask(
                "transposition area contains no grid cells".to_string(),
            ));
        }
        Ok(Self {
            spec,
            valid,
            valid_count,
        })
    }

    /// Mask covering every cell of the grid.
    pub fn full(spec: GridSpec) -> StormResult<Self> {
        Self::from_cells(spec, vec![true; spec.len()])
    }

    /// Mask of the cells whose centers lie inside a polygon ring.
    pub fn from_polygon(spec: GridSpec, ring: &[(f64, f64)]) -> StormResult<Self> {
        if ring.len() < 3 {
            return Err(StormError::MalformedMask(format!(
                "polygon needs at least 3 vertices, got {}",
                ring.len()
            )));
        }
        let exterior: LineString<f64> = ring.iter().map(|&(x, y)| Coord { x, y }).collect();
        let polygon = Polygon::new(exterior, vec![]);

        let valid = (0..spec.len())
            .map(|i| {
                let (x, y) = spec.cell_center(i);
                polygon.contains(&Point::new(x, y))
            })
            .collect();
        Self::from_cells(spec, valid)
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    /// Whether a cell is inside the transposition area.
    pub fn contains(&self, index: usize) -> bool {
        self.valid.get(index).copied().unwrap_or(false)
    }

    /// Number of cells inside the area.
    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    /// Indices of cells inside the area, ascending.
    pub fn valid_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.valid
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.then_some(i))
    }
}
