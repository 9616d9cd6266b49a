//! Named target positions, laid out in rows and columns.

use crate::{Offset, Point, RigConfig};

/// How close (in cm) the carriage has to be to a cell to count as being "at" it.
pub const CELL_TOLERANCE: f32 = 2.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("no grid cell {index} (the grid has {len} cells)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// A fixed set of cells, stored row-major as offsets from HOME.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    rows: usize,
    cols: usize,
    cells: Vec<Offset>,
}

// The plant layout: three columns at 12cm spacing, and four rows that skip
// the middle of the greenhouse (there's a walkway at y = 0).
const PLANT_COLS: [f32; 3] = [-12.0, 0.0, 12.0];
const PLANT_ROWS: [f32; 4] = [18.0, 9.0, -9.0, -18.0];

impl Grid {
    /// The 3x4 plant grid.
    pub fn plant() -> Grid {
        let cells = PLANT_ROWS
            .iter()
            .flat_map(|&y| PLANT_COLS.iter().map(move |&x| Offset::new(x, y)))
            .collect();
        Grid {
            rows: PLANT_ROWS.len(),
            cols: PLANT_COLS.len(),
            cells,
        }
    }

    /// A `rows` x `cols` grid of equally-sized cells covering the whole rig.
    ///
    /// Each cell's target is its center. The offsets are relative to the
    /// rig's default HOME, so with an uncalibrated HOME the targets land at
    /// `((col + 0.5) * cell_width, (row + 0.5) * cell_height)`.
    pub fn uniform(rig: &RigConfig, rows: usize, cols: usize) -> Grid {
        let cell_w = rig.width.get() / cols as f32;
        let cell_h = rig.height.get() / rows as f32;
        let home = rig.default_home();
        let mut cells = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                let center = Point::new(
                    (col as f32 + 0.5) * cell_w,
                    (row as f32 + 0.5) * cell_h,
                );
                cells.push(center - home);
            }
        }
        Grid { rows, cols, cells }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn offset(&self, index: usize) -> Result<Offset, GridError> {
        self.cells
            .get(index)
            .copied()
            .ok_or(GridError::IndexOutOfRange {
                index,
                len: self.cells.len(),
            })
    }

    /// The absolute position of a cell, given where HOME currently is.
    pub fn resolve_target(&self, home: Point, index: usize) -> Result<Point, GridError> {
        Ok(home + self.offset(index)?)
    }

    /// The cell nearest to `relative` (a position measured from HOME), if
    /// there's one within [`CELL_TOLERANCE`].
    ///
    /// On exact ties the earlier cell wins.
    pub fn closest_cell(&self, relative: Offset) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (idx, cell) in self.cells.iter().enumerate() {
            let dist = (*cell - relative).length();
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((idx, dist));
            }
        }
        best.filter(|&(_, d)| d <= CELL_TOLERANCE).map(|(idx, _)| idx)
    }
}
