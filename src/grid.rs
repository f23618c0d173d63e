//! Dense 2-D result grids and named comparison tables.
//!
//! A sweep produces one [`crate::ResultItem`] per (symbol, parameter
//! combination). Grids slice that flat list along two hyperparameter axes,
//! folding every matching result into the cell via
//! [`Metrics::combine`](crate::evaluators::Metrics::combine). Cells with no
//! matching result stay empty rather than defaulting to zero counts, so a
//! sparse sweep is distinguishable from a losing one.

use crate::evaluators::{DiffMetrics, Metrics};
use crate::{EvalError, ParamSet, Result, ResultItem};

// ============================================================
// GRID
// ============================================================

/// A dense `rows x cols` matrix of optional cells, row-major.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Grid<T> {
    rows: usize,
    cols: usize,
    cells: Vec<Option<T>>,
}

impl<T> Grid<T> {
    /// An all-empty grid.
    pub fn new(rows: usize, cols: usize) -> Self {
        let mut cells = Vec::with_capacity(rows * cols);
        cells.resize_with(rows * cols, || None);
        Self { rows, cols, cells }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&T> {
        self.cells[row * self.cols + col].as_ref()
    }

    pub fn set(&mut self, row: usize, col: usize, value: T) {
        self.cells[row * self.cols + col] = Some(value);
    }

    pub fn take(&mut self, row: usize, col: usize) -> Option<T> {
        self.cells[row * self.cols + col].take()
    }

    /// Visits every cell, empty or not, in row-major order.
    pub fn iter_cells(&self) -> impl Iterator<Item = (usize, usize, Option<&T>)> {
        self.cells
            .iter()
            .enumerate()
            .map(|(i, c)| (i / self.cols, i % self.cols, c.as_ref()))
    }
}

impl Grid<Metrics> {
    /// Merge `other` into this grid cell-wise.
    ///
    /// An empty cell on either side is the identity: the other side's value
    /// (if any) wins unchanged.
    pub fn combine_with(&mut self, other: &Grid<Metrics>) -> Result<()> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(EvalError::GridShape("dimensions differ"));
        }
        for (i, cell) in self.cells.iter_mut().enumerate() {
            match (cell.as_ref(), other.cells[i].as_ref()) {
                (Some(a), Some(b)) => *cell = Some(a.combine(b)?),
                (None, Some(b)) => *cell = Some(b.clone()),
                _ => {}
            }
        }
        Ok(())
    }

    /// Freeze every occupied cell for reporting.
    pub fn seal(&mut self) {
        for cell in self.cells.iter_mut().flatten() {
            cell.seal();
        }
    }
}

// ============================================================
// GRID BUILDER
// ============================================================

/// Slice `results` along two hyperparameter axes.
///
/// A result lands in cell `(i, j)` when `row_key` of its options equals
/// `row_values[i]`, `col_key` equals `col_values[j]`, and `filter` accepts it;
/// results already in a cell are folded in with `combine`. Equality is exact:
/// axis values are the same floats the sweep was built from, never derived
/// ones.
pub fn build_grid(
    results: &[ResultItem],
    row_values: &[f64],
    col_values: &[f64],
    row_key: impl Fn(&ParamSet) -> f64,
    col_key: impl Fn(&ParamSet) -> f64,
    filter: impl Fn(&ParamSet) -> bool,
) -> Result<Grid<Metrics>> {
    let mut grid: Grid<Metrics> = Grid::new(row_values.len(), col_values.len());
    for (i, &row_value) in row_values.iter().enumerate() {
        for (j, &col_value) in col_values.iter().enumerate() {
            for result in results {
                let options = &result.config.options;
                if row_key(options) != row_value || col_key(options) != col_value {
                    continue;
                }
                if !filter(options) {
                    continue;
                }
                let folded = match grid.take(i, j) {
                    Some(cell) => cell.combine(&result.result)?,
                    None => result.result.clone(),
                };
                grid.set(i, j, folded);
            }
        }
    }
    Ok(grid)
}

// ============================================================
// TABLES
// ============================================================

/// A grid with cosmetic axis labels, ready for serialization.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MetricsTable {
    pub columns: Vec<String>,
    pub rows: Vec<String>,
    pub values: Grid<Metrics>,
}

/// A comparison table: every occupied cell is a data-minus-base pairing.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DiffTable {
    pub columns: Vec<String>,
    pub rows: Vec<String>,
    pub values: Grid<DiffMetrics>,
}

/// Pair `data` against `base` cell by cell.
///
/// Labels are taken from `data`. A cell appears in the output only when both
/// tables have a value there; a one-sided cell stays empty.
pub fn diff_tables(data: &MetricsTable, base: &MetricsTable) -> Result<DiffTable> {
    let (rows, cols) = (data.values.rows(), data.values.cols());
    if rows != base.values.rows() || cols != base.values.cols() {
        return Err(EvalError::GridShape("diff tables have different shapes"));
    }
    let mut values = Grid::new(rows, cols);
    for i in 0..rows {
        for j in 0..cols {
            if let (Some(d), Some(b)) = (data.values.get(i, j), base.values.get(i, j)) {
                values.set(i, j, DiffMetrics::new(b.clone(), d.clone()));
            }
        }
    }
    Ok(DiffTable {
        columns: data.columns.clone(),
        rows: data.rows.clone(),
        values,
    })
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluators::{BarrierMetrics, Outcome};
    use crate::EvalConfig;

    fn barrier_metrics(ups: u64, downs: u64) -> Metrics {
        let mut m = BarrierMetrics::default();
        m.counts[Outcome::UpperHit as usize] = ups;
        m.counts[Outcome::LowerHit as usize] = downs;
        Metrics::Barrier(m)
    }

    fn item(threshold: f64, timeout: i64, range: f64, ups: u64, downs: u64) -> ResultItem {
        ResultItem {
            config: EvalConfig {
                name: "double-top".to_string(),
                symbol: "US:TEST".to_string(),
                options: ParamSet::new(threshold, timeout, vec![range]),
            },
            result: barrier_metrics(ups, downs),
        }
    }

    #[test]
    fn test_build_grid_folds_matches() {
        let results = vec![
            item(0.02, 14, 10.0, 3, 1),
            item(0.02, 14, 10.0, 1, 1), // same cell, folded in
            item(0.05, 14, 10.0, 2, 0),
            item(0.02, 7, 10.0, 9, 9), // filtered out by timeout
        ];
        let grid = build_grid(
            &results,
            &[0.02, 0.05],
            &[10.0, 20.0],
            |o| o.threshold,
            |o| o.params[0],
            |o| o.timeout == 14,
        )
        .unwrap();

        assert_eq!(grid.get(0, 0).unwrap().size(), 6);
        assert_eq!(grid.get(1, 0).unwrap().size(), 2);
        assert!(grid.get(0, 1).is_none());
        assert!(grid.get(1, 1).is_none());
    }

    #[test]
    fn test_build_grid_timeout_axis() {
        let results = vec![item(0.02, 7, 10.0, 1, 0), item(0.02, 14, 10.0, 0, 1)];
        let grid = build_grid(
            &results,
            &[0.02],
            &[7.0, 14.0],
            |o| o.threshold,
            |o| o.timeout as f64,
            |_| true,
        )
        .unwrap();
        assert_eq!(grid.get(0, 0).unwrap().emit("wins").unwrap(), 1.0);
        assert_eq!(grid.get(0, 1).unwrap().emit("wins").unwrap(), 0.0);
    }

    #[test]
    fn test_combine_with_empty_identity() {
        let mut a: Grid<Metrics> = Grid::new(1, 3);
        a.set(0, 0, barrier_metrics(1, 0));
        a.set(0, 1, barrier_metrics(2, 0));

        let mut b: Grid<Metrics> = Grid::new(1, 3);
        b.set(0, 1, barrier_metrics(0, 3));
        b.set(0, 2, barrier_metrics(4, 0));

        a.combine_with(&b).unwrap();
        assert_eq!(a.get(0, 0).unwrap().size(), 1); // only in a
        assert_eq!(a.get(0, 1).unwrap().size(), 5); // merged
        assert_eq!(a.get(0, 2).unwrap().size(), 4); // only in b
    }

    #[test]
    fn test_combine_with_shape_mismatch() {
        let mut a: Grid<Metrics> = Grid::new(2, 2);
        let b: Grid<Metrics> = Grid::new(2, 3);
        assert!(matches!(
            a.combine_with(&b),
            Err(EvalError::GridShape(_))
        ));
    }

    #[test]
    fn test_seal_freezes_cells() {
        let mut grid: Grid<Metrics> = Grid::new(1, 1);
        grid.set(0, 0, barrier_metrics(1, 0));
        grid.seal();
        let other: Grid<Metrics> = {
            let mut g = Grid::new(1, 1);
            g.set(0, 0, barrier_metrics(1, 0));
            g
        };
        assert!(matches!(
            grid.combine_with(&other),
            Err(EvalError::Sealed)
        ));
    }

    #[test]
    fn test_diff_tables_pairs_occupied_cells() {
        let mut data_grid: Grid<Metrics> = Grid::new(1, 2);
        data_grid.set(0, 0, barrier_metrics(3, 1)); // balanced 75
        data_grid.set(0, 1, barrier_metrics(1, 0));

        let mut base_grid: Grid<Metrics> = Grid::new(1, 2);
        base_grid.set(0, 0, barrier_metrics(1, 1)); // balanced 50

        let data = MetricsTable {
            columns: vec!["rng:10.00".to_string(), "rng:20.00".to_string()],
            rows: vec!["thld:0.020".to_string()],
            values: data_grid,
        };
        let base = MetricsTable {
            columns: data.columns.clone(),
            rows: data.rows.clone(),
            values: base_grid,
        };

        let diff = diff_tables(&data, &base).unwrap();
        let cell = diff.values.get(0, 0).unwrap();
        assert_eq!(cell.emit("balanced").unwrap(), 25.0);
        // No baseline at (0, 1), so no diff either.
        assert!(diff.values.get(0, 1).is_none());
        assert_eq!(diff.columns, data.columns);
    }

    #[test]
    fn test_diff_tables_shape_mismatch() {
        let data = MetricsTable {
            columns: vec![],
            rows: vec![],
            values: Grid::new(1, 2),
        };
        let base = MetricsTable {
            columns: vec![],
            rows: vec![],
            values: Grid::new(2, 1),
        };
        assert!(matches!(
            diff_tables(&data, &base),
            Err(EvalError::GridShape(_))
        ));
    }
}
