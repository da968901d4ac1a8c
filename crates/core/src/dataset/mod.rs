//! QUBO matrix decoding and resource-bounded batching.
//!
//! [`load_matrix`] accepts NumPy `.npy` bytes (detected by magic) or a JSON
//! array of equal-length numeric rows. [`BatchPolicy::apply`] then decides
//! whether the matrix is processed whole or as a sequence of row batches.

mod batch;
mod npy;

use std::borrow::Cow;
use std::ops::Range;

use serde_json::Value;

use crate::error::CoreError;

pub use batch::{BatchPlan, BatchRanges, DEFAULT_BATCH_ROWS, DEFAULT_BATCH_THRESHOLD};

// ---------------------------------------------------------------------------
// Matrix
// ---------------------------------------------------------------------------

/// Dense row-major two-dimensional matrix of QUBO coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct QuboMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl QuboMatrix {
    /// Build a matrix from row-major `data`.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, CoreError> {
        if rows == 0 || cols == 0 {
            return Err(CoreError::DatasetFormat(format!(
                "matrix must not be empty (got {rows}x{cols})"
            )));
        }
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(CoreError::DatasetFormat(format!(
                "{rows}x{cols} matrix needs {} values, got {}",
                rows.saturating_mul(cols),
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Result<Self, CoreError> {
        Self::new(rows, cols, vec![0.0; rows.saturating_mul(cols)])
    }

    /// Build a matrix from rows, which must all have the same length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, CoreError> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != cols) {
            return Err(CoreError::DatasetFormat(format!(
                "row {i} has {} columns, expected {cols}",
                row.len()
            )));
        }
        let n_rows = rows.len();
        Self::new(n_rows, cols, rows.into_iter().flatten().collect())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of coefficients.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, index: usize) -> &[f64] {
        &self.data[index * self.cols..(index + 1) * self.cols]
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    /// Copy out the contiguous rows in `range`.
    pub fn slice_rows(&self, range: Range<usize>) -> Self {
        let start = range.start.min(self.rows);
        let end = range.end.min(self.rows);
        Self {
            rows: end - start,
            cols: self.cols,
            data: self.data[start * self.cols..end * self.cols].to_vec(),
        }
    }

    /// Nested-list JSON form handed to solver plugins.
    pub fn to_json(&self) -> Value {
        Value::Array(
            (0..self.rows)
                .map(|r| Value::Array(self.row(r).iter().map(|v| Value::from(*v)).collect()))
                .collect(),
        )
    }
}

/// Decode dataset bytes into a matrix.
pub fn load_matrix(bytes: &[u8]) -> Result<QuboMatrix, CoreError> {
    if bytes.is_empty() {
        return Err(CoreError::DatasetFormat("dataset is empty".into()));
    }
    if npy::is_npy(bytes) {
        return npy::parse(bytes);
    }
    let rows: Vec<Vec<f64>> = serde_json::from_slice(bytes).map_err(|e| {
        CoreError::DatasetFormat(format!(
            "dataset is neither a .npy file nor a JSON matrix: {e}"
        ))
    })?;
    QuboMatrix::from_rows(rows)
}

// ---------------------------------------------------------------------------
// Batching
// ---------------------------------------------------------------------------

/// When and how a matrix is split into row batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Matrices with more elements than this are batched.
    pub threshold: usize,
    /// Rows per batch (the last batch may be shorter).
    pub batch_rows: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_BATCH_THRESHOLD,
            batch_rows: DEFAULT_BATCH_ROWS,
        }
    }
}

impl BatchPolicy {
    pub fn apply(&self, matrix: QuboMatrix) -> Dataset {
        let plan = (matrix.len() > self.threshold)
            .then(|| BatchPlan::new(matrix.rows(), self.batch_rows));
        Dataset { matrix, plan }
    }
}

/// A loaded matrix plus its (optional) batch plan.
#[derive(Debug, Clone)]
pub struct Dataset {
    matrix: QuboMatrix,
    plan: Option<BatchPlan>,
}

impl Dataset {
    /// A dataset processed as a single unit.
    pub fn whole(matrix: QuboMatrix) -> Self {
        Self { matrix, plan: None }
    }

    /// A dataset split into batches of `batch_rows` regardless of size.
    pub fn batched(matrix: QuboMatrix, batch_rows: usize) -> Self {
        let plan = BatchPlan::new(matrix.rows(), batch_rows);
        Self {
            matrix,
            plan: Some(plan),
        }
    }

    pub fn matrix(&self) -> &QuboMatrix {
        &self.matrix
    }

    pub fn plan(&self) -> Option<BatchPlan> {
        self.plan
    }

    pub fn is_batched(&self) -> bool {
        self.plan.is_some()
    }

    /// Number of units [`units`](Self::units) yields.
    pub fn unit_count(&self) -> usize {
        self.plan.map_or(1, |p| p.len())
    }

    /// Lazily iterate the processing units in row order.
    ///
    /// May be called any number of times; each call starts from the first row.
    pub fn units(&self) -> Units<'_> {
        Units {
            matrix: &self.matrix,
            state: match self.plan {
                Some(plan) => UnitState::Batches(plan.ranges(), 0),
                None => UnitState::Whole(true),
            },
        }
    }
}

/// One unit of work handed to the entry point.
#[derive(Debug, Clone)]
pub struct DatasetUnit<'a> {
    pub index: usize,
    pub rows: Range<usize>,
    pub matrix: Cow<'a, QuboMatrix>,
}

#[derive(Debug)]
enum UnitState {
    Whole(bool),
    Batches(BatchRanges, usize),
}

/// Iterator returned by [`Dataset::units`].
#[derive(Debug)]
pub struct Units<'a> {
    matrix: &'a QuboMatrix,
    state: UnitState,
}

impl<'a> Iterator for Units<'a> {
    type Item = DatasetUnit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.state {
            UnitState::Whole(pending) => {
                if !std::mem::take(pending) {
                    return None;
                }
                Some(DatasetUnit {
                    index: 0,
                    rows: 0..self.matrix.rows(),
                    matrix: Cow::Borrowed(self.matrix),
                })
            }
            UnitState::Batches(ranges, index) => {
                let rows = ranges.next()?;
                let unit = DatasetUnit {
                    index: *index,
                    matrix: Cow::Owned(self.matrix.slice_rows(rows.clone())),
                    rows,
                };
                *index += 1;
                Some(unit)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
