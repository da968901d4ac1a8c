use std::ops::Range;

/// Element count above which a dataset is processed in batches.
pub const DEFAULT_BATCH_THRESHOLD: usize = 1_000_000;

/// Rows per batch when batching is active.
pub const DEFAULT_BATCH_ROWS: usize = 1_000;

/// Partition of `total_rows` into contiguous, non-overlapping row ranges.
///
/// The plan is `Copy`; [`ranges`](Self::ranges) can be called repeatedly and
/// always starts from row zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    total_rows: usize,
    batch_rows: usize,
}

impl BatchPlan {
    /// A `batch_rows` of zero is treated as one row per batch.
    pub fn new(total_rows: usize, batch_rows: usize) -> Self {
        Self {
            total_rows,
            batch_rows: batch_rows.max(1),
        }
    }

    pub fn batch_rows(&self) -> usize {
        self.batch_rows
    }

    /// Number of batches.
    pub fn len(&self) -> usize {
        self.total_rows.div_ceil(self.batch_rows)
    }

    pub fn is_empty(&self) -> bool {
        self.total_rows == 0
    }

    pub fn ranges(&self) -> BatchRanges {
        BatchRanges {
            next_row: 0,
            plan: *self,
        }
    }
}

/// Lazy iterator over the row ranges of a [`BatchPlan`].
#[derive(Debug, Clone)]
pub struct BatchRanges {
    next_row: usize,
    plan: BatchPlan,
}

impl Iterator for BatchRanges {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_row >= self.plan.total_rows {
            return None;
        }
        let start = self.next_row;
        let end = (start + self.plan.batch_rows).min(self.plan.total_rows);
        self.next_row = end;
        Some(start..end)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.total_rows.saturating_sub(self.next_row);
        let n = remaining.div_ceil(self.plan.batch_rows);
        (n, Some(n))
    }
}

impl ExactSizeIterator for BatchRanges {}
