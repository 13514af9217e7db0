//! Partition fan-out planning
//!
//! A read whose hash-partition predicate lists several candidate values per
//! column (`h1 IN (a, b) AND h2 IN (x, y, z)`) has to be sent as one physical
//! request per combination. Combination `i` is found by mixed-radix
//! decomposition of `i`, with the first hash column as the most significant
//! digit:
//!
//! ```text
//! counts (2, 3):   0 -> (a,x)  1 -> (a,y)  2 -> (a,z)
//!                  3 -> (b,x)  4 -> (b,y)  5 -> (b,z)
//! ```
//!
//! The cursor only moves forward and stops exactly at the product of the
//! candidate counts.

use docop_core::{ColumnPredicate, Datum, DocOpError, DocOpResult};

/// Cursor over the Cartesian product of per-column candidate lists.
#[derive(Debug, Clone, PartialEq)]
pub struct FanOut {
    candidates: Vec<Vec<Datum>>,
    total: usize,
    next_index: usize,
}

impl FanOut {
    /// Plan a fan-out over the given candidate lists.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the number of combinations overflows.
    pub fn new(candidates: Vec<Vec<Datum>>) -> DocOpResult<Self> {
        let total = candidates.iter().try_fold(1usize, |acc, column| {
            acc.checked_mul(column.len()).ok_or_else(|| {
                DocOpError::illegal_state("partition fan-out combination count overflows")
            })
        })?;
        Ok(Self {
            candidates,
            total,
            next_index: 0,
        })
    }

    /// Extract one candidate list per hash column: every value of an IN
    /// condition, or the single value of an equality.
    pub fn from_predicates(predicates: &[ColumnPredicate]) -> DocOpResult<Self> {
        Self::new(predicates.iter().map(ColumnPredicate::candidates).collect())
    }

    /// Number of combinations
    pub fn total(&self) -> usize {
        self.total
    }

    /// Index of the next combination to produce
    pub fn cursor(&self) -> usize {
        self.next_index
    }

    /// Whether every combination has been produced
    pub fn is_exhausted(&self) -> bool {
        self.next_index >= self.total
    }

    /// Candidate counts per column
    pub fn radices(&self) -> Vec<usize> {
        self.candidates.iter().map(Vec::len).collect()
    }

    /// Values of combination `index`, one per column.
    ///
    /// Returns `None` when `index` is out of range.
    pub fn combination(&self, index: usize) -> Option<Vec<Datum>> {
        if index >= self.total {
            return None;
        }
        let mut values = vec![Datum::Null; self.candidates.len()];
        let mut pos = index;
        for (slot, column) in values.iter_mut().zip(&self.candidates).rev() {
            *slot = column[pos % column.len()].clone();
            pos /= column.len();
        }
        Some(values)
    }

    /// Produce up to `max` combinations, advancing the cursor.
    pub fn next_batch(&mut self, max: usize) -> Vec<Vec<Datum>> {
        let end = self.next_index.saturating_add(max).min(self.total);
        let batch: Vec<Vec<Datum>> = (self.next_index..end)
            .filter_map(|index| self.combination(index))
            .collect();
        self.next_index = end;
        batch
    }
}
