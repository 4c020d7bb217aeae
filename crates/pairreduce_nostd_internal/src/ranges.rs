//! Range tables used by the ranged evaluator.
//!
//! A range table is made of 3 parts:
//! - `outer`: a sequence of half-open outer-index intervals (we call each one
//!   an *outer slice*). Every outer index in a slice shares the same list of
//!   inner-index intervals.
//! - `slice_ends`: for outer slice `k`, the inner intervals relevant to it are
//!   `inner[slice_ends[k-1]..slice_ends[k]]` (with `slice_ends[-1] = 0`).
//! - `inner`: half-open inner-index intervals.
//!
//! Within an outer slice, the inner intervals are folded in listed order.
//! Listing them in increasing order gives the same tie-breaking as the dense
//! evaluator (with lexicographic (value, index) ordering, any order works for
//! the order-statistic reductions, but floating point sums still depend on
//! the order).
//!
//! The table describes the layout of a single batch. When there are batch
//! dimensions, the same table is applied to every batch.

use crate::misc::even_partition;

#[derive(Clone, Copy, Debug)]
pub struct RangeView<'a> {
    outer: &'a [[usize; 2]],
    slice_ends: &'a [usize],
    inner: &'a [[usize; 2]],
}

impl<'a> RangeView<'a> {
    pub fn new(
        outer: &'a [[usize; 2]],
        slice_ends: &'a [usize],
        inner: &'a [[usize; 2]],
    ) -> Result<Self, &'static str> {
        if outer.len() != slice_ends.len() {
            return Err("each outer slice needs exactly 1 entry in slice_ends");
        }
        let mut prev = 0;
        for &end in slice_ends {
            if end < prev {
                return Err("slice_ends must be non-decreasing");
            }
            prev = end;
        }
        if prev > inner.len() {
            return Err("slice_ends references a nonexistent inner interval");
        }
        Ok(Self {
            outer,
            slice_ends,
            inner,
        })
    }

    /// Check that all intervals are well formed & lie within the index spaces
    ///
    /// This also rejects outer slices that overlap each other (each output
    /// row is finalized exactly once).
    pub fn validate(&self, n_outer: usize, n_inner: usize) -> Result<(), &'static str> {
        for &[start, stop] in self.outer {
            if start > stop {
                return Err("outer interval has start > end");
            } else if stop > n_outer {
                return Err("outer interval references an out-of-bounds index");
            }
        }
        for &[start, stop] in self.inner {
            if start > stop {
                return Err("inner interval has start > end");
            } else if stop > n_inner {
                return Err("inner interval references an out-of-bounds index");
            }
        }
        // visit the slices in order of their start (without allocating)
        let mut prev_stop = 0;
        for k in self.slices_by_start() {
            let [start, stop] = self.outer[k];
            if start == stop {
                continue;
            } else if start < prev_stop {
                return Err("outer slices overlap");
            }
            prev_stop = stop;
        }
        Ok(())
    }

    /// returns the indices of the outer slices, sorted by start (then by
    /// position in the table). The iterator is allocation-free but O(n²).
    fn slices_by_start(&self) -> impl Iterator<Item = usize> + '_ {
        let n = self.outer.len();
        let key = move |k: usize| (self.outer[k][0], k);
        let mut cur: Option<(usize, usize)> = None;
        core::iter::from_fn(move || {
            let next = (0..n)
                .map(key)
                .filter(|candidate| cur.is_none_or(|c| *candidate > c))
                .min()?;
            cur = Some(next);
            Some(next.1)
        })
    }

    pub fn n_slices(&self) -> usize {
        self.outer.len()
    }

    pub fn outer_bounds(&self, slice: usize) -> (usize, usize) {
        let [start, stop] = self.outer[slice];
        (start, stop)
    }

    pub fn inner_intervals(&self, slice: usize) -> &'a [[usize; 2]] {
        let start = if slice == 0 {
            0
        } else {
            self.slice_ends[slice - 1]
        };
        &self.inner[start..self.slice_ends[slice]]
    }
}

/// Compute the part of `interval` handled by inner-split `split_id` out of
/// `n_splits`.
#[inline]
pub fn split_interval(interval: [usize; 2], n_splits: usize, split_id: usize) -> (usize, usize) {
    let [start, stop] = interval;
    let (lo, hi) = even_partition(stop - start, n_splits, split_id);
    (start + lo, start + hi)
}
