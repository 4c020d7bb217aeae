use crate::Error;
use pairreduce_nostd_internal::RangeView;

/// The three parts of a range table (see [`RangeView`])
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct RangeTable {
    outer: Vec<[usize; 2]>,
    slice_ends: Vec<usize>,
    inner: Vec<[usize; 2]>,
}

impl RangeTable {
    fn view(&self) -> Result<RangeView<'_>, &'static str> {
        RangeView::new(&self.outer, &self.slice_ends, &self.inner)
    }

    /// Build a table listing every pair covered by the blocks
    /// `[outer_start, outer_end, inner_start, inner_end]` (every block must
    /// be well formed).
    ///
    /// The outer axis is cut into segments on which the set of covering
    /// blocks doesn't change, and each segment becomes an outer slice. The
    /// inner intervals of a slice are sorted by start (contiguous intervals
    /// are merged), which matches the order of the dense evaluator. A pair
    /// covered by several blocks is listed once per block.
    fn from_blocks(blocks: &[[usize; 4]]) -> Self {
        let blocks: Vec<[usize; 4]> = blocks
            .iter()
            .copied()
            .filter(|&[o0, o1, i0, i1]| o0 < o1 && i0 < i1)
            .collect();
        let mut edges: Vec<usize> = blocks.iter().flat_map(|b| [b[0], b[1]]).collect();
        edges.sort_unstable();
        edges.dedup();

        let mut table = RangeTable::default();
        let mut prev_covering: Vec<[usize; 2]> = Vec::new();
        for segment in edges.windows(2) {
            let (lo, hi) = (segment[0], segment[1]);
            let mut intervals: Vec<[usize; 2]> = blocks
                .iter()
                .filter(|&&[o0, o1, _, _]| o0 <= lo && hi <= o1)
                .map(|&[_, _, i0, i1]| [i0, i1])
                .collect();
            intervals.sort_unstable();
            let mut covering: Vec<[usize; 2]> = Vec::with_capacity(intervals.len());
            for [i0, i1] in intervals {
                match covering.last_mut() {
                    Some(last) if last[1] == i0 => last[1] = i1,
                    _ => covering.push([i0, i1]),
                }
            }

            if covering.is_empty() {
                prev_covering.clear();
                continue;
            }
            let extends_prev = table.outer.last().is_some_and(|last| last[1] == lo)
                && covering == prev_covering;
            if extends_prev {
                if let Some(last) = table.outer.last_mut() {
                    last[1] = hi;
                }
            } else {
                table.outer.push([lo, hi]);
                table.inner.extend_from_slice(&covering);
                table.slice_ends.push(table.inner.len());
            }
            prev_covering = covering;
        }
        table
    }

    /// The same set of pairs, with the roles of the outer & inner indices
    /// swapped. Ill-formed intervals (start > end) are skipped.
    fn transpose(&self) -> Self {
        let mut blocks: Vec<[usize; 4]> = Vec::new();
        for (k, &[o0, o1]) in self.outer.iter().enumerate() {
            let start = if k == 0 { 0 } else { self.slice_ends[k - 1] };
            for &[i0, i1] in &self.inner[start..self.slice_ends[k]] {
                blocks.push([i0, i1, o0, o1]);
            }
        }
        RangeTable::from_blocks(&blocks)
    }
}

/// An owned range table for block-sparse evaluation.
///
/// See [`RangeView`] for the precise meaning of the three parts. The table
/// describes a single batch and gets reused for every batch.
///
/// Outer indices that aren't covered by any outer slice are reduced over
/// an empty set, which yields the identity of the reduction.
///
/// Every `Ranges` also carries the transposed table, which lists the same
/// pairs indexed by the other index (see [`Ranges::transposed`]). That's
/// what a reduction over the other axis needs, e.g. the gradient with
/// respect to a variable of the inner category.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ranges {
    table: RangeTable,
    transposed: RangeTable,
}

impl Ranges {
    pub fn new(
        outer: Vec<[usize; 2]>,
        slice_ends: Vec<usize>,
        inner: Vec<[usize; 2]>,
    ) -> Result<Self, Error> {
        let table = RangeTable {
            outer,
            slice_ends,
            inner,
        };
        table.view().map_err(Error::internal_legacy_adhoc)?;
        let transposed = table.transpose();
        Ok(Self { table, transposed })
    }

    /// Build a table from rectangular blocks
    /// `[outer_start, outer_end, inner_start, inner_end]`.
    ///
    /// The blocks may be listed in any order, and blocks with different
    /// outer intervals may overlap along the outer axis. Within every output
    /// row, the inner indices are visited in increasing order. A pair covered
    /// by several blocks is visited once per block.
    pub fn from_blocks(blocks: &[[usize; 4]]) -> Result<Self, Error> {
        if let Some(block) = blocks.iter().find(|b| b[0] > b[1] || b[2] > b[3]) {
            return Err(Error::configuration(format!(
                "the block {block:?} has an interval with start > end"
            )));
        }
        let table = RangeTable::from_blocks(blocks);
        Self::new(table.outer, table.slice_ends, table.inner)
    }

    pub fn view(&self) -> RangeView<'_> {
        match self.table.view() {
            Ok(view) => view,
            Err(_) => unreachable!("the constructor already validated the table"),
        }
    }

    /// The same pairs, indexed by the other index: the outer slices of the
    /// result are intervals of the current inner index.
    pub fn transposed(&self) -> Ranges {
        Ranges {
            table: self.transposed.clone(),
            transposed: self.table.clone(),
        }
    }

    /// Check the table against the sizes of the index spaces
    pub fn validate(&self, n_outer: usize, n_inner: usize) -> Result<(), Error> {
        self.view()
            .validate(n_outer, n_inner)
            .map_err(Error::internal_legacy_adhoc)
    }
}
