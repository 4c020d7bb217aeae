//! Our parallelism abstractions use the concepts of teams & row blocks
//!
//! A pairwise reduction is embarrassingly parallel across outer indices:
//! every output row owns an independent `accum_state`. We decompose the
//! full calculation into *row blocks*. A row block is a contiguous run of
//! outer indices (from a single batch) that share the same list of
//! inner-index intervals. Each row block is a unit of work that is handed
//! to a single team.
//!
//! The idea of a "team" is an abstraction that we define in the context of
//! describing parallelism:
//! - units of work are distributed among 1 or more teams. Separate teams
//!   never synchronize with each other and write to disjoint output rows.
//! - a team is composed of 1 or more members that work together in a
//!   tightly-coupled manner on a single row block at a time. On a GPU, you
//!   could imagine each member is a thread of a thread-block. On a CPU, a
//!   team maps to a single thread and the members are the lanes of SIMD
//!   instructions (or simply serial execution).
//!
//! # Tiling
//!
//! Within a row block, a team walks over each inner interval in *tiles* of
//! at most `tile_len` inner indices:
//! 1. the data associated with every inner index of the tile is staged into
//!    the team's tile buffer (on a GPU this is the load into shared memory;
//!    it must complete before any member reads from the buffer).
//! 2. every row of the block folds all of the tile's inner indices, in
//!    increasing order, into its `accum_state` (all folds must complete
//!    before the next tile overwrites the buffer).
//!
//! These are the only 2 synchronization points. Tiling never changes which
//! pairs are visited or the order in which a row visits inner indices; it
//! only controls how often inner data gets staged.
//!
//! # Inner splits
//!
//! When [`TeamParam::inner_splits`] exceeds 1, every inner interval is
//! partitioned into that many contiguous pieces. Each piece is folded into a
//! separate statepack, and the statepacks are combined with a tree of
//! [`Reducer::merge`] calls. The order of every operation depends only on the
//! row block and the [`TeamParam`], so results are bitwise reproducible no
//! matter which executor (or how many threads) carried out the work.

use crate::formula::PairFormula;
use crate::ranges::{RangeView, split_interval};
use crate::reduce_utils::{reset_full_statepack, tree_merge_statepacks};
use crate::reducer::{OuterRow, Reducer};
use crate::state::StatePackViewMut;
use core::num::NonZeroUsize;
use ndarray::ArrayViewMut1;

/// This struct holds standardized parameters that describe Team parallelism.
/// Different backends will obviously require extra parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TeamParam {
    /// the max number of outer rows in a single row block
    pub rows_per_team: NonZeroUsize,
    /// the max number of inner indices staged at once
    pub tile_len: NonZeroUsize,
    /// number of independent partial folds per inner interval
    pub inner_splits: NonZeroUsize,
}

impl TeamParam {
    pub const DEFAULT_ROWS_PER_TEAM: NonZeroUsize = NonZeroUsize::new(64).unwrap();
    pub const DEFAULT_TILE_LEN: NonZeroUsize = NonZeroUsize::new(256).unwrap();
}

impl Default for TeamParam {
    fn default() -> Self {
        TeamParam {
            rows_per_team: Self::DEFAULT_ROWS_PER_TEAM,
            tile_len: Self::DEFAULT_TILE_LEN,
            inner_splits: NonZeroUsize::MIN,
        }
    }
}

/// A unit of work: the rows `outer_start..outer_stop` of batch `batch`,
/// reduced over every inner index listed in `intervals`.
///
/// An empty `intervals` slice is perfectly valid. Every row of such a block
/// is finalized straight from the identity `accum_state`.
#[derive(Clone, Copy, Debug)]
pub struct RowBlock<'a> {
    pub batch: usize,
    pub outer_start: usize,
    pub outer_stop: usize,
    pub intervals: &'a [[usize; 2]],
}

impl<'a> RowBlock<'a> {
    pub fn n_rows(&self) -> usize {
        self.outer_stop - self.outer_start
    }
}

/// Used for specifying the details of a blocked reduction, providing an
/// interface for external code (e.g. executors) to carry it out,
/// potentially in parallel.
///
/// Types that implement this trait:
/// 1. pair a [`Reducer`] with a [`PairFormula`].
/// 2. know the extent of the index spaces (and the number of batches)
/// 3. describe which inner intervals are relevant to each *outer slice*.
///    Outer slices never overlap, but they need not cover every outer index
///    (an uncovered outer index reduces over nothing).
///
/// An important premise is that you do error-checking while constructing
/// these structs, so that none of these methods need to handle errors.
pub trait BlockedReduction {
    type ReducerType: Reducer;
    type FormulaType: PairFormula;

    fn get_reducer(&self) -> &Self::ReducerType;

    fn get_formula(&self) -> &Self::FormulaType;

    fn n_batches(&self) -> usize;

    fn n_outer(&self) -> usize;

    fn n_inner(&self) -> usize;

    /// number of outer slices (per batch)
    fn n_slices(&self) -> usize;

    fn slice_outer_bounds(&self, slice: usize) -> (usize, usize);

    fn slice_inner_intervals(&self, slice: usize) -> &[[usize; 2]];
}

fn check_widths(reducer: &impl Reducer, formula: &impl PairFormula) -> Result<(), &'static str> {
    if reducer.formula_dim() != formula.dim() {
        Err("the formula's output width doesn't match the width the reducer expects")
    } else {
        Ok(())
    }
}

/// Reduce over every inner index for every outer index.
pub struct DenseReduction<'a, R: Reducer, F: PairFormula> {
    reducer: &'a R,
    formula: &'a F,
    n_batches: usize,
    n_outer: usize,
    full: [[usize; 2]; 1],
}

impl<'a, R: Reducer, F: PairFormula> DenseReduction<'a, R, F> {
    pub fn new(
        reducer: &'a R,
        formula: &'a F,
        n_batches: usize,
        n_outer: usize,
        n_inner: usize,
    ) -> Result<Self, &'static str> {
        check_widths(reducer, formula)?;
        Ok(Self {
            reducer,
            formula,
            n_batches,
            n_outer,
            full: [[0, n_inner]],
        })
    }
}

impl<'a, R: Reducer, F: PairFormula> BlockedReduction for DenseReduction<'a, R, F> {
    type ReducerType = R;
    type FormulaType = F;

    fn get_reducer(&self) -> &R {
        self.reducer
    }

    fn get_formula(&self) -> &F {
        self.formula
    }

    fn n_batches(&self) -> usize {
        self.n_batches
    }

    fn n_outer(&self) -> usize {
        self.n_outer
    }

    fn n_inner(&self) -> usize {
        self.full[0][1]
    }

    fn n_slices(&self) -> usize {
        usize::from(self.n_outer > 0)
    }

    fn slice_outer_bounds(&self, _slice: usize) -> (usize, usize) {
        (0, self.n_outer)
    }

    fn slice_inner_intervals(&self, _slice: usize) -> &[[usize; 2]] {
        &self.full
    }
}

/// Reduce over the inner intervals listed by a range table
pub struct RangedReduction<'a, R: Reducer, F: PairFormula> {
    reducer: &'a R,
    formula: &'a F,
    n_batches: usize,
    n_outer: usize,
    n_inner: usize,
    ranges: RangeView<'a>,
}

impl<'a, R: Reducer, F: PairFormula> RangedReduction<'a, R, F> {
    pub fn new(
        reducer: &'a R,
        formula: &'a F,
        n_batches: usize,
        n_outer: usize,
        n_inner: usize,
        ranges: RangeView<'a>,
    ) -> Result<Self, &'static str> {
        check_widths(reducer, formula)?;
        ranges.validate(n_outer, n_inner)?;
        Ok(Self {
            reducer,
            formula,
            n_batches,
            n_outer,
            n_inner,
            ranges,
        })
    }
}

impl<'a, R: Reducer, F: PairFormula> BlockedReduction for RangedReduction<'a, R, F> {
    type ReducerType = R;
    type FormulaType = F;

    fn get_reducer(&self) -> &R {
        self.reducer
    }

    fn get_formula(&self) -> &F {
        self.formula
    }

    fn n_batches(&self) -> usize {
        self.n_batches
    }

    fn n_outer(&self) -> usize {
        self.n_outer
    }

    fn n_inner(&self) -> usize {
        self.n_inner
    }

    fn n_slices(&self) -> usize {
        self.ranges.n_slices()
    }

    fn slice_outer_bounds(&self, slice: usize) -> (usize, usize) {
        self.ranges.outer_bounds(slice)
    }

    fn slice_inner_intervals(&self, slice: usize) -> &[[usize; 2]] {
        self.ranges.inner_intervals(slice)
    }
}

/// Describes how a team's scratch buffer is carved up
///
/// The buffer holds (in order):
/// - the staged outer rows (`rows_per_team` × `outer_stage_len`)
/// - the staged inner tile (`tile_len` × `inner_stage_len`)
/// - a single formula value (`dim`)
/// - the formula's own scratch space
/// - one statepack per inner split
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TeamScratchLayout {
    outer_stage: usize,
    tile_stage: usize,
    value: usize,
    formula_scratch: usize,
    statepacks: usize,
}

impl TeamScratchLayout {
    pub fn new(reduction: &impl BlockedReduction, param: &TeamParam) -> Self {
        let formula = reduction.get_formula();
        let reducer = reduction.get_reducer();
        let rows = param.rows_per_team.get();
        TeamScratchLayout {
            outer_stage: rows * formula.outer_stage_len(),
            tile_stage: param.tile_len.get() * formula.inner_stage_len(),
            value: formula.dim(),
            formula_scratch: formula.scratch_len(),
            statepacks: param.inner_splits.get() * rows * reducer.accum_state_size(),
        }
    }

    /// the total number of f64 elements in a team's scratch buffer
    pub fn total_len(&self) -> usize {
        self.outer_stage + self.tile_stage + self.value + self.formula_scratch + self.statepacks
    }
}

/// Compute every output row of `block`, writing them to `out`.
///
/// `out` holds `block.n_rows()` rows, each `reducer.output_dim()` wide,
/// back to back. `scratch` must hold at least
/// [`TeamScratchLayout::total_len`] elements.
///
/// This is the heart of both the dense & ranged evaluators.
pub fn fill_row_block(
    reduction: &impl BlockedReduction,
    param: &TeamParam,
    block: &RowBlock,
    scratch: &mut [f64],
    out: &mut [f64],
) {
    let reducer = reduction.get_reducer();
    let formula = reduction.get_formula();
    let n_rows = block.n_rows();
    let output_dim = reducer.output_dim();
    assert!(n_rows <= param.rows_per_team.get());
    assert_eq!(out.len(), n_rows * output_dim);
    if n_rows == 0 {
        return;
    }

    let layout = TeamScratchLayout::new(reduction, param);
    assert!(scratch.len() >= layout.total_len());
    let (outer_stage, rest) = scratch.split_at_mut(layout.outer_stage);
    let (tile_stage, rest) = rest.split_at_mut(layout.tile_stage);
    let (value, rest) = rest.split_at_mut(layout.value);
    let (formula_scratch, rest) = rest.split_at_mut(layout.formula_scratch);
    let packs = &mut rest[..layout.statepacks];

    let osl = formula.outer_stage_len();
    let isl = formula.inner_stage_len();
    let state_size = reducer.accum_state_size();
    let pack_len = n_rows * state_size;
    let n_splits = param.inner_splits.get();

    for r in 0..n_rows {
        formula.stage_outer(
            block.batch,
            block.outer_start + r,
            &mut outer_stage[r * osl..(r + 1) * osl],
        );
    }

    for split in 0..n_splits {
        let mut statepack = StatePackViewMut::from_slice(
            n_rows,
            state_size,
            &mut packs[split * pack_len..(split + 1) * pack_len],
        );
        reset_full_statepack(reducer, &mut statepack);
        if reducer.skips_pairs() {
            continue;
        }

        for interval in block.intervals {
            let (lo, hi) = split_interval(*interval, n_splits, split);
            let mut tile_start = lo;
            while tile_start < hi {
                let tile_stop = hi.min(tile_start + param.tile_len.get());

                // stage the tile (1st sync point)
                for j in tile_start..tile_stop {
                    let offset = (j - tile_start) * isl;
                    formula.stage_inner(block.batch, j, &mut tile_stage[offset..offset + isl]);
                }

                // fold the tile into each row (2nd sync point afterwards)
                for r in 0..n_rows {
                    let outer = &outer_stage[r * osl..(r + 1) * osl];
                    let mut accum_state = statepack.get_state_mut(r);
                    for j in tile_start..tile_stop {
                        let offset = (j - tile_start) * isl;
                        let inner = &tile_stage[offset..offset + isl];
                        formula.eval(value, outer, inner, formula_scratch);
                        reducer.consume(&mut accum_state, value, j);
                    }
                }
                tile_start = tile_stop;
            }
        }
    }

    if n_splits > 1 {
        tree_merge_statepacks(reducer, packs, n_splits, n_rows);
    }

    let statepack = StatePackViewMut::from_slice(n_rows, state_size, &mut packs[..pack_len]);
    for (r, out_row) in out.chunks_exact_mut(output_dim).enumerate() {
        let row = OuterRow {
            batch: block.batch,
            index: block.outer_start + r,
            staged: &outer_stage[r * osl..(r + 1) * osl],
        };
        reducer.value_from_accum_state(
            &mut ArrayViewMut1::from(out_row),
            &statepack.get_state(r),
            &row,
        );
    }
}

/// Describes where a row block's output starts within the full output
/// buffer, whose rows are ordered by `(batch, outer_index)`.
pub fn row_block_output_offset(reduction: &impl BlockedReduction, block: &RowBlock) -> usize {
    let row = block.batch * reduction.n_outer() + block.outer_start;
    row * reduction.get_reducer().output_dim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::ClosureFormula;
    use crate::reducer::{MinArgMin, Sum};
    use std::vec::Vec;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn run_block(
        reduction: &impl BlockedReduction,
        param: &TeamParam,
        block: &RowBlock,
    ) -> Vec<f64> {
        let layout = TeamScratchLayout::new(reduction, param);
        let mut scratch = vec![0.0; layout.total_len()];
        let mut out = vec![0.0; block.n_rows() * reduction.get_reducer().output_dim()];
        fill_row_block(reduction, param, block, &mut scratch, &mut out);
        out
    }

    #[test]
    fn sum_of_inner_values() {
        let x = [0.0, 1.0];
        let y = [10.0, 20.0, 30.0];
        let formula = ClosureFormula::new(1, &x, 1, 2, &y, 1, 3, |out, _x, y| out[0] = y[0])
            .unwrap();
        let reducer = Sum::new(nz(1));
        let reduction = DenseReduction::new(&reducer, &formula, 1, 2, 3).unwrap();
        let block = RowBlock {
            batch: 0,
            outer_start: 0,
            outer_stop: 2,
            intervals: reduction.slice_inner_intervals(0),
        };
        assert_eq!(run_block(&reduction, &TeamParam::default(), &block), [60.0, 60.0]);
    }

    #[test]
    fn tiling_and_splits_preserve_result() {
        // products of small integers keep the sums exact
        let x: Vec<f64> = (0..5).map(|i| i as f64).collect();
        let y: Vec<f64> = (0..23).map(|j| ((j * 7) % 11) as f64 - 5.0).collect();
        let formula =
            ClosureFormula::new(1, &x, 1, 5, &y, 1, 23, |out, x, y| out[0] = x[0] * y[0]).unwrap();

        let reducer = MinArgMin::new(nz(1));
        let reduction = DenseReduction::new(&reducer, &formula, 1, 5, 23).unwrap();
        let block = RowBlock {
            batch: 0,
            outer_start: 0,
            outer_stop: 5,
            intervals: reduction.slice_inner_intervals(0),
        };
        let reference = run_block(
            &reduction,
            &TeamParam {
                rows_per_team: nz(5),
                tile_len: nz(64),
                inner_splits: nz(1),
            },
            &block,
        );
        for (tile_len, inner_splits) in [(1, 1), (4, 1), (4, 3), (7, 5)] {
            let param = TeamParam {
                rows_per_team: nz(8),
                tile_len: nz(tile_len),
                inner_splits: nz(inner_splits),
            };
            assert_eq!(run_block(&reduction, &param, &block), reference);
        }
    }

    #[test]
    fn empty_intervals_give_identity() {
        let x = [1.0];
        let y = [1.0, 2.0];
        let formula = ClosureFormula::new(1, &x, 1, 1, &y, 1, 2, |out, _x, y| out[0] = y[0])
            .unwrap();
        let reducer = MinArgMin::new(nz(1));
        let reduction = DenseReduction::new(&reducer, &formula, 1, 1, 2).unwrap();
        let block = RowBlock {
            batch: 0,
            outer_start: 0,
            outer_stop: 1,
            intervals: &[],
        };
        assert_eq!(
            run_block(&reduction, &TeamParam::default(), &block),
            [f64::INFINITY, 0.0]
        );
    }

    #[test]
    fn width_mismatch() {
        let formula =
            ClosureFormula::new(2, &[1.0], 1, 1, &[1.0], 1, 1, |out, _, _| out.fill(0.0)).unwrap();
        let reducer = Sum::new(nz(1));
        assert!(DenseReduction::new(&reducer, &formula, 1, 1, 1).is_err());
    }
}
