/*!
The numeric core of `pairreduce` (usable without the standard library).

This crate holds the pieces of the pairwise-reduction machinery that don't
need allocation, I/O or floating-point transcendental functions:
- the [`Reducer`] trait (a reduction policy) and the order-statistic and
  summation reducers,
- the [`PairFormula`] capability that the evaluators consume,
- range tables ([`RangeView`]) for block-sparse evaluation,
- the tiled row-block fold ([`fill_row_block`]) that drives both the dense
  and the ranged evaluators.

Keeping these pieces `no_std` is meant to make it easier to eventually
reuse them from accelerator kernels. The public `pairreduce` crate builds
everything that needs `std` on top of this crate.
*/

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

mod formula;
mod misc;
mod parallel;
mod ranges;
mod reduce_utils;
mod reducer;
mod state;

pub use formula::{ClosureFormula, PairFormula};
pub use misc::{View2DSpec, even_partition};
pub use parallel::{
    BlockedReduction, DenseReduction, RangedReduction, RowBlock, TeamParam, TeamScratchLayout,
    fill_row_block, row_block_output_offset,
};
pub use ranges::{RangeView, split_interval};
pub use reduce_utils::{merge_full_statepacks, reset_full_statepack, tree_merge_statepacks};
pub use reducer::{
    ArgKMax, ArgKMin, ArgMax, ArgMin, CompareOp, Extremum, ExtremumOutput, Greater, IndicesOnly,
    KMin, KMinArgKMin, Less, Max, MaxArgMax, Min, MinArgMin, OuterRow, Reducer, Sum, ValuesAndIndices,
    ValuesOnly, Zero,
};
pub use state::{AccumStateView, AccumStateViewMut, StatePackView, StatePackViewMut};
