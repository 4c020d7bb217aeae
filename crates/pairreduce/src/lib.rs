/*!
Provides routines for evaluating reductions of vector-valued formulas over
all pairs of points taken from 2 sets (or over a block-sparse subset of
those pairs).

<div class="warning">

This crate is still in early development.

</div>

# High-Level: Pairwise Reductions

Consider 2 sets of points, `{x_i}` (with `nx` members) and `{y_j}` (with `ny`
members), plus some global parameters `p`. A formula `F(x_i, y_j, p)`
produces a small vector for every pair. Plenty of calculations (kernel
matrix-vector products, nearest neighbor searches, soft-max attention, ...)
boil down to reducing the `nx × ny` matrix of these vectors along one axis:
```text
out_i = reduce_j F(x_i, y_j, p)
```
The full matrix is never materialized. Instead, every output row owns a small
*accumulator state* that folds in one pair at a time.

The pieces of a calculation:
- a formula ([`Expr`], built from [`Var`]s),
- a reduction policy picked by name (e.g. `"Sum"`, `"MinArgMin"`,
  `"ArgKMin"`, `"LogSumExp"`), assembled together with the formula by
  [`ReductionBuilder`],
- input data ([`PairInputs`]), optionally with batch dimensions,
- runtime parameters ([`RuntimeSpec`]) that choose the backend (serial, a
  thread pool or a device).

[`reduce_dense`] visits every pair while [`reduce_ranged`] only visits the
pairs listed in a range table ([`Ranges`]). Gradients of a reduction are
themselves reductions (see [`GenericReduction::grad`]).

# Tie-breaking

The order-statistic reductions compare `(value, index)` pairs
lexicographically, so the lowest index wins among equal values. `NaN` never
displaces a stored entry.

# Developer Guide

See the crate-level documentation for [`pairreduce_nostd_internal`].

*/

#![deny(rustdoc::broken_intra_doc_links)]

// inform build-system of the crates in this package
mod compiled;
mod device;
mod error;
mod executor;
mod formula;
mod func;
mod grad;
mod inputs;
mod misc;
mod parallel_rayon;
mod parallel_serial;
mod ranges;
mod reducers;
mod reduction;
mod runtime;
mod wrapped_reducer;

// pull in symbols that visible outside of the package
pub use compiled::{BoundFormula, CompiledFormula};
pub use device::{
    BufferId, DeviceBuffer, DeviceContext, DeviceExecutor, DeviceScope, HostDevice,
};
pub use error::{Error, status, status_of};
pub use executor::Executor;
pub use formula::{Category, Expr, Var};
pub use func::{reduce_dense, reduce_ranged};
pub use grad::{GradRule, grad_rule};
pub use inputs::{PairInputs, VarArray, broadcast_batch_shapes};
pub use misc::{ReductionAxis, axis2cat, cat2axis};
pub use pairreduce_nostd_internal::{
    BlockedReduction, ClosureFormula, DenseReduction, PairFormula, RangeView, RangedReduction,
    Reducer, TeamParam,
};
pub use parallel_rayon::ThreadPoolExecutor;
pub use parallel_serial::SerialExecutor;
pub use ranges::Ranges;
pub use reducers::{LogSumExp, SumSoftMaxWeight};
pub use reduction::{GenericReduction, ReductionBuilder};
pub use runtime::{Backend, ExecParams, RuntimeSpec};
