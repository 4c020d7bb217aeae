//! Define API functions to actually drive a reduction
//!
//! These functions could all be methods of [`GenericReduction`]. We keep them
//! as standalone functions to keep the separation between the 3 kinds of
//! inputs to a calculation explicit:
//! 1. the reduction itself (formula, axis and policy). It's immutable and
//!    independent of any data.
//! 2. the data ([`PairInputs`], optionally restricted with [`Ranges`]) and
//!    the output array.
//! 3. runtime parameters ([`RuntimeSpec`]) that affect performance but not
//!    the result (for a fixed [`crate::ExecParams`], the result is bitwise
//!    identical across backends).
//!
//! Both functions are all-or-nothing: the output array is only modified when
//! the call succeeds.

use crate::{Error, GenericReduction, PairInputs, Ranges, RuntimeSpec};
use ndarray::ArrayViewMut2;

/// Reduce over every pair of indices.
///
/// `out` must have the shape reported by [`GenericReduction::output_shape`].
/// Row `b * n_outer + o` holds the result for outer index `o` of batch `b`.
pub fn reduce_dense(
    reduction: &GenericReduction,
    inputs: &PairInputs,
    out: &mut ArrayViewMut2<f64>,
    runtime: &RuntimeSpec,
) -> Result<(), Error> {
    reduction.exec(inputs, None, out, runtime)
}

/// Reduce over the pairs listed in `ranges` (the same table is used for every
/// batch).
///
/// Outer indices that aren't covered by `ranges` get the identity value of
/// the reduction.
pub fn reduce_ranged(
    reduction: &GenericReduction,
    inputs: &PairInputs,
    ranges: &Ranges,
    out: &mut ArrayViewMut2<f64>,
    runtime: &RuntimeSpec,
) -> Result<(), Error> {
    reduction.exec(inputs, Some(ranges), out, runtime)
}
