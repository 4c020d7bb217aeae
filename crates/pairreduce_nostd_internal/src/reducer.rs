//! Define basic reducer machinery (that doesn't require the standard lib)
//!
//! # Reducer Machinery
//!
//! The crate evaluates a vector-valued formula `F(xᵢ, yⱼ, p)` for pairs of
//! indices and collapses the values along one axis. Let's call the index
//! that survives the reduction the *outer index* and the index that is
//! reduced over the *inner index*. For a fixed outer index, the reduction
//! sees a stream of `(value, inner_index)` elements, where `value` is the
//! `DIM_F`-wide formula output.
//!
//! We draw a distinction between the current state of a reduction and the
//! actual reducer logic.
//! - We refer to the current state of a single reduction as the
//!   `accum_state`. It is `DIMRED` elements wide, which may exceed the width
//!   of the final output (e.g. to carry value and index slots side by side).
//! - The reducer logic is encapsulated by the functions implemented by the
//!   [`Reducer`] trait. A Reducer doesn't hold any data-dependent state; it
//!   only knows how to modify an `accum_state`.
//! - From the perspective of a reducer, the `accum_state` is packaged
//!   inside of the [`AccumStateView`] & [`AccumStateViewMut`] types.
//!
//! # Tie-breaking
//!
//! The order-statistic reducers compare `(value, index)` pairs
//! lexicographically. When inner indices are visited in increasing order,
//! this is exactly the "strictly-less-than" rule: a later element with an
//! equal value never displaces an earlier one. The lexicographic form also
//! keeps [`Reducer::merge`] commutative and preserves "lower index wins" when
//! blocks of inner indices are visited out of order. `NaN` never displaces a
//! stored entry.

use crate::state::{AccumStateView, AccumStateViewMut};
use core::marker::PhantomData;
use core::num::NonZeroUsize;
use ndarray::ArrayViewMut1;

/// Describes the outer-index row that is being finalized.
///
/// `staged` holds the row's staged input data (the outer-category variables
/// and the parameters, laid out by the formula that staged them).
#[derive(Clone, Copy)]
pub struct OuterRow<'a> {
    pub batch: usize,
    pub index: usize,
    pub staged: &'a [f64],
}

/// Reducers operate on individual `accum_state`s.
pub trait Reducer {
    /// the width of the formula values that [`Reducer::consume`] expects
    fn formula_dim(&self) -> usize;

    /// the width of a single finalized output row
    fn output_dim(&self) -> usize;

    /// the number of f64 elements needed to track the accumulator data
    fn accum_state_size(&self) -> usize;

    /// initializes the storage tracking the acumulator's state to the
    /// identity element of the reduction.
    ///
    /// You need to call this function before you start working with the
    /// storage. You can also use this to reset the accumulator's state since
    /// it blindly overwrites any existing values.
    fn init_accum_state(&self, accum_state: &mut AccumStateViewMut);

    /// fold the formula `value`, computed at `inner_index`, into `accum_state`
    fn consume(&self, accum_state: &mut AccumStateViewMut, value: &[f64], inner_index: usize);

    /// merge the state information tracked by `accum_state` and `other`, and
    /// update `accum_state` accordingly
    fn merge(&self, accum_state: &mut AccumStateViewMut, other: &AccumStateView);

    /// derive the final output row from `accum_state`. Expects `value` to
    /// have the shape `[self.output_dim()]`.
    fn value_from_accum_state(
        &self,
        value: &mut ArrayViewMut1<f64>,
        accum_state: &AccumStateView,
        row: &OuterRow,
    );

    /// When `true`, the value of the reduction doesn't depend on any pair.
    /// The evaluators use this to skip formula evaluation altogether.
    fn skips_pairs(&self) -> bool {
        false
    }
}

/// Elementwise summation: `accum_state += value`
#[derive(Clone, Copy, Debug)]
pub struct Sum {
    dim: usize,
}

impl Sum {
    pub fn new(dim: NonZeroUsize) -> Self {
        Self { dim: dim.get() }
    }
}

impl Reducer for Sum {
    fn formula_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn accum_state_size(&self) -> usize {
        self.dim
    }

    fn init_accum_state(&self, accum_state: &mut AccumStateViewMut) {
        accum_state.fill(0.0);
    }

    #[inline(always)]
    fn consume(&self, accum_state: &mut AccumStateViewMut, value: &[f64], _inner_index: usize) {
        for k in 0..self.dim {
            accum_state[k] += value[k];
        }
    }

    fn merge(&self, accum_state: &mut AccumStateViewMut, other: &AccumStateView) {
        for k in 0..self.dim {
            accum_state[k] += other[k];
        }
    }

    fn value_from_accum_state(
        &self,
        value: &mut ArrayViewMut1<f64>,
        accum_state: &AccumStateView,
        _row: &OuterRow,
    ) {
        for k in 0..self.dim {
            value[[k]] = accum_state[k];
        }
    }
}

/// The reduction that always produces the additive identity.
///
/// This is the derivative of the order-statistic reductions.
#[derive(Clone, Copy, Debug)]
pub struct Zero {
    dim: usize,
}

impl Zero {
    pub fn new(dim: NonZeroUsize) -> Self {
        Self { dim: dim.get() }
    }
}

impl Reducer for Zero {
    fn formula_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn accum_state_size(&self) -> usize {
        self.dim
    }

    fn init_accum_state(&self, accum_state: &mut AccumStateViewMut) {
        accum_state.fill(0.0);
    }

    fn consume(&self, _accum_state: &mut AccumStateViewMut, _value: &[f64], _inner_index: usize) {}

    fn merge(&self, _accum_state: &mut AccumStateViewMut, _other: &AccumStateView) {}

    fn value_from_accum_state(
        &self,
        value: &mut ArrayViewMut1<f64>,
        _accum_state: &AccumStateView,
        _row: &OuterRow,
    ) {
        value.fill(0.0);
    }

    fn skips_pairs(&self) -> bool {
        true
    }
}

/// Specifies the ordering used by the order-statistic reducers
pub trait CompareOp: Copy + Clone {
    /// the value held by an empty slot
    const IDENTITY: f64;

    /// returns whether `a` strictly precedes `b`
    fn precedes(a: f64, b: f64) -> bool;
}

/// Selects the smallest values
#[derive(Clone, Copy, Debug)]
pub struct Less;

impl CompareOp for Less {
    const IDENTITY: f64 = f64::INFINITY;

    #[inline(always)]
    fn precedes(a: f64, b: f64) -> bool {
        a < b
    }
}

/// Selects the largest values
#[derive(Clone, Copy, Debug)]
pub struct Greater;

impl CompareOp for Greater {
    const IDENTITY: f64 = f64::NEG_INFINITY;

    #[inline(always)]
    fn precedes(a: f64, b: f64) -> bool {
        a > b
    }
}

/// Specifies what an order-statistic reducer writes to its output
pub trait ExtremumOutput: Copy + Clone {
    const EMIT_VALUES: bool;
    const EMIT_INDICES: bool;
}

#[derive(Clone, Copy, Debug)]
pub struct ValuesOnly;

impl ExtremumOutput for ValuesOnly {
    const EMIT_VALUES: bool = true;
    const EMIT_INDICES: bool = false;
}

#[derive(Clone, Copy, Debug)]
pub struct IndicesOnly;

impl ExtremumOutput for IndicesOnly {
    const EMIT_VALUES: bool = false;
    const EMIT_INDICES: bool = true;
}

#[derive(Clone, Copy, Debug)]
pub struct ValuesAndIndices;

impl ExtremumOutput for ValuesAndIndices {
    const EMIT_VALUES: bool = true;
    const EMIT_INDICES: bool = true;
}

/// Tracks, for every channel of the formula, the `k` best `(value, index)`
/// pairs (best according to `C`) in sorted order.
///
/// # Accumulator layout
/// With `D` denoting the formula width, slot `s` (`0 <= s < k`) of channel
/// `c` stores its value at `s*2*D + c` and its index at `s*2*D + D + c`. For
/// `k == 1`, this means the value channels are followed by the index
/// channels.
///
/// # Output layout
/// - [`ValuesOnly`] & [`IndicesOnly`]: element `s*D + c` holds slot `s` of
///   channel `c`
/// - [`ValuesAndIndices`]: the output mirrors the accumulator layout
///
/// Indices are stored as `f64` (they are exact up to 2⁵³).
///
/// A slot that never received an entry holds `C::IDENTITY` (`±∞`) and index
/// 0. This can't be told apart from a genuine infinite formula value at
/// inner index 0, so callers that need to detect "no pair was visited" must
/// track that separately (e.g. from the range table).
#[derive(Clone, Copy, Debug)]
pub struct Extremum<C: CompareOp, O: ExtremumOutput> {
    dim: usize,
    k: usize,
    _dummy: PhantomData<(C, O)>,
}

impl<C: CompareOp, O: ExtremumOutput> Extremum<C, O> {
    /// construct a reducer that tracks a single extremum per channel
    pub fn new(dim: NonZeroUsize) -> Self {
        Self::with_k(dim, NonZeroUsize::MIN)
    }

    /// construct a reducer that tracks the `k` best entries per channel
    pub fn with_k(dim: NonZeroUsize, k: NonZeroUsize) -> Self {
        Self {
            dim: dim.get(),
            k: k.get(),
            _dummy: PhantomData,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    #[inline(always)]
    fn value_slot(&self, slot: usize, channel: usize) -> usize {
        slot * 2 * self.dim + channel
    }

    /// returns whether `(a_val, a_idx)` strictly precedes `(b_val, b_idx)`
    #[inline(always)]
    fn precedes(a_val: f64, a_idx: f64, b_val: f64, b_idx: f64) -> bool {
        C::precedes(a_val, b_val) || (a_val == b_val && a_idx < b_idx)
    }

    /// inserts `(val, idx)` into the sorted slots of `channel`, discarding the
    /// previous worst entry
    #[inline(always)]
    fn insert(&self, accum_state: &mut AccumStateViewMut, channel: usize, val: f64, idx: f64) {
        let last = self.value_slot(self.k - 1, channel);
        if !Self::precedes(val, idx, accum_state[last], accum_state[last + self.dim]) {
            return;
        }
        let mut slot = self.k - 1;
        while slot > 0 {
            let prev = self.value_slot(slot - 1, channel);
            if !Self::precedes(val, idx, accum_state[prev], accum_state[prev + self.dim]) {
                break;
            }
            let cur = self.value_slot(slot, channel);
            accum_state[cur] = accum_state[prev];
            accum_state[cur + self.dim] = accum_state[prev + self.dim];
            slot -= 1;
        }
        let cur = self.value_slot(slot, channel);
        accum_state[cur] = val;
        accum_state[cur + self.dim] = idx;
    }
}

impl<C: CompareOp, O: ExtremumOutput> Reducer for Extremum<C, O> {
    fn formula_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        let factor = usize::from(O::EMIT_VALUES) + usize::from(O::EMIT_INDICES);
        factor * self.k * self.dim
    }

    fn accum_state_size(&self) -> usize {
        2 * self.k * self.dim
    }

    fn init_accum_state(&self, accum_state: &mut AccumStateViewMut) {
        for slot in 0..self.k {
            for channel in 0..self.dim {
                let i = self.value_slot(slot, channel);
                accum_state[i] = C::IDENTITY;
                accum_state[i + self.dim] = 0.0;
            }
        }
    }

    #[inline(always)]
    fn consume(&self, accum_state: &mut AccumStateViewMut, value: &[f64], inner_index: usize) {
        let idx = inner_index as f64;
        for channel in 0..self.dim {
            self.insert(accum_state, channel, value[channel], idx);
        }
    }

    fn merge(&self, accum_state: &mut AccumStateViewMut, other: &AccumStateView) {
        for channel in 0..self.dim {
            for slot in 0..self.k {
                let i = self.value_slot(slot, channel);
                let (val, idx) = (other[i], other[i + self.dim]);
                // init_accum_state leaves empty slots at (IDENTITY, 0) and
                // they always trail the filled ones. A genuine (IDENTITY, 0)
                // entry can't change the result either.
                if val == C::IDENTITY && idx == 0.0 {
                    break;
                }
                self.insert(accum_state, channel, val, idx);
            }
        }
    }

    fn value_from_accum_state(
        &self,
        value: &mut ArrayViewMut1<f64>,
        accum_state: &AccumStateView,
        _row: &OuterRow,
    ) {
        if O::EMIT_VALUES && O::EMIT_INDICES {
            for i in 0..self.accum_state_size() {
                value[[i]] = accum_state[i];
            }
        } else {
            let offset = if O::EMIT_INDICES { self.dim } else { 0 };
            for slot in 0..self.k {
                for channel in 0..self.dim {
                    value[[slot * self.dim + channel]] =
                        accum_state[self.value_slot(slot, channel) + offset];
                }
            }
        }
    }
}

pub type Min = Extremum<Less, ValuesOnly>;
pub type Max = Extremum<Greater, ValuesOnly>;
pub type ArgMin = Extremum<Less, IndicesOnly>;
pub type ArgMax = Extremum<Greater, IndicesOnly>;
pub type MinArgMin = Extremum<Less, ValuesAndIndices>;
pub type MaxArgMax = Extremum<Greater, ValuesAndIndices>;
pub type KMin = Extremum<Less, ValuesOnly>;
pub type ArgKMin = Extremum<Less, IndicesOnly>;
pub type KMinArgKMin = Extremum<Less, ValuesAndIndices>;
pub type ArgKMax = Extremum<Greater, IndicesOnly>;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use std::vec::Vec;

    const NO_ROW: OuterRow<'static> = OuterRow {
        batch: 0,
        index: 0,
        staged: &[],
    };

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn finalize(reducer: &impl Reducer, storage: &[f64]) -> Vec<f64> {
        let mut out = Array1::<f64>::zeros(reducer.output_dim());
        reducer.value_from_accum_state(
            &mut out.view_mut(),
            &AccumStateView::from_contiguous_slice(storage),
            &NO_ROW,
        );
        out.to_vec()
    }

    fn fold_all(reducer: &impl Reducer, values: &[f64], dim: usize) -> Vec<f64> {
        let mut storage = vec![0.0; reducer.accum_state_size()];
        let mut state = AccumStateViewMut::from_contiguous_slice(&mut storage);
        reducer.init_accum_state(&mut state);
        for (j, chunk) in values.chunks_exact(dim).enumerate() {
            reducer.consume(&mut state, chunk, j);
        }
        storage
    }

    #[test]
    fn identity_law() {
        let sum = Sum::new(nz(2));
        assert_eq!(finalize(&sum, &fold_all(&sum, &[], 2)), vec![0.0, 0.0]);

        let min_arg_min = MinArgMin::new(nz(1));
        assert_eq!(
            finalize(&min_arg_min, &fold_all(&min_arg_min, &[], 1)),
            vec![f64::INFINITY, 0.0]
        );

        let arg_k_min = ArgKMin::with_k(nz(1), nz(3));
        assert_eq!(
            finalize(&arg_k_min, &fold_all(&arg_k_min, &[], 1)),
            vec![0.0, 0.0, 0.0]
        );

        let zero = Zero::new(nz(3));
        assert_eq!(
            finalize(&zero, &fold_all(&zero, &[1.0, 2.0, 3.0], 3)),
            vec![0.0; 3]
        );
    }

    #[test]
    fn sum_consume() {
        let sum = Sum::new(nz(2));
        let state = fold_all(&sum, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2);
        assert_eq!(finalize(&sum, &state), vec![9.0, 12.0]);
    }

    #[test]
    fn min_arg_min_ties() {
        let reducer = MinArgMin::new(nz(2));
        // channel 0: [3, 1, 1] -> value 1 at index 1
        // channel 1: [2, 2, 5] -> value 2 at index 0
        let state = fold_all(&reducer, &[3.0, 2.0, 1.0, 2.0, 1.0, 5.0], 2);
        assert_eq!(finalize(&reducer, &state), vec![1.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn arg_k_min_ordering() {
        let reducer = ArgKMin::with_k(nz(1), nz(3));
        let state = fold_all(&reducer, &[5.0, 1.0, 9.0, 1.0, 7.0], 1);
        // the 3 smallest values are 1 (index 1), 1 (index 3), 5 (index 0)
        assert_eq!(finalize(&reducer, &state), vec![1.0, 3.0, 0.0]);

        let with_values = KMinArgKMin::with_k(nz(1), nz(3));
        let state = fold_all(&with_values, &[5.0, 1.0, 9.0, 1.0, 7.0], 1);
        assert_eq!(
            finalize(&with_values, &state),
            vec![1.0, 1.0, 1.0, 3.0, 5.0, 0.0]
        );
    }

    #[test]
    fn arg_k_max_multichannel() {
        let reducer = ArgKMax::with_k(nz(2), nz(2));
        // channel 0: [0, 4, 2] ; channel 1: [9, 8, 7]
        let state = fold_all(&reducer, &[0.0, 9.0, 4.0, 8.0, 2.0, 7.0], 2);
        // slot 0 of channels 0 & 1, then slot 1 of channels 0 & 1
        assert_eq!(finalize(&reducer, &state), vec![1.0, 0.0, 2.0, 1.0]);
    }

    #[test]
    fn nan_never_displaces() {
        let reducer = Min::new(nz(1));
        let state = fold_all(&reducer, &[f64::NAN, 3.0, f64::NAN], 1);
        assert_eq!(finalize(&reducer, &state), vec![3.0]);
    }

    /// builds a state by folding `values` with the inner indices offset by
    /// `offset`
    fn partial(reducer: &impl Reducer, values: &[f64], offset: usize) -> Vec<f64> {
        let mut storage = vec![0.0; reducer.accum_state_size()];
        let mut state = AccumStateViewMut::from_contiguous_slice(&mut storage);
        reducer.init_accum_state(&mut state);
        for (j, v) in values.iter().enumerate() {
            reducer.consume(&mut state, core::slice::from_ref(v), j + offset);
        }
        storage
    }

    fn merged(reducer: &impl Reducer, a: &[f64], b: &[f64]) -> Vec<f64> {
        let mut out = a.to_vec();
        reducer.merge(
            &mut AccumStateViewMut::from_contiguous_slice(&mut out),
            &AccumStateView::from_contiguous_slice(b),
        );
        out
    }

    fn check_merge_laws(reducer: &impl Reducer) {
        let a = partial(reducer, &[4.0, 2.0, 8.0], 0);
        let b = partial(reducer, &[2.0, 9.0, -1.0], 3);
        let c = partial(reducer, &[2.0, 5.0], 6);

        assert_eq!(merged(reducer, &a, &b), merged(reducer, &b, &a));
        assert_eq!(
            merged(reducer, &merged(reducer, &a, &b), &c),
            merged(reducer, &a, &merged(reducer, &b, &c))
        );

        // merging the partial states matches a single sequential fold
        let sequential = partial(reducer, &[4.0, 2.0, 8.0, 2.0, 9.0, -1.0, 2.0, 5.0], 0);
        assert_eq!(
            merged(reducer, &merged(reducer, &a, &b), &c),
            sequential
        );
    }

    #[test]
    fn merge_laws() {
        check_merge_laws(&Sum::new(nz(1)));
        check_merge_laws(&MinArgMin::new(nz(1)));
        check_merge_laws(&MaxArgMax::new(nz(1)));
        check_merge_laws(&KMinArgKMin::with_k(nz(1), nz(3)));
    }

    #[test]
    fn merge_partially_filled() {
        let reducer = KMinArgKMin::with_k(nz(1), nz(3));
        let empty = partial(&reducer, &[], 0);
        // only 1 of the 3 slots is filled
        let one = partial(&reducer, &[6.0], 4);
        assert_eq!(merged(&reducer, &empty, &one), one);
        assert_eq!(merged(&reducer, &one, &empty), one);
        assert_eq!(
            finalize(&reducer, &merged(&reducer, &partial(&reducer, &[7.0, 3.0], 0), &one)),
            vec![3.0, 1.0, 6.0, 4.0, 7.0, 0.0]
        );
    }
}
