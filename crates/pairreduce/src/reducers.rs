//! Reducers that need `std` floating-point math (exponentials & logarithms)
//!
//! Both reducers here use the "online" log-sum-exp trick: an `accum_state`
//! tracks the running maximum `m` of the exponents along with sums that are
//! rescaled by `exp(-m)`. That keeps every intermediate finite even when
//! the exponents are large.

use core::num::NonZeroUsize;
use ndarray::ArrayViewMut1;
use pairreduce_nostd_internal::{AccumStateView, AccumStateViewMut, OuterRow, Reducer};

/// Computes the weights needed to fold a new exponent `v` into a running
/// state with maximum `m`.
///
/// Returns `(new_max, scale_of_old_sums, weight_of_new_term)`, or `None` when
/// the term doesn't contribute (`v == -inf`).
#[inline(always)]
fn online_weights(m: f64, v: f64) -> Option<(f64, f64, f64)> {
    if v == f64::NEG_INFINITY {
        None
    } else if v == m {
        Some((m, 1.0, 1.0))
    } else if v > m {
        // when m is -inf, the old sums are 0 anyway
        Some((v, (m - v).exp(), 1.0))
    } else {
        // this branch also propagates NaN
        Some((m, 1.0, (v - m).exp()))
    }
}

/// Computes the weights needed to merge 2 running states with maxima `m1` &
/// `m2`: returns `(new_max, scale1, scale2)`
#[inline(always)]
fn merge_weights(m1: f64, m2: f64) -> (f64, f64, f64) {
    if m1 == m2 {
        (m1, 1.0, 1.0)
    } else if m1 > m2 {
        (m1, 1.0, (m2 - m1).exp())
    } else {
        (m2, (m1 - m2).exp(), 1.0)
    }
}

/// Computes `log(Σ exp(value))` independently for every channel.
///
/// The `accum_state` holds the running maxima of each channel, followed by
/// the rescaled sums. An empty reduction produces `-inf`.
#[derive(Clone, Copy, Debug)]
pub struct LogSumExp {
    dim: usize,
}

impl LogSumExp {
    pub fn new(dim: NonZeroUsize) -> Self {
        Self { dim: dim.get() }
    }
}

impl Reducer for LogSumExp {
    fn formula_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn accum_state_size(&self) -> usize {
        2 * self.dim
    }

    fn init_accum_state(&self, accum_state: &mut AccumStateViewMut) {
        for k in 0..self.dim {
            accum_state[k] = f64::NEG_INFINITY;
            accum_state[self.dim + k] = 0.0;
        }
    }

    #[inline(always)]
    fn consume(&self, accum_state: &mut AccumStateViewMut, value: &[f64], _inner_index: usize) {
        for k in 0..self.dim {
            if let Some((m, scale, w)) = online_weights(accum_state[k], value[k]) {
                accum_state[k] = m;
                accum_state[self.dim + k] = accum_state[self.dim + k] * scale + w;
            }
        }
    }

    fn merge(&self, accum_state: &mut AccumStateViewMut, other: &AccumStateView) {
        for k in 0..self.dim {
            if other[self.dim + k] == 0.0 {
                continue;
            }
            let (m, scale1, scale2) = merge_weights(accum_state[k], other[k]);
            accum_state[k] = m;
            accum_state[self.dim + k] =
                accum_state[self.dim + k] * scale1 + other[self.dim + k] * scale2;
        }
    }

    fn value_from_accum_state(
        &self,
        value: &mut ArrayViewMut1<f64>,
        accum_state: &AccumStateView,
        _row: &OuterRow,
    ) {
        for k in 0..self.dim {
            let s = accum_state[self.dim + k];
            value[[k]] = if s == 0.0 {
                f64::NEG_INFINITY
            } else {
                accum_state[k] + s.ln()
            };
        }
    }
}

/// Computes `Σ exp(f) v / Σ exp(f)`, where the formula's first component is
/// the (scalar) exponent `f` and the remaining components are the vector `v`
///
/// The `accum_state` holds the running maximum of `f`, the rescaled sum of
/// weights, and the rescaled weighted sum of `v`. An empty reduction produces
/// a vector of zeros.
#[derive(Clone, Copy, Debug)]
pub struct SumSoftMaxWeight {
    // width of v
    dim_v: usize,
}

impl SumSoftMaxWeight {
    /// `formula_dim` counts the exponent and the vector, so it must be at
    /// least 2.
    pub fn new(formula_dim: usize) -> Result<Self, &'static str> {
        if formula_dim < 2 {
            Err("SumSoftMaxWeight needs a formula with at least 2 components")
        } else {
            Ok(Self {
                dim_v: formula_dim - 1,
            })
        }
    }
}

impl Reducer for SumSoftMaxWeight {
    fn formula_dim(&self) -> usize {
        self.dim_v + 1
    }

    fn output_dim(&self) -> usize {
        self.dim_v
    }

    fn accum_state_size(&self) -> usize {
        self.dim_v + 2
    }

    fn init_accum_state(&self, accum_state: &mut AccumStateViewMut) {
        accum_state.fill(0.0);
        accum_state[0] = f64::NEG_INFINITY;
    }

    #[inline(always)]
    fn consume(&self, accum_state: &mut AccumStateViewMut, value: &[f64], _inner_index: usize) {
        if let Some((m, scale, w)) = online_weights(accum_state[0], value[0]) {
            accum_state[0] = m;
            accum_state[1] = accum_state[1] * scale + w;
            for k in 0..self.dim_v {
                accum_state[2 + k] = accum_state[2 + k] * scale + w * value[1 + k];
            }
        }
    }

    fn merge(&self, accum_state: &mut AccumStateViewMut, other: &AccumStateView) {
        if other[1] == 0.0 {
            return;
        }
        let (m, scale1, scale2) = merge_weights(accum_state[0], other[0]);
        accum_state[0] = m;
        for k in 1..(self.dim_v + 2) {
            accum_state[k] = accum_state[k] * scale1 + other[k] * scale2;
        }
    }

    fn value_from_accum_state(
        &self,
        value: &mut ArrayViewMut1<f64>,
        accum_state: &AccumStateView,
        _row: &OuterRow,
    ) {
        let s = accum_state[1];
        for k in 0..self.dim_v {
            value[[k]] = if s == 0.0 {
                0.0
            } else {
                accum_state[2 + k] / s
            };
        }
    }
}
