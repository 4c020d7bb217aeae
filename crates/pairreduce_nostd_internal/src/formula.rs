//! The pair-formula capability consumed by the blocked evaluators.
//!
//! A formula computes a `dim()`-wide vector from the data associated with one
//! outer index and one inner index (plus any global parameters). The
//! evaluators never inspect the structure of a formula. They only know how
//! to *stage* data into fast working memory and how to call
//! [`PairFormula::eval`] on staged data.
//!
//! Staging exists so that the data associated with an inner index can be
//! gathered once per tile and reused by every outer row that a team folds
//! against the tile. Likewise, the data for an outer row (including the
//! parameters) is gathered once per row block.

/// Describes a vector-valued function of an (outer, inner) pair of indices
///
/// Implementors must be usable from multiple threads at once (all methods
/// take `&self`), which is why every piece of mutable working memory is
/// provided by the caller.
pub trait PairFormula {
    /// the width of the formula's output
    fn dim(&self) -> usize;

    /// number of f64 elements [`PairFormula::stage_outer`] writes
    fn outer_stage_len(&self) -> usize;

    /// number of f64 elements [`PairFormula::stage_inner`] writes
    fn inner_stage_len(&self) -> usize;

    /// number of f64 elements of scratch space needed by
    /// [`PairFormula::eval`]
    fn scratch_len(&self) -> usize {
        0
    }

    /// gather the data associated with `outer_index` of batch `batch`
    fn stage_outer(&self, batch: usize, outer_index: usize, dst: &mut [f64]);

    /// gather the data associated with `inner_index` of batch `batch`
    fn stage_inner(&self, batch: usize, inner_index: usize, dst: &mut [f64]);

    /// evaluate the formula on staged data, writing `self.dim()` elements to
    /// `out`
    fn eval(&self, out: &mut [f64], outer: &[f64], inner: &[f64], scratch: &mut [f64]);
}

/// A formula defined by a closure over 2 flat arrays of fixed-width vectors.
///
/// The outer data holds `n_batches * n_outer` vectors of width `outer_width`
/// and the inner data holds `n_batches * n_inner` vectors of width
/// `inner_width` (in both cases, the batch index varies slowest).
///
/// This is the lowest-friction way to drive the evaluators directly, since no
/// expression tree is involved.
pub struct ClosureFormula<'a, F>
where
    F: Fn(&mut [f64], &[f64], &[f64]),
{
    dim: usize,
    outer: &'a [f64],
    outer_width: usize,
    n_outer: usize,
    inner: &'a [f64],
    inner_width: usize,
    n_inner: usize,
    func: F,
}

impl<'a, F> ClosureFormula<'a, F>
where
    F: Fn(&mut [f64], &[f64], &[f64]),
{
    /// `func(out, outer_vec, inner_vec)` must write `dim` elements to `out`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dim: usize,
        outer: &'a [f64],
        outer_width: usize,
        n_outer: usize,
        inner: &'a [f64],
        inner_width: usize,
        n_inner: usize,
        func: F,
    ) -> Result<Self, &'static str> {
        if dim == 0 {
            Err("a formula must produce at least 1 value")
        } else if outer_width == 0 || inner_width == 0 {
            Err("vector widths must be positive")
        } else if (n_outer == 0) || (outer.len() % (outer_width * n_outer) != 0) {
            Err("outer data length isn't a multiple of n_outer * outer_width")
        } else if (n_inner == 0) || (inner.len() % (inner_width * n_inner) != 0) {
            Err("inner data length isn't a multiple of n_inner * inner_width")
        } else if outer.len() / (outer_width * n_outer) != inner.len() / (inner_width * n_inner) {
            Err("outer and inner data hold different numbers of batches")
        } else {
            Ok(Self {
                dim,
                outer,
                outer_width,
                n_outer,
                inner,
                inner_width,
                n_inner,
                func,
            })
        }
    }

    pub fn n_batches(&self) -> usize {
        self.outer.len() / (self.outer_width * self.n_outer)
    }

    pub fn n_outer(&self) -> usize {
        self.n_outer
    }

    pub fn n_inner(&self) -> usize {
        self.n_inner
    }
}

impl<'a, F> PairFormula for ClosureFormula<'a, F>
where
    F: Fn(&mut [f64], &[f64], &[f64]),
{
    fn dim(&self) -> usize {
        self.dim
    }

    fn outer_stage_len(&self) -> usize {
        self.outer_width
    }

    fn inner_stage_len(&self) -> usize {
        self.inner_width
    }

    fn stage_outer(&self, batch: usize, outer_index: usize, dst: &mut [f64]) {
        let start = (batch * self.n_outer + outer_index) * self.outer_width;
        dst[..self.outer_width].copy_from_slice(&self.outer[start..start + self.outer_width]);
    }

    fn stage_inner(&self, batch: usize, inner_index: usize, dst: &mut [f64]) {
        let start = (batch * self.n_inner + inner_index) * self.inner_width;
        dst[..self.inner_width].copy_from_slice(&self.inner[start..start + self.inner_width]);
    }

    #[inline(always)]
    fn eval(&self, out: &mut [f64], outer: &[f64], inner: &[f64], _scratch: &mut [f64]) {
        (self.func)(out, outer, inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_respects_batches() {
        let outer = [1.0, 2.0, 3.0, 4.0];
        let inner = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0];
        let formula = ClosureFormula::new(1, &outer, 1, 2, &inner, 1, 3, |out, x, y| {
            out[0] = x[0] * y[0]
        })
        .unwrap();
        assert_eq!(formula.n_batches(), 2);

        let mut x = [0.0];
        let mut y = [0.0];
        formula.stage_outer(1, 0, &mut x);
        formula.stage_inner(1, 2, &mut y);
        assert_eq!((x[0], y[0]), (3.0, 60.0));

        let mut out = [0.0];
        formula.eval(&mut out, &x, &y, &mut []);
        assert_eq!(out[0], 180.0);
    }

    #[test]
    fn mismatched_lengths() {
        let f = |out: &mut [f64], _: &[f64], _: &[f64]| out[0] = 0.0;
        assert!(ClosureFormula::new(1, &[1.0, 2.0, 3.0], 2, 1, &[1.0], 1, 1, f).is_err());
        assert!(ClosureFormula::new(0, &[1.0], 1, 1, &[1.0], 1, 1, f).is_err());
        // 2 batches of outer data vs 1 batch of inner data
        assert!(ClosureFormula::new(1, &[1.0, 2.0], 1, 1, &[1.0], 1, 1, f).is_err());
    }
}
