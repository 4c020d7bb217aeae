// do we have to use this to silence warnings?
#![allow(dead_code)]

// the reason this is named mod.rs has to do with some complexities of how
// testing is handled
//
// we are following the advice of the rust book
// https://doc.rust-lang.org/book/ch11-03-test-organization.html#submodules-in-integration-tests

use ndarray::Array2;
use pairreduce::{Category, Expr, Var};
use rand::distr::{Distribution, Uniform};
use rand_xoshiro::Xoshiro256PlusPlus;
use rand_xoshiro::rand_core::SeedableRng;

// based on numpy!
// https://numpy.org/doc/stable/reference/generated/numpy.isclose.html
pub fn isclose(actual: f64, ref_val: f64, rtol: f64, atol: f64) -> bool {
    let actual_nan = actual.is_nan();
    let ref_nan = ref_val.is_nan();
    if actual_nan || ref_nan {
        actual_nan && ref_nan
    } else {
        (actual - ref_val).abs() <= (atol + rtol * ref_val.abs())
    }
}

pub fn assert_allclose(actual: &Array2<f64>, expected: &Array2<f64>, rtol: f64, atol: f64) {
    assert_eq!(actual.dim(), expected.dim(), "the shapes differ");
    for ((idx, a), e) in actual.indexed_iter().zip(expected.iter()) {
        assert!(
            isclose(*a, *e, rtol, atol),
            "mismatch at {idx:?}: actual = {a}, expected = {e}"
        );
    }
}

/// an array of uniformly distributed values in `[lo, hi)`
pub fn random_array(seed: u64, shape: (usize, usize), lo: f64, hi: f64) -> Array2<f64> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let dist = Uniform::try_from(lo..hi).unwrap();
    Array2::from_shape_simple_fn(shape, || dist.sample(&mut rng))
}

/// an array of small integers (stored as f64) in `[lo, hi]`.
///
/// Sums & products of these values are exact, which makes it easy to compare
/// against a brute force calculation & provokes plenty of ties.
pub fn random_int_array(seed: u64, shape: (usize, usize), lo: i64, hi: i64) -> Array2<f64> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let dist = Uniform::try_from(lo..=hi).unwrap();
    Array2::from_shape_simple_fn(shape, || dist.sample(&mut rng) as f64)
}

pub fn x_var(id: usize, dim: usize) -> Var {
    Var::new(id, dim, Category::I).unwrap()
}

pub fn y_var(id: usize, dim: usize) -> Var {
    Var::new(id, dim, Category::J).unwrap()
}

/// `|x_i - y_j|²` for `x = x0` and `y = y1`
pub fn sq_dist_formula(dim: usize) -> Expr {
    Expr::var(x_var(0, dim))
        .sq_dist(&Expr::var(y_var(1, dim)))
        .unwrap()
}

/// `exp(-|x_i - y_j|²) * b_j` for `x = x0`, `y = y1` and `b = y2`
pub fn gaussian_kernel_formula(dim: usize, b_dim: usize) -> Expr {
    sq_dist_formula(dim)
        .neg()
        .exp()
        .mul(&Expr::var(y_var(2, b_dim)))
        .unwrap()
}
