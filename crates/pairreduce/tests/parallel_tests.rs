use ndarray::Array2;
use pairreduce::{
    ExecParams, Expr, GenericReduction, PairInputs, Ranges, ReductionAxis, ReductionBuilder,
    RuntimeSpec, reduce_dense, reduce_ranged,
};
use std::num::NonZeroUsize;

mod common;

use common::{gaussian_kernel_formula, random_array, sq_dist_formula};

fn params(rows_per_team: usize, tile_len: usize, inner_splits: usize) -> ExecParams {
    ExecParams {
        rows_per_team: NonZeroUsize::new(rows_per_team).unwrap(),
        tile_len: NonZeroUsize::new(tile_len).unwrap(),
        inner_splits: NonZeroUsize::new(inner_splits).unwrap(),
        tile_bytes: None,
    }
}

fn build(name: &str, k: Option<usize>, formula: Expr) -> GenericReduction {
    let mut builder = ReductionBuilder::new()
        .reduction(name)
        .axis(ReductionAxis::OverJ)
        .formula(formula);
    if let Some(k) = k {
        builder = builder.k(k);
    }
    builder.build().unwrap()
}

fn run(
    reduction: &GenericReduction,
    inputs: &PairInputs,
    ranges: Option<&Ranges>,
    runtime: &RuntimeSpec,
) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros(reduction.output_shape(inputs).unwrap());
    let result = match ranges {
        Some(ranges) => reduce_ranged(reduction, inputs, ranges, &mut out.view_mut(), runtime),
        None => reduce_dense(reduction, inputs, &mut out.view_mut(), runtime),
    };
    result.unwrap();
    out
}

#[test]
fn thread_pool_matches_serial_bitwise() {
    let (n_batches, nx, ny, dim) = (2, 131, 77, 3);
    let x = random_array(100, (n_batches * nx, dim), -1.0, 1.0);
    let y = random_array(101, (n_batches * ny, dim), -1.0, 1.0);
    let b = random_array(102, (n_batches * ny, 2), 0.0, 1.0);
    let inputs = PairInputs::new(nx, ny)
        .with_batched(0, &[n_batches], x.view())
        .with_batched(1, &[n_batches], y.view())
        .with_batched(2, &[n_batches], b.view());
    let ranges =
        Ranges::from_blocks(&[[0, 40, 0, 30], [0, 40, 50, 77], [60, 131, 10, 20]]).unwrap();

    let reductions = [
        build("Sum", None, gaussian_kernel_formula(dim, 2)),
        build("LogSumExp", None, sq_dist_formula(dim).neg()),
        build("KMinArgKMin", Some(5), sq_dist_formula(dim)),
        build(
            "SumSoftMaxWeight",
            None,
            // the exponent is -|x - y|², the weighted vector is -[2, 3]|x - y|²
            sq_dist_formula(dim)
                .neg()
                .mul(&Expr::constant(vec![1.0, 2.0, 3.0]).unwrap())
                .unwrap(),
        ),
    ];

    let pool_runtime = RuntimeSpec::thread_pool(4).unwrap();
    for exec_params in [
        ExecParams::default(),
        params(1, 1, 1),
        params(7, 16, 1),
        params(16, 5, 3),
    ] {
        let serial = RuntimeSpec::serial().with_params(exec_params.clone());
        let threaded = pool_runtime.clone().with_params(exec_params.clone());
        for reduction in &reductions {
            for ranges in [None, Some(&ranges)] {
                let reference = run(reduction, &inputs, ranges, &serial);
                let actual = run(reduction, &inputs, ranges, &threaded);
                assert_eq!(
                    actual,
                    reference,
                    "{} with {exec_params:?} (ranged = {})",
                    reduction.name(),
                    ranges.is_some()
                );
            }
        }
    }
}

#[test]
fn decomposition_preserves_order_statistics() {
    // order statistics don't depend on the decomposition at all
    let (nx, ny, dim) = (50, 203, 2);
    let x = random_array(103, (nx, dim), -1.0, 1.0);
    let y = random_array(104, (ny, dim), -1.0, 1.0);
    let inputs = PairInputs::new(nx, ny).with(0, x.view()).with(1, y.view());
    let reduction = build("KMinArgKMin", Some(3), sq_dist_formula(dim));

    let reference = run(&reduction, &inputs, None, &RuntimeSpec::serial());
    for exec_params in [params(1, 1, 1), params(3, 7, 4), params(64, 1000, 9)] {
        let runtime = RuntimeSpec::thread_pool(3)
            .unwrap()
            .with_params(exec_params);
        assert_eq!(run(&reduction, &inputs, None, &runtime), reference);
    }
}

#[test]
fn more_threads_than_blocks() {
    let x = random_array(105, (3, 1), -1.0, 1.0);
    let y = random_array(106, (5, 1), -1.0, 1.0);
    let inputs = PairInputs::new(3, 5).with(0, x.view()).with(1, y.view());
    let reduction = build("Sum", None, sq_dist_formula(1));
    let reference = run(&reduction, &inputs, None, &RuntimeSpec::serial());
    let runtime = RuntimeSpec::thread_pool(8).unwrap();
    assert_eq!(run(&reduction, &inputs, None, &runtime), reference);
}
