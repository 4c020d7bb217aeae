use ndarray::Array2;
use pairreduce::{
    HostDevice, PairInputs, ReductionAxis, ReductionBuilder, RuntimeSpec, reduce_dense, status,
    status_of,
};
use std::sync::Arc;

mod common;

use common::{gaussian_kernel_formula, random_array};

#[test]
fn device_matches_serial() {
    let (nx, ny, dim) = (40, 60, 3);
    let x = random_array(200, (nx, dim), -1.0, 1.0);
    let y = random_array(201, (ny, dim), -1.0, 1.0);
    let b = random_array(202, (ny, 1), 0.0, 1.0);
    let inputs = PairInputs::new(nx, ny)
        .with(0, x.view())
        .with(1, y.view())
        .with(2, b.view());
    let reduction = ReductionBuilder::new()
        .reduction("Sum")
        .axis(ReductionAxis::OverJ)
        .formula(gaussian_kernel_formula(dim, 1))
        .build()
        .unwrap();

    let mut reference = Array2::<f64>::zeros((nx, 1));
    reduce_dense(
        &reduction,
        &inputs,
        &mut reference.view_mut(),
        &RuntimeSpec::serial(),
    )
    .unwrap();

    let device = Arc::new(HostDevice::new());
    let mut out = Array2::<f64>::zeros((nx, 1));
    reduce_dense(
        &reduction,
        &inputs,
        &mut out.view_mut(),
        &RuntimeSpec::device(device.clone()),
    )
    .unwrap();
    assert_eq!(out, reference);
    // every buffer was released
    assert_eq!(device.n_buffers(), 0);
    assert_eq!(device.used_bytes(), 0);
}

#[test]
fn device_budget_exhausted() {
    let (nx, ny, dim) = (100, 10, 2);
    let x = random_array(203, (nx, dim), -1.0, 1.0);
    let y = random_array(204, (ny, dim), -1.0, 1.0);
    let b = random_array(205, (ny, 1), 0.0, 1.0);
    let inputs = PairInputs::new(nx, ny)
        .with(0, x.view())
        .with(1, y.view())
        .with(2, b.view());
    let reduction = ReductionBuilder::new()
        .reduction("Sum")
        .formula(gaussian_kernel_formula(dim, 1))
        .build()
        .unwrap();

    // the output buffer alone needs 800 bytes
    let device = Arc::new(HostDevice::new().with_budget(512));
    let mut out = Array2::<f64>::from_elem((nx, 1), -1.0);
    let result = reduce_dense(
        &reduction,
        &inputs,
        &mut out.view_mut(),
        &RuntimeSpec::device(device.clone()),
    );
    assert_eq!(status_of(&result), status::RESOURCE);
    assert!(out.iter().all(|v| *v == -1.0));
    assert_eq!(device.n_buffers(), 0);
}

#[test]
fn unsupported_widths() {
    let (nx, ny, dim) = (4, 4, 5);
    let x = random_array(206, (nx, dim), -1.0, 1.0);
    let y = random_array(207, (ny, dim), -1.0, 1.0);
    let b = random_array(208, (ny, 1), 0.0, 1.0);
    let inputs = PairInputs::new(nx, ny)
        .with(0, x.view())
        .with(1, y.view())
        .with(2, b.view());
    let reduction = ReductionBuilder::new()
        .reduction("Sum")
        .formula(gaussian_kernel_formula(dim, 1))
        .build()
        .unwrap();

    let device = Arc::new(HostDevice::new().with_supported_widths(vec![1, 2, 3, 4]));
    let mut out = Array2::<f64>::zeros((nx, 1));
    let result = reduce_dense(
        &reduction,
        &inputs,
        &mut out.view_mut(),
        &RuntimeSpec::device(device),
    );
    assert_eq!(status_of(&result), status::UNSUPPORTED_SHAPE);
}
