mod common;

use common::synthetic::{mean_abs_error, smooth_blob};
use deconvolver::prelude::*;
use deconvolver::solver::{quadratic_min_cg, CgOptions};

#[test]
fn blur_then_deconvolve_recovers_grid() {
    let _ = env_logger::builder().is_test(true).try_init();
    let truth = smooth_blob(12, 12);
    let blur = ConvolutionOperator::gaussian2d(2, 1.0).unwrap();
    // Zero noise: the observation is exactly the blurred truth.
    let observed = blur.apply(&truth).unwrap();

    let edge = SmoothEdge {
        weight: 5.0,
        width: 9.0,
    };
    let mut reg = GridRegularizer::new(truth.extents(), 16, 255.0 / 15.0, edge).unwrap();
    let params = DeconvolveParams {
        max_iterations: 60,
        spacing_min: 0.25,
        ..Default::default()
    };
    let solver = DualSolver::new(params);
    let out = solver
        .solve(&observed, &blur, &blur, &mut reg, &mut |_u| {})
        .unwrap();

    let mae = mean_abs_error(&out.estimate, &truth);
    assert!(
        mae < 1.0,
        "recovered grid deviates from the original: mae={mae:.3}"
    );
}

#[test]
fn zero_regularizer_weight_reduces_to_least_squares() {
    let _ = env_logger::builder().is_test(true).try_init();
    let truth = smooth_blob(10, 10);
    let blur = ConvolutionOperator::gaussian2d(2, 1.2).unwrap();
    let observed = blur.apply(&truth).unwrap();

    let params = DeconvolveParams {
        max_iterations: 30,
        ..Default::default()
    };

    // Direct damped least-squares solution of (HtH + eps I) x = Ht y.
    let adjoint = blur.adjoint();
    let b = adjoint.apply(&observed).unwrap();
    let eps = params.data_smoothing;
    let q = |v: &Grid| -> Result<Grid, deconvolver::DeconvolveError> {
        let mut qv = adjoint.apply(&blur.apply(v)?)?;
        qv.axpy(eps, v)?;
        Ok(qv)
    };
    let direct = quadratic_min_cg(q, &b, &observed.zeros_like(), &CgOptions::default()).unwrap();
    assert!(direct.converged, "direct CG solve must converge");

    // A zero-weight potential leaves only the data term.
    let edge = L2Edge { weight: 0.0 };
    let mut reg = GridRegularizer::new(truth.extents(), 16, 255.0 / 15.0, edge).unwrap();
    let solver = DualSolver::new(params);
    let out = solver
        .solve(&observed, &blur, &blur, &mut reg, &mut |_u| {})
        .unwrap();

    let mae = mean_abs_error(&out.estimate, &direct.x);
    assert!(
        mae < 1.0,
        "zero-weight solve should match the least-squares fit: mae={mae:.3}"
    );
}

#[test]
fn progress_reports_monotone_smoothing() {
    let truth = smooth_blob(8, 8);
    let h = IdentityOperator;
    let edge = SmoothEdge {
        weight: 10.0,
        width: 9.0,
    };
    let mut reg = GridRegularizer::new(truth.extents(), 8, 255.0 / 7.0, edge).unwrap();
    let params = DeconvolveParams {
        max_iterations: 12,
        gap_tolerance: 0.0,
        ..Default::default()
    };
    let mut temps = Vec::new();
    let solver = DualSolver::new(params);
    solver
        .solve(&truth, &h, &h, &mut reg, &mut |u| temps.push(u.smoothing))
        .unwrap();
    assert_eq!(temps.len(), 12);
    for pair in temps.windows(2) {
        assert!(
            pair[1] <= pair[0],
            "smoothing must never increase: {:?}",
            pair
        );
    }
}
