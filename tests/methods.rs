mod common;

use common::synthetic::{mean_abs_error, smooth_blob};
use deconvolver::prelude::*;
use deconvolver::DeconvolveError;

#[test]
fn annealed_solver_runs_full_schedule() {
    let _ = env_logger::builder().is_test(true).try_init();
    let truth = smooth_blob(10, 10);
    let blur = ConvolutionOperator::gaussian2d(1, 0.8).unwrap();
    let observed = blur.apply(&truth).unwrap();

    let anneal = AnnealConfig {
        num_labels: 8,
        label_scale: 255.0 / 7.0,
        smooth: SmoothEdge {
            weight: 20.0,
            width: 9.0,
        },
    };
    let params = DeconvolveParams {
        max_iterations: 10,
        num_anneal_iters: 3,
        ..Default::default()
    };
    let solver = PrimalSolver::new(params);
    let out = solver
        .solve(&observed, &blur, &blur, &anneal, &mut |_u| {})
        .unwrap();

    let mae = mean_abs_error(&out.estimate, &truth);
    assert!(mae < 8.0, "annealed estimate off the mark: mae={mae:.3}");
    assert!(out.estimate.data().iter().all(|v| v.is_finite()));
}

#[test]
fn bp_solver_improves_on_blurred_input() {
    let truth = smooth_blob(10, 10);
    let blur = ConvolutionOperator::gaussian2d(2, 1.2).unwrap();
    let observed = blur.apply(&truth).unwrap();

    let edge = SmoothEdge {
        weight: 5.0,
        width: 9.0,
    };
    let mut reg = GridRegularizer::new(truth.extents(), 16, 255.0 / 15.0, edge).unwrap();
    let params = DeconvolveParams {
        max_iterations: 20,
        ..Default::default()
    };
    let solver = ConvexBpSolver::new(params);
    let out = solver
        .solve(&observed, &blur, &blur, &mut reg, &mut |_u| {})
        .unwrap();

    let before = mean_abs_error(&observed, &truth);
    let after = mean_abs_error(&out.estimate, &truth);
    assert!(
        after < before,
        "deconvolution should beat the blurred input: {after:.3} vs {before:.3}"
    );
}

#[test]
fn unknown_method_is_rejected() {
    let err = "gibbs".parse::<Method>().unwrap_err();
    assert!(matches!(err, DeconvolveError::UnknownMethod(name) if name == "gibbs"));
}

#[test]
fn cancellation_propagates_through_annealing() {
    let truth = smooth_blob(6, 6);
    let h = IdentityOperator;
    let anneal = AnnealConfig {
        num_labels: 8,
        label_scale: 255.0 / 7.0,
        smooth: SmoothEdge {
            weight: 10.0,
            width: 9.0,
        },
    };
    let cancel = CancelToken::new();
    cancel.cancel();
    let solver = PrimalSolver::with_cancel(DeconvolveParams::default(), cancel);
    let out = solver.solve(&truth, &h, &h, &anneal, &mut |_u| {}).unwrap();
    assert_eq!(out.report.status, SolveStatus::Cancelled);
}
