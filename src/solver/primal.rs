//! Primal solver with edge-potential annealing.
//!
//! Runs `num_anneal_iters + 1` rounds of the dual-decomposition solve under
//! a convex combination of the smooth truncated potential and a quadratic
//! one, sweeping the mixing weight from 0 to 1 so the effective
//! non-convexity decreases round over round. Each round's solution seeds
//! the next, the usual continuation guard against poor local minima.

use log::debug;

use crate::error::Result;
use crate::grid::Grid;
use crate::operator::LinearOperator;
use crate::potential::{AnnealedEdge, L2Edge, SmoothEdge};
use crate::regularizer::GridRegularizer;

use super::dual::DualSolver;
use super::{CancelToken, DeconvolveParams, IterationUpdate, SolveOutcome, SolveStatus};

/// Discretization and potential parameters shared by every annealing round.
#[derive(Clone, Copy, Debug)]
pub struct AnnealConfig {
    pub num_labels: usize,
    pub label_scale: f64,
    pub smooth: SmoothEdge,
}

/// Annealed (graduated non-convexity) solver.
#[derive(Clone, Debug, Default)]
pub struct PrimalSolver {
    pub params: DeconvolveParams,
    pub cancel: CancelToken,
}

impl PrimalSolver {
    pub fn new(params: DeconvolveParams) -> Self {
        Self {
            params,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(params: DeconvolveParams, cancel: CancelToken) -> Self {
        Self { params, cancel }
    }

    /// Run the full annealing schedule, seeding round `i + 1` with round
    /// `i`'s estimate. The observation itself seeds round 0.
    pub fn solve(
        &self,
        y: &Grid,
        h: &dyn LinearOperator,
        ht: &dyn LinearOperator,
        config: &AnnealConfig,
        progress: &mut dyn FnMut(&IterationUpdate),
    ) -> Result<SolveOutcome> {
        let rounds = self.params.num_anneal_iters;
        let quadratic = L2Edge {
            weight: 1.0 / config.smooth.width,
        };
        let inner = DualSolver::with_cancel(self.params.clone(), self.cancel.clone());

        let mut seed = y.clone();
        let mut outcome: Option<SolveOutcome> = None;
        let mut total_iterations = 0;

        for round in 0..=rounds {
            let alpha = if rounds == 0 {
                1.0
            } else {
                round as f64 / rounds as f64
            };
            let edge = AnnealedEdge {
                a: config.smooth,
                b: quadratic,
                alpha,
            };
            let mut reg =
                GridRegularizer::new(y.extents(), config.num_labels, config.label_scale, edge)?;
            debug!("primal: annealing round {}/{} alpha={:.2}", round, rounds, alpha);

            let out = inner.solve_seeded(y, h, ht, &mut reg, &seed, progress)?;
            total_iterations += out.report.iterations;
            seed = out.estimate.clone();
            let cancelled = out.report.status == SolveStatus::Cancelled;
            outcome = Some(out);
            if cancelled {
                break;
            }
        }

        // rounds >= 0 guarantees at least one dual solve ran.
        let mut out = outcome.expect("at least one annealing round");
        out.report.iterations = total_iterations;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::IdentityOperator;

    #[test]
    fn annealing_rounds_chain_estimates() {
        let y = Grid::from_vec(&[4, 4], (0..16).map(|i| 30.0 + 9.0 * i as f64).collect())
            .unwrap();
        let h = IdentityOperator;
        let anneal = AnnealConfig {
            num_labels: 8,
            label_scale: 255.0 / 7.0,
            smooth: SmoothEdge {
                weight: 10.0,
                width: 9.0,
            },
        };
        let params = DeconvolveParams {
            max_iterations: 6,
            num_anneal_iters: 2,
            ..Default::default()
        };
        let solver = PrimalSolver::new(params);
        let out = solver.solve(&y, &h, &h, &anneal, &mut |_u| {}).unwrap();
        assert!(out.report.iterations >= 3, "every round must iterate");
        assert!(out.estimate.data().iter().all(|v| v.is_finite()));
    }
}
