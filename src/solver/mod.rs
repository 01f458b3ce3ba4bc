//! Deconvolution solvers and their shared configuration surface.
//!
//! Three orchestrators sit on top of the regularizer and the CG minimizer:
//!
//! - [`dual::DualSolver`] — dual decomposition with per-axis chain
//!   subproblems coupled by Lagrange-multiplier grids.
//! - [`primal::PrimalSolver`] — graduated non-convexity: a schedule of
//!   annealed edge potentials, each round solved by the dual solver and
//!   seeding the next.
//! - [`bp::ConvexBpSolver`] — min-marginal message passing on modified
//!   unary costs.
//!
//! All three report progress once per outer iteration through a synchronous
//! callback, honor a [`CancelToken`] at iteration boundaries, and return a
//! [`SolveOutcome`] whose report distinguishes convergence from budget
//! exhaustion.

pub mod bp;
pub mod cg;
pub mod dual;
pub mod primal;

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{DeconvolveError, Result};
use crate::grid::Grid;
use crate::operator::LinearOperator;
use crate::potential::EdgePotential;
use crate::regularizer::GridRegularizer;

pub use cg::{quadratic_min_cg, CgOptions, CgOutcome};

/// Closed set of solver variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Dual,
    Primal,
    Bp,
}

impl FromStr for Method {
    type Err = DeconvolveError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dual" => Ok(Method::Dual),
            "primal" => Ok(Method::Primal),
            "bp" => Ok(Method::Bp),
            other => Err(DeconvolveError::UnknownMethod(other.to_string())),
        }
    }
}

/// Solver configuration. Defaults are tuned for 8-bit-scale imagery with
/// 16 labels; see the demo config for a worked example.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DeconvolveParams {
    /// Cap on outer iterations of the dual/BP loops.
    pub max_iterations: usize,
    /// Tikhonov weight added to the data term: `Q = HtH + data_smoothing I`.
    pub data_smoothing: f64,
    /// Conjugate-gradient stopping controls for the data-term solves.
    pub cg: CgOptions,
    /// Dual ascent step scale (multiplied by the current smoothing).
    pub step_size: f64,
    /// Initial entropy temperature of the smoothed chain objective.
    pub smoothing_init: f64,
    /// Temperature floor for the continuation schedule.
    pub smoothing_min: f64,
    /// Multiplicative temperature decay applied at each resample.
    pub smoothing_decay: f64,
    /// Outer iterations between data re-solves and label resampling.
    pub resample_interval: usize,
    /// Initial label spacing handed to `sample_labels`.
    pub spacing_init: f64,
    /// Multiplicative spacing shrink applied at each resample.
    pub spacing_decay: f64,
    /// Spacing floor; bounds the attainable discretization error.
    pub spacing_min: f64,
    /// Relative duality-gap tolerance declaring convergence.
    pub gap_tolerance: f64,
    /// Annealing rounds of the primal solver (`alpha` sweeps 0..=1).
    pub num_anneal_iters: usize,
    /// Damping of the BP multiplier update, in `(0, 1]`.
    pub bp_damping: f64,
    /// BP converges when the largest multiplier update falls below this.
    pub bp_tolerance: f64,
}

impl Default for DeconvolveParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            data_smoothing: 0.01,
            cg: CgOptions::default(),
            step_size: 1.0,
            smoothing_init: 8.0,
            smoothing_min: 0.25,
            smoothing_decay: 0.5,
            resample_interval: 5,
            spacing_init: 16.0,
            spacing_decay: 0.5,
            spacing_min: 0.5,
            gap_tolerance: 1e-3,
            num_anneal_iters: 10,
            bp_damping: 0.5,
            bp_tolerance: 1e-3,
        }
    }
}

/// Seconds spent per phase, accumulated over one solve.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DeconvolveStats {
    /// Chain message passing.
    pub regularizer_time: f64,
    /// Data-term CG solves and operator applications.
    pub data_time: f64,
    /// Unary assembly and multiplier bookkeeping.
    pub unary_time: f64,
    /// Whole outer iterations, including callback time.
    pub iter_time: f64,
}

/// How a solve ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SolveStatus {
    /// Duality gap (or update norm) reached its tolerance.
    Converged,
    /// Iteration cap reached first.
    IterationLimit,
    /// The cancel token fired.
    Cancelled,
}

/// Summary of a finished solve.
#[derive(Clone, Debug, Serialize)]
pub struct SolveReport {
    pub status: SolveStatus,
    pub iterations: usize,
    pub dual: f64,
    pub primal: f64,
    pub gap: f64,
    pub smoothing: f64,
    pub stats: DeconvolveStats,
}

/// Final estimate plus the report describing how it was reached.
#[derive(Debug)]
pub struct SolveOutcome {
    pub estimate: Grid,
    pub report: SolveReport,
}

/// Per-iteration progress payload handed to the callback.
///
/// The callback runs synchronously on the solver's thread once per outer
/// iteration and should not block.
#[derive(Debug)]
pub struct IterationUpdate<'a> {
    pub iteration: usize,
    pub estimate: &'a Grid,
    pub dual: f64,
    pub primal_data: f64,
    pub primal_reg: f64,
    pub smoothing: f64,
}

/// Cooperative cancellation flag checked at outer-iteration boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// `||Hx - y||^2` — the primal data term.
pub(crate) fn data_energy(h: &dyn LinearOperator, x: &Grid, y: &Grid) -> Result<f64> {
    let mut resid = h.apply(x)?;
    resid.sub_assign_grid(y)?;
    Ok(resid.norm_sq())
}

/// Linearized per-label data costs around the current estimate:
/// `U[p, l] = nu[p] * (label(p, l) - x[p])` in canonical layout.
pub(crate) fn linearized_unaries<E: EdgePotential>(
    reg: &GridRegularizer<E>,
    nu: &Grid,
    x: &Grid,
) -> Result<Grid> {
    let nl = reg.num_labels();
    let mut unaries = Grid::zeros(&reg.multiplier_extents())?;
    let data = unaries.data_mut();
    // Canonical layout: point index varies slowest, label fastest.
    let mut coords = vec![0usize; x.rank()];
    let mut p = 0usize;
    loop {
        let nu_p = nu.data()[nu.offset_at(&coords)];
        let x_p = x.data()[x.offset_at(&coords)];
        for l in 0..nl {
            data[p * nl + l] = nu_p * (reg.label(p, l) - x_p);
        }
        p += 1;
        if !crate::grid::increment(&mut coords, x.extents()) {
            break;
        }
    }
    Ok(unaries)
}

/// Expectation decode: `x[p] = sum_l w[p, l] * label(p, l)` for a weight
/// grid in multiplier shape (weights assumed to sum to 1 per point).
pub(crate) fn expectation_decode<E: EdgePotential>(
    reg: &GridRegularizer<E>,
    weights: &Grid,
    extents: &[usize],
) -> Result<Grid> {
    let nl = reg.num_labels();
    let mut x = Grid::zeros(extents)?;
    let mut coords = vec![0usize; extents.len()];
    let mut wcoords = vec![0usize; extents.len() + 1];
    let mut p = 0usize;
    loop {
        wcoords[..extents.len()].copy_from_slice(&coords);
        let mut acc = 0.0;
        for l in 0..nl {
            wcoords[extents.len()] = l;
            acc += weights.data()[weights.offset_at(&wcoords)] * reg.label(p, l);
        }
        let off = x.offset_at(&coords);
        x.data_mut()[off] = acc;
        p += 1;
        if !crate::grid::increment(&mut coords, extents) {
            break;
        }
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_round_trip() {
        assert_eq!("dual".parse::<Method>().unwrap(), Method::Dual);
        assert_eq!("primal".parse::<Method>().unwrap(), Method::Primal);
        assert_eq!("bp".parse::<Method>().unwrap(), Method::Bp);
        assert!(matches!(
            "viterbi".parse::<Method>(),
            Err(DeconvolveError::UnknownMethod(_))
        ));
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
