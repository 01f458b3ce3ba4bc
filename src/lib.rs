#![doc = include_str!("../README.md")]

// Core numeric modules.
pub mod error;
pub mod grid;
pub mod operator;
pub mod potential;
pub mod regularizer;
pub mod solver;

// Demo-facing helpers (config + grayscale I/O); the numeric core above
// never touches the filesystem.
pub mod config;
pub mod io;

// --- High-level re-exports -------------------------------------------------

pub use crate::error::DeconvolveError;
pub use crate::grid::Grid;
pub use crate::operator::{ConvolutionOperator, IdentityOperator, LinearOperator};
pub use crate::potential::{AnnealedEdge, EdgePotential, L2Edge, SmoothEdge};
pub use crate::regularizer::GridRegularizer;
pub use crate::solver::{
    CancelToken, DeconvolveParams, DeconvolveStats, IterationUpdate, Method, SolveOutcome,
    SolveReport, SolveStatus,
};

// --- Prelude ---------------------------------------------------------------

/// Small prelude for quick experiments.
///
/// ```no_run
/// use deconvolver::prelude::*;
///
/// # fn main() -> Result<(), deconvolver::DeconvolveError> {
/// let y = Grid::zeros(&[32, 32])?;
/// let h = IdentityOperator;
/// let edge = SmoothEdge { weight: 50.0, width: 9.0 };
/// let mut reg = GridRegularizer::new(&[32, 32], 16, 255.0 / 15.0, edge)?;
/// let solver = DualSolver::new(DeconvolveParams::default());
/// let out = solver.solve(&y, &h, &h, &mut reg, &mut |_u| {})?;
/// println!("{:?}", out.report.status);
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    pub use crate::grid::Grid;
    pub use crate::operator::{ConvolutionOperator, IdentityOperator, LinearOperator};
    pub use crate::potential::{AnnealedEdge, EdgePotential, L2Edge, SmoothEdge};
    pub use crate::regularizer::GridRegularizer;
    pub use crate::solver::bp::ConvexBpSolver;
    pub use crate::solver::dual::DualSolver;
    pub use crate::solver::primal::{AnnealConfig, PrimalSolver};
    pub use crate::solver::{CancelToken, DeconvolveParams, IterationUpdate, Method, SolveStatus};
}
