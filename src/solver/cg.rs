//! Conjugate-gradient minimizer for SPD systems given through application.
//!
//! Solves `Q x = b` where `Q` is only available as a closure, e.g.
//! `Q(x) = Ht(H(x)) + data_smoothing * x`. The caller supplies the initial
//! guess (the zero grid yields the least-norm solution) and the iteration
//! budget; the outcome reports whether the relative-residual criterion was
//! met, so a truncated solve is never mistaken for a converged one.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::grid::Grid;
use log::debug;

/// Stopping controls for the conjugate-gradient solve.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CgOptions {
    /// Relative residual target: stop once `||r|| <= tol * ||b||`.
    pub tol: f64,
    /// Hard cap on CG iterations.
    pub max_iterations: usize,
}

impl Default for CgOptions {
    fn default() -> Self {
        Self {
            tol: 1e-8,
            max_iterations: 200,
        }
    }
}

/// Result of one CG solve.
#[derive(Debug)]
pub struct CgOutcome {
    pub x: Grid,
    pub iterations: usize,
    pub residual_norm: f64,
    pub converged: bool,
}

/// Minimize `0.5 x'Qx - b'x` for symmetric positive-definite `Q`.
pub fn quadratic_min_cg<Q>(q: Q, b: &Grid, x0: &Grid, opts: &CgOptions) -> Result<CgOutcome>
where
    Q: Fn(&Grid) -> Result<Grid>,
{
    let mut x = x0.clone();

    // r = b - Q x
    let qx = q(&x)?;
    let mut r = b.clone();
    r.sub_assign_grid(&qx)?;
    let mut p = r.clone();

    let mut rs_old = r.dot(&r)?;
    let b_norm = b.norm_sq().sqrt();
    let target = opts.tol * b_norm;
    let mut converged = rs_old.sqrt() <= target;
    let mut iterations = 0;

    while !converged && iterations < opts.max_iterations {
        let ap = q(&p)?;
        let pap = p.dot(&ap)?;
        if pap.abs() < 1e-20 {
            // Search direction annihilated by Q; nothing further to gain.
            break;
        }
        let alpha = rs_old / pap;
        x.axpy(alpha, &p)?;
        r.axpy(-alpha, &ap)?;

        let rs_new = r.dot(&r)?;
        iterations += 1;
        if rs_new.sqrt() <= target {
            converged = true;
            rs_old = rs_new;
            break;
        }

        let beta = rs_new / rs_old;
        p.scale(beta);
        p.add_assign_grid(&r)?;
        rs_old = rs_new;
    }

    let residual_norm = rs_old.sqrt();
    debug!(
        "cg: iterations={} residual={:.3e} converged={}",
        iterations, residual_norm, converged
    );
    Ok(CgOutcome {
        x,
        iterations,
        residual_norm,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_system_is_immediate() {
        let b = Grid::from_vec(&[3], vec![1.0, 2.0, 3.0]).unwrap();
        let x0 = Grid::zeros(&[3]).unwrap();
        let out = quadratic_min_cg(|v: &Grid| Ok(v.clone()), &b, &x0, &CgOptions::default())
            .unwrap();
        assert!(out.converged);
        for (xi, bi) in out.x.data().iter().zip(b.data()) {
            assert!((xi - bi).abs() < 1e-8);
        }
    }

    #[test]
    fn diagonal_system_solves_exactly() {
        let diag = [2.0, 3.0, 4.0];
        let b = Grid::from_vec(&[3], vec![2.0, 6.0, 12.0]).unwrap();
        let x0 = Grid::zeros(&[3]).unwrap();
        let out = quadratic_min_cg(
            |v: &Grid| {
                let mut out = v.clone();
                for (o, d) in out.data_mut().iter_mut().zip(diag) {
                    *o *= d;
                }
                Ok(out)
            },
            &b,
            &x0,
            &CgOptions::default(),
        )
        .unwrap();
        assert!(out.converged);
        let expected = [1.0, 2.0, 3.0];
        for (xi, ei) in out.x.data().iter().zip(expected) {
            assert!((xi - ei).abs() < 1e-8, "expected {ei}, got {xi}");
        }
    }

    #[test]
    fn budget_exhaustion_is_reported() {
        // An ill-conditioned diagonal with a one-iteration budget cannot
        // reach the tolerance; the outcome must say so.
        let diag: Vec<f64> = (1..=32).map(|i| i as f64 * i as f64).collect();
        let b = Grid::from_vec(&[32], vec![1.0; 32]).unwrap();
        let x0 = Grid::zeros(&[32]).unwrap();
        let out = quadratic_min_cg(
            |v: &Grid| {
                let mut out = v.clone();
                for (o, d) in out.data_mut().iter_mut().zip(&diag) {
                    *o *= d;
                }
                Ok(out)
            },
            &b,
            &x0,
            &CgOptions {
                tol: 1e-12,
                max_iterations: 1,
            },
        )
        .unwrap();
        assert!(!out.converged);
        assert_eq!(out.iterations, 1);
        assert!(out.residual_norm > 0.0);
    }
}
