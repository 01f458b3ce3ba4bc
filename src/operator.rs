//! Linear forward/adjoint operators applied polymorphically by the solvers.
//!
//! The data term only ever sees an operator through [`LinearOperator::apply`],
//! so solvers can be exercised against synthetic operators (identity, small
//! hand-checkable convolutions) without any FFT machinery. A matching
//! adjoint must satisfy `<Hx, y> == <x, Ht y>`; that contract is the
//! caller's responsibility and is not checked at runtime.

use crate::error::{DeconvolveError, Result};
use crate::grid::{increment, Grid};

/// Shape-preserving linear map on grids.
pub trait LinearOperator {
    fn apply(&self, x: &Grid) -> Result<Grid>;
}

/// The identity map; useful as a trivially self-adjoint test operator.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityOperator;

impl LinearOperator for IdentityOperator {
    fn apply(&self, x: &Grid) -> Result<Grid> {
        Ok(x.clone())
    }
}

/// Direct circular convolution with a centered kernel.
///
/// The kernel lives in a [`Grid`] whose index bases place its origin, e.g. a
/// `21x21` kernel reindexed to `[-10, -10]`. Boundaries wrap, so the
/// operator is exactly linear and, for kernels symmetric under negation of
/// every axis, self-adjoint.
#[derive(Clone, Debug)]
pub struct ConvolutionOperator {
    kernel: Grid,
}

impl ConvolutionOperator {
    pub fn new(kernel: Grid) -> Self {
        Self { kernel }
    }

    /// Normalized 2-D Gaussian kernel of radius `radius` (so `2r+1` taps per
    /// axis) and standard deviation `sigma`, centered at the origin.
    pub fn gaussian2d(radius: usize, sigma: f64) -> Result<Self> {
        let size = 2 * radius + 1;
        let mut kernel = Grid::zeros(&[size, size])?;
        let r = radius as isize;
        kernel.reindex(&[-r, -r])?;
        let mut sum = 0.0;
        for i in -r..=r {
            for j in -r..=r {
                let v = (-((i * i + j * j) as f64) / (2.0 * sigma * sigma)).exp();
                kernel.set(&[i, j], v);
                sum += v;
            }
        }
        kernel.scale(1.0 / sum);
        Ok(Self { kernel })
    }

    pub fn kernel(&self) -> &Grid {
        &self.kernel
    }

    /// Kernel mirrored through the origin; convolving with it applies the
    /// adjoint of `self`.
    pub fn adjoint(&self) -> Self {
        let extents = self.kernel.extents().to_vec();
        let bases = self.kernel.bases().to_vec();
        let mut flipped = self.kernel.zeros_like();
        let new_bases: Vec<isize> = extents
            .iter()
            .zip(&bases)
            .map(|(&e, &b)| -(b + e as isize - 1))
            .collect();
        // zeros_like copies the old bases; move them before writing.
        flipped
            .reindex(&new_bases)
            .expect("rank unchanged by adjoint");
        let rank = extents.len();
        let mut coords = vec![0usize; rank];
        let mut idx = vec![0isize; rank];
        let mut neg = vec![0isize; rank];
        loop {
            for i in 0..rank {
                idx[i] = bases[i] + coords[i] as isize;
                neg[i] = -idx[i];
            }
            let v = self.kernel.get(&idx);
            flipped.set(&neg, v);
            if !increment(&mut coords, &extents) {
                break;
            }
        }
        Self { kernel: flipped }
    }
}

impl LinearOperator for ConvolutionOperator {
    fn apply(&self, x: &Grid) -> Result<Grid> {
        if self.kernel.rank() != x.rank() {
            return Err(DeconvolveError::ShapeMismatch {
                expected: x.extents().to_vec(),
                got: self.kernel.extents().to_vec(),
            });
        }
        let rank = x.rank();
        let extents = x.extents().to_vec();
        let mut out = x.zeros_like();

        let ker_extents = self.kernel.extents().to_vec();
        let ker_bases = self.kernel.bases().to_vec();
        let mut out_coords = vec![0usize; rank];
        let mut ker_coords = vec![0usize; rank];
        let mut ker_idx = vec![0isize; rank];
        let mut src = vec![0usize; rank];
        loop {
            let mut acc = 0.0;
            ker_coords.fill(0);
            loop {
                for i in 0..rank {
                    ker_idx[i] = ker_bases[i] + ker_coords[i] as isize;
                    let shifted = out_coords[i] as isize - ker_idx[i];
                    src[i] = shifted.rem_euclid(extents[i] as isize) as usize;
                }
                acc += self.kernel.get(&ker_idx) * x.data()[x.offset_at(&src)];
                if !increment(&mut ker_coords, &ker_extents) {
                    break;
                }
            }
            let off = out.offset_at(&out_coords);
            out.data_mut()[off] = acc;
            if !increment(&mut out_coords, &extents) {
                break;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_kernel() -> Grid {
        let mut k = Grid::zeros(&[3, 3]).unwrap();
        k.reindex(&[-1, -1]).unwrap();
        k.set(&[0, 0], 1.0);
        k
    }

    #[test]
    fn delta_kernel_is_identity() {
        let op = ConvolutionOperator::new(delta_kernel());
        let x = Grid::from_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let y = op.apply(&x).unwrap();
        assert_eq!(y.data(), x.data());
    }

    #[test]
    fn shift_kernel_wraps_circularly() {
        let mut k = Grid::zeros(&[3, 3]).unwrap();
        k.reindex(&[-1, -1]).unwrap();
        k.set(&[1, 0], 1.0); // shift down along axis 0
        let op = ConvolutionOperator::new(k);
        let x = Grid::from_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let y = op.apply(&x).unwrap();
        // Row 0 of the output picks up row 1 of the input and vice versa.
        assert_eq!(y.data(), &[3.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    fn gaussian_is_self_adjoint() {
        let op = ConvolutionOperator::gaussian2d(2, 1.0).unwrap();
        let x = Grid::from_vec(&[4, 4], (0..16).map(|i| i as f64).collect()).unwrap();
        let mut y = Grid::zeros(&[4, 4]).unwrap();
        for (i, v) in y.data_mut().iter_mut().enumerate() {
            *v = ((i * 7) % 5) as f64;
        }
        let hx = op.apply(&x).unwrap();
        let hty = op.adjoint().apply(&y).unwrap();
        let lhs = hx.dot(&y).unwrap();
        let rhs = x.dot(&hty).unwrap();
        assert!(
            (lhs - rhs).abs() < 1e-9,
            "adjoint identity violated: {lhs} vs {rhs}"
        );
    }

    #[test]
    fn rank_mismatch_rejected() {
        let op = ConvolutionOperator::new(delta_kernel());
        let x = Grid::zeros(&[4]).unwrap();
        assert!(op.apply(&x).is_err());
    }
}
