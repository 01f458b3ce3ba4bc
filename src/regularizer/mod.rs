//! Pairwise grid regularizer decomposed into per-axis chain subproblems.
//!
//! For a rank-D grid, the pairwise energy along axis `s` splits into
//! `prod(extents) / extents[s]` independent 1-D chains. Each chain carries
//! `num_labels` candidate label values per position, stored in a label table
//! that [`GridRegularizer::sample_labels`] re-centers around the current
//! continuous estimate (graduated discretization: every outer iteration
//! narrows the label window instead of fixing one global set).
//!
//! [`GridRegularizer::evaluate`] computes the smoothed (entropy-regularized)
//! dual objective of one axis and its gradient with respect to the
//! multiplier grid; as `smoothing -> 0` it approaches the exact chain
//! minimum computed by [`GridRegularizer::min_marginals`]. The smoothing
//! keeps the summed per-axis objectives differentiable, which dual ascent
//! needs to push the axes toward label consensus.
//!
//! Chains are mutually independent; with the `parallel` feature enabled the
//! per-chain work fans out over rayon and the results are scattered back
//! serially, keeping the output identical to the serial path.

mod chain;

use crate::error::{DeconvolveError, Result};
use crate::grid::Grid;
use crate::potential::EdgePotential;
use chain::ChainBuffers;
use log::debug;

/// Pairwise regularizer over a label grid.
#[derive(Clone, Debug)]
pub struct GridRegularizer<E> {
    extents: Vec<usize>,
    num_labels: usize,
    label_scale: f64,
    edge: E,
    labels: Vec<f64>,
}

impl<E: EdgePotential> GridRegularizer<E> {
    /// Regularizer over a grid of the given extents with `num_labels`
    /// candidate values per point spanning `[0, num_labels * label_scale]`.
    pub fn new(extents: &[usize], num_labels: usize, label_scale: f64, edge: E) -> Result<Self> {
        if extents.is_empty() || extents.len() > 3 {
            return Err(DeconvolveError::UnsupportedRank {
                rank: extents.len(),
                max: 3,
            });
        }
        if num_labels < 2 {
            return Err(DeconvolveError::InvalidParameter("num_labels must be >= 2"));
        }
        if label_scale <= 0.0 {
            return Err(DeconvolveError::InvalidParameter("label_scale must be > 0"));
        }
        Ok(Self {
            extents: extents.to_vec(),
            num_labels,
            label_scale,
            edge,
            labels: Vec::new(),
        })
    }

    #[inline]
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// One subproblem per grid axis.
    #[inline]
    pub fn num_subproblems(&self) -> usize {
        self.extents.len()
    }

    #[inline]
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    /// Upper end of the representable label range.
    #[inline]
    pub fn max_label(&self) -> f64 {
        self.num_labels as f64 * self.label_scale
    }

    /// Shape of a multiplier/unary grid: the point extents plus one
    /// trailing label axis.
    pub fn multiplier_extents(&self) -> Vec<usize> {
        let mut e = self.extents.clone();
        e.push(self.num_labels);
        e
    }

    /// Multiplier grid for subproblem `axis`, laid out with the label axis
    /// fastest and `axis` next, so one chain occupies contiguous storage.
    pub fn multiplier_grid(&self, axis: usize) -> Result<Grid> {
        let rank = self.extents.len();
        if axis >= rank {
            return Err(DeconvolveError::AxisOutOfRange { axis, rank });
        }
        let mut order = Vec::with_capacity(rank + 1);
        order.push(rank); // label axis
        order.push(axis);
        for a in (0..rank).rev() {
            if a != axis {
                order.push(a);
            }
        }
        Grid::zeros_with_order(&self.multiplier_extents(), &order)
    }

    /// Candidate label value `l` of grid point `p` (canonical row-major
    /// point index). Only valid after `sample_labels`.
    #[inline]
    pub fn label(&self, point: usize, l: usize) -> f64 {
        self.labels[point * self.num_labels + l]
    }

    /// Rebuild the label table around a continuous estimate: `num_labels`
    /// strictly increasing values per point with spacing `scale`, the
    /// window shifted (not clipped per label) to fit `[0, max_label]`.
    pub fn sample_labels(&mut self, x: &Grid, scale: f64) -> Result<()> {
        self.check_point_grid(x)?;
        if scale <= 0.0 {
            return Err(DeconvolveError::InvalidParameter("label spacing must be > 0"));
        }
        let nl = self.num_labels;
        let max_label = self.max_label();
        // Cap the spacing so the window always fits in the label range.
        let s = scale.min(max_label / (nl as f64 - 1.0));
        let lo_offset = ((nl as isize - 2) / 2) as f64;
        let n: usize = self.extents.iter().product();
        self.labels.resize(n * nl, 0.0);

        let canon = canonical_strides(&self.extents);
        let mut coords = vec![0usize; self.extents.len()];
        loop {
            let p = dot_coords(&coords, &canon);
            let val = x.data()[x.offset_at(&coords)];
            let base = (val - s * lo_offset).clamp(0.0, max_label - s * (nl as f64 - 1.0));
            for l in 0..nl {
                self.labels[p * nl + l] = base + s * l as f64;
            }
            if !crate::grid::increment(&mut coords, &self.extents) {
                break;
            }
        }
        Ok(())
    }

    /// Smoothed dual objective of subproblem `axis` and its gradient with
    /// respect to the multiplier grid.
    ///
    /// Per chain: a log-domain forward/backward pass at temperature
    /// `smoothing`, accumulating `-smoothing * logZ` into the objective and
    /// writing `-lambda_scale * marginal` into `gradient`. The gradient grid
    /// must share the multiplier grid's shape; its storage order is free.
    pub fn evaluate(
        &self,
        axis: usize,
        lambda: &Grid,
        smoothing: f64,
        lambda_scale: f64,
        gradient: &mut Grid,
    ) -> Result<f64> {
        let rank = self.extents.len();
        if axis >= rank {
            return Err(DeconvolveError::AxisOutOfRange { axis, rank });
        }
        if self.labels.is_empty() {
            return Err(DeconvolveError::LabelsNotSampled);
        }
        if smoothing <= 0.0 {
            return Err(DeconvolveError::InvalidParameter("smoothing must be > 0"));
        }
        let expected = self.multiplier_extents();
        for g in [&*lambda, &*gradient] {
            if g.extents() != expected.as_slice() {
                return Err(DeconvolveError::ShapeMismatch {
                    expected: expected.clone(),
                    got: g.extents().to_vec(),
                });
            }
        }

        let chains = self.chain_table(axis);
        let width = self.extents[axis];
        let nl = self.num_labels;
        debug!(
            "regularizer evaluate: axis={} chains={} width={} smoothing={:.4}",
            axis,
            chains.len(),
            width,
            smoothing
        );

        let results = self.run_chains(
            &chains,
            axis,
            |pts, lambda_slice, grad_slice, buf| {
                chain::evaluate_chain(
                    &self.edge,
                    &self.labels,
                    pts,
                    nl,
                    lambda_slice,
                    smoothing,
                    lambda_scale,
                    grad_slice,
                    buf,
                )
            },
            lambda,
        );

        let mut objective = 0.0;
        for (base, (chain_obj, grad_slice)) in chains.iter().zip(results) {
            objective += chain_obj;
            scatter_chain(gradient, base, axis, width, nl, &grad_slice);
        }
        Ok(objective)
    }

    /// Exact min-marginals of subproblem `axis` under per-point label
    /// costs `unaries` (same shape as a multiplier grid). Returns the
    /// min-marginal grid and the summed chain minima.
    pub fn min_marginals(&self, axis: usize, unaries: &Grid) -> Result<(Grid, f64)> {
        let rank = self.extents.len();
        if axis >= rank {
            return Err(DeconvolveError::AxisOutOfRange { axis, rank });
        }
        if self.labels.is_empty() {
            return Err(DeconvolveError::LabelsNotSampled);
        }
        let expected = self.multiplier_extents();
        if unaries.extents() != expected.as_slice() {
            return Err(DeconvolveError::ShapeMismatch {
                expected,
                got: unaries.extents().to_vec(),
            });
        }

        let chains = self.chain_table(axis);
        let width = self.extents[axis];
        let nl = self.num_labels;
        let mut out = unaries.zeros_like();

        let results = self.run_chains(
            &chains,
            axis,
            |pts, unary_slice, mm_slice, buf| {
                chain::min_sum_chain(&self.edge, &self.labels, pts, nl, unary_slice, mm_slice, buf)
            },
            unaries,
        );

        let mut objective = 0.0;
        for (base, (chain_min, mm_slice)) in chains.iter().zip(results) {
            objective += chain_min;
            scatter_chain(&mut out, base, axis, width, nl, &mm_slice);
        }
        Ok((out, objective))
    }

    /// Exact (unsmoothed) pairwise energy of a concrete assignment: the edge
    /// potential summed over every grid-adjacent pair along every axis.
    pub fn primal(&self, x: &Grid) -> Result<f64> {
        self.check_point_grid(x)?;
        let rank = self.extents.len();
        let mut objective = 0.0;
        let mut coords = vec![0usize; rank];
        for axis in 0..rank {
            let width = self.extents[axis];
            coords.fill(0);
            loop {
                for j in 0..width.saturating_sub(1) {
                    coords[axis] = j;
                    let a = x.data()[x.offset_at(&coords)];
                    coords[axis] = j + 1;
                    let b = x.data()[x.offset_at(&coords)];
                    objective += self.edge.cost(a, b);
                }
                coords[axis] = 0;
                if !increment_base(&mut coords, &self.extents, axis) {
                    break;
                }
            }
        }
        Ok(objective)
    }

    /// Enumerate the chain bases of `axis`: every coordinate with
    /// `coords[axis] == 0`, plus the canonical point indices of the chain.
    fn chain_table(&self, axis: usize) -> Vec<ChainBase> {
        let rank = self.extents.len();
        let width = self.extents[axis];
        let canon = canonical_strides(&self.extents);
        let num_bases: usize = self
            .extents
            .iter()
            .enumerate()
            .map(|(i, &e)| if i == axis { 1 } else { e })
            .product();
        let mut chains = Vec::with_capacity(num_bases);
        let mut coords = vec![0usize; rank];
        loop {
            let mut pts = Vec::with_capacity(width);
            for j in 0..width {
                coords[axis] = j;
                pts.push(dot_coords(&coords, &canon));
            }
            coords[axis] = 0;
            chains.push(ChainBase {
                coords: coords.clone(),
                pts,
            });
            if !increment_base(&mut coords, &self.extents, axis) {
                break;
            }
        }
        chains
    }

    /// Run `kernel` over every chain, gathering the strided input slice
    /// first so the inner loops see contiguous data.
    #[cfg(not(feature = "parallel"))]
    fn run_chains<F>(
        &self,
        chains: &[ChainBase],
        axis: usize,
        kernel: F,
        input: &Grid,
    ) -> Vec<(f64, Vec<f64>)>
    where
        F: Fn(&[usize], &[f64], &mut [f64], &mut ChainBuffers) -> f64 + Sync,
    {
        let nl = self.num_labels;
        let mut buf = ChainBuffers::default();
        let mut slice = Vec::new();
        chains
            .iter()
            .map(|base| {
                let width = base.pts.len();
                gather_chain(input, base, axis, width, nl, &mut slice);
                let mut out = vec![0.0; width * nl];
                let v = kernel(&base.pts, &slice, &mut out, &mut buf);
                (v, out)
            })
            .collect()
    }

    #[cfg(feature = "parallel")]
    fn run_chains<F>(
        &self,
        chains: &[ChainBase],
        axis: usize,
        kernel: F,
        input: &Grid,
    ) -> Vec<(f64, Vec<f64>)>
    where
        F: Fn(&[usize], &[f64], &mut [f64], &mut ChainBuffers) -> f64 + Sync,
    {
        use rayon::prelude::*;

        let nl = self.num_labels;
        chains
            .par_iter()
            .map(|base| {
                let width = base.pts.len();
                let mut buf = ChainBuffers::default();
                let mut slice = Vec::new();
                gather_chain(input, base, axis, width, nl, &mut slice);
                let mut out = vec![0.0; width * nl];
                let v = kernel(&base.pts, &slice, &mut out, &mut buf);
                (v, out)
            })
            .collect()
    }

    fn check_point_grid(&self, x: &Grid) -> Result<()> {
        if x.extents() != self.extents.as_slice() {
            return Err(DeconvolveError::ShapeMismatch {
                expected: self.extents.clone(),
                got: x.extents().to_vec(),
            });
        }
        Ok(())
    }
}

/// One chain: its base coordinates (zero along the active axis) and the
/// canonical point index of every position.
struct ChainBase {
    coords: Vec<usize>,
    pts: Vec<usize>,
}

fn canonical_strides(extents: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; extents.len()];
    for i in (0..extents.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * extents[i + 1];
    }
    strides
}

#[inline]
fn dot_coords(coords: &[usize], strides: &[usize]) -> usize {
    coords.iter().zip(strides).map(|(&c, &s)| c * s).sum()
}

/// Mixed-radix increment over every axis except `skip`.
fn increment_base(coords: &mut [usize], extents: &[usize], skip: usize) -> bool {
    for axis in 0..coords.len() {
        if axis == skip {
            continue;
        }
        coords[axis] += 1;
        if coords[axis] < extents[axis] {
            return true;
        }
        coords[axis] = 0;
    }
    false
}

/// Copy one chain's `[position][label]` block out of a multiplier-shaped
/// grid into a contiguous buffer.
fn gather_chain(
    grid: &Grid,
    base: &ChainBase,
    axis: usize,
    width: usize,
    num_labels: usize,
    out: &mut Vec<f64>,
) {
    out.resize(width * num_labels, 0.0);
    let rank = base.coords.len();
    let strides = grid.strides();
    let label_stride = strides[rank];
    let axis_stride = strides[axis];
    let mut base_off = 0usize;
    for i in 0..rank {
        base_off += base.coords[i] * strides[i];
    }
    for j in 0..width {
        let off = base_off + j * axis_stride;
        for l in 0..num_labels {
            out[j * num_labels + l] = grid.data()[off + l * label_stride];
        }
    }
}

/// Write one chain's `[position][label]` block back into a
/// multiplier-shaped grid.
fn scatter_chain(
    grid: &mut Grid,
    base: &ChainBase,
    axis: usize,
    width: usize,
    num_labels: usize,
    values: &[f64],
) {
    let rank = base.coords.len();
    let strides = grid.strides().to_vec();
    let label_stride = strides[rank];
    let mut base_off = 0usize;
    for i in 0..rank {
        base_off += base.coords[i] * strides[i];
    }
    let axis_stride = strides[axis];
    let data = grid.data_mut();
    for j in 0..width {
        let off = base_off + j * axis_stride;
        for l in 0..num_labels {
            data[off + l * label_stride] = values[j * num_labels + l];
        }
    }
}
