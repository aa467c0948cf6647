/////////////////////////////////////////////////////////////////////////////////////////////
//
// Builds the multiwavelet two-scale filter, quadrature projection and derivative operators.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    legendre::{gauss_legendre, scaling_functions},
    tensor::Tensor,
};
use faer::Mat;
use std::f64::consts::FRAC_1_SQRT_2;

/// Per-axis blocks of the central-flux derivative operator, stored transposed
/// so that they can be handed straight to [`crate::Tensor::transform_axis`].
#[derive(Debug, Clone)]
pub struct DerivativeBlocks {
    /// Acts on the left neighbour `s_{l-1}`.
    pub minus: Mat<f64>,
    /// Acts on the box itself `s_l`.
    pub zero: Mat<f64>,
    /// Acts on the right neighbour `s_{l+1}`.
    pub plus: Mat<f64>,
}

/// Every order-`k` table shared by the nodes of a function tree.
#[derive(Debug, Clone)]
pub struct TwoScale {
    /// Multiwavelet order (number of scaling functions per dimension).
    pub k: usize,

    /// Gauss-Legendre points per dimension used for projection.
    pub npt: usize,

    /// Quadrature points on [0, 1].
    pub points: Vec<f64>,

    /// Quadrature weights on [0, 1].
    pub weights: Vec<f64>,

    /// `φ_i(x_q)` as a `k × npt` matrix: coefficients to values.
    pub quad_phi: Mat<f64>,

    /// `w_q φ_i(x_q)` as an `npt × k` matrix: values to coefficients.
    pub quad_phiw: Mat<f64>,

    /// The orthogonal two-scale filter `H = [h0 h1; g0 g1]`, `2k × 2k`.
    pub hg: Mat<f64>,

    /// `Hᵀ`, applied when compressing.
    pub hg_t: Mat<f64>,

    /// Parent to child scaling blocks, indexed by the child's offset in one
    /// dimension: `child_blocks[b][(i, j)] = H[(i, b * k + j)]`.
    pub child_blocks: [Mat<f64>; 2],

    pub derivative: DerivativeBlocks,
}

impl TwoScale {
    pub fn new(k: usize) -> Self {
        let npt = k;
        let (points, weights) = gauss_legendre(npt);
        let phi_at_points: Vec<Vec<f64>> = points.iter().map(|&x| scaling_functions(x, k)).collect();

        let quad_phi = Mat::from_fn(k, npt, |i, q| phi_at_points[q][i]);
        let quad_phiw = Mat::from_fn(npt, k, |q, i| weights[q] * phi_at_points[q][i]);

        let hg = build_filter(k, &points, &weights, &phi_at_points);
        let hg_t = hg.transpose().to_owned();

        let child_blocks = [
            Mat::from_fn(k, k, |i, j| hg[(i, j)]),
            Mat::from_fn(k, k, |i, j| hg[(i, k + j)]),
        ];

        Self {
            k,
            npt,
            points,
            weights,
            quad_phi,
            quad_phiw,
            hg,
            hg_t,
            child_blocks,
            derivative: derivative_blocks(k),
        }
    }

    /// Stacks the `2^N` child blocks into a `(2k)^N` tensor and applies `Hᵀ`
    /// in every dimension. The scaling block of the result holds the
    /// parent's scaling coefficients; the rest are wavelet coefficients.
    pub fn filter<'a>(&self, ndim: usize, children: impl IntoIterator<Item = &'a Tensor>) -> Tensor {
        let mut stacked = Tensor::zeros(2 * self.k, ndim);
        for (child, block) in children.into_iter().enumerate() {
            stacked.set_child_block(self.k, child, block);
        }
        stacked.transform(&self.hg_t)
    }

    /// Inverse of [`TwoScale::filter`]: applies `H` in every dimension and
    /// splits the result into the `2^N` child blocks.
    pub fn unfilter(&self, filtered: &Tensor) -> Vec<Tensor> {
        let stacked = filtered.transform(&self.hg);
        (0..1usize << filtered.ndim())
            .map(|child| stacked.child_block(self.k, child))
            .collect()
    }

    /// Projects scaling coefficients of a box onto its child `child`.
    pub fn project_to_child(&self, coeffs: &Tensor, child: usize) -> Tensor {
        let matrices: Vec<&Mat<f64>> = (0..coeffs.ndim())
            .map(|d| &self.child_blocks[(child >> d) & 1])
            .collect();
        coeffs.transform_dims(&matrices)
    }
}

/// Computes the two-scale filter.
///
/// The scaling rows come from
///  h0_ij = 1/sqrt(2) ∫ φ_i(y/2) φ_j(y) dy \n
///  h1_ij = 1/sqrt(2) ∫ φ_i((y+1)/2) φ_j(y) dy
/// which k-point quadrature integrates exactly. The wavelet rows are the
/// trailing columns of the full QR factor of the scaling rows' transpose,
/// an orthonormal complement of the scaling rows.
fn build_filter(k: usize, points: &[f64], weights: &[f64], phi_at_points: &[Vec<f64>]) -> Mat<f64> {
    let n = 2 * k;
    let mut scaling = Mat::<f64>::zeros(k, n);

    for ((&x, &w), phi_x) in points.iter().zip(weights).zip(phi_at_points) {
        let left = scaling_functions(0.5 * x, k);
        let right = scaling_functions(0.5 * (x + 1.0), k);
        for i in 0..k {
            for j in 0..k {
                scaling[(i, j)] += FRAC_1_SQRT_2 * w * left[i] * phi_x[j];
                scaling[(i, k + j)] += FRAC_1_SQRT_2 * w * right[i] * phi_x[j];
            }
        }
    }

    let qr = scaling.transpose().to_owned().qr();
    let q = qr.compute_Q();

    Mat::from_fn(n, n, |i, j| if i < k { scaling[(i, j)] } else { q[(j, i)] })
}

/// Central-flux derivative blocks on the reference box, with
/// γ_ij = sqrt((2i+1)(2j+1)):
///  R-_ij = -1/2 (-1)^i γ_ij \n
///  R0_ij = 1/2 (1 - (-1)^(i+j)) γ_ij - 2 γ_ij  if i > j and i - j odd \n
///  R+_ij = 1/2 (-1)^j γ_ij
fn derivative_blocks(k: usize) -> DerivativeBlocks {
    let sign = |i: usize| if i % 2 == 0 { 1.0 } else { -1.0 };
    let gamma = |i: usize, j: usize| (((2 * i + 1) * (2 * j + 1)) as f64).sqrt();

    let r_minus = |i: usize, j: usize| -0.5 * sign(i) * gamma(i, j);
    let r_plus = |i: usize, j: usize| 0.5 * sign(j) * gamma(i, j);
    let r_zero = |i: usize, j: usize| {
        let odd = (i + j) % 2 == 1;
        let flux = if odd { gamma(i, j) } else { 0.0 };
        let volume = if odd && i > j { 2.0 * gamma(i, j) } else { 0.0 };
        flux - volume
    };

    // Stored transposed: entry (j, i) multiplies input index j into output i.
    DerivativeBlocks {
        minus: Mat::from_fn(k, k, |j, i| r_minus(i, j)),
        zero: Mat::from_fn(k, k, |j, i| r_zero(i, j)),
        plus: Mat::from_fn(k, k, |j, i| r_plus(i, j)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::utils::approx::*;

    #[test]
    fn filter_is_orthogonal() {
        for k in [1, 2, 5, 9, 12] {
            let ts = TwoScale::new(k);
            let product = &ts.hg * &ts.hg_t;
            let identity = Mat::<f64>::identity(2 * k, 2 * k);

            let approx_eq = CwiseMat(ApproxEq::eps() * 1024.0);
            equator::assert!(&product ~ &identity);
        }
    }

    #[test]
    fn wavelet_rows_complete_the_basis_at_high_order() {
        for k in [3, 16, 30] {
            let ts = TwoScale::new(k);
            let product = &ts.hg * &ts.hg_t;
            for i in 0..2 * k {
                for j in 0..2 * k {
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert!((product[(i, j)] - expected).abs() < 1e-10, "k = {k}, entry ({i}, {j})");
                }
            }
        }
    }

    #[test]
    fn scaling_rows_satisfy_two_scale_relation() {
        let k = 6;
        let ts = TwoScale::new(k);
        for &x in &[0.1, 0.37, 0.5, 0.81, 0.99] {
            let parent = scaling_functions(x, k);
            let (block, y) = if x < 0.5 { (0, 2.0 * x) } else { (1, 2.0 * x - 1.0) };
            let child = scaling_functions(y, k);
            for i in 0..k {
                let rebuilt: f64 = (0..k)
                    .map(|j| ts.child_blocks[block][(i, j)] * std::f64::consts::SQRT_2 * child[j])
                    .sum();
                assert!((rebuilt - parent[i]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn quadrature_projection_round_trips_polynomials() {
        let k = 7;
        let ts = TwoScale::new(k);
        let coeffs: Vec<f64> = (0..k).map(|i| 1.0 / (i as f64 + 1.0)).collect();
        let values: Vec<f64> = (0..ts.npt)
            .map(|q| (0..k).map(|i| coeffs[i] * ts.quad_phi[(i, q)]).sum())
            .collect();
        for i in 0..k {
            let back: f64 = (0..ts.npt).map(|q| values[q] * ts.quad_phiw[(q, i)]).sum();
            assert!((back - coeffs[i]).abs() < 1e-13);
        }
    }

    #[test]
    fn filter_then_unfilter_restores_children() {
        let k = 4;
        let ts = TwoScale::new(k);
        let children: Vec<Tensor> = (0..4)
            .map(|c| Tensor::from_fn(k, 2, |i| (c * 31 + i[0] * 7 + i[1]) as f64 * 0.01))
            .collect();
        let back = ts.unfilter(&ts.filter(2, &children));
        for (a, b) in back.iter().zip(&children) {
            for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
                assert!((x - y).abs() < 1e-13);
            }
        }
    }

    #[test]
    fn smooth_children_have_small_wavelets_and_exact_parent() {
        // A polynomial of degree < k is represented exactly at every level,
        // so filtering its children must give zero wavelet coefficients and
        // projecting the parent back down must give the children.
        let k = 5;
        let ts = TwoScale::new(k);
        let poly = |x: f64| 1.0 + x - 2.0 * x * x + 0.5 * x.powi(4);
        let project = |lo: f64, width: f64| {
            Tensor::from_fn(k, 1, |i| {
                (0..ts.npt)
                    .map(|q| ts.quad_phiw[(q, i[0])] * poly(lo + width * ts.points[q]))
                    .sum::<f64>()
                    * width.sqrt()
            })
        };
        let parent = project(0.0, 1.0);
        let children = [project(0.0, 0.5), project(0.5, 0.5)];

        let mut filtered = ts.filter(1, &children);
        let s = filtered.scaling_block(k);
        filtered.zero_scaling_block(k);
        assert!(filtered.normf() < 1e-13);
        for (a, b) in s.as_slice().iter().zip(parent.as_slice()) {
            assert!((a - b).abs() < 1e-13);
        }
        for (child, expected) in children.iter().enumerate() {
            let down = ts.project_to_child(&parent, child);
            for (a, b) in down.as_slice().iter().zip(expected.as_slice()) {
                assert!((a - b).abs() < 1e-13);
            }
        }
    }

    #[test]
    fn derivative_of_a_constant_vanishes() {
        let k = 8;
        let d = TwoScale::new(k).derivative;
        for i in 0..k {
            let total = d.minus[(0, i)] + d.zero[(0, i)] + d.plus[(0, i)];
            assert!(total.abs() < 1e-13, "row {i}: {total}");
        }
    }
}
