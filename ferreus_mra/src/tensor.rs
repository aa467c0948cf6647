/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements dense hypercube coefficient tensors and their multi-dimensional transforms.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Coefficient tensors.
//!
//! A [`Tensor`] is a row-major hypercube of `f64` with the same extent in
//! every dimension: `k^N` scaling coefficients for a leaf, or `(2k)^N`
//! filtered coefficients for a compressed interior node.
use faer::Mat;
use itertools::Itertools;

/// Dense, row-major, N-dimensional hypercube of coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    extent: usize,
    ndim: usize,
    data: Vec<f64>,
}

/// Iterates every multi-index of an `extent^ndim` hypercube in row-major order.
pub(crate) fn multi_indices(extent: usize, ndim: usize) -> impl Iterator<Item = Vec<usize>> {
    (0..ndim).map(|_| 0..extent).multi_cartesian_product()
}

impl Tensor {
    pub fn zeros(extent: usize, ndim: usize) -> Self {
        Self {
            extent,
            ndim,
            data: vec![0.0; extent.pow(ndim as u32)],
        }
    }

    /// Builds a tensor by evaluating `f` at every multi-index.
    pub fn from_fn(extent: usize, ndim: usize, mut f: impl FnMut(&[usize]) -> f64) -> Self {
        let data = multi_indices(extent, ndim).map(|index| f(&index)).collect();
        Self { extent, ndim, data }
    }

    /// Wraps row-major `data`, returning `None` if its length is not
    /// `extent^ndim`.
    pub fn from_vec(extent: usize, ndim: usize, data: Vec<f64>) -> Option<Self> {
        (data.len() == extent.pow(ndim as u32)).then_some(Self { extent, ndim, data })
    }

    pub fn extent(&self) -> usize {
        self.extent
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Sum of squared entries.
    pub fn sum_sq(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum()
    }

    /// Frobenius norm.
    pub fn normf(&self) -> f64 {
        self.sum_sq().sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    pub fn scale(&mut self, alpha: f64) {
        self.data.iter_mut().for_each(|v| *v *= alpha);
    }

    /// `self = alpha * self + beta * other`.
    pub fn gaxpy(&mut self, alpha: f64, other: &Tensor, beta: f64) {
        debug_assert_eq!(self.data.len(), other.data.len());
        self.data
            .iter_mut()
            .zip(&other.data)
            .for_each(|(a, b)| *a = alpha * *a + beta * b);
    }

    /// Element-wise product in place.
    pub fn emul(&mut self, other: &Tensor) {
        debug_assert_eq!(self.data.len(), other.data.len());
        self.data.iter_mut().zip(&other.data).for_each(|(a, b)| *a *= b);
    }

    /// Applies the same matrix along every dimension.
    ///
    /// `out[j1..jN] = sum t[i1..iN] c[i1, j1] ... c[iN, jN]`
    pub fn transform(&self, c: &Mat<f64>) -> Tensor {
        let matrices = vec![c; self.ndim];
        self.transform_dims(&matrices)
    }

    /// Applies `matrices[d]` along dimension `d`. All matrices must have
    /// `extent` rows and share the same column count.
    ///
    /// Each round contracts the leading index and rotates it to the back,
    /// so after `ndim` rounds the dimensions are back in order.
    pub fn transform_dims(&self, matrices: &[&Mat<f64>]) -> Tensor {
        debug_assert_eq!(matrices.len(), self.ndim);

        let rows = self.extent;
        let mut cols = rows;
        let mut data = self.data.clone();
        for &c in matrices {
            debug_assert_eq!(c.nrows(), rows);
            cols = c.ncols();

            let rest = data.len() / rows;
            let a = Mat::from_fn(rows, rest, |i, r| data[i * rest + r]);
            let product = a.transpose() * c.as_ref();

            data = (0..rest)
                .flat_map(|r| (0..cols).map(move |j| (r, j)))
                .map(|(r, j)| product[(r, j)])
                .collect();
        }

        Tensor {
            extent: cols,
            ndim: self.ndim,
            data,
        }
    }

    /// Applies a square matrix along a single `axis`, leaving the others.
    pub fn transform_axis(&self, c: &Mat<f64>, axis: usize) -> Tensor {
        debug_assert_eq!(c.nrows(), self.extent);
        debug_assert_eq!(c.ncols(), self.extent);

        let n = self.extent;
        let stride = n.pow((self.ndim - 1 - axis) as u32);
        let mut out = vec![0.0; self.data.len()];

        // Each slab is an `n × stride` matrix with the axis as its rows.
        for (slab, chunk) in out.chunks_mut(n * stride).zip(self.data.chunks(n * stride)) {
            let block = Mat::from_fn(n, stride, |i, inner| chunk[i * stride + inner]);
            let product = c.transpose() * block.as_ref();
            for j in 0..n {
                for inner in 0..stride {
                    slab[j * stride + inner] = product[(j, inner)];
                }
            }
        }

        Tensor {
            extent: n,
            ndim: self.ndim,
            data: out,
        }
    }

    /// Position of the `k^N` block of `child` inside a `(2k)^N` tensor.
    fn block_offsets(&self, k: usize, child: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let ndim = self.ndim;
        let big = 2 * k;
        multi_indices(k, ndim).enumerate().map(move |(small, index)| {
            let large = index.iter().enumerate().fold(0, |acc, (d, &i)| {
                acc * big + ((child >> d) & 1) * k + i
            });
            (small, large)
        })
    }

    /// Extracts the `k^N` block of `child` from a `(2k)^N` tensor. Bit `d`
    /// of `child` selects the upper half of dimension `d`.
    pub fn child_block(&self, k: usize, child: usize) -> Tensor {
        debug_assert_eq!(self.extent, 2 * k);
        let mut block = Tensor::zeros(k, self.ndim);
        for (small, large) in self.block_offsets(k, child) {
            block.data[small] = self.data[large];
        }
        block
    }

    /// Writes `block` into the `child` position of a `(2k)^N` tensor.
    pub fn set_child_block(&mut self, k: usize, child: usize, block: &Tensor) {
        debug_assert_eq!(self.extent, 2 * k);
        debug_assert_eq!(block.extent, k);
        let offsets: Vec<(usize, usize)> = self.block_offsets(k, child).collect();
        for (small, large) in offsets {
            self.data[large] = block.data[small];
        }
    }

    /// The scaling (all indices `< k`) block of a `(2k)^N` tensor.
    pub fn scaling_block(&self, k: usize) -> Tensor {
        self.child_block(k, 0)
    }

    pub fn set_scaling_block(&mut self, k: usize, block: &Tensor) {
        self.set_child_block(k, 0, block);
    }

    pub fn zero_scaling_block(&mut self, k: usize) {
        let zeros = Tensor::zeros(k, self.ndim);
        self.set_child_block(k, 0, &zeros);
    }
}
