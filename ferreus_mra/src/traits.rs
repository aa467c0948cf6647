/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares the source-function trait projected into function trees.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

/// A function of `NDIM` user coordinates that can be projected into a tree.
///
/// Projection evaluates it at Gauss-Legendre points from every rank in
/// parallel, hence `Send + Sync`. Any `Fn(&[f64; NDIM]) -> f64` closure
/// implements it.
pub trait FunctionFunctor<const NDIM: usize>: Send + Sync {
    fn evaluate(&self, point: &[f64; NDIM]) -> f64;
}

impl<const NDIM: usize, F> FunctionFunctor<NDIM> for F
where
    F: Fn(&[f64; NDIM]) -> f64 + Send + Sync,
{
    #[inline(always)]
    fn evaluate(&self, point: &[f64; NDIM]) -> f64 {
        self(point)
    }
}
