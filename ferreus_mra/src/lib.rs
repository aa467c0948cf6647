/////////////////////////////////////////////////////////////////////////////////////////////
//
// Exposes the public API for the distributed adaptive multiresolution (MRA) crate.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Distributed adaptive multiresolution function trees
//!
//! This crate represents continuous functions of 1 to 4 variables in Alpert's
//! Legendre multiwavelet basis of order `k`, on a tree whose local depth
//! adapts until a global accuracy threshold `ε` is met.
//!
//! The nodes of a tree are partitioned over the ranks of a
//! [`ferreus_mra_world::World`]. Every operation is expressed as messages
//! addressed to the rank owning a key; a message for a locally owned key
//! collapses to a direct call.
//!
//! # Features:
//! - Adaptive projection of any `Fn(&[f64; N]) -> f64`
//! - Compress / reconstruct between the scaling and wavelet bases
//! - Asynchronous point evaluation returning futures
//! - Derivatives, products and linear combinations of functions
//! - Cost-based load balancing and redistribution
//!
//! # Example: Project, transform and differentiate a Gaussian
//!
//! ```
//! use ferreus_mra::{FunctionConfig, FunctionFactory, LoadBalancer};
//! use ferreus_mra_world::World;
//!
//! let world = World::new(3).unwrap();
//! let config = FunctionConfig::builder()
//!     .k(7)
//!     .thresh(1e-6)
//!     .initial_level(1)
//!     .build();
//!
//! let gaussian = |x: &[f64; 2]| (-30.0 * ((x[0] - 0.5).powi(2) + (x[1] - 0.5).powi(2))).exp();
//! let f = FunctionFactory::new(&world, config).functor(gaussian).build().unwrap();
//!
//! // Evaluate asynchronously, then wait.
//! let future = f.eval([0.4, 0.55]).unwrap();
//! let value = future.wait().unwrap().unwrap();
//! assert!((value - gaussian(&[0.4, 0.55])).abs() < 1e-5);
//!
//! // Wavelet basis and back.
//! let before = f.norm2().unwrap();
//! f.compress(true).unwrap();
//! assert!((f.norm2().unwrap() - before).abs() < 1e-10);
//! f.reconstruct(true).unwrap();
//!
//! // d/dx
//! let df = f.diff(0).unwrap();
//! let exact = -60.0 * (0.4 - 0.5) * gaussian(&[0.4, 0.55]);
//! assert!((df.value([0.4, 0.55]).unwrap() - exact).abs() < 1e-2);
//!
//! // Rebalance the tree over the ranks.
//! let map = LoadBalancer::new(&f).load_balance().unwrap();
//! f.redistribute(map).unwrap();
//! assert!((f.value([0.4, 0.55]).unwrap() - value).abs() < 1e-14);
//! ```
//!
//! # References
//!
//! 1. Alpert, B. (1993).
//!    *A class of bases in L2 for the sparse representation of integral operators.*
//!    *SIAM Journal on Mathematical Analysis*, **24**(1), 246–262.
//!
//! 2. Alpert, B., Beylkin, G., Gines, D., & Vozovoi, L. (2002).
//!    *Adaptive solution of partial differential equations in multiwavelet bases.*
//!    *Journal of Computational Physics*, **182**(1), 149–190.
//!
//! 3. Harrison, R. J., Fann, G. I., Yanai, T., Gan, Z., & Beylkin, G. (2004).
//!    *Multiresolution quantum chemistry: Basic theory and initial applications.*
//!    *Journal of Chemical Physics*, **121**(23), 11587–11598.

mod compress;
mod config;
mod diagnostics;
mod error;
mod eval;
mod factory;
mod function;
mod key;
mod legendre;
mod loadbal;
mod messages;
mod node;
mod operators;
mod pmap;
mod project;
mod reconstruct;
mod tensor;
mod traits;
mod twoscale;

#[doc(inline)]
pub use {
    config::{Basis, BoundaryCondition, FunctionConfig, FunctionConfigBuilder, SimulationCell, MAX_K},
    diagnostics::{LevelSummary, TreeSummary},
    error::{MraError, ProgrammerError, Stage},
    eval::EvalFuture,
    factory::FunctionFactory,
    function::Function,
    key::{Key, Level, Translation, MAX_LEVEL, MAX_NDIM},
    legendre::{gauss_legendre, scaling_functions},
    loadbal::{BalancePlan, CostFn, LoadBalancer},
    node::Node,
    pmap::{LocalMap, MortonHashMap, ProcessMap, TreePartitionMap},
    tensor::Tensor,
    traits::FunctionFunctor,
    twoscale::{DerivativeBlocks, TwoScale},
};
