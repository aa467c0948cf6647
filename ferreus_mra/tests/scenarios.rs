/////////////////////////////////////////////////////////////////////////////////////////////
//
// End-to-end scenarios for distributed function trees.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use ferreus_mra::{
    BoundaryCondition, Function, FunctionConfig, FunctionFactory, Key, LoadBalancer, LocalMap, MraError,
    ProcessMap, ProgrammerError, Stage, Tensor,
};
use ferreus_mra_world::World;
use std::{f64::consts::PI, sync::Arc};

const SAMPLE_POINT: [f64; 3] = [0.45, 0.53, 0.48];

fn fred(x: &[f64; 3]) -> f64 {
    let r2 = x.iter().map(|xi| (xi - 0.5).powi(2)).sum::<f64>();
    (130.0 / PI).powf(0.75) * (-65.0 * r2).exp()
}

fn dfred_dx(x: &[f64; 3]) -> f64 {
    -130.0 * (x[0] - 0.5) * fred(x)
}

fn gaussian(nproc: usize) -> Function<3> {
    let world = World::new(nproc).unwrap();
    let config = FunctionConfig::builder().k(9).thresh(1e-7).initial_level(0).build();
    FunctionFactory::new(&world, config).functor(fred).build().unwrap()
}

fn polynomial(nproc: usize, k: usize, f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Function<1> {
    let world = World::new(nproc).unwrap();
    let config = FunctionConfig::builder().k(k).thresh(1e-10).build();
    FunctionFactory::new(&world, config)
        .functor(move |x: &[f64; 1]| f(x[0]))
        .build()
        .unwrap()
}

#[test]
fn gaussian_is_projected_to_threshold() {
    let f = gaussian(3);
    let value = f.value(SAMPLE_POINT).unwrap();
    assert!((value - fred(&SAMPLE_POINT)).abs() < 1e-6, "got {value}, expected {}", fred(&SAMPLE_POINT));
    f.verify_tree().unwrap();
}

#[test]
fn compress_then_reconstruct_preserves_values() {
    let f = gaussian(3);
    let before = f.value(SAMPLE_POINT).unwrap();

    f.compress(true).unwrap();
    assert!(f.is_compressed());
    f.verify_tree().unwrap();

    f.reconstruct(true).unwrap();
    assert!(!f.is_compressed());
    f.verify_tree().unwrap();

    let after = f.value(SAMPLE_POINT).unwrap();
    assert!((after - before).abs() < 1e-10);
}

#[test]
fn norm_is_the_same_in_both_bases() {
    let f = gaussian(2);
    let reconstructed = f.norm2sq().unwrap();
    f.compress(true).unwrap();
    let compressed = f.norm2sq().unwrap();

    assert!((reconstructed - compressed).abs() < 1e-10 * reconstructed);
    // (130/π)^1.5 ∫ exp(-130 r²) = 1 over all space; the cell holds nearly all of it.
    assert!((reconstructed - 1.0).abs() < 1e-6);
}

#[test]
fn derivative_of_gaussian_matches_analytic() {
    let f = gaussian(3);
    let df = f.diff(0).unwrap();
    let value = df.value(SAMPLE_POINT).unwrap();
    let exact = dfred_dx(&SAMPLE_POINT);
    assert!((value - exact).abs() < 1e-4 * exact.abs(), "got {value}, expected {exact}");
}

#[test]
fn load_balance_does_not_change_values() {
    let f = gaussian(4);
    let before = f.value(SAMPLE_POINT).unwrap();
    let nodes_before = f.summary().unwrap().total_nodes();

    let map = LoadBalancer::new(&f).load_balance().unwrap();
    f.redistribute(map).unwrap();
    f.verify_tree().unwrap();

    assert_eq!(f.value(SAMPLE_POINT).unwrap(), before);
    assert_eq!(f.summary().unwrap().total_nodes(), nodes_before);

    f.compress(true).unwrap();
    f.reconstruct(true).unwrap();
    assert!((f.value(SAMPLE_POINT).unwrap() - before).abs() < 1e-10);
}

#[test]
fn rank_count_does_not_change_results() {
    let point = [0.31, 0.62];
    let source = |x: &[f64; 2]| (-20.0 * ((x[0] - 0.4).powi(2) + (x[1] - 0.6).powi(2))).exp();
    let values: Vec<(f64, usize)> = [1, 3, 5]
        .into_iter()
        .map(|nproc| {
            let world = World::new(nproc).unwrap();
            let config = FunctionConfig::builder().k(6).thresh(1e-6).build();
            let f = FunctionFactory::new(&world, config).functor(source).build().unwrap();
            (f.value(point).unwrap(), f.summary().unwrap().total_nodes())
        })
        .collect();

    for (value, nodes) in &values[1..] {
        assert_eq!(*value, values[0].0);
        assert_eq!(*nodes, values[0].1);
    }
}

#[test]
fn transforms_are_idempotent_and_can_be_deferred() {
    let f = polynomial(3, 5, |x| x * x - x);
    let expected = 0.3 * 0.3 - 0.3;

    f.compress(false).unwrap();
    f.compress(false).unwrap();
    f.fence().unwrap();
    assert!(f.is_compressed());
    f.verify_tree().unwrap();

    f.reconstruct(true).unwrap();
    f.reconstruct(true).unwrap();
    assert!((f.value([0.3]).unwrap() - expected).abs() < 1e-12);
}

#[test]
fn repeated_transforms_leave_the_tree_untouched() {
    let f = gaussian(2);

    f.compress(true).unwrap();
    let compressed = f.nodes().unwrap();
    let norm = f.norm2sq().unwrap();
    f.compress(true).unwrap();
    assert_eq!(f.nodes().unwrap(), compressed);
    assert_eq!(f.norm2sq().unwrap(), norm);

    f.reconstruct(true).unwrap();
    let reconstructed = f.nodes().unwrap();
    assert!(reconstructed.iter().all(|(_, node)| node.is_leaf() == node.has_coeffs()));
    f.reconstruct(true).unwrap();
    assert_eq!(f.nodes().unwrap(), reconstructed);
}

#[test]
fn value_at_a_leaf_centre_matches_the_functor() {
    let f = gaussian(3);
    let nodes = f.nodes().unwrap();
    let (leaf, _) = nodes
        .iter()
        .find(|(key, node)| node.is_leaf() && key.contains(&SAMPLE_POINT))
        .unwrap();

    let half = 0.5 * leaf.width();
    let centre = leaf.lower_corner().map(|x| x + half);
    let value = f.value(centre).unwrap();
    assert!(
        (value - fred(&centre)).abs() < 1e-7,
        "leaf {leaf}: got {value}, expected {}",
        fred(&centre)
    );
}

#[test]
fn explicit_leaves_build_a_function() {
    let world = World::new(2).unwrap();
    let config = FunctionConfig::builder().k(3).build();
    let constant = |c: f64| Tensor::from_vec(3, 1, vec![c * std::f64::consts::FRAC_1_SQRT_2, 0.0, 0.0]).unwrap();

    let f = FunctionFactory::new(&world, config)
        .from_leaves([
            (Key::new(1, [0]).unwrap(), constant(2.0)),
            (Key::new(1, [1]).unwrap(), constant(-1.0)),
        ])
        .build()
        .unwrap();

    assert!((f.value([0.25]).unwrap() - 2.0).abs() < 1e-12);
    assert!((f.value([0.75]).unwrap() + 1.0).abs() < 1e-12);
    assert_eq!(f.leaf_coeffs(&Key::new(1, [1]).unwrap()).unwrap(), Some(constant(-1.0)));
    assert_eq!(f.leaf_coeffs(&Key::root()).unwrap(), None);
}

#[test]
fn zero_function_has_a_single_root_leaf() {
    let world = World::new(2).unwrap();
    let f = FunctionFactory::<2>::new(&world, FunctionConfig::default()).build().unwrap();
    assert_eq!(f.summary().unwrap().total_nodes(), 1);
    assert_eq!(f.value([0.2, 0.9]).unwrap(), 0.0);

    f.compress(true).unwrap();
    f.verify_tree().unwrap();
    assert_eq!(f.norm2().unwrap(), 0.0);
}

#[test]
fn products_and_combinations_of_polynomials_are_exact() {
    let x = 0.3;
    let f = polynomial(3, 6, |x| x);
    // Operands must share a world.
    let world = f.world().unwrap().clone();
    let g = FunctionFactory::new(&world, f.config().unwrap().clone())
        .functor(|p: &[f64; 1]| p[0] * p[0])
        .build()
        .unwrap();

    assert!((f.mul(&g).unwrap().value([x]).unwrap() - x.powi(3)).abs() < 1e-12);
    assert!((f.square().unwrap().value([x]).unwrap() - x * x).abs() < 1e-12);
    assert!((f.gaxpy(2.0, &g, -3.0).unwrap().value([x]).unwrap() - (2.0 * x - 3.0 * x * x)).abs() < 1e-12);
    assert!((f.add(&g).unwrap().value([x]).unwrap() - (x + x * x)).abs() < 1e-12);
    assert!((f.sub(&g).unwrap().value([x]).unwrap() - (x - x * x)).abs() < 1e-12);
    assert!((f.scale(-4.0).unwrap().value([x]).unwrap() + 4.0 * x).abs() < 1e-12);

    // Operands are left untouched.
    assert!((f.value([x]).unwrap() - x).abs() < 1e-12);
}

#[test]
fn derivative_of_cubic_is_exact_away_from_the_boundary() {
    let f = polynomial(2, 6, |x| x.powi(3));
    let df = f.diff(0).unwrap();
    df.verify_tree().unwrap();
    assert!((df.value([0.4]).unwrap() - 3.0 * 0.16).abs() < 1e-10);
}

#[test]
fn periodic_derivative_is_accurate_at_the_boundary() {
    let world = World::new(3).unwrap();
    let config = FunctionConfig::builder()
        .k(8)
        .thresh(1e-9)
        .boundary(BoundaryCondition::Periodic)
        .build();
    let f = FunctionFactory::new(&world, config)
        .functor(|x: &[f64; 1]| (2.0 * PI * x[0]).sin())
        .build()
        .unwrap();

    let df = f.diff(0).unwrap();
    for x in [0.01, 0.5, 0.99] {
        let exact = 2.0 * PI * (2.0 * PI * x).cos();
        assert!((df.value([x]).unwrap() - exact).abs() < 1e-4);
    }
}

#[test]
fn user_cell_is_mapped_to_the_unit_box() {
    let world = World::new(2).unwrap();
    let config = FunctionConfig::builder().k(5).thresh(1e-8).cell(vec![[-1.0, 1.0]]).build();
    let f = FunctionFactory::new(&world, config)
        .functor(|x: &[f64; 1]| x[0] * x[0])
        .build()
        .unwrap();

    assert!((f.value([-0.5]).unwrap() - 0.25).abs() < 1e-12);
    assert!((f.norm2sq().unwrap() - 0.4).abs() < 1e-12);
    assert!((f.diff(0).unwrap().value([0.5]).unwrap() - 1.0).abs() < 1e-10);
    assert!(matches!(f.eval([1.5]), Err(MraError::Domain { .. })));
}

#[test]
fn copy_is_independent_of_the_original() {
    let f = polynomial(3, 5, |x| 1.0 + x);
    let g = f.copy(None).unwrap();
    g.compress(true).unwrap();
    assert!(!f.is_compressed());
    assert!((f.value([0.6]).unwrap() - 1.6).abs() < 1e-12);

    let local = f.copy(Some(Arc::new(LocalMap::new(1, 3).unwrap()))).unwrap();
    let summary = local.summary().unwrap();
    assert_eq!(summary.nodes_per_rank[0], 0);
    assert_eq!(summary.nodes_per_rank[2], 0);
    assert_eq!(summary.nodes_per_rank[1], summary.total_nodes());
    assert!((local.value([0.6]).unwrap() - 1.6).abs() < 1e-12);
}

#[test]
fn evaluation_can_be_requested_by_any_rank() {
    let f = polynomial(4, 4, |x| 3.0 * x);
    let futures: Vec<_> = (0..4).map(|rank| f.eval_from(rank, [0.7]).unwrap()).collect();
    for future in futures {
        assert!((future.wait().unwrap().unwrap() - 2.1).abs() < 1e-12);
    }
}

#[test]
fn summary_reports_every_level() {
    let f = polynomial(2, 4, |x| (10.0 * x).sin());
    let summary = f.summary().unwrap();
    assert!(!summary.compressed);
    assert_eq!(summary.nodes_per_rank.iter().sum::<usize>(), summary.total_nodes());
    assert_eq!(summary.levels[0].level, 0);
    assert!(summary.total_leaves() < summary.total_nodes());
    assert!(summary.max_level() >= 3);
    f.print_tree().unwrap();
}

#[test]
fn domain_errors_do_not_abort() {
    let f = polynomial(2, 4, |x| x);
    assert!(matches!(f.eval([-0.1]), Err(MraError::Domain { .. })));
    assert!(matches!(f.eval([f64::NAN]), Err(MraError::Domain { .. })));
    assert!(!f.world().unwrap().is_aborted());
    assert!((f.value([0.5]).unwrap() - 0.5).abs() < 1e-12);
}

#[test]
fn uninitialized_handles_are_rejected() {
    let f = Function::<2>::default();
    assert!(!f.is_initialized());
    assert!(!f.is_compressed());
    f.compress(true).unwrap();
    f.reconstruct(true).unwrap();
    assert_eq!(f.value([0.5, 0.5]), Err(MraError::Programmer(ProgrammerError::Uninitialized)));
    assert!(matches!(f.diff(0), Err(MraError::Programmer(ProgrammerError::Uninitialized))));
}

#[test]
fn evaluating_a_compressed_function_aborts() {
    let f = polynomial(2, 4, |x| x);
    f.compress(true).unwrap();
    assert!(matches!(f.eval([0.5]), Err(MraError::Programmer(ProgrammerError::CompressedEval))));
    assert!(f.world().unwrap().is_aborted());
}

#[test]
fn operators_require_reconstructed_operands() {
    let f = polynomial(2, 4, |x| x);
    f.compress(true).unwrap();
    let result = f.mul(&f);
    assert!(matches!(
        result,
        Err(MraError::Programmer(ProgrammerError::NotReconstructed { operation: "mul" }))
    ));
    assert!(f.world().unwrap().is_aborted());
}

#[test]
fn bad_axis_is_rejected() {
    let f = polynomial(1, 4, |x| x);
    assert!(matches!(
        f.diff(1),
        Err(MraError::Programmer(ProgrammerError::UnsupportedDimension { axis: 1, ndim: 1 }))
    ));
}

#[test]
fn refinement_past_the_finest_level_aborts() {
    let world = World::new(2).unwrap();
    let config = FunctionConfig::builder().k(3).thresh(1e-6).max_refine_level(4).build();
    let result = FunctionFactory::new(&world, config)
        .functor(|x: &[f64; 1]| if x[0] < 0.3 { 0.0 } else { 1.0 })
        .build();

    assert!(matches!(
        result,
        Err(MraError::Programmer(ProgrammerError::MaxRefineLevel { max_level: 4, .. }))
    ));
    assert!(world.is_aborted());
}

#[test]
fn adaptive_projection_needs_a_level_below_the_initial_one() {
    let world = World::new(2).unwrap();
    let config = FunctionConfig::builder().k(3).initial_level(3).max_refine_level(3).build();
    let result = FunctionFactory::new(&world, config)
        .functor(|_: &[f64; 1]| 1.0)
        .build();
    assert!(matches!(result, Err(MraError::Programmer(ProgrammerError::InvalidConfig(_)))));

    let world = World::new(2).unwrap();
    let config = FunctionConfig::builder().k(3).initial_level(3).max_refine_level(4).build();
    let f = FunctionFactory::new(&world, config)
        .functor(|_: &[f64; 1]| 1.0)
        .build()
        .unwrap();
    assert_eq!(f.summary().unwrap().max_level(), 4);
    assert!((f.value([0.3]).unwrap() - 1.0).abs() < 1e-12);
}

#[test]
fn non_finite_projection_is_reported() {
    let world = World::new(2).unwrap();
    let config = FunctionConfig::builder().k(4).build();
    let result = FunctionFactory::new(&world, config)
        .functor(|x: &[f64; 1]| if x[0] > 0.5 { f64::NAN } else { x[0] })
        .build();

    assert!(matches!(
        result,
        Err(MraError::NumericAnomaly {
            stage: Stage::Projection,
            ..
        })
    ));
    assert!(!world.is_aborted());
}

#[test]
fn incomplete_leaf_families_are_rejected() {
    let world = World::new(2).unwrap();
    let config = FunctionConfig::builder().k(2).build();
    let result = FunctionFactory::new(&world, config)
        .from_leaves([(Key::new(1, [0]).unwrap(), Tensor::zeros(2, 1))])
        .build();

    assert!(matches!(
        result,
        Err(MraError::Programmer(ProgrammerError::IncompleteFamily { .. }))
    ));
}

#[test]
fn invalid_configuration_is_rejected() {
    let world = World::new(1).unwrap();
    let config = FunctionConfig::builder().k(0).build();
    let result = FunctionFactory::<2>::new(&world, config).build();
    assert!(matches!(result, Err(MraError::Programmer(ProgrammerError::InvalidConfig(_)))));
}

/// Sends everything below the root to a rank that does not exist.
#[derive(Debug)]
struct PastTheLastRank;

impl ProcessMap<1> for PastTheLastRank {
    fn owner(&self, key: &Key<1>) -> usize {
        if key.level() == 0 {
            0
        } else {
            3
        }
    }

    fn nproc(&self) -> usize {
        3
    }
}

#[test]
fn process_maps_must_stay_inside_the_world() {
    assert!(matches!(
        LocalMap::new(3, 3),
        Err(ProgrammerError::InvalidRank { rank: 3, nproc: 3 })
    ));

    let f = polynomial(3, 4, |x| x);
    let result = f.redistribute(Arc::new(PastTheLastRank));
    assert!(matches!(
        result,
        Err(MraError::Programmer(ProgrammerError::InvalidRank { rank: 3, nproc: 3 }))
    ));
    assert!(f.world().unwrap().is_aborted());
}

#[test]
fn copying_onto_a_map_outside_the_world_is_rejected() {
    let f = polynomial(3, 4, |x| x);
    let result = f.copy(Some(Arc::new(PastTheLastRank)));
    assert!(matches!(
        result,
        Err(MraError::Programmer(ProgrammerError::InvalidRank { rank: 3, nproc: 3 }))
    ));
}

#[test]
fn numeric_anomalies_are_reported_once() {
    let world = World::new(2).unwrap();
    let config = FunctionConfig::builder().k(1).build();
    let huge = || Tensor::from_vec(1, 1, vec![1.5e308]).unwrap();
    let f = FunctionFactory::new(&world, config)
        .from_leaves([(Key::new(1, [0]).unwrap(), huge()), (Key::new(1, [1]).unwrap(), huge())])
        .build()
        .unwrap();

    // The parent's scaling coefficient is (a + b) / sqrt(2), which overflows.
    assert!(matches!(
        f.compress(true),
        Err(MraError::NumericAnomaly {
            stage: Stage::Compress,
            ..
        })
    ));
    f.fence().unwrap();
    assert!(!world.is_aborted());
}
