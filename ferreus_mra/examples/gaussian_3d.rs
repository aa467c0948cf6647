/////////////////////////////////////////////////////////////////////////////////////////////
//
// Example projection of a normalised 3D Gaussian onto a tree distributed over four ranks,
// followed by evaluation, basis transforms, differentiation and load balancing.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use ferreus_mra::{FunctionConfig, FunctionFactory, LoadBalancer};
use ferreus_mra_world::World;
use std::{env, f64::consts::PI};
use tracing_subscriber::EnvFilter;

fn gaussian(x: &[f64; 3]) -> f64 {
    let r2 = x.iter().map(|xi| (xi - 0.5).powi(2)).sum::<f64>();
    (130.0 / PI).powf(0.75) * (-65.0 * r2).exp()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Optional rank count on the command line
    let nproc = env::args().nth(1).map(|s| s.parse()).transpose()?.unwrap_or(4usize);

    let world = World::new(nproc)?;
    let config = FunctionConfig::builder().k(9).thresh(1e-7).initial_level(0).build();
    let f = FunctionFactory::new(&world, config).functor(gaussian).build()?;
    f.print_tree()?;

    let point = [0.45, 0.53, 0.48];
    let value = f.eval(point)?.wait()??;
    println!("f{point:?} = {value:.12e} (error {:.3e})", value - gaussian(&point));

    f.compress(true)?;
    println!("norm in the wavelet basis: {:.12}", f.norm2()?);
    f.reconstruct(true)?;

    let df = f.diff(0)?;
    let exact = -130.0 * (point[0] - 0.5) * gaussian(&point);
    let derivative = df.value(point)?;
    println!("df/dx{point:?} = {derivative:.12e} (error {:.3e})", derivative - exact);

    let plan = LoadBalancer::new(&f).plan()?;
    println!(
        "load balance: total cost {:.1}, per rank {:?}, retained {:.1}",
        plan.total_cost, plan.rank_costs, plan.retained_cost
    );
    f.redistribute(plan.map)?;
    f.print_tree()?;

    println!("after rebalancing: f{point:?} = {:.12e}", f.value(point)?);
    println!("messages sent: {}", world.messages_sent());

    Ok(())
}
