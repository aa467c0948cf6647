/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements cost-based repartitioning of a tree and migration of nodes to a new process map.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Load balancing.
//!
//! The balancer walks the whole tree depth-first in Morton order, cuts the
//! running cost into `nproc` contiguous chunks of nearly equal cost, and
//! hands chunks to ranks greedily so that as much cost as possible stays
//! where it already is. The result is a [`TreePartitionMap`] that can be
//! passed to [`Function::redistribute`].
use crate::{
    error::MraError,
    function::{Function, FunctionImpl},
    key::Key,
    messages::Message,
    node::Node,
    pmap::{ProcessMap, TreePartitionMap},
};
use ahash::AHashMap;
use itertools::{iproduct, Itertools};
use std::{sync::Arc, time::Instant};
use tracing::{debug, info};

/// Cost of one node for load balancing.
pub type CostFn<const NDIM: usize> = dyn Fn(&Key<NDIM>, &Node) -> f64 + Send + Sync;

/// The outcome of [`LoadBalancer::plan`].
#[derive(Debug, Clone)]
pub struct BalancePlan<const NDIM: usize> {
    /// The new process map.
    pub map: Arc<TreePartitionMap<NDIM>>,

    /// Cost each rank owns under the new map.
    pub rank_costs: Vec<f64>,

    /// Total cost of the tree.
    pub total_cost: f64,

    /// Largest single node cost.
    pub max_node_cost: f64,

    /// Cost that stays on its current rank.
    pub retained_cost: f64,
}

/// Computes a balanced process map for a function tree.
pub struct LoadBalancer<const NDIM: usize> {
    function: Function<NDIM>,
    cost: Box<CostFn<NDIM>>,
}

impl<const NDIM: usize> LoadBalancer<NDIM> {
    /// A balancer with the default cost `1 + coeff_len / k^N`.
    pub fn new(function: &Function<NDIM>) -> Self {
        let k = function.config().map_or(1, |config| config.k);
        let leaf_len = k.pow(NDIM as u32) as f64;
        Self {
            function: function.clone(),
            cost: Box::new(move |_key, node| 1.0 + node.coeffs().map_or(0.0, |c| c.len() as f64 / leaf_len)),
        }
    }

    /// Replaces the cost function.
    pub fn with_cost(mut self, cost: impl Fn(&Key<NDIM>, &Node) -> f64 + Send + Sync + 'static) -> Self {
        self.cost = Box::new(cost);
        self
    }

    /// Computes the balanced map.
    pub fn load_balance(&self) -> Result<Arc<TreePartitionMap<NDIM>>, MraError> {
        Ok(self.plan()?.map)
    }

    /// Computes the balanced map along with its per-rank costs.
    pub fn plan(&self) -> Result<BalancePlan<NDIM>, MraError> {
        let imp = self.function.imp()?;
        imp.settle()?;
        let nproc = imp.world.size();

        // key -> (cost, has_children, current owner)
        let gathered = imp.world.reduce(|rank| {
            imp.ranks[rank]
                .nodes
                .read()
                .iter()
                .map(|(key, node)| (*key, (self.cost)(key, node), node.has_children()))
                .collect::<Vec<_>>()
        });
        let mut table: AHashMap<Key<NDIM>, (f64, bool, usize)> = AHashMap::new();
        for (rank, records) in gathered.into_iter().enumerate() {
            for (key, cost, has_children) in records {
                table.insert(key, (cost, has_children, rank));
            }
        }

        let mut order = Vec::with_capacity(table.len());
        let mut stack = vec![Key::<NDIM>::root()];
        while let Some(key) = stack.pop() {
            let &(_, has_children, _) = table
                .get(&key)
                .ok_or_else(|| MraError::inconsistent(key, "node missing during load balance"))?;
            order.push(key);
            if has_children {
                let children = key.children().collect_vec();
                stack.extend(children.into_iter().rev());
            }
        }

        let costs = order.iter().map(|key| table[key].0).collect_vec();
        let total_cost: f64 = costs.iter().sum();
        let max_node_cost = costs.iter().copied().fold(0.0, f64::max);
        let target = total_cost / nproc as f64;

        // Each node goes to the chunk holding the midpoint of its cost.
        let mut prefix = 0.0;
        let chunks = costs
            .iter()
            .map(|&cost| {
                let midpoint = prefix + 0.5 * cost;
                prefix += cost;
                if target > 0.0 {
                    ((midpoint / target).floor() as usize).min(nproc - 1)
                } else {
                    0
                }
            })
            .collect_vec();

        let mut overlap = vec![vec![0.0; nproc]; nproc];
        for (key, &chunk) in order.iter().zip(&chunks) {
            let (cost, _, rank) = table[key];
            overlap[chunk][rank] += cost;
        }

        let mut chunk_rank: Vec<Option<usize>> = vec![None; nproc];
        let mut rank_taken = vec![false; nproc];
        let candidates = iproduct!(0..nproc, 0..nproc)
            .map(|(chunk, rank)| (overlap[chunk][rank], chunk, rank))
            .sorted_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
        for (_, chunk, rank) in candidates {
            if chunk_rank[chunk].is_none() && !rank_taken[rank] {
                chunk_rank[chunk] = Some(rank);
                rank_taken[rank] = true;
            }
        }
        let chunk_rank = chunk_rank
            .into_iter()
            .enumerate()
            .map(|(chunk, rank)| rank.unwrap_or(chunk))
            .collect_vec();

        let mut assignment = AHashMap::with_capacity(order.len());
        let mut rank_costs = vec![0.0; nproc];
        for ((key, &chunk), &cost) in order.iter().zip(&chunks).zip(&costs) {
            let rank = chunk_rank[chunk];
            assignment.insert(*key, rank);
            rank_costs[rank] += cost;
        }
        let retained_cost: f64 = (0..nproc).map(|chunk| overlap[chunk][chunk_rank[chunk]]).sum();

        let map = TreePartitionMap::from_assignment(nproc, &assignment).map_err(|e| imp.programmer(e))?;
        debug!(
            nproc,
            total_cost,
            target,
            retained_cost,
            partition_roots = map.num_partition_roots(),
            "load balance plan"
        );

        Ok(BalancePlan {
            map: Arc::new(map),
            rank_costs,
            total_cost,
            max_node_cost,
            retained_cost,
        })
    }
}

impl<const NDIM: usize> FunctionImpl<NDIM> {
    /// Sends every node whose owner changes under `pmap` to its new owner,
    /// then publishes `pmap`.
    pub(crate) fn redistribute(&self, pmap: Arc<dyn ProcessMap<NDIM>>) -> Result<(), MraError> {
        let start = Instant::now();
        self.settle()?;

        self.check_process_map(pmap.as_ref())?;

        let moved: usize = self
            .world
            .reduce(|rank| {
                let mut nodes = self.ranks[rank].nodes.write();
                let leaving = nodes
                    .keys()
                    .filter(|key| pmap.owner(key) != rank)
                    .copied()
                    .collect_vec();
                for key in &leaving {
                    if let Some(node) = nodes.remove(key) {
                        self.send(pmap.owner(key), Message::Migrate { key: *key, node });
                    }
                }
                debug!(rank, moved = leaving.len(), "migrating nodes");
                leaving.len()
            })
            .into_iter()
            .sum();

        self.settle()?;
        self.set_process_map(pmap);
        info!(moved, elapsed_ms = start.elapsed().as_millis() as u64, "redistributed function");
        Ok(())
    }
}
