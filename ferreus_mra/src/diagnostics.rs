/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements collective diagnostics: norms, per-level summaries and tree verification.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    error::MraError,
    function::Function,
    key::{Key, Level},
    node::Node,
};
use ahash::AHashMap;
use serde::Serialize;
use std::fmt;

/// Node statistics of one level of a tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSummary {
    pub level: Level,
    pub nodes: usize,
    pub leaves: usize,
    /// Frobenius norm of all coefficients stored at this level.
    pub norm: f64,
}

/// Per-level and per-rank statistics of a tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeSummary {
    pub compressed: bool,
    pub levels: Vec<LevelSummary>,
    pub nodes_per_rank: Vec<usize>,
}

impl TreeSummary {
    pub fn total_nodes(&self) -> usize {
        self.levels.iter().map(|l| l.nodes).sum()
    }

    pub fn total_leaves(&self) -> usize {
        self.levels.iter().map(|l| l.leaves).sum()
    }

    pub fn max_level(&self) -> Level {
        self.levels.last().map_or(0, |l| l.level)
    }
}

impl fmt::Display for TreeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let basis = if self.compressed { "compressed" } else { "reconstructed" };
        writeln!(
            f,
            "function tree ({basis}): {} nodes, {} leaves",
            self.total_nodes(),
            self.total_leaves()
        )?;
        writeln!(f, "{:>5} {:>10} {:>10} {:>14}", "level", "nodes", "leaves", "norm")?;
        for level in &self.levels {
            writeln!(
                f,
                "{:>5} {:>10} {:>10} {:>14.6e}",
                level.level, level.nodes, level.leaves, level.norm
            )?;
        }
        write!(f, "nodes per rank: {:?}", self.nodes_per_rank)
    }
}

/// What verification needs to know about one node.
struct NodeRecord {
    rank: usize,
    has_children: bool,
    coeff_extent: Option<usize>,
}

impl<const NDIM: usize> Function<NDIM> {
    /// Squared L2 norm in user coordinates. Equal in both bases.
    pub fn norm2sq(&self) -> Result<f64, MraError> {
        let imp = self.imp()?;
        imp.settle()?;
        let sum: f64 = imp
            .world
            .reduce(|rank| {
                imp.ranks[rank]
                    .nodes
                    .read()
                    .values()
                    .filter_map(|node| node.coeffs())
                    .map(|coeffs| coeffs.sum_sq())
                    .sum::<f64>()
            })
            .into_iter()
            .sum();
        Ok(sum * imp.cell.volume())
    }

    /// L2 norm in user coordinates.
    pub fn norm2(&self) -> Result<f64, MraError> {
        Ok(self.norm2sq()?.sqrt())
    }

    /// Gathers per-level and per-rank statistics.
    pub fn summary(&self) -> Result<TreeSummary, MraError> {
        let imp = self.imp()?;
        imp.settle()?;

        // level -> (nodes, leaves, sum of squares), per rank.
        let per_rank = imp.world.reduce(|rank| {
            let nodes = imp.ranks[rank].nodes.read();
            let mut levels: AHashMap<Level, (usize, usize, f64)> = AHashMap::new();
            for (key, node) in nodes.iter() {
                let entry = levels.entry(key.level()).or_default();
                entry.0 += 1;
                entry.1 += usize::from(node.is_leaf());
                entry.2 += node.coeffs().map_or(0.0, |c| c.sum_sq());
            }
            (nodes.len(), levels)
        });

        let mut merged: AHashMap<Level, (usize, usize, f64)> = AHashMap::new();
        let mut nodes_per_rank = Vec::with_capacity(per_rank.len());
        for (count, levels) in per_rank {
            nodes_per_rank.push(count);
            for (level, (nodes, leaves, sum_sq)) in levels {
                let entry = merged.entry(level).or_default();
                entry.0 += nodes;
                entry.1 += leaves;
                entry.2 += sum_sq;
            }
        }

        let mut levels: Vec<LevelSummary> = merged
            .into_iter()
            .map(|(level, (nodes, leaves, sum_sq))| LevelSummary {
                level,
                nodes,
                leaves,
                norm: sum_sq.sqrt(),
            })
            .collect();
        levels.sort_by_key(|l| l.level);

        Ok(TreeSummary {
            compressed: imp.is_compressed(),
            levels,
            nodes_per_rank,
        })
    }

    /// Prints the tree summary to stdout.
    pub fn print_tree(&self) -> Result<(), MraError> {
        let summary = self.summary()?;
        println!("{summary}");
        Ok(())
    }

    /// Gathers a copy of every node onto the caller, ordered by level and
    /// then translation.
    pub fn nodes(&self) -> Result<Vec<(Key<NDIM>, Node)>, MraError> {
        let imp = self.imp()?;
        imp.settle()?;

        let mut nodes: Vec<(Key<NDIM>, Node)> = imp
            .world
            .reduce(|rank| {
                imp.ranks[rank]
                    .nodes
                    .read()
                    .iter()
                    .map(|(key, node)| (*key, node.clone()))
                    .collect::<Vec<_>>()
            })
            .into_iter()
            .flatten()
            .collect();
        nodes.sort_by_key(|(key, _)| (key.level(), *key.translation()));
        Ok(nodes)
    }

    /// Checks the structural invariants of the whole tree: every node sits
    /// on its owner, families are complete, and each node holds what its
    /// basis requires.
    pub fn verify_tree(&self) -> Result<(), MraError> {
        let imp = self.imp()?;
        imp.settle()?;
        let k = imp.k();
        let compressed = imp.is_compressed();
        let pmap = imp.process_map();

        let gathered = imp.world.reduce(|rank| {
            imp.ranks[rank]
                .nodes
                .read()
                .iter()
                .map(|(key, node)| {
                    let record = NodeRecord {
                        rank,
                        has_children: node.has_children(),
                        coeff_extent: node.coeffs().map(|c| c.extent()),
                    };
                    (*key, record)
                })
                .collect::<Vec<_>>()
        });
        let tree: AHashMap<Key<NDIM>, NodeRecord> = gathered.into_iter().flatten().collect();

        let root = Key::<NDIM>::root();
        if !tree.contains_key(&root) {
            return Err(MraError::inconsistent(root, "root missing"));
        }

        for (key, record) in &tree {
            if pmap.owner(key) != record.rank {
                return Err(MraError::inconsistent(key, "node stored away from its owner"));
            }
            if let Some(parent) = key.parent() {
                if !tree.get(&parent).is_some_and(|p| p.has_children) {
                    return Err(MraError::inconsistent(key, "parent missing or not interior"));
                }
            }
            if record.has_children && !key.children().all(|child| tree.contains_key(&child)) {
                return Err(MraError::inconsistent(key, "incomplete family"));
            }

            let expected = match (compressed, record.has_children) {
                (false, false) => Some(k),
                (false, true) => None,
                (true, true) => Some(2 * k),
                (true, false) if *key == root => Some(k),
                (true, false) => None,
            };
            if record.coeff_extent != expected {
                return Err(MraError::inconsistent(key, "coefficients do not match the basis"));
            }
        }
        Ok(())
    }
}
