/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the operator traversal engine: derivative, products and linear combinations.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Operators producing a new function from one or two reconstructed operands.
//!
//! The result tree is built top-down. At each result key every operand
//! "slot" is fetched from the operand's owner: either the leaf at that key
//! (or at its nearest existing ancestor, projected down exactly), a signal
//! that the operand is finer there, or zero for a neighbour outside a
//! free-space boundary. If any slot is finer the key becomes interior and
//! the traversal recurses, otherwise the key becomes a leaf computed from the
//! slots. The result therefore refines both operands.

// # References
// [1] B. Alpert, G. Beylkin, D. Gines, L. Vozovoi, Adaptive solution of partial differential
//     equations in multiwavelet bases, Journal of Computational Physics 182 (1) (2002) 149-190.

use crate::{
    config::BoundaryCondition,
    error::{MraError, ProgrammerError, Stage},
    function::{Function, FunctionImpl},
    key::Key,
    messages::Message,
    node::Node,
    tensor::Tensor,
};
use std::{fmt, sync::Arc, time::Instant};
use tracing::info;

/// What an operator computes at a leaf of the result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum OperationKind {
    Diff { axis: usize },
    Mul,
    Gaxpy { alpha: f64, beta: f64 },
}

impl OperationKind {
    fn name(&self) -> &'static str {
        match self {
            OperationKind::Diff { .. } => "diff",
            OperationKind::Mul => "mul",
            OperationKind::Gaxpy { .. } => "gaxpy",
        }
    }
}

/// An operator together with its operands, shared by every key of one
/// traversal.
pub(crate) struct Operation<const NDIM: usize> {
    kind: OperationKind,
    operands: Vec<Arc<FunctionImpl<NDIM>>>,
    periodic: bool,
}

impl<const NDIM: usize> fmt::Debug for Operation<NDIM> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("kind", &self.kind)
            .field("operands", &self.operands.len())
            .field("periodic", &self.periodic)
            .finish()
    }
}

impl<const NDIM: usize> Operation<NDIM> {
    /// The `(operand, key)` each slot needs at result key `key`; `None` for
    /// a neighbour outside a free-space boundary.
    fn slot_targets(&self, key: &Key<NDIM>) -> Vec<Option<(usize, Key<NDIM>)>> {
        match self.kind {
            OperationKind::Diff { axis } => vec![
                Some((0, *key)),
                key.neighbor(axis, -1, self.periodic).map(|k| (0, k)),
                key.neighbor(axis, 1, self.periodic).map(|k| (0, k)),
            ],
            OperationKind::Mul | OperationKind::Gaxpy { .. } => vec![Some((0, *key)), Some((1, *key))],
        }
    }
}

/// Identifies one slot of a pending result key and the operand key it needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SlotRequest<const NDIM: usize> {
    /// Rank owning the result key.
    rank: usize,
    key: Key<NDIM>,
    slot: usize,
    target: Key<NDIM>,
}

/// What an operand holds for a requested key.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Found<const NDIM: usize> {
    /// Scaling coefficients of the leaf at `key`, the requested key or one
    /// of its ancestors.
    Leaf { key: Key<NDIM>, coeffs: Tensor },

    /// The operand is refined below the requested key.
    Finer,

    /// The requested neighbour lies outside the cell.
    Zero,
}

/// Continuation of a result key waiting for its slots.
#[derive(Debug)]
pub(crate) struct ApplyPending<const NDIM: usize> {
    op: Arc<Operation<NDIM>>,
    slots: Vec<Option<Found<NDIM>>>,
    remaining: usize,
}

impl<const NDIM: usize> FunctionImpl<NDIM> {
    /// Runs `kind` over `operands` (the first of which is `self`) and
    /// returns the fenced result.
    pub(crate) fn apply(
        &self,
        kind: OperationKind,
        operands: Vec<Arc<FunctionImpl<NDIM>>>,
    ) -> Result<Function<NDIM>, MraError> {
        let start = Instant::now();

        for operand in &operands {
            let mismatch = if !Arc::ptr_eq(&operand.world, &self.world) {
                Some("operands live in different worlds".to_string())
            } else if operand.k() != self.k() {
                Some(format!("orders differ: k = {} and k = {}", self.k(), operand.k()))
            } else if operand.cell != self.cell {
                Some("simulation cells differ".to_string())
            } else {
                None
            };
            if let Some(reason) = mismatch {
                return Err(self.programmer(ProgrammerError::Incompatible(reason)));
            }
        }

        for operand in &operands {
            operand.settle()?;
        }
        if operands.iter().any(|operand| operand.is_compressed()) {
            return Err(self.programmer(ProgrammerError::NotReconstructed { operation: kind.name() }));
        }

        let result = self.empty_like(None);
        let op = Arc::new(Operation {
            kind,
            operands,
            periodic: self.config.boundary == BoundaryCondition::Periodic,
        });
        let root = Key::root();
        result.send(result.owner(&root), Message::Apply { key: root, op });
        result.settle()?;

        let nodes: usize = result.world.reduce(|rank| result.local_size(rank)).into_iter().sum();
        info!(
            operation = kind.name(),
            nodes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "applied operator"
        );
        Ok(Function::from_impl(result))
    }

    pub(crate) fn handle_apply(&self, rank: usize, key: Key<NDIM>, op: Arc<Operation<NDIM>>) -> Result<(), MraError> {
        self.check_owner(rank, &key)?;
        let targets = op.slot_targets(&key);

        {
            let mut pending = self.ranks[rank].apply_pending.lock();
            let entry = ApplyPending {
                op: op.clone(),
                slots: vec![None; targets.len()],
                remaining: targets.len(),
            };
            if pending.insert(key, entry).is_some() {
                return Err(MraError::inconsistent(key, "result key visited twice"));
            }
        }

        for (slot, target) in targets.into_iter().enumerate() {
            let Some((operand, target)) = target else {
                self.fill_slot(rank, key, slot, Found::Zero)?;
                continue;
            };

            let source = op.operands[operand].clone();
            let request = SlotRequest {
                rank,
                key,
                slot,
                target,
            };
            let owner = source.owner(&target);
            if owner == rank {
                self.handle_fetch(rank, source, target, request)?;
            } else {
                self.send(
                    owner,
                    Message::Fetch {
                        source,
                        search: target,
                        request,
                    },
                );
            }
        }
        Ok(())
    }

    /// Looks up `search` in `source`. A missing key is forwarded to its
    /// parent's owner.
    pub(crate) fn handle_fetch(
        &self,
        rank: usize,
        source: Arc<FunctionImpl<NDIM>>,
        search: Key<NDIM>,
        request: SlotRequest<NDIM>,
    ) -> Result<(), MraError> {
        source.check_owner(rank, &search)?;

        let found = {
            let nodes = source.ranks[rank].nodes.read();
            match nodes.get(&search) {
                None => None,
                Some(node) if node.has_children() => {
                    if search != request.target {
                        return Err(MraError::inconsistent(search, "interior ancestor above a missing key"));
                    }
                    Some(Found::Finer)
                }
                Some(node) => {
                    let coeffs = node
                        .coeffs()
                        .cloned()
                        .ok_or_else(|| MraError::inconsistent(search, "operand leaf without coefficients"))?;
                    Some(Found::Leaf { key: search, coeffs })
                }
            }
        };

        if let Some(found) = found {
            if request.rank == rank {
                return self.accept_found(rank, request, found);
            }
            self.send(request.rank, Message::FetchReply { request, found });
            return Ok(());
        }

        let parent = search
            .parent()
            .ok_or_else(|| MraError::inconsistent(search, "operand has no root"))?;
        let owner = source.owner(&parent);
        if owner == rank {
            self.handle_fetch(rank, source, parent, request)
        } else {
            self.send(
                owner,
                Message::Fetch {
                    source,
                    search: parent,
                    request,
                },
            );
            Ok(())
        }
    }

    /// Receives a fetched slot, projecting ancestor coefficients down to the
    /// requested key.
    pub(crate) fn accept_found(
        &self,
        rank: usize,
        request: SlotRequest<NDIM>,
        found: Found<NDIM>,
    ) -> Result<(), MraError> {
        self.check_owner(rank, &request.key)?;
        let found = match found {
            Found::Leaf { key, coeffs } if key != request.target => Found::Leaf {
                key: request.target,
                coeffs: self.project_down(coeffs, &key, &request.target),
            },
            other => other,
        };
        self.fill_slot(rank, request.key, request.slot, found)
    }

    /// Exact scaling coefficients on descendant `to` of the box `from`.
    fn project_down(&self, mut coeffs: Tensor, from: &Key<NDIM>, to: &Key<NDIM>) -> Tensor {
        for level in from.level() + 1..=to.level() {
            if let Some(step) = to.ancestor_at(level) {
                coeffs = self.twoscale.project_to_child(&coeffs, step.child_index());
            }
        }
        coeffs
    }

    fn fill_slot(&self, rank: usize, key: Key<NDIM>, slot: usize, found: Found<NDIM>) -> Result<(), MraError> {
        let complete = {
            let mut pending = self.ranks[rank].apply_pending.lock();
            let entry = pending
                .get_mut(&key)
                .ok_or_else(|| MraError::inconsistent(key, "operand reply without a pending result key"))?;
            if entry.slots[slot].replace(found).is_some() {
                return Err(MraError::inconsistent(key, "duplicate operand reply"));
            }
            entry.remaining -= 1;
            if entry.remaining == 0 {
                pending.remove(&key)
            } else {
                None
            }
        };

        match complete {
            Some(entry) => self.finish_apply(rank, key, entry),
            None => Ok(()),
        }
    }

    fn finish_apply(&self, rank: usize, key: Key<NDIM>, entry: ApplyPending<NDIM>) -> Result<(), MraError> {
        let ApplyPending { op, slots, .. } = entry;
        let slots = slots
            .into_iter()
            .collect::<Option<Vec<Found<NDIM>>>>()
            .ok_or_else(|| MraError::inconsistent(key, "operator finished with an empty slot"))?;

        if slots.iter().any(|slot| matches!(slot, Found::Finer)) {
            self.insert_node(rank, key, Node::interior());
            for child in key.children() {
                let owner = self.owner(&child);
                if owner == rank {
                    self.handle_apply(rank, child, op.clone())?;
                } else {
                    self.send(owner, Message::Apply { key: child, op: op.clone() });
                }
            }
            return Ok(());
        }

        let coeffs = self.combine(op.kind, &key, slots)?;
        if !coeffs.is_finite() {
            return Err(MraError::anomaly(Stage::Operator, key));
        }
        self.insert_node(rank, key, Node::leaf(coeffs));
        Ok(())
    }

    /// Computes the result leaf at `key` from fully resolved slots.
    fn combine(&self, kind: OperationKind, key: &Key<NDIM>, slots: Vec<Found<NDIM>>) -> Result<Tensor, MraError> {
        let mut slots = slots.into_iter().map(|slot| match slot {
            Found::Leaf { coeffs, .. } => Some(coeffs),
            Found::Finer | Found::Zero => None,
        });
        let mut operand = || {
            slots
                .next()
                .flatten()
                .ok_or_else(|| MraError::inconsistent(key, "operand coefficients missing at result leaf"))
        };

        let ts = &self.twoscale;
        let scale = (1u64 << key.level()) as f64;

        match kind {
            OperationKind::Diff { axis } => {
                let centre = operand()?;
                let left = operand().ok();
                let right = operand().ok();

                let blocks = &ts.derivative;
                let mut out = centre.transform_axis(&blocks.zero, axis);
                if let Some(left) = left {
                    out.gaxpy(1.0, &left.transform_axis(&blocks.minus, axis), 1.0);
                }
                if let Some(right) = right {
                    out.gaxpy(1.0, &right.transform_axis(&blocks.plus, axis), 1.0);
                }
                out.scale(scale / self.cell.width(axis));
                Ok(out)
            }
            OperationKind::Mul => {
                let a = operand()?;
                let b = operand()?;

                // Values at the quadrature points, multiplied and projected back.
                let mut values = a.transform(&ts.quad_phi);
                values.emul(&b.transform(&ts.quad_phi));
                let mut out = values.transform(&ts.quad_phiw);
                out.scale(scale.powf(0.5 * NDIM as f64));
                Ok(out)
            }
            OperationKind::Gaxpy { alpha, beta } => {
                let mut a = operand()?;
                let b = operand()?;
                a.gaxpy(alpha, &b, beta);
                Ok(a)
            }
        }
    }
}
