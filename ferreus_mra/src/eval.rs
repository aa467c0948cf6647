/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements asynchronous point evaluation by descent through the distributed tree.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    error::{MraError, ProgrammerError, Stage},
    function::FunctionImpl,
    key::Key,
    legendre::scaling_functions,
    messages::{EvalReply, Message},
    tensor::Tensor,
};
use faer::Mat;
use ferreus_mra_world::{future, Future, RemoteRef};

/// The value of a function at a point, delivered on the invoking rank.
pub type EvalFuture = Future<Result<f64, MraError>>;

/// Outcome of looking at one node during descent.
enum Descent<const NDIM: usize> {
    Child(Key<NDIM>),
    Value(f64),
}

impl<const NDIM: usize> FunctionImpl<NDIM> {
    pub(crate) fn eval(&self, rank: usize, point: [f64; NDIM]) -> Result<EvalFuture, MraError> {
        let nproc = self.world.size();
        if rank >= nproc {
            return Err(self.programmer(ProgrammerError::InvalidRank { rank, nproc }));
        }
        if self.is_compressed() {
            return Err(self.programmer(ProgrammerError::CompressedEval));
        }
        let sim = self
            .cell
            .user_to_sim(&point)
            .ok_or_else(|| MraError::Domain { point: point.to_vec() })?;

        let (promise, future) = future(&self.world);
        let root = Key::root();
        self.send(
            self.owner(&root),
            Message::Eval {
                key: root,
                point: sim,
                reply: RemoteRef::new(rank, promise),
            },
        );
        Ok(future)
    }

    pub(crate) fn handle_eval(
        &self,
        rank: usize,
        key: Key<NDIM>,
        point: [f64; NDIM],
        reply: EvalReply,
    ) -> Result<(), MraError> {
        let step = self.check_owner(rank, &key).and_then(|()| self.descend(rank, &key, &point));

        match step {
            Ok(Descent::Child(child)) => {
                let owner = self.owner(&child);
                if owner == rank {
                    self.handle_eval(rank, child, point, reply)
                } else {
                    self.send(
                        owner,
                        Message::Eval {
                            key: child,
                            point,
                            reply,
                        },
                    );
                    Ok(())
                }
            }
            Ok(Descent::Value(value)) => {
                self.resolve_eval(rank, reply, Ok(value));
                Ok(())
            }
            Err(error) => {
                self.resolve_eval(rank, reply, Err(error.clone()));
                if error.is_fatal() {
                    Err(error)
                } else {
                    Ok(())
                }
            }
        }
    }

    fn descend(&self, rank: usize, key: &Key<NDIM>, point: &[f64; NDIM]) -> Result<Descent<NDIM>, MraError> {
        let nodes = self.ranks[rank].nodes.read();
        let node = nodes
            .get(key)
            .ok_or_else(|| MraError::inconsistent(key, "node missing during evaluation"))?;

        if node.has_children() {
            return Ok(Descent::Child(key.child_containing(point)));
        }

        let coeffs = node
            .coeffs()
            .ok_or_else(|| MraError::inconsistent(key, "leaf without coefficients during evaluation"))?;
        let value = self.eval_box(key, coeffs, point);
        if value.is_finite() {
            Ok(Descent::Value(value))
        } else {
            Err(MraError::anomaly(Stage::Evaluation, key))
        }
    }

    fn resolve_eval(&self, rank: usize, reply: EvalReply, value: Result<f64, MraError>) {
        if reply.rank() == rank {
            reply.set(value);
        } else {
            self.send(reply.rank(), Message::EvalReply { reply, value });
        }
    }

    /// Sums the scaling expansion of box `key` at the simulation-coordinate
    /// `point`: 2^(nN/2) Σ s_i Π_d φ_{i_d}(2^n x_d - l_d).
    pub(crate) fn eval_box(&self, key: &Key<NDIM>, coeffs: &Tensor, point: &[f64; NDIM]) -> f64 {
        let k = self.k();
        let scale = (1u64 << key.level()) as f64;
        let norm = scale.sqrt();

        // One `k × 1` column per dimension collapses the tensor to a scalar.
        let columns: Vec<Mat<f64>> = (0..NDIM)
            .map(|d| {
                let y = (point[d] * scale - key.translation()[d] as f64).clamp(0.0, 1.0);
                let phi = scaling_functions(y, k);
                Mat::from_fn(k, 1, |i, _| phi[i] * norm)
            })
            .collect();
        let matrices: Vec<&Mat<f64>> = columns.iter().collect();

        coeffs.transform_dims(&matrices).as_slice()[0]
    }
}
