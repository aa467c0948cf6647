/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements adaptive projection of a source function into a distributed tree.
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
    messages::{Message, SharedFunctor},
    node::Node,
    tensor::Tensor,
    traits::FunctionFunctor,
};
use rayon::prelude::*;

impl<const NDIM: usize> FunctionImpl<NDIM> {
    /// Projects `source` onto the scaling functions of the box `key` with
    /// `npt` Gauss-Legendre points per dimension:
    ///
    /// s_i = 2^(-nN/2) Σ_q w_q f(x_q) Π_d φ_{i_d}(y_{q_d})
    pub(crate) fn project_box(&self, key: &Key<NDIM>, source: &dyn FunctionFunctor<NDIM>) -> Tensor {
        let ts = &self.twoscale;
        let width = key.width();
        let corner = key.lower_corner();

        let values = Tensor::from_fn(ts.npt, NDIM, |index| {
            let sim: [f64; NDIM] = std::array::from_fn(|d| corner[d] + width * ts.points[index[d]]);
            source.evaluate(&self.cell.sim_to_user(&sim))
        });

        let mut coeffs = values.transform(&ts.quad_phiw);
        coeffs.scale(width.powf(0.5 * NDIM as f64));
        coeffs
    }

    /// Builds the subtree rooted at `key`.
    ///
    /// Above `initial_level` every box is refined. Below it, with
    /// autorefine, the children are projected and filtered: if the wavelet
    /// norm exceeds `thresh` each child is refined in turn, otherwise the
    /// children become leaves holding their (already computed) projections.
    pub(crate) fn handle_project(
        &self,
        rank: usize,
        key: Key<NDIM>,
        source: SharedFunctor<NDIM>,
    ) -> Result<(), MraError> {
        self.check_owner(rank, &key)?;
        let config = &self.config;
        let level = key.level();

        if level < config.initial_level {
            self.insert_node(rank, key, Node::interior());
            for child in key.children() {
                self.dispatch_project(rank, child, &source)?;
            }
            return Ok(());
        }

        if !config.autorefine {
            let coeffs = self.project_box(&key, source.as_ref());
            if !coeffs.is_finite() {
                return Err(MraError::anomaly(Stage::Projection, key));
            }
            self.insert_node(rank, key, Node::leaf(coeffs));
            return Ok(());
        }

        if level >= config.max_refine_level {
            return Err(ProgrammerError::MaxRefineLevel {
                key: key.to_string(),
                max_level: config.max_refine_level,
            }
            .into());
        }

        let children: Vec<Key<NDIM>> = key.children().collect();
        let projections: Vec<Tensor> = children
            .par_iter()
            .map(|child| self.project_box(child, source.as_ref()))
            .collect();
        if let Some(bad) = projections.iter().position(|c| !c.is_finite()) {
            return Err(MraError::anomaly(Stage::Projection, children[bad]));
        }

        let mut filtered = self.twoscale.filter(NDIM, &projections);
        filtered.zero_scaling_block(self.k());
        let wavelet_norm = filtered.normf();

        self.insert_node(rank, key, Node::interior());
        if wavelet_norm > config.thresh {
            for child in children {
                self.dispatch_project(rank, child, &source)?;
            }
        } else {
            for (child, coeffs) in children.into_iter().zip(projections) {
                self.place_node(rank, child, Node::leaf(coeffs));
            }
        }
        Ok(())
    }

    fn dispatch_project(
        &self,
        rank: usize,
        key: Key<NDIM>,
        source: &SharedFunctor<NDIM>,
    ) -> Result<(), MraError> {
        let owner = self.owner(&key);
        if owner == rank {
            self.handle_project(rank, key, source.clone())
        } else {
            self.send(
                owner,
                Message::Project {
                    key,
                    source: source.clone(),
                },
            );
            Ok(())
        }
    }
}
