/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the top-down conversion of a tree from the wavelet back to the scaling basis.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    error::{MraError, Stage},
    function::FunctionImpl,
    key::Key,
    messages::Message,
    tensor::Tensor,
};
use std::time::Instant;
use tracing::info;

impl<const NDIM: usize> FunctionImpl<NDIM> {
    /// Starts reconstruction at the root. A no-op if already reconstructed.
    pub(crate) fn reconstruct(&self, fence: bool) -> Result<(), MraError> {
        if !self.is_compressed() {
            return Ok(());
        }
        self.settle()?;
        self.set_compressed(false);

        let start = Instant::now();
        let root = Key::root();
        self.send(self.owner(&root), Message::Reconstruct { key: root, coeffs: None });

        if fence {
            self.settle()?;
            info!(elapsed_ms = start.elapsed().as_millis() as u64, "reconstructed function");
        }
        Ok(())
    }

    /// Interior nodes merge the scaling block handed down by the parent
    /// (the root uses its own), apply `H` and pass each child its block.
    /// Leaves store what they receive.
    pub(crate) fn handle_reconstruct(
        &self,
        rank: usize,
        key: Key<NDIM>,
        scaling: Option<Tensor>,
    ) -> Result<(), MraError> {
        self.check_owner(rank, &key)?;
        let k = self.k();

        let mut filtered = {
            let mut nodes = self.ranks[rank].nodes.write();
            let node = nodes
                .get_mut(&key)
                .ok_or_else(|| MraError::inconsistent(key, "node missing during reconstruct"))?;

            if node.is_leaf() {
                match scaling {
                    Some(coeffs) => node.set_coeffs(Some(coeffs)),
                    None if node.has_coeffs() => {}
                    None => return Err(MraError::inconsistent(key, "leaf received no coefficients")),
                }
                return Ok(());
            }

            node.take_coeffs()
                .ok_or_else(|| MraError::inconsistent(key, "interior node without wavelet coefficients"))?
        };

        if let Some(scaling) = &scaling {
            filtered.set_scaling_block(k, scaling);
        }

        let blocks = self.twoscale.unfilter(&filtered);
        if blocks.iter().any(|b| !b.is_finite()) {
            return Err(MraError::anomaly(Stage::Reconstruct, key));
        }

        for (child, block) in key.children().zip(blocks) {
            let owner = self.owner(&child);
            if owner == rank {
                self.handle_reconstruct(rank, child, Some(block))?;
            } else {
                self.send(
                    owner,
                    Message::Reconstruct {
                        key: child,
                        coeffs: Some(block),
                    },
                );
            }
        }
        Ok(())
    }
}
