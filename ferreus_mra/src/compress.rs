/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the bottom-up conversion of a tree from the scaling to the wavelet basis.
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
    messages::{CompressTarget, Message},
    tensor::Tensor,
};
use std::time::Instant;
use tracing::info;

/// Continuation of an interior node waiting for its children's scaling
/// coefficients.
#[derive(Debug)]
pub(crate) struct CompressPending<const NDIM: usize> {
    slots: Vec<Option<Tensor>>,
    remaining: usize,
    reply: CompressTarget<NDIM>,
}

impl<const NDIM: usize> CompressPending<NDIM> {
    fn new(reply: CompressTarget<NDIM>) -> Self {
        Self {
            slots: vec![None; Key::<NDIM>::NUM_CHILDREN],
            remaining: Key::<NDIM>::NUM_CHILDREN,
            reply,
        }
    }
}

impl<const NDIM: usize> FunctionImpl<NDIM> {
    /// Starts compression at the root. A no-op if already compressed.
    ///
    /// Outstanding work is fenced first so that the traversal never meets a
    /// half-transformed tree.
    pub(crate) fn compress(&self, fence: bool) -> Result<(), MraError> {
        if self.is_compressed() {
            return Ok(());
        }
        self.settle()?;
        self.set_compressed(true);

        let start = Instant::now();
        let root = Key::root();
        self.send(
            self.owner(&root),
            Message::Compress {
                key: root,
                reply: CompressTarget::Root,
            },
        );

        if fence {
            self.settle()?;
            info!(elapsed_ms = start.elapsed().as_millis() as u64, "compressed function");
        }
        Ok(())
    }

    /// Leaves hand their coefficients to the parent; interior nodes wait
    /// for every child before filtering.
    pub(crate) fn handle_compress(
        &self,
        rank: usize,
        key: Key<NDIM>,
        reply: CompressTarget<NDIM>,
    ) -> Result<(), MraError> {
        self.check_owner(rank, &key)?;

        let leaf_coeffs = {
            let mut nodes = self.ranks[rank].nodes.write();
            let node = nodes
                .get_mut(&key)
                .ok_or_else(|| MraError::inconsistent(key, "node missing during compress"))?;
            if node.has_children() {
                None
            } else if reply == CompressTarget::Root {
                // A single-box tree keeps its scaling coefficients.
                return Ok(());
            } else {
                Some(
                    node.take_coeffs()
                        .ok_or_else(|| MraError::inconsistent(key, "leaf without coefficients"))?,
                )
            }
        };

        if let Some(coeffs) = leaf_coeffs {
            return self.deliver_scaling(rank, reply, coeffs);
        }

        self.ranks[rank]
            .compress_pending
            .lock()
            .insert(key, CompressPending::new(reply));

        for (child_index, child) in key.children().enumerate() {
            let child_reply = CompressTarget::Parent {
                rank,
                key,
                child: child_index,
            };
            let owner = self.owner(&child);
            if owner == rank {
                self.handle_compress(rank, child, child_reply)?;
            } else {
                self.send(
                    owner,
                    Message::Compress {
                        key: child,
                        reply: child_reply,
                    },
                );
            }
        }
        Ok(())
    }

    fn deliver_scaling(&self, rank: usize, reply: CompressTarget<NDIM>, coeffs: Tensor) -> Result<(), MraError> {
        match reply {
            CompressTarget::Root => Ok(()),
            CompressTarget::Parent {
                rank: dest,
                key,
                child,
            } if dest == rank => self.accept_compressed_child(rank, key, child, coeffs),
            CompressTarget::Parent {
                rank: dest,
                key,
                child,
            } => {
                self.send(
                    dest,
                    Message::CompressReply {
                        parent: key,
                        child,
                        coeffs,
                    },
                );
                Ok(())
            }
        }
    }

    /// Fills one child slot of `parent`, finishing it once all are in.
    pub(crate) fn accept_compressed_child(
        &self,
        rank: usize,
        parent: Key<NDIM>,
        child: usize,
        coeffs: Tensor,
    ) -> Result<(), MraError> {
        self.check_owner(rank, &parent)?;
        let complete = {
            let mut pending = self.ranks[rank].compress_pending.lock();
            let entry = pending
                .get_mut(&parent)
                .ok_or_else(|| MraError::inconsistent(parent, "compress reply without a pending parent"))?;
            if entry.slots[child].replace(coeffs).is_some() {
                return Err(MraError::inconsistent(parent, "duplicate compress reply"));
            }
            entry.remaining -= 1;
            if entry.remaining == 0 {
                pending.remove(&parent)
            } else {
                None
            }
        };

        match complete {
            Some(entry) => self.finish_compress(rank, parent, entry),
            None => Ok(()),
        }
    }

    fn finish_compress(&self, rank: usize, key: Key<NDIM>, entry: CompressPending<NDIM>) -> Result<(), MraError> {
        let k = self.k();
        let children = entry
            .slots
            .into_iter()
            .collect::<Option<Vec<Tensor>>>()
            .ok_or_else(|| MraError::inconsistent(key, "compress finished with an empty child slot"))?;

        let mut filtered = self.twoscale.filter(NDIM, &children);
        if !filtered.is_finite() {
            return Err(MraError::anomaly(Stage::Compress, key));
        }

        let scaling = filtered.scaling_block(k);
        if entry.reply != CompressTarget::Root {
            filtered.zero_scaling_block(k);
        }

        self.ranks[rank]
            .nodes
            .write()
            .get_mut(&key)
            .ok_or_else(|| MraError::inconsistent(key, "node missing during compress"))?
            .set_coeffs(Some(filtered));

        self.deliver_scaling(rank, entry.reply, scaling)
    }
}
