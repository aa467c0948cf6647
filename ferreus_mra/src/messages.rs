/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares the active messages exchanged between ranks of a function tree.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    error::MraError,
    function::FunctionImpl,
    key::Key,
    node::Node,
    operators::{Found, Operation, SlotRequest},
    tensor::Tensor,
    traits::FunctionFunctor,
};
use ferreus_mra_world::RemoteRef;
use std::sync::Arc;

pub(crate) type SharedFunctor<const NDIM: usize> = Arc<dyn FunctionFunctor<NDIM>>;

/// Where an evaluation result is delivered.
pub(crate) type EvalReply = RemoteRef<Result<f64, MraError>>;

/// Where a node sends its scaling coefficients once compressed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CompressTarget<const NDIM: usize> {
    /// The root keeps its scaling block.
    Root,

    /// Slot `child` of the pending compression of `key` on `rank`.
    Parent {
        rank: usize,
        key: Key<NDIM>,
        child: usize,
    },
}

/// An operation on, or a reply about, one key. Each variant is handled by
/// the rank owning that key.
pub(crate) enum Message<const NDIM: usize> {
    /// Project `source` onto the subtree rooted at `key`.
    Project {
        key: Key<NDIM>,
        source: SharedFunctor<NDIM>,
    },

    /// Store `node` at `key` (remote allocation).
    Insert { key: Key<NDIM>, node: Node },

    /// Compress the subtree rooted at `key`.
    Compress {
        key: Key<NDIM>,
        reply: CompressTarget<NDIM>,
    },

    /// Scaling coefficients of child `child` of `parent`.
    CompressReply {
        parent: Key<NDIM>,
        child: usize,
        coeffs: Tensor,
    },

    /// Reconstruct the subtree rooted at `key`, given its scaling
    /// coefficients (`None` at the root, which keeps its own).
    Reconstruct {
        key: Key<NDIM>,
        coeffs: Option<Tensor>,
    },

    /// Evaluate at the simulation-coordinate `point`, descending from `key`.
    Eval {
        key: Key<NDIM>,
        point: [f64; NDIM],
        reply: EvalReply,
    },

    /// Delivers an evaluation result to the invoking rank.
    EvalReply {
        reply: EvalReply,
        value: Result<f64, MraError>,
    },

    /// Build the result of `op` in the subtree rooted at `key`.
    Apply {
        key: Key<NDIM>,
        op: Arc<Operation<NDIM>>,
    },

    /// Look up `search` in `source` on behalf of `request`, walking towards
    /// the root if it does not exist.
    Fetch {
        source: Arc<FunctionImpl<NDIM>>,
        search: Key<NDIM>,
        request: SlotRequest<NDIM>,
    },

    /// Answer to a [`Message::Fetch`].
    FetchReply {
        request: SlotRequest<NDIM>,
        found: Found<NDIM>,
    },

    /// A node moving to its owner under a new process map.
    Migrate { key: Key<NDIM>, node: Node },
}

impl<const NDIM: usize> Message<NDIM> {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Project { .. } => "project",
            Message::Insert { .. } => "insert",
            Message::Compress { .. } => "compress",
            Message::CompressReply { .. } => "compress_reply",
            Message::Reconstruct { .. } => "reconstruct",
            Message::Eval { .. } => "eval",
            Message::EvalReply { .. } => "eval_reply",
            Message::Apply { .. } => "apply",
            Message::Fetch { .. } => "fetch",
            Message::FetchReply { .. } => "fetch_reply",
            Message::Migrate { .. } => "migrate",
        }
    }
}
