/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares tree nodes and the per-rank storage that holds them.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    compress::CompressPending,
    key::Key,
    operators::ApplyPending,
    tensor::Tensor,
};
use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};

/// One box of a function tree.
///
/// What `coeffs` holds depends on the basis:
/// - reconstructed: `k^N` scaling coefficients at leaves, nothing at
///   interior nodes;
/// - compressed: the `(2k)^N` filtered tensor at interior nodes with the
///   scaling block zeroed everywhere but the root, nothing at leaves (a root
///   leaf keeps its scaling coefficients).
///
/// Outside the crate a node is read-only, so the coefficients a tree holds
/// can only change through [`crate::Function`] operations:
///
/// ```compile_fail
/// use ferreus_mra::{Node, Tensor};
///
/// let mut node = Node::leaf(Tensor::zeros(2, 1));
/// node.set_coeffs(None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    coeffs: Option<Tensor>,
    has_children: bool,
}

impl Node {
    pub fn leaf(coeffs: Tensor) -> Self {
        Self {
            coeffs: Some(coeffs),
            has_children: false,
        }
    }

    pub fn interior() -> Self {
        Self {
            coeffs: None,
            has_children: true,
        }
    }

    pub fn coeffs(&self) -> Option<&Tensor> {
        self.coeffs.as_ref()
    }

    pub(crate) fn coeffs_mut(&mut self) -> Option<&mut Tensor> {
        self.coeffs.as_mut()
    }

    pub fn has_coeffs(&self) -> bool {
        self.coeffs.is_some()
    }

    pub(crate) fn set_coeffs(&mut self, coeffs: Option<Tensor>) {
        self.coeffs = coeffs;
    }

    pub(crate) fn take_coeffs(&mut self) -> Option<Tensor> {
        self.coeffs.take()
    }

    pub fn has_children(&self) -> bool {
        self.has_children
    }

    pub fn is_leaf(&self) -> bool {
        !self.has_children
    }
}

/// Key -> node table of one rank.
pub type NodeMap<const NDIM: usize> = AHashMap<Key<NDIM>, Node>;

/// Everything a function keeps on one rank: the nodes it owns and the
/// continuations of traversals waiting for replies.
#[derive(Debug)]
pub(crate) struct RankState<const NDIM: usize> {
    pub nodes: RwLock<NodeMap<NDIM>>,
    pub compress_pending: Mutex<AHashMap<Key<NDIM>, CompressPending<NDIM>>>,
    pub apply_pending: Mutex<AHashMap<Key<NDIM>, ApplyPending<NDIM>>>,
}

impl<const NDIM: usize> RankState<NDIM> {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(AHashMap::new()),
            compress_pending: Mutex::new(AHashMap::new()),
            apply_pending: Mutex::new(AHashMap::new()),
        }
    }
}
