/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the builder that constructs function trees from functors or explicit leaves.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    config::{Basis, FunctionConfig},
    error::{MraError, ProgrammerError, Stage},
    function::{Function, FunctionImpl},
    key::Key,
    messages::{Message, SharedFunctor},
    node::Node,
    pmap::ProcessMap,
    tensor::Tensor,
    traits::FunctionFunctor,
};
use ahash::AHashMap;
use ferreus_mra_world::World;
use std::{sync::Arc, time::Instant};
use tracing::info;

enum Source<const NDIM: usize> {
    Zero,
    Functor(SharedFunctor<NDIM>),
    Leaves(Vec<(Key<NDIM>, Tensor)>),
}

/// Builds a [`Function`].
///
/// Without a source the function is identically zero (a single root leaf).
///
/// ```
/// use ferreus_mra::{FunctionConfig, FunctionFactory};
/// use ferreus_mra_world::World;
///
/// let world = World::new(2).unwrap();
/// let config = FunctionConfig::builder().k(5).thresh(1e-6).build();
/// let f = FunctionFactory::<1>::new(&world, config)
///     .functor(|x: &[f64; 1]| x[0] * x[0])
///     .build()
///     .unwrap();
/// assert!((f.value([0.5]).unwrap() - 0.25).abs() < 1e-12);
/// ```
pub struct FunctionFactory<const NDIM: usize> {
    world: Arc<World>,
    config: FunctionConfig,
    source: Source<NDIM>,
    pmap: Option<Arc<dyn ProcessMap<NDIM>>>,
}

impl<const NDIM: usize> FunctionFactory<NDIM> {
    pub fn new(world: &Arc<World>, config: FunctionConfig) -> Self {
        Self {
            world: world.clone(),
            config,
            source: Source::Zero,
            pmap: None,
        }
    }

    /// Projects `functor` (a function of user coordinates).
    pub fn functor(mut self, functor: impl FunctionFunctor<NDIM> + 'static) -> Self {
        self.source = Source::Functor(Arc::new(functor));
        self
    }

    /// Uses explicit leaf scaling coefficients. The leaves must form
    /// complete families; interior ancestors are filled in.
    pub fn from_leaves(mut self, leaves: impl IntoIterator<Item = (Key<NDIM>, Tensor)>) -> Self {
        self.source = Source::Leaves(leaves.into_iter().collect());
        self
    }

    /// Distributes the tree with `pmap` instead of the default
    /// [`crate::MortonHashMap`].
    pub fn process_map(mut self, pmap: Arc<dyn ProcessMap<NDIM>>) -> Self {
        self.pmap = Some(pmap);
        self
    }

    /// Builds the tree and fences.
    pub fn build(self) -> Result<Function<NDIM>, MraError> {
        let start = Instant::now();
        let basis = self.config.basis_on_construct;
        let imp = FunctionImpl::new(&self.world, self.config, self.pmap)?;
        let root = Key::root();

        match self.source {
            Source::Zero => imp.send(
                imp.owner(&root),
                Message::Insert {
                    key: root,
                    node: Node::leaf(Tensor::zeros(imp.k(), NDIM)),
                },
            ),
            Source::Functor(source) => imp.send(imp.owner(&root), Message::Project { key: root, source }),
            Source::Leaves(leaves) => imp.send_leaves(leaves)?,
        }
        imp.settle()?;

        let nodes: usize = imp.world.reduce(|rank| imp.local_size(rank)).into_iter().sum();
        info!(
            nodes,
            k = imp.k(),
            thresh = imp.config.thresh,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "projected function"
        );

        let function = Function::from_impl(imp);
        if basis == Basis::Compressed {
            function.compress(true)?;
        }
        Ok(function)
    }
}

impl<const NDIM: usize> FunctionImpl<NDIM> {
    /// Validates explicit leaves, fills in their ancestors and sends every
    /// node to its owner.
    fn send_leaves(&self, leaves: Vec<(Key<NDIM>, Tensor)>) -> Result<(), MraError> {
        let k = self.k();
        let root = Key::<NDIM>::root();
        if leaves.is_empty() {
            return Err(self.programmer(ProgrammerError::IncompleteFamily { key: root.to_string() }));
        }

        // true for leaves, false for interior nodes.
        let mut tree: AHashMap<Key<NDIM>, bool> = AHashMap::new();
        for (key, coeffs) in &leaves {
            if coeffs.extent() != k || coeffs.ndim() != NDIM {
                return Err(self.programmer(ProgrammerError::Incompatible(format!(
                    "leaf {key} holds a {}^{} tensor, expected {k}^{NDIM}",
                    coeffs.extent(),
                    coeffs.ndim()
                ))));
            }
            if !coeffs.is_finite() {
                return Err(MraError::anomaly(Stage::Projection, key));
            }
            if tree.insert(*key, true).is_some() {
                return Err(self.programmer(ProgrammerError::IncompleteFamily { key: key.to_string() }));
            }
        }

        for (key, _) in &leaves {
            let mut current = *key;
            while let Some(parent) = current.parent() {
                match tree.get(&parent) {
                    Some(false) => break,
                    Some(true) => {
                        return Err(self.programmer(ProgrammerError::IncompleteFamily {
                            key: parent.to_string(),
                        }))
                    }
                    None => {
                        tree.insert(parent, false);
                    }
                }
                current = parent;
            }
        }

        for (key, &is_leaf) in &tree {
            if !is_leaf && !key.children().all(|child| tree.contains_key(&child)) {
                return Err(self.programmer(ProgrammerError::IncompleteFamily { key: key.to_string() }));
            }
        }

        for (key, is_leaf) in tree {
            if !is_leaf {
                self.send(self.owner(&key), Message::Insert { key, node: Node::interior() });
            }
        }
        for (key, coeffs) in leaves {
            self.send(self.owner(&key), Message::Insert { key, node: Node::leaf(coeffs) });
        }
        Ok(())
    }
}
