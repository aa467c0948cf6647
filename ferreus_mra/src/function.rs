/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements distributed function trees: the shared implementation and the public handle.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    config::{FunctionConfig, SimulationCell},
    error::{MraError, ProgrammerError},
    eval::EvalFuture,
    key::Key,
    messages::Message,
    node::{Node, RankState},
    operators::OperationKind,
    pmap::{MortonHashMap, ProcessMap},
    tensor::Tensor,
    twoscale::TwoScale,
};
use ferreus_mra_world::{Mailbox, World, WorldObject};
use parking_lot::{Mutex, RwLock};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, trace};

/// The state of one distributed function, shared by every handle to it.
pub(crate) struct FunctionImpl<const NDIM: usize> {
    pub(crate) world: Arc<World>,
    pub(crate) config: FunctionConfig,
    pub(crate) cell: SimulationCell<NDIM>,
    pub(crate) twoscale: Arc<TwoScale>,

    /// Current process map. Replaced wholesale, and only between fences.
    pmap: RwLock<Arc<dyn ProcessMap<NDIM>>>,

    pub(crate) ranks: Vec<RankState<NDIM>>,
    mailbox: Mailbox<Message<NDIM>>,
    compressed: AtomicBool,

    /// First non-fatal error recorded by a handler.
    fault: Mutex<Option<MraError>>,
}

impl<const NDIM: usize> FunctionImpl<NDIM> {
    /// Creates an empty function registered with `world`.
    pub(crate) fn new(
        world: &Arc<World>,
        config: FunctionConfig,
        pmap: Option<Arc<dyn ProcessMap<NDIM>>>,
    ) -> Result<Arc<Self>, MraError> {
        let cell = config.validate::<NDIM>().map_err(|e| abort_with(world, e))?;
        let nproc = world.size();
        let pmap = pmap.unwrap_or_else(|| Arc::new(MortonHashMap::new(nproc)));
        if pmap.nproc() != nproc {
            let error = ProgrammerError::Incompatible(format!(
                "process map spans {} ranks but the world has {nproc}",
                pmap.nproc()
            ));
            return Err(abort_with(world, error));
        }

        let twoscale = Arc::new(TwoScale::new(config.k));
        Ok(Self::assemble(world.clone(), config, cell, twoscale, pmap))
    }

    fn assemble(
        world: Arc<World>,
        config: FunctionConfig,
        cell: SimulationCell<NDIM>,
        twoscale: Arc<TwoScale>,
        pmap: Arc<dyn ProcessMap<NDIM>>,
    ) -> Arc<Self> {
        let nproc = world.size();
        let imp = Arc::new(Self {
            world,
            config,
            cell,
            twoscale,
            pmap: RwLock::new(pmap),
            ranks: (0..nproc).map(|_| RankState::new()).collect(),
            mailbox: Mailbox::new(nproc),
            compressed: AtomicBool::new(false),
            fault: Mutex::new(None),
        });

        let object: Arc<dyn WorldObject> = imp.clone();
        imp.world.register(Arc::downgrade(&object));
        imp
    }

    /// An empty function with the same world, configuration and tables,
    /// on `pmap` or on this function's map.
    pub(crate) fn empty_like(&self, pmap: Option<Arc<dyn ProcessMap<NDIM>>>) -> Arc<Self> {
        Self::assemble(
            self.world.clone(),
            self.config.clone(),
            self.cell,
            self.twoscale.clone(),
            pmap.unwrap_or_else(|| self.process_map()),
        )
    }

    pub(crate) fn k(&self) -> usize {
        self.config.k
    }

    pub(crate) fn process_map(&self) -> Arc<dyn ProcessMap<NDIM>> {
        self.pmap.read().clone()
    }

    pub(crate) fn set_process_map(&self, pmap: Arc<dyn ProcessMap<NDIM>>) {
        *self.pmap.write() = pmap;
    }

    pub(crate) fn owner(&self, key: &Key<NDIM>) -> usize {
        self.pmap.read().owner(key)
    }

    pub(crate) fn is_compressed(&self) -> bool {
        self.compressed.load(Ordering::Acquire)
    }

    /// Sets the basis flag, returning the previous value.
    pub(crate) fn set_compressed(&self, compressed: bool) -> bool {
        self.compressed.swap(compressed, Ordering::AcqRel)
    }

    pub(crate) fn send(&self, dest: usize, message: Message<NDIM>) {
        self.mailbox.send(&self.world, dest, message);
    }

    /// Records an error raised by a handler. Fatal errors also abort the
    /// world.
    pub(crate) fn fail(&self, error: MraError) {
        if error.is_fatal() {
            self.world.abort(error.to_string());
        }
        let mut fault = self.fault.lock();
        if fault.is_none() {
            *fault = Some(error);
        }
    }

    /// Aborts the world for a programmer error detected at the API and
    /// returns it.
    pub(crate) fn programmer(&self, error: ProgrammerError) -> MraError {
        abort_with(&self.world, error)
    }

    /// Checks that `pmap` spans this world and sends every existing node to
    /// a rank inside it. Aborts the world otherwise.
    pub(crate) fn check_process_map(&self, pmap: &dyn ProcessMap<NDIM>) -> Result<(), MraError> {
        let nproc = self.world.size();
        if pmap.nproc() != nproc {
            return Err(self.programmer(ProgrammerError::Incompatible(format!(
                "process map spans {} ranks but the world has {nproc}",
                pmap.nproc()
            ))));
        }

        let stray = self
            .world
            .reduce(|rank| {
                self.ranks[rank]
                    .nodes
                    .read()
                    .keys()
                    .map(|key| pmap.owner(key))
                    .find(|&owner| owner >= nproc)
            })
            .into_iter()
            .flatten()
            .next();
        match stray {
            Some(rank) => Err(self.programmer(ProgrammerError::InvalidRank { rank, nproc })),
            None => Ok(()),
        }
    }

    /// Fences the world and reports the first error recorded by this
    /// function's handlers, or the world's abort. A reported handler error
    /// is cleared, so it surfaces exactly once.
    pub(crate) fn settle(&self) -> Result<(), MraError> {
        let fenced = self.world.fence();
        if let Some(error) = self.fault.lock().take() {
            return Err(error);
        }
        fenced.map_err(MraError::from)
    }

    /// Errors unless `rank` owns `key` under the current map.
    pub(crate) fn check_owner(&self, rank: usize, key: &Key<NDIM>) -> Result<(), MraError> {
        if self.owner(key) == rank {
            Ok(())
        } else {
            Err(MraError::inconsistent(key, "message delivered to a rank that does not own the key"))
        }
    }

    pub(crate) fn insert_node(&self, rank: usize, key: Key<NDIM>, node: Node) {
        self.ranks[rank].nodes.write().insert(key, node);
    }

    /// Stores `node` on the owner of `key`: directly when that is `rank`,
    /// otherwise with an `Insert` message.
    pub(crate) fn place_node(&self, rank: usize, key: Key<NDIM>, node: Node) {
        let owner = self.owner(&key);
        if owner == rank {
            self.insert_node(rank, key, node);
        } else {
            self.send(owner, Message::Insert { key, node });
        }
    }

    fn handle_insert(&self, rank: usize, key: Key<NDIM>, node: Node) -> Result<(), MraError> {
        self.check_owner(rank, &key)?;
        self.insert_node(rank, key, node);
        Ok(())
    }

    fn handle_migrate(&self, rank: usize, key: Key<NDIM>, node: Node) -> Result<(), MraError> {
        let previous = self.ranks[rank].nodes.write().insert(key, node);
        match previous {
            Some(_) => Err(MraError::inconsistent(key, "migrated node already present on destination")),
            None => Ok(()),
        }
    }

    /// Total nodes held on `rank`.
    pub(crate) fn local_size(&self, rank: usize) -> usize {
        self.ranks[rank].nodes.read().len()
    }

    fn dispatch(&self, rank: usize, message: Message<NDIM>) {
        trace!(rank, kind = message.kind(), "dispatch");
        let outcome = match message {
            Message::Project { key, source } => self.handle_project(rank, key, source),
            Message::Insert { key, node } => self.handle_insert(rank, key, node),
            Message::Compress { key, reply } => self.handle_compress(rank, key, reply),
            Message::CompressReply { parent, child, coeffs } => {
                self.accept_compressed_child(rank, parent, child, coeffs)
            }
            Message::Reconstruct { key, coeffs } => self.handle_reconstruct(rank, key, coeffs),
            Message::Eval { key, point, reply } => self.handle_eval(rank, key, point, reply),
            Message::EvalReply { reply, value } => {
                reply.set(value);
                Ok(())
            }
            Message::Apply { key, op } => self.handle_apply(rank, key, op),
            Message::Fetch {
                source,
                search,
                request,
            } => self.handle_fetch(rank, source, search, request),
            Message::FetchReply { request, found } => self.accept_found(rank, request, found),
            Message::Migrate { key, node } => self.handle_migrate(rank, key, node),
        };

        if let Err(error) = outcome {
            self.fail(error);
        }
    }
}

fn abort_with(world: &World, error: ProgrammerError) -> MraError {
    let error = MraError::Programmer(error);
    world.abort(error.to_string());
    error
}

impl<const NDIM: usize> WorldObject for FunctionImpl<NDIM> {
    fn process(&self, rank: usize) -> usize {
        let mut handled = 0;
        while let Some(message) = self.mailbox.recv(rank) {
            if self.world.is_aborted() {
                break;
            }
            self.dispatch(rank, message);
            handled += 1;
        }
        handled
    }
}

impl<const NDIM: usize> Drop for FunctionImpl<NDIM> {
    fn drop(&mut self) {
        for (rank, state) in self.ranks.iter_mut().enumerate() {
            let nodes = state.nodes.get_mut();
            let freed = nodes.len();
            nodes.clear();
            debug!(rank, freed, "freed local nodes");
        }
    }
}

/// A handle to a distributed function tree.
///
/// Cloning is shallow: clones share the same tree. The default handle is
/// uninitialised; most operations on it fail with
/// [`ProgrammerError::Uninitialized`], while `compress`, `reconstruct` and
/// `is_compressed` treat it as a no-op.
#[derive(Clone, Default)]
pub struct Function<const NDIM: usize> {
    pub(crate) imp: Option<Arc<FunctionImpl<NDIM>>>,
}

impl<const NDIM: usize> fmt::Debug for Function<NDIM> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.imp {
            None => f.write_str("Function(uninitialized)"),
            Some(imp) => f
                .debug_struct("Function")
                .field("k", &imp.config.k)
                .field("thresh", &imp.config.thresh)
                .field("compressed", &imp.is_compressed())
                .field("nproc", &imp.world.size())
                .finish(),
        }
    }
}

impl<const NDIM: usize> Function<NDIM> {
    pub(crate) fn from_impl(imp: Arc<FunctionImpl<NDIM>>) -> Self {
        Self { imp: Some(imp) }
    }

    pub(crate) fn imp(&self) -> Result<&Arc<FunctionImpl<NDIM>>, MraError> {
        self.imp
            .as_ref()
            .ok_or(MraError::Programmer(ProgrammerError::Uninitialized))
    }

    pub fn is_initialized(&self) -> bool {
        self.imp.is_some()
    }

    /// Whether the function is held in the compressed basis. `false` for an
    /// uninitialised handle.
    pub fn is_compressed(&self) -> bool {
        self.imp.as_ref().is_some_and(|imp| imp.is_compressed())
    }

    pub fn world(&self) -> Option<&Arc<World>> {
        self.imp.as_ref().map(|imp| &imp.world)
    }

    pub fn config(&self) -> Option<&FunctionConfig> {
        self.imp.as_ref().map(|imp| &imp.config)
    }

    pub fn process_map(&self) -> Option<Arc<dyn ProcessMap<NDIM>>> {
        self.imp.as_ref().map(|imp| imp.process_map())
    }

    /// Fences the world and reports the first error recorded by this
    /// function's handlers since the last report, or the world's abort.
    pub fn fence(&self) -> Result<(), MraError> {
        self.imp()?.settle()
    }

    /// Converts to the wavelet basis. With `fence = false` the conversion is
    /// only guaranteed complete after the next fence.
    pub fn compress(&self, fence: bool) -> Result<(), MraError> {
        match &self.imp {
            Some(imp) => imp.compress(fence),
            None => Ok(()),
        }
    }

    /// Converts back to the scaling basis at the leaves.
    pub fn reconstruct(&self, fence: bool) -> Result<(), MraError> {
        match &self.imp {
            Some(imp) => imp.reconstruct(fence),
            None => Ok(()),
        }
    }

    /// Evaluates at `point` (user coordinates) on behalf of rank 0.
    pub fn eval(&self, point: [f64; NDIM]) -> Result<EvalFuture, MraError> {
        self.eval_from(0, point)
    }

    /// Evaluates at `point` on behalf of `rank`; the value is delivered to
    /// that rank.
    pub fn eval_from(&self, rank: usize, point: [f64; NDIM]) -> Result<EvalFuture, MraError> {
        self.imp()?.eval(rank, point)
    }

    /// Evaluates at `point` and waits for the value.
    pub fn value(&self, point: [f64; NDIM]) -> Result<f64, MraError> {
        self.eval(point)?.wait()?
    }

    /// Derivative along `axis`.
    pub fn diff(&self, axis: usize) -> Result<Function<NDIM>, MraError> {
        let imp = self.imp()?;
        if axis >= NDIM {
            return Err(imp.programmer(ProgrammerError::UnsupportedDimension { axis, ndim: NDIM }));
        }
        imp.apply(OperationKind::Diff { axis }, vec![imp.clone()])
    }

    /// Point-wise product.
    pub fn mul(&self, other: &Function<NDIM>) -> Result<Function<NDIM>, MraError> {
        let imp = self.imp()?;
        imp.apply(OperationKind::Mul, vec![imp.clone(), other.imp()?.clone()])
    }

    /// Point-wise square.
    pub fn square(&self) -> Result<Function<NDIM>, MraError> {
        self.mul(self)
    }

    /// `alpha * self + beta * other`.
    pub fn gaxpy(&self, alpha: f64, other: &Function<NDIM>, beta: f64) -> Result<Function<NDIM>, MraError> {
        let imp = self.imp()?;
        imp.apply(
            OperationKind::Gaxpy { alpha, beta },
            vec![imp.clone(), other.imp()?.clone()],
        )
    }

    pub fn add(&self, other: &Function<NDIM>) -> Result<Function<NDIM>, MraError> {
        self.gaxpy(1.0, other, 1.0)
    }

    pub fn sub(&self, other: &Function<NDIM>) -> Result<Function<NDIM>, MraError> {
        self.gaxpy(1.0, other, -1.0)
    }

    /// A copy scaled by `alpha`, in the same basis as `self`.
    pub fn scale(&self, alpha: f64) -> Result<Function<NDIM>, MraError> {
        let copy = self.copy(None)?;
        let imp = copy.imp()?;
        imp.world.reduce(|rank| {
            imp.ranks[rank]
                .nodes
                .write()
                .values_mut()
                .filter_map(Node::coeffs_mut)
                .for_each(|coeffs| coeffs.scale(alpha));
        });
        Ok(copy)
    }

    /// An independent deep copy on `pmap`, or on this function's map.
    pub fn copy(&self, pmap: Option<Arc<dyn ProcessMap<NDIM>>>) -> Result<Function<NDIM>, MraError> {
        let imp = self.imp()?;
        imp.settle()?;
        if let Some(map) = &pmap {
            imp.check_process_map(map.as_ref())?;
        }

        let copy = imp.empty_like(pmap);
        copy.set_compressed(imp.is_compressed());
        imp.world.reduce(|rank| {
            for (key, node) in imp.ranks[rank].nodes.read().iter() {
                copy.place_node(rank, *key, node.clone());
            }
        });
        copy.settle()?;
        Ok(Function::from_impl(copy))
    }

    /// Moves every node to its owner under `pmap`, then makes `pmap` the
    /// function's map. The world is aborted if migration fails.
    pub fn redistribute(&self, pmap: Arc<dyn ProcessMap<NDIM>>) -> Result<(), MraError> {
        let imp = self.imp()?;
        imp.redistribute(pmap)
    }

    /// Coefficients of the leaf at `key`, if `key` is a leaf holding
    /// coefficients.
    pub fn leaf_coeffs(&self, key: &Key<NDIM>) -> Result<Option<Tensor>, MraError> {
        let imp = self.imp()?;
        imp.settle()?;
        let rank = imp.owner(key);
        let nodes = imp.ranks[rank].nodes.read();
        Ok(nodes
            .get(key)
            .filter(|node| node.is_leaf())
            .and_then(|node| node.coeffs().cloned()))
    }
}
