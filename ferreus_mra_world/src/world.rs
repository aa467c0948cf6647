/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the world: rank set, object registry, fence, collective reductions and abort.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

use parking_lot::Mutex;
use rayon::prelude::*;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
};
use thiserror::Error;
use tracing::{error, trace};

/// Errors raised by the runtime itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    /// A world was requested with zero ranks.
    #[error("a world needs at least one rank")]
    NoRanks,

    /// The world was aborted; all further progress is refused.
    #[error("distributed computation aborted: {reason}")]
    Aborted { reason: String },

    /// The world became quiescent while a future was still unresolved.
    #[error("future was not resolved before the world became quiescent")]
    Unresolved,
}

/// A distributed object whose per-rank message queues are driven by
/// [`World::fence`].
pub trait WorldObject: Send + Sync {
    /// Handles every message currently queued for `rank` and returns how
    /// many were handled. Handlers may enqueue further messages, which are
    /// picked up by later supersteps.
    fn process(&self, rank: usize) -> usize;
}

/// A fixed set of ranks plus the distributed objects living on them.
pub struct World {
    /// Number of ranks.
    nproc: usize,

    /// Registered objects. Dead entries are pruned lazily.
    objects: Mutex<Vec<Weak<dyn WorldObject>>>,

    /// Serialises callers of [`World::fence`] and [`World::reduce`].
    progress: Mutex<()>,

    aborted: AtomicBool,
    abort_reason: Mutex<Option<String>>,

    /// Total messages sent since the world was created.
    messages_sent: AtomicU64,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("nproc", &self.nproc)
            .field("objects", &self.objects.lock().len())
            .field("aborted", &self.is_aborted())
            .field("messages_sent", &self.messages_sent())
            .finish()
    }
}

impl World {
    /// Creates a world with `nproc` ranks.
    pub fn new(nproc: usize) -> Result<Arc<Self>, WorldError> {
        if nproc == 0 {
            return Err(WorldError::NoRanks);
        }

        Ok(Arc::new(Self {
            nproc,
            objects: Mutex::new(Vec::new()),
            progress: Mutex::new(()),
            aborted: AtomicBool::new(false),
            abort_reason: Mutex::new(None),
            messages_sent: AtomicU64::new(0),
        }))
    }

    /// Number of ranks in the world.
    pub fn size(&self) -> usize {
        self.nproc
    }

    /// Registers a distributed object so that fences drive its mailboxes.
    ///
    /// The world only keeps a weak reference; an object that is dropped
    /// simply stops being processed.
    pub fn register(&self, object: Weak<dyn WorldObject>) {
        let mut objects = self.objects.lock();
        objects.retain(|o| o.strong_count() > 0);
        objects.push(object);
    }

    /// Records that a message was sent. Called by [`crate::Mailbox::send`].
    pub(crate) fn count_message(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Total messages sent through mailboxes of this world.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Aborts the world. The first reason wins; later aborts are ignored.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut slot = self.abort_reason.lock();
        if slot.is_none() {
            error!(%reason, "aborting distributed computation");
            *slot = Some(reason);
            self.aborted.store(true, Ordering::Release);
        }
    }

    /// Whether [`World::abort`] has been called.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Returns `Err(WorldError::Aborted)` once the world has been aborted.
    pub fn check_aborted(&self) -> Result<(), WorldError> {
        if !self.is_aborted() {
            return Ok(());
        }
        let reason = self
            .abort_reason
            .lock()
            .clone()
            .unwrap_or_else(|| String::from("unknown"));
        Err(WorldError::Aborted { reason })
    }

    fn live_objects(&self) -> Vec<Arc<dyn WorldObject>> {
        let mut objects = self.objects.lock();
        objects.retain(|o| o.strong_count() > 0);
        objects.iter().filter_map(Weak::upgrade).collect()
    }

    /// Drives every registered object until no rank has anything left to do.
    ///
    /// Each superstep lets every rank drain its queues for all live objects,
    /// with ranks running in parallel. The fence returns once a superstep
    /// handles no message at all, or with [`WorldError::Aborted`] as soon as
    /// the world has been aborted.
    pub fn fence(&self) -> Result<(), WorldError> {
        let _progress = self.progress.lock();

        let mut supersteps = 0usize;
        let mut handled_total = 0usize;
        loop {
            self.check_aborted()?;

            let objects = self.live_objects();
            let handled: usize = (0..self.nproc)
                .into_par_iter()
                .map(|rank| objects.iter().map(|object| object.process(rank)).sum::<usize>())
                .sum();

            if handled == 0 {
                break;
            }
            supersteps += 1;
            handled_total += handled;
        }

        trace!(supersteps, handled = handled_total, "fence complete");
        self.check_aborted()
    }

    /// Runs `op` once per rank, in parallel, and returns the results in rank
    /// order. Used for collectives such as norms and tree summaries.
    ///
    /// Must not be called from inside a message handler.
    pub fn reduce<T, F>(&self, op: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        let _progress = self.progress.lock();
        (0..self.nproc).into_par_iter().map(op).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Mailbox;

    /// Passes a token around the ring, remembering the order it was seen in.
    struct Ring {
        world: Arc<World>,
        mailbox: Mailbox<(usize, u32)>,
        log: Mutex<Vec<(usize, usize, u32)>>,
    }

    impl WorldObject for Ring {
        fn process(&self, rank: usize) -> usize {
            let mut handled = 0;
            while let Some((origin, hops)) = self.mailbox.recv(rank) {
                self.log.lock().push((rank, origin, hops));
                if hops > 0 {
                    let next = (rank + 1) % self.world.size();
                    self.mailbox.send(&self.world, next, (origin, hops - 1));
                }
                handled += 1;
            }
            handled
        }
    }

    fn ring(nproc: usize) -> (Arc<World>, Arc<Ring>) {
        let world = World::new(nproc).unwrap();
        let ring = Arc::new(Ring {
            world: world.clone(),
            mailbox: Mailbox::new(nproc),
            log: Mutex::new(Vec::new()),
        });
        let object: Arc<dyn WorldObject> = ring.clone();
        world.register(Arc::downgrade(&object));
        (world, ring)
    }

    #[test]
    fn zero_ranks_is_rejected() {
        assert_eq!(World::new(0).unwrap_err(), WorldError::NoRanks);
    }

    #[test]
    fn fence_runs_until_quiescent() {
        let (world, ring) = ring(4);
        ring.mailbox.send(&world, 0, (0, 10));
        ring.mailbox.send(&world, 2, (2, 3));
        world.fence().unwrap();

        let log = ring.log.lock();
        assert_eq!(log.len(), 11 + 4);
        assert_eq!(ring.mailbox.pending(), 0);
        assert_eq!(world.messages_sent(), 15);
    }

    #[test]
    fn messages_between_a_pair_stay_ordered() {
        let (world, ring) = ring(2);
        for i in 0..50 {
            ring.mailbox.send(&world, 1, (i, 0));
        }
        world.fence().unwrap();

        let origins: Vec<usize> = ring.log.lock().iter().map(|&(_, origin, _)| origin).collect();
        assert_eq!(origins, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn abort_stops_fence() {
        let (world, ring) = ring(3);
        ring.mailbox.send(&world, 0, (0, 5));
        world.abort("first");
        world.abort("second");

        let err = world.fence().unwrap_err();
        assert_eq!(err, WorldError::Aborted { reason: "first".into() });
        assert!(ring.log.lock().is_empty());
    }

    #[test]
    fn reduce_returns_rank_order() {
        let world = World::new(5).unwrap();
        let ranks = world.reduce(|rank| rank * 10);
        assert_eq!(ranks, vec![0, 10, 20, 30, 40]);
    }

    #[test]
    fn dropped_objects_are_not_processed() {
        let (world, ring) = ring(2);
        ring.mailbox.send(&world, 0, (0, 1));
        drop(ring);
        world.fence().unwrap();
        assert_eq!(world.live_objects().len(), 0);
    }
}
