/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements single-assignment futures, promises and rank-addressed remote references.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{World, WorldError};
use parking_lot::Mutex;
use std::{fmt, sync::Arc};

struct Slot<T> {
    value: Mutex<Option<T>>,
}

/// The write end of a single-assignment value.
pub struct Promise<T> {
    slot: Arc<Slot<T>>,
}

/// The read end of a single-assignment value, resolved by fencing the world.
pub struct Future<T> {
    slot: Arc<Slot<T>>,
    world: Arc<World>,
}

/// A promise together with the rank that is waiting on it.
///
/// Handlers running on other ranks route their reply to `rank` before
/// setting the promise there.
pub struct RemoteRef<T> {
    rank: usize,
    promise: Promise<T>,
}

/// Creates a connected promise/future pair.
pub fn future<T>(world: &Arc<World>) -> (Promise<T>, Future<T>) {
    let slot = Arc::new(Slot {
        value: Mutex::new(None),
    });
    (
        Promise { slot: slot.clone() },
        Future {
            slot,
            world: world.clone(),
        },
    )
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Promise<T> {
    /// Sets the value. Returns `false` (and drops `value`) if it was already set.
    pub fn set(&self, value: T) -> bool {
        let mut slot = self.slot.value.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        true
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("set", &self.slot.value.lock().is_some())
            .finish()
    }
}

impl<T> Future<T> {
    /// A future that is already resolved.
    pub fn ready(world: &Arc<World>, value: T) -> Self {
        let (promise, future) = future(world);
        promise.set(value);
        future
    }

    /// Whether the value has arrived.
    pub fn is_ready(&self) -> bool {
        self.slot.value.lock().is_some()
    }

    fn take(&self) -> Option<T> {
        self.slot.value.lock().take()
    }

    /// Waits for the value, fencing the world if it has not arrived yet.
    ///
    /// A fence runs the world to quiescence, so a value that is still
    /// missing afterwards can never arrive and [`WorldError::Unresolved`] is
    /// returned.
    pub fn wait(self) -> Result<T, WorldError> {
        if let Some(value) = self.take() {
            return Ok(value);
        }
        self.world.fence()?;
        self.take().ok_or(WorldError::Unresolved)
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl<T> RemoteRef<T> {
    pub fn new(rank: usize, promise: Promise<T>) -> Self {
        Self { rank, promise }
    }

    /// The rank waiting for the value.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Resolves the promise. Only meaningful on [`RemoteRef::rank`].
    pub fn set(&self, value: T) -> bool {
        self.promise.set(value)
    }
}

impl<T> Clone for RemoteRef<T> {
    fn clone(&self) -> Self {
        Self {
            rank: self.rank,
            promise: self.promise.clone(),
        }
    }
}

impl<T> fmt::Debug for RemoteRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteRef").field("rank", &self.rank).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promise_is_single_assignment() {
        let world = World::new(1).unwrap();
        let (promise, future) = future::<i32>(&world);
        assert!(!future.is_ready());
        assert!(promise.set(3));
        assert!(!promise.set(4));
        assert_eq!(future.wait().unwrap(), 3);
    }

    #[test]
    fn unresolved_after_quiescence() {
        let world = World::new(2).unwrap();
        let (_promise, future) = future::<f64>(&world);
        assert_eq!(future.wait().unwrap_err(), WorldError::Unresolved);
    }

    #[test]
    fn aborted_world_is_reported_by_wait() {
        let world = World::new(2).unwrap();
        let (_promise, future) = future::<f64>(&world);
        world.abort("bad key");
        assert!(matches!(future.wait(), Err(WorldError::Aborted { .. })));
    }

    #[test]
    fn ready_future() {
        let world = World::new(1).unwrap();
        let future = Future::ready(&world, "done");
        assert!(future.is_ready());
        assert_eq!(future.wait().unwrap(), "done");
    }
}
