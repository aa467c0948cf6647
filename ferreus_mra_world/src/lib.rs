/////////////////////////////////////////////////////////////////////////////////////////////
//
// Exposes the public API for the in-process distributed runtime used by ferreus_mra.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Distributed runtime
//!
//! A small message-passing runtime that models a set of cooperating ranks
//! ("processes") inside one OS process.
//!
//! Each distributed object registers with a [`World`] and owns one FIFO
//! [`Mailbox`] per rank. Nothing is handled at send time: messages are only
//! processed when the world is fenced. [`World::fence`] runs supersteps in
//! which every rank drains its inbox in parallel on the rayon thread pool,
//! and returns once a superstep handles no messages (global quiescence).
//!
//! Values that will be produced remotely are represented by a [`Future`]
//! paired with a [`Promise`]. A [`RemoteRef`] names the rank that is waiting
//! for the value so that replies can be routed back to it.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ferreus_mra_world::{Mailbox, World, WorldObject};
//!
//! struct Counter {
//!     world: Arc<World>,
//!     mailbox: Mailbox<u32>,
//!     seen: parking_lot::Mutex<Vec<u32>>,
//! }
//!
//! impl WorldObject for Counter {
//!     fn process(&self, rank: usize) -> usize {
//!         let mut handled = 0;
//!         while let Some(hops) = self.mailbox.recv(rank) {
//!             self.seen.lock().push(hops);
//!             if hops > 0 {
//!                 let next = (rank + 1) % self.world.size();
//!                 self.mailbox.send(&self.world, next, hops - 1);
//!             }
//!             handled += 1;
//!         }
//!         handled
//!     }
//! }
//!
//! let world = World::new(3).unwrap();
//! let counter = Arc::new(Counter {
//!     world: world.clone(),
//!     mailbox: Mailbox::new(3),
//!     seen: parking_lot::Mutex::new(Vec::new()),
//! });
//! let object: Arc<dyn WorldObject> = counter.clone();
//! world.register(Arc::downgrade(&object));
//!
//! counter.mailbox.send(&world, 0, 5);
//! world.fence().unwrap();
//! assert_eq!(counter.seen.lock().len(), 6);
//! ```

mod future;
mod mailbox;
mod world;

#[doc(inline)]
pub use world::{World, WorldError, WorldObject};

#[doc(inline)]
pub use mailbox::Mailbox;

#[doc(inline)]
pub use future::{future, Future, Promise, RemoteRef};
