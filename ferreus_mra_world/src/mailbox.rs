/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements per-rank FIFO inboxes for distributed objects.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::World;
use parking_lot::Mutex;
use std::{collections::VecDeque, fmt};

/// One FIFO inbox per rank.
///
/// Every sender appends to the destination's single queue, so messages from
/// any fixed sender to a fixed destination are received in send order.
pub struct Mailbox<M> {
    queues: Vec<Mutex<VecDeque<M>>>,
}

impl<M> fmt::Debug for Mailbox<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("ranks", &self.queues.len())
            .field("pending", &self.pending())
            .finish()
    }
}

impl<M> Mailbox<M> {
    /// Creates empty inboxes for `nproc` ranks.
    pub fn new(nproc: usize) -> Self {
        Self {
            queues: (0..nproc).map(|_| Mutex::new(VecDeque::new())).collect(),
        }
    }

    /// Enqueues `message` for rank `dest`.
    ///
    /// # Panics
    /// If `dest` is not a rank of this mailbox.
    pub fn send(&self, world: &World, dest: usize, message: M) {
        self.queues[dest].lock().push_back(message);
        world.count_message();
    }

    /// Takes the oldest message queued for `rank`.
    pub fn recv(&self, rank: usize) -> Option<M> {
        self.queues[rank].lock().pop_front()
    }

    /// Total messages waiting across all ranks.
    pub fn pending(&self) -> usize {
        self.queues.iter().map(|q| q.lock().len()).sum()
    }
}
