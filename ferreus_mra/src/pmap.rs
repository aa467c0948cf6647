/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements process maps: the key -> owning rank assignment of a distributed tree.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Process maps.
//!
//! A process map is a pure function from [`Key`] to the rank that owns the
//! node. Every rank evaluates the same map, so any rank can route a message
//! for any key without communication.
use crate::{error::ProgrammerError, key::Key};
use ahash::{AHashMap, RandomState};
use std::{fmt, hash::BuildHasher};

/// Assigns every key to exactly one owning rank.
pub trait ProcessMap<const NDIM: usize>: Send + Sync + fmt::Debug {
    /// Rank owning `key`.
    fn owner(&self, key: &Key<NDIM>) -> usize;

    /// Number of ranks the map distributes over.
    fn nproc(&self) -> usize;
}

const MORTON_HASH_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// Default map. Hashes the parent's `(level, morton)` so that siblings are
/// kept together on one rank; the root lives on rank 0.
#[derive(Clone)]
pub struct MortonHashMap {
    nproc: usize,
    hasher: RandomState,
}

impl MortonHashMap {
    pub fn new(nproc: usize) -> Self {
        let [a, b, c, d] = MORTON_HASH_SEEDS;
        Self {
            nproc: nproc.max(1),
            hasher: RandomState::with_seeds(a, b, c, d),
        }
    }
}

impl fmt::Debug for MortonHashMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MortonHashMap")
            .field("nproc", &self.nproc)
            .finish()
    }
}

impl<const NDIM: usize> ProcessMap<NDIM> for MortonHashMap {
    fn owner(&self, key: &Key<NDIM>) -> usize {
        if self.nproc == 1 {
            return 0;
        }
        match key.parent() {
            None => 0,
            Some(parent) => {
                let hash = self.hasher.hash_one((parent.level(), parent.morton()));
                (hash % self.nproc as u64) as usize
            }
        }
    }

    fn nproc(&self) -> usize {
        self.nproc
    }
}

/// Places every key on a single rank.
#[derive(Debug, Clone, Copy)]
pub struct LocalMap {
    rank: usize,
    nproc: usize,
}

impl LocalMap {
    /// Fails with [`ProgrammerError::InvalidRank`] unless `rank < nproc`.
    pub fn new(rank: usize, nproc: usize) -> Result<Self, ProgrammerError> {
        if rank >= nproc {
            return Err(ProgrammerError::InvalidRank { rank, nproc });
        }
        Ok(Self { rank, nproc })
    }
}

impl<const NDIM: usize> ProcessMap<NDIM> for LocalMap {
    fn owner(&self, _key: &Key<NDIM>) -> usize {
        self.rank
    }

    fn nproc(&self) -> usize {
        self.nproc
    }
}

/// Map produced by the load balancer.
///
/// Records a rank for each partition root; a key belongs to the rank of its
/// nearest recorded ancestor-or-self. The root is always recorded.
#[derive(Debug, Clone)]
pub struct TreePartitionMap<const NDIM: usize> {
    nproc: usize,
    roots: AHashMap<Key<NDIM>, usize>,
}

impl<const NDIM: usize> TreePartitionMap<NDIM> {
    /// Builds a map from a complete key -> rank assignment, keeping only the
    /// keys whose rank differs from their parent's.
    ///
    /// Every assigned rank must be below `nproc`.
    pub fn from_assignment(
        nproc: usize,
        assignment: &AHashMap<Key<NDIM>, usize>,
    ) -> Result<Self, ProgrammerError> {
        if let Some(&rank) = assignment.values().find(|&&rank| rank >= nproc) {
            return Err(ProgrammerError::InvalidRank { rank, nproc });
        }

        let root = Key::root();
        let mut roots = AHashMap::new();
        roots.insert(root, assignment.get(&root).copied().unwrap_or(0));

        for (key, &rank) in assignment {
            let Some(parent) = key.parent() else {
                continue;
            };
            if assignment.get(&parent) != Some(&rank) {
                roots.insert(*key, rank);
            }
        }

        Ok(Self { nproc, roots })
    }

    /// Number of recorded partition roots.
    pub fn num_partition_roots(&self) -> usize {
        self.roots.len()
    }
}

impl<const NDIM: usize> ProcessMap<NDIM> for TreePartitionMap<NDIM> {
    fn owner(&self, key: &Key<NDIM>) -> usize {
        let mut current = *key;
        loop {
            if let Some(&rank) = self.roots.get(&current) {
                return rank;
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => return 0,
            }
        }
    }

    fn nproc(&self) -> usize {
        self.nproc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn siblings_share_a_rank() {
        let map = MortonHashMap::new(7);
        let parent = Key::<3>::new(3, [5, 1, 6]).unwrap();
        let owners: Vec<usize> = parent.children().map(|c| map.owner(&c)).collect();
        assert!(owners.iter().all(|&o| o == owners[0]));
        assert_eq!(ProcessMap::<3>::owner(&map, &Key::root()), 0);
    }

    #[test]
    fn hash_map_spreads_keys() {
        let map = MortonHashMap::new(4);
        let mut counts = [0usize; 4];
        let mut frontier = vec![Key::<2>::root()];
        for _ in 0..5 {
            frontier = frontier.iter().flat_map(|k| k.children()).collect();
        }
        for key in &frontier {
            counts[map.owner(key)] += 1;
        }
        assert!(counts.iter().all(|&c| c > 0));
    }

    #[test]
    fn partition_map_uses_nearest_recorded_ancestor() {
        let root = Key::<1>::root();
        let left = root.child(0);
        let right = root.child(1);

        let mut assignment = AHashMap::new();
        assignment.insert(root, 0);
        assignment.insert(left, 0);
        assignment.insert(right, 1);
        for child in right.children() {
            assignment.insert(child, 1);
        }

        let map = TreePartitionMap::from_assignment(2, &assignment).unwrap();
        assert_eq!(map.num_partition_roots(), 2);
        assert_eq!(map.owner(&right.child(1).child(0)), 1);
        assert_eq!(map.owner(&left.child(1)), 0);
    }

    #[test]
    fn maps_reject_ranks_outside_the_world() {
        assert!(matches!(
            LocalMap::new(5, 3),
            Err(ProgrammerError::InvalidRank { rank: 5, nproc: 3 })
        ));
        assert!(matches!(
            LocalMap::new(0, 0),
            Err(ProgrammerError::InvalidRank { rank: 0, nproc: 0 })
        ));
        assert_eq!(ProcessMap::<2>::owner(&LocalMap::new(2, 3).unwrap(), &Key::root()), 2);

        let root = Key::<1>::root();
        let mut assignment = AHashMap::new();
        assignment.insert(root, 0);
        assignment.insert(root.child(0), 0);
        assignment.insert(root.child(1), 4);
        assert!(matches!(
            TreePartitionMap::from_assignment(2, &assignment),
            Err(ProgrammerError::InvalidRank { rank: 4, nproc: 2 })
        ));
    }
}
