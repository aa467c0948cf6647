/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements tree keys (level + translation) and their Morton-ordered navigation.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Tree keys.
//!
//! A [`Key`] names one box of the dyadic subdivision of the unit hypercube:
//! at level `n` the box with translation `l` spans
//! `[l_d / 2^n, (l_d + 1) / 2^n]` in every dimension `d`.
//!
//! Children are numbered in Morton order: bit `d` of the child index is the
//! offset of the child in dimension `d`. [`Key::morton`] interleaves the
//! translation bits in the same way, so sorting siblings by Morton code
//! sorts them by child index.
use crate::error::ProgrammerError;
use std::{cmp::Ordering, fmt};

/// Refinement level of a key.
pub type Level = u32;

/// One component of a key's translation.
pub type Translation = u64;

/// Finest level a key may have.
pub const MAX_LEVEL: Level = 30;

/// Most dimensions a Morton code of a [`MAX_LEVEL`] key can interleave.
pub const MAX_NDIM: usize = 4;

/// A box in the dyadic tree over `[0, 1]^NDIM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key<const NDIM: usize> {
    level: Level,
    translation: [Translation; NDIM],
}

impl<const NDIM: usize> Key<NDIM> {
    /// Number of children of any key.
    pub const NUM_CHILDREN: usize = 1 << NDIM;

    /// The root box, covering the whole cell.
    pub fn root() -> Self {
        Self {
            level: 0,
            translation: [0; NDIM],
        }
    }

    /// Creates a key, rejecting levels above [`MAX_LEVEL`] and translations
    /// outside `[0, 2^level)`.
    pub fn new(level: Level, translation: [Translation; NDIM]) -> Result<Self, ProgrammerError> {
        if level > MAX_LEVEL || translation.iter().any(|&l| l >> level != 0) {
            return Err(ProgrammerError::InvalidKey {
                level,
                translation: translation.to_vec(),
            });
        }
        Ok(Self { level, translation })
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn translation(&self) -> &[Translation; NDIM] {
        &self.translation
    }

    /// The parent key, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.level == 0 {
            return None;
        }
        Some(Self {
            level: self.level - 1,
            translation: self.translation.map(|l| l >> 1),
        })
    }

    /// The child with Morton index `index` (`0..NUM_CHILDREN`).
    pub fn child(&self, index: usize) -> Self {
        debug_assert!(index < Self::NUM_CHILDREN);
        debug_assert!(self.level < MAX_LEVEL);

        let mut translation = self.translation;
        for (d, l) in translation.iter_mut().enumerate() {
            *l = (*l << 1) | ((index >> d) & 1) as Translation;
        }
        Self {
            level: self.level + 1,
            translation,
        }
    }

    /// All children in Morton order.
    pub fn children(&self) -> impl Iterator<Item = Self> {
        let key = *self;
        (0..Self::NUM_CHILDREN).map(move |index| key.child(index))
    }

    /// Position of this key among its siblings.
    pub fn child_index(&self) -> usize {
        self.translation
            .iter()
            .enumerate()
            .map(|(d, &l)| ((l & 1) as usize) << d)
            .sum()
    }

    /// The ancestor (or self) at `level`, or `None` if `level` is finer than
    /// this key.
    pub fn ancestor_at(&self, level: Level) -> Option<Self> {
        if level > self.level {
            return None;
        }
        let shift = self.level - level;
        Some(Self {
            level,
            translation: self.translation.map(|l| l >> shift),
        })
    }

    /// Whether `self` is `other` or one of its ancestors.
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.ancestor_at(self.level) == Some(*self)
    }

    /// The key `step` boxes away along `axis` at the same level.
    ///
    /// Without periodicity, stepping outside `[0, 2^level)` yields `None`.
    pub fn neighbor(&self, axis: usize, step: i64, periodic: bool) -> Option<Self> {
        let extent = 1i64 << self.level;
        let shifted = self.translation[axis] as i64 + step;
        let wrapped = if periodic {
            shifted.rem_euclid(extent)
        } else if (0..extent).contains(&shifted) {
            shifted
        } else {
            return None;
        };

        let mut translation = self.translation;
        translation[axis] = wrapped as Translation;
        Some(Self {
            level: self.level,
            translation,
        })
    }

    /// Bit-interleaved linearisation of the translation.
    pub fn morton(&self) -> u128 {
        let mut code = 0u128;
        for bit in 0..self.level as usize {
            for (d, &l) in self.translation.iter().enumerate() {
                code |= (((l >> bit) & 1) as u128) << (bit * NDIM + d);
            }
        }
        code
    }

    /// Width of the box in simulation coordinates.
    pub fn width(&self) -> f64 {
        (-(self.level as f64)).exp2()
    }

    /// Lower corner of the box in simulation coordinates.
    pub fn lower_corner(&self) -> [f64; NDIM] {
        let width = self.width();
        self.translation.map(|l| l as f64 * width)
    }

    /// Whether the (closed) box contains the simulation-coordinate `point`.
    pub fn contains(&self, point: &[f64; NDIM]) -> bool {
        let width = self.width();
        self.translation
            .iter()
            .zip(point)
            .all(|(&l, &x)| (l as f64 * width..=(l + 1) as f64 * width).contains(&x))
    }

    /// The child whose box contains `point`. Points on a shared face go to
    /// the upper child; points outside are clamped to the nearest child.
    pub fn child_containing(&self, point: &[f64; NDIM]) -> Self {
        let scale = (1u64 << (self.level + 1)) as f64;
        let index = self
            .translation
            .iter()
            .zip(point)
            .enumerate()
            .map(|(d, (&l, &x))| {
                let offset = ((x * scale).floor() as i64 - 2 * l as i64).clamp(0, 1);
                (offset as usize) << d
            })
            .sum();
        self.child(index)
    }
}

impl<const NDIM: usize> Ord for Key<NDIM> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level
            .cmp(&other.level)
            .then_with(|| self.morton().cmp(&other.morton()))
    }
}

impl<const NDIM: usize> PartialOrd for Key<NDIM> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<const NDIM: usize> fmt::Display for Key<NDIM> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {:?})", self.level, self.translation)
    }
}
