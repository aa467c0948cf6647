/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares configuration types for function trees and the user <-> simulation cell mapping.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Declares configuration types for function trees.
use crate::{
    error::ProgrammerError,
    key::{Level, MAX_LEVEL, MAX_NDIM},
};
use serde::{Deserialize, Serialize};

/// Largest supported multiwavelet order.
pub const MAX_K: usize = 30;

/// Basis in which a function's coefficients are held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Basis {
    /// Scaling coefficients at the leaves.
    Reconstructed,

    /// Wavelet (difference) coefficients at interior nodes, plus the root's
    /// scaling coefficients.
    Compressed,
}

impl Default for Basis {
    fn default() -> Self {
        Basis::Reconstructed
    }
}

/// Treatment of the simulation cell boundary by the derivative operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryCondition {
    /// Free space: the function is zero outside the cell.
    Zero,

    /// The cell wraps around in every dimension.
    Periodic,
}

impl Default for BoundaryCondition {
    fn default() -> Self {
        BoundaryCondition::Zero
    }
}

/// Parameters of a function tree.
///
/// ### Default Values
/// - `k`: `6`
/// - `thresh`: `1e-4`
/// - `initial_level`: `2`
/// - `max_refine_level`: `30`
/// - `autorefine`: `true`
/// - `basis_on_construct`: `Basis::Reconstructed`
/// - `cell`: `None` (the unit box)
/// - `boundary`: `BoundaryCondition::Zero`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionConfig {
    /// Multiwavelet order: scaling functions per dimension (1..=30).
    pub k: usize,

    /// Truncation threshold ε used by adaptive projection.
    pub thresh: f64,

    /// Level down to which the tree is refined unconditionally.
    pub initial_level: Level,

    /// Finest level adaptive refinement may reach.
    pub max_refine_level: Level,

    /// Whether projection refines adaptively below `initial_level`.
    pub autorefine: bool,

    /// Basis the function is left in after construction.
    pub basis_on_construct: Basis,

    /// User-coordinate bounds `[lo, hi]` per dimension. `None` is the unit box.
    pub cell: Option<Vec<[f64; 2]>>,

    pub boundary: BoundaryCondition,
}

impl Default for FunctionConfig {
    fn default() -> Self {
        FunctionConfig {
            k: 6,
            thresh: 1e-4,
            initial_level: 2,
            max_refine_level: MAX_LEVEL,
            autorefine: true,
            basis_on_construct: Basis::Reconstructed,
            cell: None,
            boundary: BoundaryCondition::Zero,
        }
    }
}

impl FunctionConfig {
    /// Returns a new [`FunctionConfigBuilder`] populated with the defaults.
    pub fn builder() -> FunctionConfigBuilder {
        FunctionConfigBuilder {
            config: FunctionConfig::default(),
        }
    }

    /// Checks every field and resolves the simulation cell for `NDIM`
    /// dimensions.
    pub fn validate<const NDIM: usize>(&self) -> Result<SimulationCell<NDIM>, ProgrammerError> {
        let invalid = |message: String| Err(ProgrammerError::InvalidConfig(message));

        if NDIM == 0 || NDIM > MAX_NDIM {
            return Err(ProgrammerError::UnsupportedDimension { axis: 0, ndim: NDIM });
        }
        if !(1..=MAX_K).contains(&self.k) {
            return invalid(format!("k = {} is outside 1..={MAX_K}", self.k));
        }
        if !(self.thresh.is_finite() && self.thresh > 0.0) {
            return invalid(format!("thresh = {} must be positive and finite", self.thresh));
        }
        if self.max_refine_level > MAX_LEVEL {
            return invalid(format!(
                "max_refine_level = {} exceeds {MAX_LEVEL}",
                self.max_refine_level
            ));
        }
        if self.initial_level > self.max_refine_level {
            return invalid(format!(
                "initial_level = {} is finer than max_refine_level = {}",
                self.initial_level, self.max_refine_level
            ));
        }
        // Adaptive projection refines below the initial level, so it needs room.
        if self.autorefine && self.initial_level >= self.max_refine_level {
            return invalid(format!(
                "autorefine needs initial_level = {} to be coarser than max_refine_level = {}",
                self.initial_level, self.max_refine_level
            ));
        }

        match &self.cell {
            None => Ok(SimulationCell::unit()),
            Some(bounds) if bounds.len() != NDIM => invalid(format!(
                "cell has {} dimensions, expected {NDIM}",
                bounds.len()
            )),
            Some(bounds) => {
                let mut lo = [0.0; NDIM];
                let mut width = [1.0; NDIM];
                for (d, &[a, b]) in bounds.iter().enumerate() {
                    if !(a.is_finite() && b.is_finite() && b > a) {
                        return invalid(format!("cell bounds [{a}, {b}] in dimension {d} are empty"));
                    }
                    lo[d] = a;
                    width[d] = b - a;
                }
                Ok(SimulationCell { lo, width })
            }
        }
    }
}

/// A convenience builder for constructing a [`FunctionConfig`].
///
/// The builder should be called via the [`FunctionConfig::builder`] method.
///
/// See [`FunctionConfig`] for details on each field.
#[derive(Debug, Clone)]
pub struct FunctionConfigBuilder {
    config: FunctionConfig,
}

impl FunctionConfigBuilder {
    /// Sets the multiwavelet order.
    pub fn k(mut self, k: usize) -> Self {
        self.config.k = k;
        self
    }

    /// Sets the truncation threshold.
    pub fn thresh(mut self, thresh: f64) -> Self {
        self.config.thresh = thresh;
        self
    }

    /// Sets the level of unconditional refinement.
    pub fn initial_level(mut self, initial_level: Level) -> Self {
        self.config.initial_level = initial_level;
        self
    }

    /// Sets the finest level adaptive refinement may reach.
    pub fn max_refine_level(mut self, max_refine_level: Level) -> Self {
        self.config.max_refine_level = max_refine_level;
        self
    }

    /// Enables or disables adaptive refinement.
    pub fn autorefine(mut self, autorefine: bool) -> Self {
        self.config.autorefine = autorefine;
        self
    }

    /// Sets the basis a newly constructed function is left in.
    pub fn basis_on_construct(mut self, basis: Basis) -> Self {
        self.config.basis_on_construct = basis;
        self
    }

    /// Sets the user-coordinate bounds, one `[lo, hi]` per dimension.
    pub fn cell(mut self, cell: Vec<[f64; 2]>) -> Self {
        self.config.cell = Some(cell);
        self
    }

    /// Sets the boundary condition used by the derivative operator.
    pub fn boundary(mut self, boundary: BoundaryCondition) -> Self {
        self.config.boundary = boundary;
        self
    }

    /// Builds and returns a [`FunctionConfig`]. Validation happens when a
    /// function is constructed.
    pub fn build(self) -> FunctionConfig {
        self.config
    }
}

/// Affine map between user coordinates and the unit simulation box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationCell<const NDIM: usize> {
    lo: [f64; NDIM],
    width: [f64; NDIM],
}

impl<const NDIM: usize> SimulationCell<NDIM> {
    pub fn unit() -> Self {
        Self {
            lo: [0.0; NDIM],
            width: [1.0; NDIM],
        }
    }

    /// Width of the cell along `axis` in user coordinates.
    pub fn width(&self, axis: usize) -> f64 {
        self.width[axis]
    }

    /// Volume of the cell in user coordinates.
    pub fn volume(&self) -> f64 {
        self.width.iter().product()
    }

    /// Maps a user point into `[0, 1]^NDIM`. Returns `None` for non-finite
    /// points and points outside the (closed) cell; nothing is clamped.
    pub fn user_to_sim(&self, point: &[f64; NDIM]) -> Option<[f64; NDIM]> {
        let mut sim = [0.0; NDIM];
        for d in 0..NDIM {
            let x = (point[d] - self.lo[d]) / self.width[d];
            if !x.is_finite() || !(0.0..=1.0).contains(&x) {
                return None;
            }
            sim[d] = x;
        }
        Some(sim)
    }

    pub fn sim_to_user(&self, point: &[f64; NDIM]) -> [f64; NDIM] {
        std::array::from_fn(|d| self.lo[d] + self.width[d] * point[d])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cell = FunctionConfig::default().validate::<3>().unwrap();
        assert_eq!(cell, SimulationCell::unit());
    }

    #[test]
    fn builder_sets_fields() {
        let config = FunctionConfig::builder()
            .k(9)
            .thresh(1e-7)
            .initial_level(0)
            .autorefine(false)
            .cell(vec![[-1.0, 1.0], [0.0, 4.0]])
            .boundary(BoundaryCondition::Periodic)
            .build();
        assert_eq!(config.k, 9);
        assert!(!config.autorefine);
        let cell = config.validate::<2>().unwrap();
        assert_eq!(cell.width(1), 4.0);
        assert_eq!(cell.volume(), 8.0);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let bad = [
            FunctionConfig::builder().k(0).build(),
            FunctionConfig::builder().k(31).build(),
            FunctionConfig::builder().thresh(-1.0).build(),
            FunctionConfig::builder().initial_level(5).max_refine_level(4).build(),
            FunctionConfig::builder().initial_level(4).max_refine_level(4).build(),
            FunctionConfig::builder().cell(vec![[0.0, 1.0]]).build(),
            FunctionConfig::builder().cell(vec![[1.0, 1.0], [0.0, 1.0]]).build(),
        ];
        for config in bad {
            assert!(matches!(
                config.validate::<2>(),
                Err(ProgrammerError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn fixed_level_projection_may_start_at_the_finest_level() {
        let config = FunctionConfig::builder()
            .initial_level(4)
            .max_refine_level(4)
            .autorefine(false)
            .build();
        assert!(config.validate::<2>().is_ok());

        let adaptive = FunctionConfig::builder().initial_level(3).max_refine_level(4).build();
        assert!(adaptive.validate::<2>().is_ok());
    }

    #[test]
    fn cell_mapping() {
        let cell = FunctionConfig::builder()
            .cell(vec![[-2.0, 2.0]])
            .build()
            .validate::<1>()
            .unwrap();
        assert_eq!(cell.user_to_sim(&[0.0]), Some([0.5]));
        assert_eq!(cell.user_to_sim(&[2.0]), Some([1.0]));
        assert_eq!(cell.user_to_sim(&[2.5]), None);
        assert_eq!(cell.user_to_sim(&[f64::NAN]), None);
        assert_eq!(cell.sim_to_user(&[0.25]), [-1.0]);
    }

    #[test]
    fn config_serialises_with_serde() {
        fn assert_serde<T: Serialize + for<'de> Deserialize<'de>>() {}
        assert_serde::<FunctionConfig>();
    }
}
