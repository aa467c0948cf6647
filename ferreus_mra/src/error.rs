/////////////////////////////////////////////////////////////////////////////////////////////
//
// Defines the error taxonomy shared by every distributed tree operation.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::key::Level;
use ferreus_mra_world::WorldError;
use std::fmt;
use thiserror::Error;

/// Misuse of the API or a request the tree cannot honour. Always aborts the
/// world it was raised in.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProgrammerError {
    #[error("function handle is not initialised")]
    Uninitialized,

    #[error("cannot evaluate a function held in the compressed (wavelet) basis")]
    CompressedEval,

    #[error("{operation} requires operands in the reconstructed (scaling) basis")]
    NotReconstructed { operation: &'static str },

    #[error("projection at {key} needs refinement beyond max_refine_level {max_level}")]
    MaxRefineLevel { key: String, max_level: Level },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid key: level {level}, translation {translation:?}")]
    InvalidKey { level: Level, translation: Vec<u64> },

    #[error("incomplete family below {key}")]
    IncompleteFamily { key: String },

    #[error("incompatible operands: {0}")]
    Incompatible(String),

    #[error("unsupported dimension: axis {axis} of a {ndim}-dimensional function")]
    UnsupportedDimension { axis: usize, ndim: usize },

    #[error("rank {rank} does not exist in a world of {nproc} ranks")]
    InvalidRank { rank: usize, nproc: usize },
}

/// The phase in which a non-finite value was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Projection,
    Compress,
    Reconstruct,
    Evaluation,
    Operator,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Projection => "projection",
            Stage::Compress => "compress",
            Stage::Reconstruct => "reconstruct",
            Stage::Evaluation => "evaluation",
            Stage::Operator => "operator",
        };
        f.write_str(name)
    }
}

/// Errors returned by function trees.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MraError {
    #[error("programmer error: {0}")]
    Programmer(#[from] ProgrammerError),

    /// The evaluation point lies outside the simulation cell, or is not finite.
    #[error("point {point:?} lies outside the simulation cell")]
    Domain { point: Vec<f64> },

    #[error("non-finite value produced during {stage} at {key}")]
    NumericAnomaly { stage: Stage, key: String },

    #[error("inconsistent tree at {key}: {detail}")]
    Inconsistent { key: String, detail: &'static str },

    #[error(transparent)]
    World(#[from] WorldError),
}

impl MraError {
    /// Whether the error must abort the distributed computation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MraError::Programmer(_) | MraError::Inconsistent { .. } | MraError::World(_)
        )
    }

    pub(crate) fn inconsistent(key: impl fmt::Display, detail: &'static str) -> Self {
        MraError::Inconsistent {
            key: key.to_string(),
            detail,
        }
    }

    pub(crate) fn anomaly(stage: Stage, key: impl fmt::Display) -> Self {
        MraError::NumericAnomaly {
            stage,
            key: key.to_string(),
        }
    }
}
