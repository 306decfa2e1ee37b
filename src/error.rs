//! Error types.
//!
//! All of these are local, recoverable conditions from the point of view of
//! a Monte Carlo chain: reject the move (or reinitialise) and carry on.

use thiserror::Error;

use crate::wavefunction::Species;

/// Extended-range value requested as a plain float outside `f64` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("magnitude 2^{exponent} overflows f64")]
    Overflow { exponent: i64 },
    #[error("magnitude 2^{exponent} underflows f64")]
    Underflow { exponent: i64 },
}

/// Errors reported by the amplitude engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AmplitudeError {
    /// The (updated) determinant of a species vanishes within tolerance: the
    /// configuration has no overlap with the trial state.
    #[error("{species} matrix is singular: |{quantity}| = {magnitude:e} below tolerance {tolerance:e}")]
    Singular {
        species: Species,
        quantity: &'static str,
        magnitude: f64,
        tolerance: f64,
    },
    /// `amp` was read while the determinant is not current.
    #[error("amplitude is stale, call init() after changing the configuration")]
    Stale,
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error("{species} {kind} index {index} out of range (size {size})")]
    IndexOutOfRange {
        species: Species,
        kind: &'static str,
        index: usize,
        size: usize,
    },
    #[error("{species} {kind} path hops index {index} twice")]
    RepeatedIndex {
        species: Species,
        kind: &'static str,
        index: usize,
    },
    #[error("{species} configuration has {sites} sites but {orbitals} orbitals")]
    ShapeMismatch {
        species: Species,
        sites: usize,
        orbitals: usize,
    },
}

impl AmplitudeError {
    /// True for the zero-overlap condition a sampler should treat as a rejection.
    pub fn is_singular(&self) -> bool {
        matches!(self, AmplitudeError::Singular { .. })
    }
}

/// Errors raised while reading or validating a run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid lattice: {0}")]
    Lattice(String),
    #[error("invalid sampler settings: {0}")]
    Sampler(String),
}

/// Errors that end a Monte Carlo chain.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Amplitude(#[from] AmplitudeError),
    #[error("no configuration with nonzero overlap found in {attempts} attempts")]
    NoOverlap { attempts: usize },
}
