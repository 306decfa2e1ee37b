//! Wave-function interface consumed by the amplitude engine.
//!
//! The engine only ever asks for single matrix elements
//! `φ_orbital(site)`; everything about lattice geometry or band structure
//! stays behind this trait.

use std::fmt;

use nalgebra::DMatrix;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Particle species. Each species owns its own Slater matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Species {
    Up,
    Down,
}

impl Species {
    pub const ALL: [Species; 2] = [Species::Up, Species::Down];

    /// Position of the species in per-species arrays.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Species::Up => 0,
            Species::Down => 1,
        }
    }

    /// `+1` for up, `-1` for down.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Species::Up => 1.0,
            Species::Down => -1.0,
        }
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Species::Up => write!(f, "up"),
            Species::Down => write!(f, "down"),
        }
    }
}

/// Single-particle orbitals of a trial state evaluated on lattice sites.
///
/// Implementations must be pure functions of their arguments; the engine
/// fetches the same element again whenever it rebuilds a row or column.
pub trait WaveFunction {
    /// Orbital `orbital` of `species` evaluated at real-space `site`.
    fn matrix_element(&self, site: usize, orbital: usize, species: Species) -> Complex64;

    /// Number of real-space sites.
    fn num_sites(&self) -> usize;

    /// Number of available orbitals (quantum numbers) for `species`.
    fn num_orbitals(&self, species: Species) -> usize;

    /// Slater matrix `A[(i, j)] = φ_{orbitals[j]}(sites[i])`.
    fn slater_matrix(&self, sites: &[usize], orbitals: &[usize], species: Species) -> DMatrix<Complex64> {
        DMatrix::from_fn(sites.len(), orbitals.len(), |i, j| {
            self.matrix_element(sites[i], orbitals[j], species)
        })
    }
}
