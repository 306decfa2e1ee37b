//! Orbitals given as explicit tables.

use nalgebra::DMatrix;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::traits::{Species, WaveFunction};
use crate::error::ConfigError;

/// Orbitals stored as one `sites × orbitals` table per species.
///
/// Handy for small hand-written systems and for checking the engine
/// against brute-force determinants.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TabulatedWaveFunction {
    tables: [DMatrix<Complex64>; 2],
}

impl TabulatedWaveFunction {
    /// Both tables must cover the same set of sites (same row count).
    pub fn new(up: DMatrix<Complex64>, down: DMatrix<Complex64>) -> Result<Self, ConfigError> {
        if up.nrows() != down.nrows() {
            return Err(ConfigError::Lattice(format!(
                "up table has {} sites, down table has {}",
                up.nrows(),
                down.nrows()
            )));
        }
        Ok(Self { tables: [up, down] })
    }

    /// Builds both tables from `f(site, orbital, species)`.
    pub fn from_fn<F>(num_sites: usize, num_orbitals: usize, f: F) -> Self
    where
        F: Fn(usize, usize, Species) -> Complex64,
    {
        let table = |species| DMatrix::from_fn(num_sites, num_orbitals, |r, k| f(r, k, species));
        Self { tables: [table(Species::Up), table(Species::Down)] }
    }

    pub fn table(&self, species: Species) -> &DMatrix<Complex64> {
        &self.tables[species.index()]
    }
}

impl WaveFunction for TabulatedWaveFunction {
    fn matrix_element(&self, site: usize, orbital: usize, species: Species) -> Complex64 {
        self.tables[species.index()][(site, orbital)]
    }

    fn num_sites(&self) -> usize {
        self.tables[0].nrows()
    }

    fn num_orbitals(&self, species: Species) -> usize {
        self.tables[species.index()].ncols()
    }
}
