//! Configuration model: where every particle sits and which orbitals of the
//! trial state are occupied.
//!
//! Row `i` of a species' Slater matrix belongs to the particle on
//! `sites[i]`, column `j` to the orbital `orbitals[j]`. A row hop moves a
//! particle to another site, a column hop swaps an occupied orbital for
//! another one.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::wavefunction::Species;

/// Slot `index` (a matrix row or column) moves to `target` (a site or an orbital).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hop {
    pub index: usize,
    pub target: usize,
}

impl Hop {
    pub fn new(index: usize, target: usize) -> Self {
        Self { index, target }
    }
}

/// Hops of one kind applied together. An empty path is "no hop".
pub type HopPath = Vec<Hop>;

/// Particle positions and occupied orbitals for both species.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    sites: [Vec<usize>; 2],
    orbitals: [Vec<usize>; 2],
}

impl Configuration {
    pub fn new(
        sites_up: Vec<usize>,
        sites_down: Vec<usize>,
        orbitals_up: Vec<usize>,
        orbitals_down: Vec<usize>,
    ) -> Self {
        Self {
            sites: [sites_up, sites_down],
            orbitals: [orbitals_up, orbitals_down],
        }
    }

    /// Places the particles on distinct random sites of a lattice with
    /// `num_sites` sites; particle counts follow the orbital lists.
    pub fn random<R: Rng + ?Sized>(
        num_sites: usize,
        orbitals_up: Vec<usize>,
        orbitals_down: Vec<usize>,
        rng: &mut R,
    ) -> Result<Self, ConfigError> {
        let (n_up, n_down) = (orbitals_up.len(), orbitals_down.len());
        if n_up + n_down > num_sites {
            return Err(ConfigError::Lattice(format!(
                "{} particles do not fit on {} sites",
                n_up + n_down,
                num_sites
            )));
        }
        let mut sites: Vec<usize> = (0..num_sites).collect();
        sites.shuffle(rng);
        let sites_down = sites[n_up..n_up + n_down].to_vec();
        sites.truncate(n_up);
        Ok(Self::new(sites, sites_down, orbitals_up, orbitals_down))
    }

    /// Number of particles (matrix size) of `species`.
    pub fn particles(&self, species: Species) -> usize {
        self.sites[species.index()].len()
    }

    pub fn site(&self, species: Species, row: usize) -> usize {
        self.sites[species.index()][row]
    }

    pub fn orbital(&self, species: Species, col: usize) -> usize {
        self.orbitals[species.index()][col]
    }

    pub fn sites(&self, species: Species) -> &[usize] {
        &self.sites[species.index()]
    }

    pub fn orbitals(&self, species: Species) -> &[usize] {
        &self.orbitals[species.index()]
    }

    /// Site of row `row` once `rows` has been applied.
    pub fn site_after(&self, species: Species, row: usize, rows: &[Hop]) -> usize {
        rows.iter()
            .find(|hop| hop.index == row)
            .map_or_else(|| self.site(species, row), |hop| hop.target)
    }

    /// Orbital of column `col` once `cols` has been applied.
    pub fn orbital_after(&self, species: Species, col: usize, cols: &[Hop]) -> usize {
        cols.iter()
            .find(|hop| hop.index == col)
            .map_or_else(|| self.orbital(species, col), |hop| hop.target)
    }

    /// Confirms row hops (particles moving to new sites).
    pub fn apply_row_hops(&mut self, species: Species, rows: &[Hop]) {
        for hop in rows {
            self.sites[species.index()][hop.index] = hop.target;
        }
    }

    /// Confirms column hops (occupied orbitals replaced).
    pub fn apply_col_hops(&mut self, species: Species, cols: &[Hop]) {
        for hop in cols {
            self.orbitals[species.index()][hop.index] = hop.target;
        }
    }
}
