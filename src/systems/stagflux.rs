//! Staggered-flux mean-field state on a square lattice.
//!
//! Each plaquette carries a flux ±φ alternating between neighbours. With a
//! Néel field `m` the unit cell doubles, and the single-particle problem in
//! the magnetic Brillouin zone (MBZ) reduces to the 2×2 matrix
//!
//! h_σ(k) = [[σm, Δ_k], [Δ_k*, −σm]],   Δ_k = −(cos k_x e^{iφ/4} + cos k_y e^{−iφ/4})
//!
//! acting on the two sublattice amplitudes. The bands are `∓ω_k` with
//! `ω_k = sqrt(m² + |Δ_k|²)`.

use std::f64::consts::PI;

use log::debug;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::wavefunction::{Species, WaveFunction};

/// Physical parameters of the staggered-flux state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StagFluxParams {
    /// Box size along x (even)
    pub lx: usize,
    /// Box size along y (even)
    pub ly: usize,
    /// Number of spin-up particles
    pub n_up: usize,
    /// Number of spin-down particles
    pub n_down: usize,
    /// Flux per plaquette
    pub phi: f64,
    /// Néel field
    #[serde(default)]
    pub neel: f64,
    /// Boundary twist along x and y in units of π (1.0 is antiperiodic)
    #[serde(default)]
    pub bc_phase: [f64; 2],
}

/// Staggered-flux orbitals `φ_f(R)` with quantum numbers `f = 2q + band`,
/// `q` indexing the MBZ momenta and `band` 0 (lower) or 1 (upper).
#[derive(Debug, Clone)]
pub struct StagFluxWaveFunction {
    params: StagFluxParams,
    /// Integer momentum `(n_x, n_y)` of each MBZ index `q`
    qn2fock: Vec<(usize, usize)>,
    /// MBZ index of every integer momentum, `None` outside the MBZ
    fock2qn: Vec<Option<usize>>,
}

impl StagFluxWaveFunction {
    pub fn new(params: StagFluxParams) -> Result<Self, ConfigError> {
        let StagFluxParams { lx, ly, n_up, n_down, .. } = params;
        if lx == 0 || ly == 0 || lx % 2 != 0 || ly % 2 != 0 {
            return Err(ConfigError::Lattice(format!(
                "staggered flux needs even box sizes, got {lx}x{ly}"
            )));
        }
        let num_sites = lx * ly;
        if n_up + n_down > num_sites {
            return Err(ConfigError::Lattice(format!(
                "{n_up} up and {n_down} down particles do not fit on {num_sites} sites"
            )));
        }

        let mut qn2fock = Vec::with_capacity(num_sites / 2);
        let mut fock2qn = vec![None; num_sites];
        for ny in 0..ly {
            for nx in 0..lx {
                // (n, n + Q) pairs: keep the member with n_x < L_x / 2
                if nx < lx / 2 {
                    fock2qn[nx + lx * ny] = Some(qn2fock.len());
                    qn2fock.push((nx, ny));
                }
            }
        }
        debug!("staggered flux {lx}x{ly}: {} MBZ momenta", qn2fock.len());
        Ok(Self { params, qn2fock, fock2qn })
    }

    pub fn params(&self) -> &StagFluxParams {
        &self.params
    }

    /// Number of particles of `species`.
    pub fn particles(&self, species: Species) -> usize {
        match species {
            Species::Up => self.params.n_up,
            Species::Down => self.params.n_down,
        }
    }

    /// MBZ index of the integer momentum `(n_x, n_y)`, if it lies inside.
    pub fn mbz_index(&self, nx: usize, ny: usize) -> Option<usize> {
        self.fock2qn.get(nx + self.params.lx * ny).copied().flatten()
    }

    /// Crystal momentum of MBZ index `q`, boundary twist included.
    pub fn momentum(&self, q: usize) -> [f64; 2] {
        let (nx, ny) = self.qn2fock[q];
        let StagFluxParams { lx, ly, bc_phase, .. } = self.params;
        [
            (2.0 * PI * nx as f64 + PI * bc_phase[0]) / lx as f64,
            (2.0 * PI * ny as f64 + PI * bc_phase[1]) / ly as f64,
        ]
    }

    fn delta(&self, k: [f64; 2]) -> Complex64 {
        let quarter = Complex64::from_polar(1.0, self.params.phi / 4.0);
        -(quarter * k[0].cos() + quarter.conj() * k[1].cos())
    }

    fn omega(&self, k: [f64; 2]) -> f64 {
        (self.params.neel.powi(2) + self.delta(k).norm_sqr()).sqrt()
    }

    /// Band energy of orbital `f` (identical for both species).
    pub fn energy(&self, f: usize) -> f64 {
        let omega = self.omega(self.momentum(f / 2));
        if f % 2 == 0 {
            -omega
        } else {
            omega
        }
    }

    /// Normalised sublattice amplitudes `(U, V)` of band `band` at `k`.
    fn eigenvector(&self, k: [f64; 2], species: Species, band: usize) -> (Complex64, Complex64) {
        let delta = self.delta(k);
        let mass = species.sign() * self.params.neel;
        let energy = if band == 0 { -self.omega(k) } else { self.omega(k) };

        // two equivalent forms, the larger one is better conditioned
        let first = (delta, Complex64::from(energy - mass));
        let second = (Complex64::from(energy + mass), delta.conj());
        let norm = |(u, v): (Complex64, Complex64)| (u.norm_sqr() + v.norm_sqr()).sqrt();
        let (u, v) = if norm(first) >= norm(second) { first } else { second };
        let n = norm((u, v));
        if n == 0.0 {
            // gapless point without Néel field: any basis of the degenerate pair
            return if band == 0 {
                (Complex64::from(1.0), Complex64::from(0.0))
            } else {
                (Complex64::from(0.0), Complex64::from(1.0))
            };
        }
        (u / n, v / n)
    }

    /// The `n_σ` orbitals of lowest energy, ties broken by quantum number.
    pub fn ground_state_orbitals(&self, species: Species) -> Vec<usize> {
        let mut orbitals: Vec<usize> = (0..self.num_sites()).collect();
        orbitals.sort_by(|&a, &b| self.energy(a).total_cmp(&self.energy(b)).then(a.cmp(&b)));
        orbitals.truncate(self.particles(species));
        orbitals.sort_unstable();
        orbitals
    }
}

impl WaveFunction for StagFluxWaveFunction {
    fn matrix_element(&self, site: usize, orbital: usize, species: Species) -> Complex64 {
        let lx = self.params.lx;
        let (x, y) = (site % lx, site / lx);
        let k = self.momentum(orbital / 2);
        let (u, v) = self.eigenvector(k, species, orbital % 2);
        let amplitude = if (x + y) % 2 == 0 { u } else { v };
        let phase = Complex64::from_polar(1.0, k[0] * x as f64 + k[1] * y as f64);
        amplitude * phase * (2.0 / self.num_sites() as f64).sqrt()
    }

    fn num_sites(&self) -> usize {
        self.params.lx * self.params.ly
    }

    fn num_orbitals(&self, _species: Species) -> usize {
        self.num_sites()
    }
}
