//! The amplitude engine: two Slater matrices, their inverses and the running
//! determinant product, kept current under committed hops.

use log::{debug, trace, warn};
use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::formulas::{
    apply_column_update, apply_row_update, column_ratio, column_then_row_ratio, row_ratio,
    row_then_column_ratio, BlockUpdate, CMatrix, CVector, UpdateOrder,
};
use crate::error::AmplitudeError;
use crate::numeric::BigComplex;
use crate::state::{Configuration, Hop, HopPath};
use crate::wavefunction::{Species, WaveFunction};

/// Numerical thresholds of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmplitudeParams {
    /// Smallest accepted `|det(A')/det(A)|` of an update, and smallest
    /// accepted LU pivot relative to the largest matrix entry.
    pub singular_tolerance: f64,
}

impl Default for AmplitudeParams {
    fn default() -> Self {
        Self { singular_tolerance: 1e-12 }
    }
}

/// Outcome of a forced reinitialisation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Drift {
    /// `|amp_tracked − amp_fresh| / |amp_fresh|`, zero if nothing was tracked.
    pub relative_error: f64,
    /// Largest `|(A·A⁻¹ − I)_ij|` over both species before refactorisation.
    pub max_residual: f64,
}

#[derive(Clone, Debug)]
struct SpeciesMatrices {
    matrix: CMatrix,
    inverse: CMatrix,
    determinant: BigComplex,
}

impl SpeciesMatrices {
    fn empty() -> Self {
        Self {
            matrix: CMatrix::zeros(0, 0),
            inverse: CMatrix::zeros(0, 0),
            determinant: BigComplex::ONE,
        }
    }

    fn residual(&self) -> f64 {
        let n = self.matrix.nrows();
        (&self.matrix * &self.inverse - CMatrix::identity(n, n))
            .iter()
            .map(|z| z.norm())
            .fold(0.0, f64::max)
    }
}

/// LU factorisation with partial pivoting. The determinant is accumulated
/// pivot by pivot in extended range.
fn factorise(matrix: CMatrix, species: Species, tolerance: f64) -> Result<SpeciesMatrices, AmplitudeError> {
    let n = matrix.nrows();
    if n == 0 {
        return Ok(SpeciesMatrices::empty());
    }
    let largest = matrix.iter().map(|z| z.norm()).fold(0.0, f64::max);
    let lu = matrix.clone().lu();
    let u = lu.u();
    let mut determinant = BigComplex::from(lu.p().determinant::<Complex64>());
    let mut smallest = f64::INFINITY;
    for i in 0..n {
        let pivot = u[(i, i)];
        smallest = smallest.min(pivot.norm());
        determinant *= pivot;
    }
    let relative = if largest > 0.0 { smallest / largest } else { 0.0 };
    let singular = || AmplitudeError::Singular {
        species,
        quantity: "relative LU pivot",
        magnitude: relative,
        tolerance,
    };
    // written so that NaN counts as singular
    if !(relative > tolerance) {
        return Err(singular());
    }
    let inverse = lu.try_inverse().ok_or_else(singular)?;
    Ok(SpeciesMatrices { matrix, inverse, determinant })
}

fn check_ratio(ratio: Complex64, species: Species, quantity: &'static str, tolerance: f64) -> Result<(), AmplitudeError> {
    let magnitude = ratio.norm();
    if magnitude >= tolerance {
        Ok(())
    } else {
        Err(AmplitudeError::Singular { species, quantity, magnitude, tolerance })
    }
}

/// Overlap `<{R_i,σ_i}|Ψ> = det(A↑)·det(A↓)` with determinant and inverse
/// update machinery.
///
/// For a column `u` replacing column `k` (a hop in orbital space):
/// `det(A')/det(A) = e_kᵀA⁻¹u` and
/// `A'⁻¹ = A⁻¹ − (A⁻¹u − e_k)(e_kᵀA⁻¹)/(e_kᵀA⁻¹u)`.
/// For a row `vᵀ` replacing row `r` (a hop in real space):
/// `det(A')/det(A) = vᵀA⁻¹e_r` and
/// `A'⁻¹ = A⁻¹ − A⁻¹e_r(vᵀA⁻¹ − e_rᵀ)/(vᵀA⁻¹e_r)`.
///
/// The engine borrows the wave function for its whole life and owns the
/// configuration, so a committed hop moves the configuration and the matrices
/// together. `virt_*` methods take `&self` and never change anything.
pub struct Amplitude<'w, W: WaveFunction + ?Sized> {
    wavefunction: &'w W,
    config: Configuration,
    params: AmplitudeParams,
    species: [SpeciesMatrices; 2],
    amp: BigComplex,
    valid: bool,
}

impl<'w, W: WaveFunction + ?Sized> Amplitude<'w, W> {
    /// Checks the configuration against the wave function. The amplitude is
    /// stale until [`Amplitude::init`] succeeds.
    pub fn new(wavefunction: &'w W, config: Configuration, params: AmplitudeParams) -> Result<Self, AmplitudeError> {
        validate_configuration(wavefunction, &config)?;
        Ok(Self {
            wavefunction,
            config,
            params,
            species: [SpeciesMatrices::empty(), SpeciesMatrices::empty()],
            amp: BigComplex::ONE,
            valid: false,
        })
    }

    /// Builds both matrices from scratch, factorises them and recomputes
    /// the amplitude. A singular matrix means the configuration has no
    /// overlap with the trial state; the engine then stays stale.
    pub fn init(&mut self) -> Result<(), AmplitudeError> {
        self.valid = false;
        let tolerance = self.params.singular_tolerance;
        let mut fresh = Vec::with_capacity(2);
        for species in Species::ALL {
            let matrix = self.wavefunction.slater_matrix(
                self.config.sites(species),
                self.config.orbitals(species),
                species,
            );
            fresh.push(factorise(matrix, species, tolerance)?);
        }
        if let (Some(down), Some(up)) = (fresh.pop(), fresh.pop()) {
            self.amp = up.determinant * down.determinant;
            self.species = [up, down];
            self.valid = true;
        }
        debug!("initialised amplitude {}", self.amp);
        Ok(())
    }

    /// Forces a full reinitialisation and reports how far the incrementally
    /// maintained state had drifted. Long chains call this periodically.
    pub fn refresh(&mut self) -> Result<Drift, AmplitudeError> {
        let tracked = self.valid.then_some(self.amp);
        let max_residual = if self.valid {
            Species::ALL.iter().map(|&s| self.inverse_residual(s)).fold(0.0, f64::max)
        } else {
            0.0
        };
        self.init()?;
        let relative_error = tracked.map_or(0.0, |old| {
            ((old - self.amp).abs() / self.amp.abs()).to_f64_saturating().0
        });
        debug!("refresh: relative drift {relative_error:.3e}, inverse residual {max_residual:.3e}");
        Ok(Drift { relative_error, max_residual })
    }

    /// Current amplitude. Reading a stale amplitude is a contract violation
    /// of the caller and is reported as [`AmplitudeError::Stale`].
    pub fn amp(&self) -> Result<BigComplex, AmplitudeError> {
        if self.valid {
            Ok(self.amp)
        } else {
            warn!("stale amplitude requested");
            Err(AmplitudeError::Stale)
        }
    }

    /// Current amplitude as a plain complex number, failing with
    /// [`AmplitudeError::Range`] when it leaves the `f64` range.
    pub fn amp_complex(&self) -> Result<Complex64, AmplitudeError> {
        Ok(self.amp()?.to_complex()?)
    }

    /// Current amplitude, reinitialising first if it is stale.
    pub fn current_amp(&mut self) -> Result<BigComplex, AmplitudeError> {
        if !self.valid {
            self.init()?;
        }
        Ok(self.amp)
    }

    /// Amplitude the configuration would have after a hop with `ratio`.
    pub fn amplitude_after(&self, ratio: BigComplex) -> Result<BigComplex, AmplitudeError> {
        Ok(self.amp()? * ratio)
    }

    /// Determinant of a single species.
    pub fn determinant(&self, species: Species) -> Result<BigComplex, AmplitudeError> {
        self.ensure_valid()?;
        Ok(self.species[species.index()].determinant)
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn params(&self) -> &AmplitudeParams {
        &self.params
    }

    pub fn wavefunction(&self) -> &'w W {
        self.wavefunction
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Replaces the configuration; the amplitude is stale until `init`.
    pub fn set_configuration(&mut self, config: Configuration) -> Result<(), AmplitudeError> {
        validate_configuration(self.wavefunction, &config)?;
        self.config = config;
        self.valid = false;
        Ok(())
    }

    pub fn matrix(&self, species: Species) -> &CMatrix {
        &self.species[species.index()].matrix
    }

    pub fn inverse(&self, species: Species) -> &CMatrix {
        &self.species[species.index()].inverse
    }

    /// `max |(A·A⁻¹ − I)_ij|` for one species.
    pub fn inverse_residual(&self, species: Species) -> f64 {
        self.species[species.index()].residual()
    }

    /// Ratio for column `hop.index` switching to orbital `hop.target`.
    pub fn virt_col_update(&self, species: Species, hop: Hop) -> Result<BigComplex, AmplitudeError> {
        self.ensure_valid()?;
        self.check_cols(species, &[hop])?;
        let u = self.new_column(species, hop.target, &[]);
        let ratio = column_ratio(self.inverse(species), hop.index, &u);
        trace!("virtual {species} column hop {hop:?}: ratio {ratio}");
        Ok(ratio.into())
    }

    /// Commits a column hop with the Sherman–Morrison correction and returns
    /// its ratio. A ratio below tolerance is refused and nothing changes.
    pub fn col_update(&mut self, species: Species, hop: Hop) -> Result<BigComplex, AmplitudeError> {
        self.ensure_valid()?;
        self.check_cols(species, &[hop])?;
        let u = self.new_column(species, hop.target, &[]);
        let state = &mut self.species[species.index()];
        let ratio = column_ratio(&state.inverse, hop.index, &u);
        check_ratio(ratio, species, "column ratio", self.params.singular_tolerance)?;

        apply_column_update(&mut state.inverse, hop.index, &u, ratio);
        state.matrix.set_column(hop.index, &u);
        state.determinant *= ratio;
        self.amp *= ratio;
        self.config.apply_col_hops(species, &[hop]);
        debug!("{species} column hop {hop:?} committed, ratio {ratio}");
        Ok(ratio.into())
    }

    /// Ratio for row `hop.index` moving to site `hop.target`.
    pub fn virt_row_update(&self, species: Species, hop: Hop) -> Result<BigComplex, AmplitudeError> {
        self.ensure_valid()?;
        self.check_rows(species, &[hop])?;
        let v = self.new_row(species, hop.target, &[]);
        let ratio = row_ratio(self.inverse(species), hop.index, &v);
        trace!("virtual {species} row hop {hop:?}: ratio {ratio}");
        Ok(ratio.into())
    }

    /// Commits a row hop with the Sherman–Morrison correction and returns
    /// its ratio. A ratio below tolerance is refused and nothing changes.
    pub fn row_update(&mut self, species: Species, hop: Hop) -> Result<BigComplex, AmplitudeError> {
        self.ensure_valid()?;
        self.check_rows(species, &[hop])?;
        let v = self.new_row(species, hop.target, &[]);
        let state = &mut self.species[species.index()];
        let ratio = row_ratio(&state.inverse, hop.index, &v);
        check_ratio(ratio, species, "row ratio", self.params.singular_tolerance)?;

        apply_row_update(&mut state.inverse, hop.index, &v, ratio);
        state.matrix.set_row(hop.index, &v.transpose());
        state.determinant *= ratio;
        self.amp *= ratio;
        self.config.apply_row_hops(species, &[hop]);
        debug!("{species} row hop {hop:?} committed, ratio {ratio}");
        Ok(ratio.into())
    }

    /// Ratio of a combined row + column hop of one species through the fused
    /// 2×2 formula, taking the single-rank steps in the given `order`.
    pub fn virt_combined_update(
        &self,
        species: Species,
        row: Hop,
        col: Hop,
        order: UpdateOrder,
    ) -> Result<BigComplex, AmplitudeError> {
        self.ensure_valid()?;
        self.check_rows(species, &[row])?;
        self.check_cols(species, &[col])?;
        let inverse = self.inverse(species);
        let ratio = match order {
            UpdateOrder::RowFirst => {
                let v = self.new_row(species, row.target, &[]);
                let u = self.new_column(species, col.target, &[row]);
                row_then_column_ratio(inverse, row.index, col.index, &v, &u)
            }
            UpdateOrder::ColumnFirst => {
                let u = self.new_column(species, col.target, &[]);
                let v = self.new_row(species, row.target, &[col]);
                column_then_row_ratio(inverse, row.index, col.index, &u, &v)
            }
        };
        trace!("virtual {species} combined hop {row:?}/{col:?} ({order:?}): ratio {ratio}");
        Ok(ratio.into())
    }

    /// Ratios for every combination of candidate paths, evaluated against
    /// the same current state. Output is row-major over
    /// `(rows_up, rows_down, cols_up, cols_down)`; an empty path is "no hop".
    pub fn virt_update(
        &self,
        rows_up: &[HopPath],
        rows_down: &[HopPath],
        cols_up: &[HopPath],
        cols_down: &[HopPath],
    ) -> Result<Vec<BigComplex>, AmplitudeError> {
        self.ensure_valid()?;
        let up = self.ratio_table(Species::Up, rows_up, cols_up)?;
        let down = self.ratio_table(Species::Down, rows_down, cols_down)?;

        let mut ratios = Vec::with_capacity(rows_up.len() * rows_down.len() * cols_up.len() * cols_down.len());
        for up_row in &up {
            for down_row in &down {
                for &ru in up_row {
                    for &rd in down_row {
                        ratios.push(BigComplex::from(ru) * BigComplex::from(rd));
                    }
                }
            }
        }
        Ok(ratios)
    }

    /// Commits row and column paths for both species at once.
    ///
    /// Either the whole move is applied, or an error is returned and the
    /// engine is exactly as before. A vanishing ratio is reported as
    /// [`AmplitudeError::Singular`]; a species whose inverse correction
    /// cannot be formed is refactorised from scratch instead.
    pub fn update(
        &mut self,
        rows_up: &[Hop],
        rows_down: &[Hop],
        cols_up: &[Hop],
        cols_down: &[Hop],
    ) -> Result<(), AmplitudeError> {
        self.ensure_valid()?;
        let tolerance = self.params.singular_tolerance;
        let moves = [(Species::Up, rows_up, cols_up), (Species::Down, rows_down, cols_down)];

        let mut staged = Vec::with_capacity(2);
        for &(species, rows, cols) in &moves {
            let block = self.block_update(species, rows, cols)?;
            let ratio = block.ratio(self.inverse(species));
            check_ratio(ratio, species, "update ratio", tolerance)?;
            staged.push((species, block, ratio));
        }

        let mut next = Vec::with_capacity(2);
        for (species, block, ratio) in staged {
            let current = &self.species[species.index()];
            if block.is_empty() {
                next.push(current.clone());
                continue;
            }
            let mut matrix = current.matrix.clone();
            block.apply_to(&mut matrix);
            let updated = match block.updated_inverse(&current.inverse) {
                Some(inverse) => SpeciesMatrices {
                    matrix,
                    inverse,
                    determinant: current.determinant * ratio,
                },
                None => {
                    warn!("{species} inverse correction degenerate, refactorising");
                    factorise(matrix, species, tolerance)?
                }
            };
            next.push(updated);
        }

        for &(species, rows, cols) in &moves {
            self.config.apply_row_hops(species, rows);
            self.config.apply_col_hops(species, cols);
        }
        if let (Some(down), Some(up)) = (next.pop(), next.pop()) {
            self.amp = up.determinant * down.determinant;
            self.species = [up, down];
        }
        debug!("update committed, amplitude {}", self.amp);
        Ok(())
    }

    fn ensure_valid(&self) -> Result<(), AmplitudeError> {
        if self.valid {
            Ok(())
        } else {
            Err(AmplitudeError::Stale)
        }
    }

    /// `[row path][column path]` table of single-species ratios.
    fn ratio_table(
        &self,
        species: Species,
        rows: &[HopPath],
        cols: &[HopPath],
    ) -> Result<Vec<Vec<Complex64>>, AmplitudeError> {
        let inverse = self.inverse(species);
        rows.iter()
            .map(|row_path| {
                cols.iter()
                    .map(|col_path| Ok(self.block_update(species, row_path, col_path)?.ratio(inverse)))
                    .collect::<Result<Vec<_>, AmplitudeError>>()
            })
            .collect()
    }

    fn block_update(&self, species: Species, rows: &[Hop], cols: &[Hop]) -> Result<BlockUpdate, AmplitudeError> {
        self.check_rows(species, rows)?;
        self.check_cols(species, cols)?;
        let n = self.config.particles(species);
        let wf = self.wavefunction;
        let new_rows = CMatrix::from_fn(rows.len(), n, |a, j| {
            wf.matrix_element(rows[a].target, self.config.orbital_after(species, j, cols), species)
        });
        let new_cols = CMatrix::from_fn(n, cols.len(), |i, b| {
            wf.matrix_element(self.config.site_after(species, i, rows), cols[b].target, species)
        });
        Ok(BlockUpdate::new(
            self.matrix(species),
            rows.iter().map(|h| h.index).collect(),
            new_rows,
            cols.iter().map(|h| h.index).collect(),
            new_cols,
        ))
    }

    /// Column of `orbital` over all particles, after `rows` has been applied.
    fn new_column(&self, species: Species, orbital: usize, rows: &[Hop]) -> CVector {
        let n = self.config.particles(species);
        DVector::from_fn(n, |i, _| {
            let site = self.config.site_after(species, i, rows);
            self.wavefunction.matrix_element(site, orbital, species)
        })
    }

    /// Row of `site` over all occupied orbitals, after `cols` has been applied.
    fn new_row(&self, species: Species, site: usize, cols: &[Hop]) -> CVector {
        let n = self.config.particles(species);
        DVector::from_fn(n, |j, _| {
            let orbital = self.config.orbital_after(species, j, cols);
            self.wavefunction.matrix_element(site, orbital, species)
        })
    }

    fn check_rows(&self, species: Species, rows: &[Hop]) -> Result<(), AmplitudeError> {
        check_path(
            species,
            "row",
            rows,
            self.config.particles(species),
            self.wavefunction.num_sites(),
        )
    }

    fn check_cols(&self, species: Species, cols: &[Hop]) -> Result<(), AmplitudeError> {
        check_path(
            species,
            "column",
            cols,
            self.config.particles(species),
            self.wavefunction.num_orbitals(species),
        )
    }
}

fn check_path(
    species: Species,
    kind: &'static str,
    path: &[Hop],
    size: usize,
    targets: usize,
) -> Result<(), AmplitudeError> {
    for (n, hop) in path.iter().enumerate() {
        if hop.index >= size {
            return Err(AmplitudeError::IndexOutOfRange { species, kind, index: hop.index, size });
        }
        if hop.target >= targets {
            return Err(AmplitudeError::IndexOutOfRange {
                species,
                kind: "target",
                index: hop.target,
                size: targets,
            });
        }
        if path[..n].iter().any(|other| other.index == hop.index) {
            return Err(AmplitudeError::RepeatedIndex { species, kind, index: hop.index });
        }
    }
    Ok(())
}

fn validate_configuration<W: WaveFunction + ?Sized>(wf: &W, config: &Configuration) -> Result<(), AmplitudeError> {
    for species in Species::ALL {
        let (sites, orbitals) = (config.sites(species), config.orbitals(species));
        if sites.len() != orbitals.len() {
            return Err(AmplitudeError::ShapeMismatch {
                species,
                sites: sites.len(),
                orbitals: orbitals.len(),
            });
        }
        let checks = [
            ("site", sites, wf.num_sites()),
            ("orbital", orbitals, wf.num_orbitals(species)),
        ];
        for (kind, values, size) in checks {
            if let Some(&index) = values.iter().find(|&&v| v >= size) {
                return Err(AmplitudeError::IndexOutOfRange { species, kind, index, size });
            }
        }
    }
    Ok(())
}
