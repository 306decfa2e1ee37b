//! Amplitude module - determinant and inverse-matrix update engine.
//!
//! A configuration's overlap with the trial state is `det(A↑)·det(A↓)` with
//! `A_σ[(i, j)] = φ_{f_j}(R_i)`. Monte Carlo moves replace a few rows
//! (particles hopping in real space) or columns (occupied orbitals hopping in
//! quantum-number space). Ratios and inverses follow from the
//! Sherman–Morrison family instead of refactorising.

mod engine;
mod formulas;
#[cfg(test)]
mod tests;

pub use engine::{Amplitude, AmplitudeParams, Drift};
pub use formulas::UpdateOrder;
