//! Systems module - concrete lattice wave functions.

mod stagflux;

pub use stagflux::{StagFluxParams, StagFluxWaveFunction};
