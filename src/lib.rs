//! det_amp - determinant amplitudes for lattice Variational Monte Carlo
//!
//! This crate evaluates the overlap of a lattice configuration with a
//! two-species Slater determinant state, `det(A↑)·det(A↓)`, and keeps it
//! current under row (real-space) and column (orbital-space) hops through
//! low-rank determinant and inverse updates. Amplitudes are carried in an
//! extended exponent range so that large systems neither overflow nor
//! underflow.

pub mod numeric;
pub mod error;
pub mod wavefunction;
pub mod systems;
pub mod state;
pub mod amplitude;
pub mod sampling;
pub mod io;

// Re-export commonly used types at crate root
pub use numeric::{BigComplex, BigReal};
pub use error::{AmplitudeError, ChainError, ConfigError, RangeError};
pub use wavefunction::{Species, TabulatedWaveFunction, WaveFunction};
pub use systems::{StagFluxParams, StagFluxWaveFunction};
pub use state::{Configuration, Hop, HopPath};
pub use amplitude::{Amplitude, AmplitudeParams, Drift, UpdateOrder};
pub use sampling::{ChainParams, ChainResults, SpinSwapChain};
pub use io::{parse_run_config, read_run_config, RunConfig};
