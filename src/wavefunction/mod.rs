//! Wavefunction module - the orbital interface seen by the amplitude engine.

mod traits;
mod tabulated;

pub use traits::{Species, WaveFunction};
pub use tabulated::TabulatedWaveFunction;
