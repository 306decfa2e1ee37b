//! Extended-range scalars for determinants that leave the `f64` range.

mod big;

pub use big::{BigComplex, BigReal};
