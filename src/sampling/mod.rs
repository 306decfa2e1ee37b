//! Sampling module - Monte Carlo chains driving the amplitude engine.

mod vmc;

pub use vmc::{compute_autocorrelation_time, compute_error, ChainParams, ChainResults, SpinSwapChain};
