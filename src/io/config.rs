//! YAML run configuration.
//!
//! ```yaml
//! lattice:
//!   lx: 8
//!   ly: 8
//!   n_up: 32
//!   n_down: 32
//!   phi: 0.785398
//!   neel: 0.05
//!   bc_phase: [1.0, 0.0]
//! sampler:
//!   n_steps: 20000
//!   n_warmup: 2000
//!   refresh_interval: 100
//!   drift_tolerance: 1.0e-8
//!   max_init_attempts: 1000
//!   seed: 42
//! amplitude:
//!   singular_tolerance: 1.0e-12
//! ```

use std::fs::File;
use std::io::BufReader;

use serde::{Deserialize, Serialize};

use crate::amplitude::AmplitudeParams;
use crate::error::ConfigError;
use crate::sampling::ChainParams;
use crate::systems::StagFluxParams;

/// Everything a sampling run needs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub lattice: StagFluxParams,
    #[serde(default)]
    pub sampler: ChainParams,
    #[serde(default)]
    pub amplitude: AmplitudeParams,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sampler.validate()?;
        let tolerance = self.amplitude.singular_tolerance;
        if !(tolerance > 0.0 && tolerance < 1.0) {
            return Err(ConfigError::Sampler(format!(
                "singular_tolerance must lie in (0, 1), got {tolerance}"
            )));
        }
        Ok(())
    }
}

/// Parses and validates a run configuration from a YAML string.
pub fn parse_run_config(text: &str) -> Result<RunConfig, ConfigError> {
    let config: RunConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
        path: "<string>".into(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Reads and validates a run configuration from a YAML file.
pub fn read_run_config(filename: &str) -> Result<RunConfig, ConfigError> {
    let file = File::open(filename).map_err(|source| ConfigError::Io {
        path: filename.to_string(),
        source,
    })?;
    let reader = BufReader::new(file);
    let config: RunConfig = serde_yaml::from_reader(reader).map_err(|source| ConfigError::Parse {
        path: filename.to_string(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}
