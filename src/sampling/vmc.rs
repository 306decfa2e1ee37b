//! Metropolis sampling of lattice configurations for Variational Monte Carlo.
//!
//! The chain samples `|<{R_i,σ_i}|Ψ>|²` with moves that keep the amplitude
//! engine current through its low-rank updates: an up and a down particle
//! exchange their sites, or (below half filling) a particle hops to an empty
//! site.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::amplitude::{Amplitude, AmplitudeParams};
use crate::error::{AmplitudeError, ChainError, ConfigError};
use crate::numeric::{BigComplex, BigReal};
use crate::state::{Configuration, Hop};
use crate::wavefunction::{Species, WaveFunction};

/// Parameters of a Metropolis chain.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct ChainParams {
    /// Recorded steps
    pub n_steps: usize,
    /// Steps discarded before recording
    #[serde(default)]
    pub n_warmup: usize,
    /// Accepted moves between two full reinitialisations
    pub refresh_interval: usize,
    /// Relative amplitude drift above which a refresh is reported
    pub drift_tolerance: f64,
    /// Random starting configurations tried before giving up
    pub max_init_attempts: usize,
    /// Fixed seed for reproducible chains
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            n_steps: 10_000,
            n_warmup: 1_000,
            refresh_interval: 100,
            drift_tolerance: 1e-8,
            max_init_attempts: 1_000,
            seed: None,
        }
    }
}

impl ChainParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_steps == 0 {
            return Err(ConfigError::Sampler("n_steps must be positive".into()));
        }
        if self.refresh_interval == 0 {
            return Err(ConfigError::Sampler("refresh_interval must be positive".into()));
        }
        if self.max_init_attempts == 0 {
            return Err(ConfigError::Sampler("max_init_attempts must be positive".into()));
        }
        if !(self.drift_tolerance > 0.0) {
            return Err(ConfigError::Sampler(format!(
                "drift_tolerance must be positive, got {}",
                self.drift_tolerance
            )));
        }
        Ok(())
    }
}

/// Results of a Metropolis chain.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChainResults {
    /// Mean of `ln|Ψ|²` over the recorded steps
    pub log_prob: f64,
    /// Blocked error of `log_prob`
    pub error: f64,
    pub autocorrelation_time: f64,
    pub acceptance_rate: f64,
    /// Moves accepted by Metropolis but refused as singular by the engine
    pub singular_rejections: usize,
    pub refreshes: usize,
    /// Largest relative amplitude drift seen at a refresh
    pub max_drift: f64,
}

/// Metropolis chain over the configurations of a two-species lattice system.
pub struct SpinSwapChain<'w, W: WaveFunction + ?Sized> {
    amplitude: Amplitude<'w, W>,
    params: ChainParams,
    rng: StdRng,
    accepted: usize,
    singular_rejections: usize,
    refreshes: usize,
    max_drift: f64,
}

impl<'w, W: WaveFunction + ?Sized> SpinSwapChain<'w, W> {
    /// Places the particles at random until the configuration has nonzero
    /// overlap with the trial state. `orbitals_*` are the occupied orbitals.
    pub fn new(
        wavefunction: &'w W,
        orbitals_up: Vec<usize>,
        orbitals_down: Vec<usize>,
        amplitude_params: AmplitudeParams,
        params: ChainParams,
    ) -> Result<Self, ChainError> {
        params.validate()?;
        let mut rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let num_sites = wavefunction.num_sites();
        let start = Configuration::random(num_sites, orbitals_up.clone(), orbitals_down.clone(), &mut rng)?;
        let mut amplitude = Amplitude::new(wavefunction, start, amplitude_params)?;

        for attempt in 1..=params.max_init_attempts {
            match amplitude.init() {
                Ok(()) => {
                    info!("starting configuration found after {attempt} attempt(s)");
                    return Ok(Self {
                        amplitude,
                        params,
                        rng,
                        accepted: 0,
                        singular_rejections: 0,
                        refreshes: 0,
                        max_drift: 0.0,
                    });
                }
                Err(err) if err.is_singular() => {
                    debug!("attempt {attempt}: {err}");
                    let config = Configuration::random(num_sites, orbitals_up.clone(), orbitals_down.clone(), &mut rng)?;
                    amplitude.set_configuration(config)?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(ChainError::NoOverlap { attempts: params.max_init_attempts })
    }

    pub fn amplitude(&self) -> &Amplitude<'w, W> {
        &self.amplitude
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Run warmup and recorded steps.
    pub fn run(&mut self) -> Result<ChainResults, ChainError> {
        for _ in 0..self.params.n_warmup {
            self.step()?;
        }
        let warmup_accepted = self.accepted;

        let mut samples = Vec::with_capacity(self.params.n_steps);
        for _ in 0..self.params.n_steps {
            self.step()?;
            samples.push(2.0 * self.amplitude.amp()?.ln().re);
        }
        let acceptance_rate = (self.accepted - warmup_accepted) as f64 / self.params.n_steps as f64;
        let results = self.compute_results(&samples, acceptance_rate);
        info!(
            "chain finished: acceptance {:.3}, {} singular rejections, {} refreshes",
            results.acceptance_rate, results.singular_rejections, results.refreshes
        );
        Ok(results)
    }

    /// One Metropolis step; returns whether the move was committed.
    pub fn step(&mut self) -> Result<bool, ChainError> {
        let config = self.amplitude.configuration();
        let (n_up, n_down) = (config.particles(Species::Up), config.particles(Species::Down));
        if n_up + n_down == 0 {
            return Ok(false);
        }
        let empty = self.empty_sites();
        let hop_move = !empty.is_empty() && (n_up == 0 || n_down == 0 || self.rng.gen_bool(0.5));

        let committed = if hop_move {
            let species = if n_down == 0 || (n_up > 0 && self.rng.gen_bool(0.5)) {
                Species::Up
            } else {
                Species::Down
            };
            let row = self.rng.gen_range(0..self.amplitude.configuration().particles(species));
            let hop = Hop::new(row, empty[self.rng.gen_range(0..empty.len())]);
            self.hop_step(species, hop)?
        } else if n_up > 0 && n_down > 0 {
            let up = self.rng.gen_range(0..n_up);
            let down = self.rng.gen_range(0..n_down);
            self.swap_step(up, down)?
        } else {
            false
        };

        if committed {
            self.accepted += 1;
            if self.accepted % self.params.refresh_interval == 0 {
                self.refresh()?;
            }
        }
        Ok(committed)
    }

    fn hop_step(&mut self, species: Species, hop: Hop) -> Result<bool, ChainError> {
        let ratio = self.amplitude.virt_row_update(species, hop)?;
        if !self.accept(ratio) {
            return Ok(false);
        }
        self.commit(|amplitude| amplitude.row_update(species, hop).map(|_| ()))
    }

    /// Up row `up` and down row `down` exchange their sites.
    fn swap_step(&mut self, up: usize, down: usize) -> Result<bool, ChainError> {
        let config = self.amplitude.configuration();
        let up_hop = Hop::new(up, config.site(Species::Down, down));
        let down_hop = Hop::new(down, config.site(Species::Up, up));
        let ratio = self.amplitude.virt_row_update(Species::Up, up_hop)?
            * self.amplitude.virt_row_update(Species::Down, down_hop)?;
        if !self.accept(ratio) {
            return Ok(false);
        }
        self.commit(|amplitude| amplitude.update(&[up_hop], &[down_hop], &[], &[]))
    }

    /// Metropolis test on `|ratio|²`.
    fn accept(&mut self, ratio: BigComplex) -> bool {
        if ratio.is_zero() {
            return false;
        }
        let u: f64 = self.rng.gen();
        ratio.norm_sqr() >= BigReal::from(u)
    }

    fn commit<F>(&mut self, apply: F) -> Result<bool, ChainError>
    where
        F: FnOnce(&mut Amplitude<'w, W>) -> Result<(), AmplitudeError>,
    {
        match apply(&mut self.amplitude) {
            Ok(()) => Ok(true),
            Err(err) if err.is_singular() => {
                debug!("move refused: {err}");
                self.singular_rejections += 1;
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn refresh(&mut self) -> Result<(), ChainError> {
        let drift = self.amplitude.refresh()?;
        self.refreshes += 1;
        self.max_drift = self.max_drift.max(drift.relative_error);
        if drift.relative_error > self.params.drift_tolerance {
            warn!(
                "amplitude drifted by {:.3e} (inverse residual {:.3e}) since the last refresh",
                drift.relative_error, drift.max_residual
            );
        }
        Ok(())
    }

    fn empty_sites(&self) -> Vec<usize> {
        let config = self.amplitude.configuration();
        let mut occupied = vec![false; self.amplitude.wavefunction().num_sites()];
        for species in Species::ALL {
            for &site in config.sites(species) {
                occupied[site] = true;
            }
        }
        occupied.iter()
            .enumerate()
            .filter_map(|(site, &full)| (!full).then_some(site))
            .collect()
    }

    /// Compute final statistics from the `ln|Ψ|²` samples.
    fn compute_results(&self, samples: &[f64], acceptance_rate: f64) -> ChainResults {
        let n = samples.len() as f64;
        let log_prob = samples.iter().sum::<f64>() / n;
        let autocorrelation_time = compute_autocorrelation_time(samples);
        let error = compute_error(samples, autocorrelation_time);

        ChainResults {
            log_prob,
            error,
            autocorrelation_time,
            acceptance_rate,
            singular_rejections: self.singular_rejections,
            refreshes: self.refreshes,
            max_drift: self.max_drift,
        }
    }
}

/// Estimate autocorrelation time using initial positive sequence.
pub fn compute_autocorrelation_time(samples: &[f64]) -> f64 {
    let n = samples.len();
    if n == 0 {
        return 1.0;
    }
    let mean = samples.iter().sum::<f64>() / n as f64;
    let var = samples.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n as f64;

    if var == 0.0 {
        return 1.0;
    }

    let mut autocorr = 1.0;
    for t in 1..n / 2 {
        let auto_t: f64 = samples[..n - t].iter()
            .zip(samples[t..].iter())
            .map(|(&x, &y)| (x - mean) * (y - mean))
            .sum::<f64>() / ((n - t) as f64 * var);

        if auto_t < 0.0 {
            break;
        }
        autocorr += 2.0 * auto_t;
    }
    autocorr
}

/// Compute error using blocking method.
pub fn compute_error(samples: &[f64], autocorrelation_time: f64) -> f64 {
    let block_size = ((2.0 * autocorrelation_time).ceil() as usize).max(1);
    let n_blocks = samples.len() / block_size;

    if n_blocks < 2 {
        return 0.0;
    }

    let block_means: Vec<f64> = samples
        .chunks_exact(block_size)
        .map(|block| block.iter().sum::<f64>() / block_size as f64)
        .collect();

    let mean = block_means.iter().sum::<f64>() / n_blocks as f64;
    let variance = block_means.iter()
        .map(|&x| (x - mean).powi(2))
        .sum::<f64>() / (n_blocks - 1) as f64;

    (variance / n_blocks as f64).sqrt()
}
