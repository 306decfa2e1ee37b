use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use det_amp::{read_run_config, ChainError, Species, SpinSwapChain, StagFluxWaveFunction, WaveFunction};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.yml")]
    config: String,
}

fn run(args: &Args) -> Result<(), ChainError> {
    let config = read_run_config(&args.config)?;
    let wf = StagFluxWaveFunction::new(config.lattice)?;
    info!(
        "{}x{} lattice, {} up / {} down particles",
        config.lattice.lx, config.lattice.ly, config.lattice.n_up, config.lattice.n_down
    );

    let mut chain = SpinSwapChain::new(
        &wf,
        wf.ground_state_orbitals(Species::Up),
        wf.ground_state_orbitals(Species::Down),
        config.amplitude,
        config.sampler,
    )?;
    let results = chain.run()?;

    println!("Staggered flux VMC chain");
    println!("------------------------");
    println!("Sites: {}", wf.num_sites());
    println!("Steps: {} (+{} warmup)", config.sampler.n_steps, config.sampler.n_warmup);
    println!("<ln|Psi|^2>: {:.6} ± {:.6}", results.log_prob, results.error);
    println!("Autocorrelation time: {:.2} steps", results.autocorrelation_time);
    println!("Acceptance rate: {:.4}", results.acceptance_rate);
    println!("Singular rejections: {}", results.singular_rejections);
    println!("Refreshes: {} (max drift {:.3e})", results.refreshes, results.max_drift);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
