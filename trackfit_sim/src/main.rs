// trackfit_sim/src/main.rs

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use trackfit_sim::prelude::*;

fn run(cli: &Cli) -> Result<(), SimError> {
    let mut config = RunConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    let mut runner = ToyRunner::new(config)?;
    let report = runner.run(cli.reverse)?;

    let summary = &report.summary;
    println!(
        "fitted {}/{} tracks, chi2/dof = {:.3}",
        summary.fitted, summary.events, summary.chi2_per_dof
    );
    for (i, (mean, rms)) in summary.pull_mean.iter().zip(&summary.pull_rms).enumerate() {
        println!("  pull[{i}]: mean = {mean:+.3}, rms = {rms:.3}");
    }

    if let Some(path) = &cli.output {
        report.write_json(path)?;
        info!("Report written to: {}", path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
