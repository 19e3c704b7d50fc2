// trackfit_sim/src/cli.rs

use clap::Parser;
use std::path::PathBuf;

use crate::config::RunConfig;

/// Trackfit: toy Monte-Carlo generation and Kalman fitting of straight tracks.
///
/// Command-line values take precedence over the run file and the environment.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The path to the run TOML file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of tracks to generate and fit.
    #[arg(short = 'n', long)]
    pub events: Option<usize>,

    /// Seed for the pseudo-random number generator.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the full JSON report to this path.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Also run the reverse filter on every track.
    #[arg(long, default_value_t = false)]
    pub reverse: bool,
}

impl Cli {
    /// Overrides the loaded configuration with the flags given on the command line.
    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(events) = self.events {
            config.events = events;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
    }
}
