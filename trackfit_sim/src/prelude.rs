// trackfit_sim/src/prelude.rs

// Re-export the entire trackfit_core prelude so the driver sees the engine types.
pub use trackfit_core::prelude::*;

pub use crate::cli::Cli;
pub use crate::config::{DetectorConfig, RunConfig, SeedStateConfig};
pub use crate::error::SimError;
pub use crate::prng::SimulationRng;
pub use crate::report::{EventReport, NodeReport, RunReport, RunSummary};
pub use crate::runner::ToyRunner;
