// trackfit_sim/src/lib.rs

//! Toy Monte-Carlo driver for the `trackfit_core` engine: generates straight
//! tracks through a plane detector, fits them and summarizes the fit quality.

// This prelude is for convenience for the binary and the tests.
pub mod prelude;

pub mod cli;
pub mod config;
pub mod error;
pub mod prng;
pub mod report;
pub mod runner;
