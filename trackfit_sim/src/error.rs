// trackfit_sim/src/error.rs

use std::path::PathBuf;
use thiserror::Error;
use trackfit_core::error::KalmanError;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("configuration file not found: {}", .0.display())]
    MissingConfig(PathBuf),

    #[error("failed to load configuration: {0}")]
    Config(#[from] figment::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("kalman engine error: {0}")]
    Kalman(#[from] KalmanError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}
