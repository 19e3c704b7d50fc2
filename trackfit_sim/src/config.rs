// trackfit_sim/src/config.rs

//! Loading and validating the run configuration.
//!
//! Values are layered: built-in defaults, then the TOML run file, then
//! `TRACKFIT_`-prefixed environment variables (`TRACKFIT_DETECTOR__PLANES=30`).

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use trackfit_core::prelude::{Kinematics, Matrix, Medium, StateEstimate, StraightLineModel, Vector};
use trackfit_core::models::straight_line::STATE_DIM;

use crate::error::SimError;

// =========================================================================
// == Top-Level Configuration ==
// =========================================================================

/// # RunConfig
/// Everything a toy Monte-Carlo run needs: the detector, the medium, the
/// particle hypothesis and the seed state shared by generation and fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Seed for the pseudo-random number generator.
    pub seed: u64,
    /// Number of tracks to generate and fit.
    pub events: usize,
    /// Per-node chi2 above which a node counts as an outlier.
    pub chi2_cut: f64,
    pub detector: DetectorConfig,
    /// Scattering medium; no multiple scattering when absent.
    pub medium: Option<Medium>,
    pub particle: Kinematics,
    pub seed_state: SeedStateConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            events: 100,
            chi2_cut: trackfit_core::estimation::DEFAULT_CHI2_CUT,
            detector: DetectorConfig::default(),
            // Xenon at 10 bar.
            medium: Some(Medium {
                radiation_length: 1530.0,
                pressure: 10.0,
            }),
            particle: Kinematics {
                momentum: 2.5,
                mass: 0.511,
            },
            seed_state: SeedStateConfig::default(),
        }
    }
}

// =========================================================================
// == Configuration Sub-Structs ==
// =========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    /// Number of measurement planes.
    pub planes: usize,
    /// Run coordinate of the first plane.
    pub first_z: f64,
    /// Distance between consecutive planes.
    pub spacing: f64,
    /// Position resolution (sx, sy) of every plane.
    pub resolution: [f64; 2],
    /// Where the particle stops, if it stops inside the detector.
    pub range_end: Option<f64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            planes: 20,
            first_z: 0.0,
            spacing: 0.5,
            resolution: [0.1, 0.1],
            range_end: None,
        }
    }
}

/// The seed state (x, y, tx, ty) at the first plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeedStateConfig {
    pub mean: [f64; STATE_DIM],
    pub sigma: [f64; STATE_DIM],
}

impl Default for SeedStateConfig {
    fn default() -> Self {
        Self {
            mean: [0.0; STATE_DIM],
            sigma: [1.0, 1.0, 0.5, 0.5],
        }
    }
}

impl RunConfig {
    /// Loads the configuration, optionally from a TOML run file.
    pub fn load(path: Option<&Path>) -> Result<Self, SimError> {
        let mut figment = Figment::from(Serialized::defaults(RunConfig::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(SimError::MissingConfig(path.to_path_buf()));
            }
            info!("Loading run configuration from: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }

        let config: RunConfig = figment
            .merge(Env::prefixed("TRACKFIT_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration from TOML text layered over the defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self, SimError> {
        let config: RunConfig = Figment::from(Serialized::defaults(RunConfig::default()))
            .merge(Toml::string(toml))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        let invalid = |msg: &str| Err(SimError::InvalidConfig(msg.to_string()));

        if self.detector.planes == 0 {
            return invalid("detector.planes must be at least 1");
        }
        if !(self.detector.spacing > 0.0) {
            return invalid("detector.spacing must be positive");
        }
        if self.detector.resolution.iter().any(|s| !(*s > 0.0)) {
            return invalid("detector.resolution must be positive");
        }
        if self.seed_state.sigma.iter().any(|s| !(*s > 0.0)) {
            return invalid("seed_state.sigma must be positive");
        }
        if !(self.particle.momentum > 0.0) {
            return invalid("particle.momentum must be positive");
        }
        if let Some(medium) = &self.medium {
            if !(medium.radiation_length > 0.0 && medium.pressure > 0.0) {
                return invalid("medium.radiation_length and medium.pressure must be positive");
            }
        }
        Ok(())
    }

    /// Run coordinates of the detector planes, in increasing order.
    pub fn plane_z(&self) -> Vec<f64> {
        (0..self.detector.planes)
            .map(|k| self.detector.first_z + k as f64 * self.detector.spacing)
            .collect()
    }

    /// The measurement covariance `V` shared by all planes.
    pub fn hit_covariance(&self) -> Matrix {
        let [sx, sy] = self.detector.resolution;
        Matrix::from_diagonal(&Vector::from_row_slice(&[sx * sx, sy * sy]))
    }

    pub fn model(&self) -> StraightLineModel {
        let mut model = StraightLineModel::new();
        if let Some(medium) = self.medium {
            model = model.with_medium(medium);
        }
        if let Some(end) = self.detector.range_end {
            model = model.with_range_end(end);
        }
        model
    }

    pub fn seed_state(&self) -> StateEstimate<Kinematics> {
        let variances: Vec<f64> = self.seed_state.sigma.iter().map(|s| s * s).collect();
        StateEstimate::new(
            Vector::from_row_slice(&self.seed_state.mean),
            Matrix::from_diagonal(&Vector::from_vec(variances)),
            self.detector.first_z,
            self.particle,
        )
    }
}
