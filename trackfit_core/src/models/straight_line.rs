// trackfit_core/src/models/straight_line.rs

use serde::{Deserialize, Serialize};

use crate::models::MotionModel;
use crate::state::StateEstimate;
use crate::types::Matrix;

/// Dimension of the straight-line state `(x, y, tx, ty)`.
pub const STATE_DIM: usize = 4;
/// Dimension of a position measurement `(x, y)`.
pub const MEASUREMENT_DIM: usize = 2;

/// Highland multiple-scattering scale, in MeV.
const HIGHLAND_SCALE: f64 = 13.6;
const HIGHLAND_LOG_TERM: f64 = 0.038;

/// The particle hypothesis carried by every state of a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kinematics {
    /// Momentum, in MeV/c.
    pub momentum: f64,
    /// Rest mass, in MeV/c².
    pub mass: f64,
}

impl Kinematics {
    /// Velocity as a fraction of the speed of light.
    pub fn beta(&self) -> f64 {
        let energy = (self.momentum.powi(2) + self.mass.powi(2)).sqrt();
        if energy > 0.0 {
            self.momentum / energy
        } else {
            0.0
        }
    }
}

/// A homogeneous scattering medium.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Medium {
    /// Radiation length times pressure (e.g. cm·bar for a gas).
    pub radiation_length: f64,
    /// Pressure, in the same unit as `radiation_length`'s pressure factor.
    pub pressure: f64,
}

impl Medium {
    /// The radiation length `X0` at this pressure.
    pub fn effective_radiation_length(&self) -> f64 {
        self.radiation_length / self.pressure
    }
}

// --- Straight Line Model ---
// State (x, y, tx, ty): positions and slopes dx/dz, dy/dz.
// Without a medium the track is an exact line; with one, every step adds
// Highland multiple-scattering noise as a thick scatterer.
#[derive(Debug, Default, Clone)]
pub struct StraightLineModel {
    pub medium: Option<Medium>,
    /// The particle stops here; steps beyond are rejected.
    pub range_end: Option<f64>,
}

impl StraightLineModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_medium(mut self, medium: Medium) -> Self {
        self.medium = Some(medium);
        self
    }

    pub fn with_range_end(mut self, range_end: f64) -> Self {
        self.range_end = Some(range_end);
        self
    }

    /// RMS plane scattering angle after a path `path` through the medium.
    pub fn scattering_angle(&self, kinematics: &Kinematics, path: f64) -> f64 {
        let Some(medium) = &self.medium else {
            return 0.0;
        };
        let x0 = medium.effective_radiation_length();
        let beta_p = kinematics.beta() * kinematics.momentum;
        if path <= 0.0 || x0 <= 0.0 || beta_p <= 0.0 {
            return 0.0;
        }

        let t = path / x0;
        HIGHLAND_SCALE / beta_p * t.sqrt() * (1.0 + HIGHLAND_LOG_TERM * t.ln())
    }
}

/// The projection `H` selecting `(x, y)` from `(x, y, tx, ty)`.
pub fn position_projection() -> Matrix {
    let mut h = Matrix::zeros(MEASUREMENT_DIM, STATE_DIM);
    h[(0, 0)] = 1.0;
    h[(1, 1)] = 1.0;
    h
}

impl MotionModel<Kinematics> for StraightLineModel {
    fn valid_step(&self, state: &StateEstimate<Kinematics>, z_target: f64) -> bool {
        if !z_target.is_finite() || state.aux.momentum <= 0.0 {
            return false;
        }
        self.range_end.map_or(true, |end| z_target <= end)
    }

    fn transport_matrix(&self, state: &StateEstimate<Kinematics>, dz: f64) -> Matrix {
        debug_assert_eq!(state.dim(), STATE_DIM);
        let mut f = Matrix::identity(STATE_DIM, STATE_DIM);
        f[(0, 2)] = dz;
        f[(1, 3)] = dz;
        f
    }

    fn process_noise(&self, state: &StateEstimate<Kinematics>, dz: f64) -> Option<Matrix> {
        if self.medium.is_none() || dz == 0.0 {
            return None;
        }

        let tx = state.vector[2];
        let ty = state.vector[3];
        let norm = 1.0 + tx * tx + ty * ty;
        let theta0 = self.scattering_angle(&state.aux, dz.abs() * norm.sqrt());

        // Slope covariance of a projected scattering angle theta0.
        let scale = theta0 * theta0 * norm;
        let slopes = Matrix::from_row_slice(
            2,
            2,
            &[
                scale * (1.0 + tx * tx),
                scale * tx * ty,
                scale * tx * ty,
                scale * (1.0 + ty * ty),
            ],
        );

        let mut q = Matrix::zeros(STATE_DIM, STATE_DIM);
        for i in 0..2 {
            for j in 0..2 {
                let s = slopes[(i, j)];
                q[(i, j)] = dz * dz / 3.0 * s;
                q[(i, j + 2)] = dz / 2.0 * s;
                q[(i + 2, j)] = dz / 2.0 * s;
                q[(i + 2, j + 2)] = s;
            }
        }
        Some(q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::is_positive_definite;
    use crate::types::Vector;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    const XENON: Medium = Medium {
        radiation_length: 1530.0,
        pressure: 10.0,
    };

    fn electron(momentum: f64) -> Kinematics {
        Kinematics {
            momentum,
            mass: 0.511,
        }
    }

    fn track_state(tx: f64, ty: f64) -> StateEstimate<Kinematics> {
        StateEstimate::new(
            Vector::from_row_slice(&[1.0, -1.0, tx, ty]),
            Matrix::identity(STATE_DIM, STATE_DIM) * 0.01,
            0.0,
            electron(2.5),
        )
    }

    #[test]
    fn test_line_without_medium() {
        let model = StraightLineModel::new();
        let propagated = model.propagate(&track_state(0.5, -0.25), 2.0).unwrap();
        assert_abs_diff_eq!(propagated.state.vector[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(propagated.state.vector[1], -1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(propagated.state.vector[2], 0.5, epsilon = 1e-12);
        assert!(propagated.transport.q.is_none());
        assert_eq!(propagated.state.aux, electron(2.5));
    }

    #[test]
    fn test_beta() {
        assert_relative_eq!(electron(0.0).beta(), 0.0);
        let fast = electron(1000.0);
        assert!(fast.beta() > 0.999 && fast.beta() < 1.0);
    }

    #[test]
    fn test_highland_angle() {
        let model = StraightLineModel::new().with_medium(XENON);
        let kin = electron(2.5);
        let x0 = XENON.effective_radiation_length();
        let path = 1.0;
        let t: f64 = path / x0;
        let expected = 13.6 / (kin.beta() * kin.momentum) * t.sqrt() * (1.0 + 0.038 * t.ln());
        assert_relative_eq!(model.scattering_angle(&kin, path), expected, epsilon = 1e-12);
        assert_eq!(StraightLineModel::new().scattering_angle(&kin, path), 0.0);
    }

    #[test]
    fn test_process_noise_structure() {
        let model = StraightLineModel::new().with_medium(XENON);
        let q = model.process_noise(&track_state(0.2, 0.1), 1.0).unwrap();

        assert_eq!(q, q.transpose());
        assert!(is_positive_definite(&q));
        // Thick scatterer: position variance is dz²/3 of the slope variance.
        assert_relative_eq!(q[(0, 0)], q[(2, 2)] / 3.0, epsilon = 1e-12);
        assert_relative_eq!(q[(0, 2)], q[(2, 2)] / 2.0, epsilon = 1e-12);
        assert!(model.process_noise(&track_state(0.2, 0.1), 0.0).is_none());
    }

    #[test]
    fn test_reverse_step_flips_position_slope_correlation() {
        let model = StraightLineModel::new().with_medium(XENON);
        let forward = model.process_noise(&track_state(0.0, 0.0), 1.0).unwrap();
        let backward = model.process_noise(&track_state(0.0, 0.0), -1.0).unwrap();
        assert_relative_eq!(forward[(0, 0)], backward[(0, 0)], epsilon = 1e-12);
        assert_relative_eq!(forward[(0, 2)], -backward[(0, 2)], epsilon = 1e-12);
    }

    #[test]
    fn test_range_end_rejects_step() {
        let model = StraightLineModel::new().with_range_end(5.0);
        assert!(model.valid_step(&track_state(0.0, 0.0), 5.0));
        assert!(!model.valid_step(&track_state(0.0, 0.0), 5.5));
        assert!(!model.valid_step(&track_state(0.0, 0.0), f64::NAN));
        assert!(model.propagate(&track_state(0.0, 0.0), 6.0).is_none());
    }

    #[test]
    fn test_position_projection() {
        let h = position_projection();
        let x = Vector::from_row_slice(&[3.0, 4.0, 0.1, 0.2]);
        assert_eq!(h * x, Vector::from_row_slice(&[3.0, 4.0]));
    }
}
