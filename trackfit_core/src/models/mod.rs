// trackfit_core/src/models/mod.rs

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::{debug, warn};

use crate::estimation::Node;
use crate::state::StateEstimate;
use crate::types::Matrix;

/// The linear maps used to carry a state from one run coordinate to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transport {
    /// The transport matrix `F`.
    pub f: Matrix,
    /// The process noise `Q`, if the model adds any.
    pub q: Option<Matrix>,
}

/// A propagated state together with the transport that produced it.
#[derive(Debug, Clone)]
pub struct Propagated<A> {
    pub state: StateEstimate<A>,
    pub transport: Transport,
}

// --- MOTION MODEL TRAIT ---
// The physics of the particle between two measurement sites. `x' = F·x`, `C' = F·C·Fᵗ + Q`
/// The physical hypothesis used to carry states along the run coordinate.
///
/// Every method has a default, so the bare trait describes a particle that does
/// not move and does not scatter (`F = I`, no `Q`, every step valid). Concrete
/// models override what their physics needs. A model is shared by reference
/// between engines, so it must not keep per-fit state.
pub trait MotionModel<A = ()>: Debug + Send + Sync
where
    A: Clone,
{
    /// Whether `state` can be carried to `z_target` at all.
    fn valid_step(&self, state: &StateEstimate<A>, z_target: f64) -> bool {
        let _ = (state, z_target);
        true
    }

    /// The transport matrix `F` for a step of length `dz`.
    fn transport_matrix(&self, state: &StateEstimate<A>, dz: f64) -> Matrix {
        let _ = dz;
        Matrix::identity(state.dim(), state.dim())
    }

    /// The process noise `Q` for a step of length `dz`.
    fn process_noise(&self, state: &StateEstimate<A>, dz: f64) -> Option<Matrix> {
        let _ = (state, dz);
        None
    }

    /// Carries `state` to `z_target`.
    ///
    /// Returns `None` when the model rejects the step; callers end their pass
    /// there instead of treating it as an error.
    fn propagate(&self, state: &StateEstimate<A>, z_target: f64) -> Option<Propagated<A>> {
        if !self.valid_step(state, z_target) {
            warn!(from = state.z, to = z_target, "propagation not possible");
            return None;
        }

        let dz = z_target - state.z;
        let f = self.transport_matrix(state, dz);
        let q = self.process_noise(state, dz);

        let vector = &f * &state.vector;
        let mut covariance = &f * &state.covariance * f.transpose();
        if let Some(q) = &q {
            covariance += q;
        }

        debug!(from = state.z, to = z_target, "propagated state");
        Some(Propagated {
            state: StateEstimate::new(vector, covariance, z_target, state.aux.clone()),
            transport: Transport { f, q },
        })
    }

    /// Called once per node right after its filter stage is recorded.
    fn after_filter(&self, node: &Node<A>) {
        let _ = node;
    }

    /// Called once per node right after its smooth stage is recorded.
    fn after_smooth(&self, node: &Node<A>) {
        let _ = node;
    }
}

/// The base model: `F = I`, no process noise, every step valid.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityModel;

impl<A: Clone> MotionModel<A> for IdentityModel {}

pub mod straight_line;
