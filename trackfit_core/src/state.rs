// trackfit_core/src/state.rs

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{KalmanError, Result};
use crate::sampling::sample_gaussian;
use crate::types::{Matrix, Vector};

/// A Gaussian state estimate attached to a point of the run coordinate.
///
/// Estimates are values: every propagate, predict, smooth and generate call
/// builds a new one instead of mutating its input. The auxiliary payload `aux`
/// travels unchanged through all of them; motion models may read it (e.g. the
/// particle momentum) but never rewrite it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEstimate<A = ()> {
    /// The mean vector `x`.
    pub vector: Vector,
    /// The covariance matrix `C`.
    pub covariance: Matrix,
    /// The run coordinate this estimate refers to.
    pub z: f64,
    /// Model-specific pass-through parameters.
    pub aux: A,
}

impl<A> StateEstimate<A> {
    pub fn new(vector: Vector, covariance: Matrix, z: f64, aux: A) -> Self {
        assert_eq!(vector.nrows(), covariance.nrows());
        assert_eq!(vector.nrows(), covariance.ncols());

        Self {
            vector,
            covariance,
            z,
            aux,
        }
    }

    /// An ideal state: known exactly, with a zero covariance.
    pub fn exact(vector: Vector, z: f64, aux: A) -> Self {
        let n = vector.nrows();
        Self::new(vector, Matrix::zeros(n, n), z, aux)
    }

    /// Returns the dimension of the state vector.
    pub fn dim(&self) -> usize {
        self.vector.nrows()
    }

    /// Standard deviation of coordinate `index`.
    ///
    /// A non-positive variance is returned as is rather than producing a NaN.
    pub fn std_dev(&self, index: usize) -> Result<f64> {
        if index >= self.dim() {
            return Err(KalmanError::IndexOutOfRange {
                index,
                dim: self.dim(),
            });
        }
        let variance = self.covariance[(index, index)];
        Ok(if variance > 0.0 {
            variance.sqrt()
        } else {
            variance
        })
    }

    /// The same mean at `z` with covariance `covariance`.
    pub fn with_covariance(&self, covariance: Matrix) -> Self
    where
        A: Clone,
    {
        Self::new(self.vector.clone(), covariance, self.z, self.aux.clone())
    }

    /// The same estimate relabelled to the run coordinate `z`.
    pub fn at(&self, z: f64) -> Self
    where
        A: Clone,
    {
        Self::new(self.vector.clone(), self.covariance.clone(), z, self.aux.clone())
    }

    /// Draws `x + η` with `η ~ N(0, C)`.
    pub fn random<R: Rng + ?Sized>(&self, rng: &mut R) -> Vector {
        &self.vector + sample_gaussian(rng, &self.covariance)
    }
}
