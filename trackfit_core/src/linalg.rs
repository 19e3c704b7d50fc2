// trackfit_core/src/linalg.rs

//! Small linear algebra helpers shared by the node update and the smoother.

use crate::error::{KalmanError, Result};
use crate::types::{Matrix, Vector};

/// Inverts `m`, failing with `SingularMatrix` when no inverse exists.
pub fn invert(m: &Matrix, context: &'static str) -> Result<Matrix> {
    m.clone()
        .try_inverse()
        .ok_or(KalmanError::SingularMatrix { context })
}

/// Computes `vᵗ·M·v`.
pub fn quadratic_form(v: &Vector, m: &Matrix) -> f64 {
    v.dot(&(m * v))
}

/// Forces exact symmetry on a matrix that should be symmetric.
pub fn symmetrize(m: &Matrix) -> Matrix {
    (m + m.transpose()) * 0.5
}

pub fn is_positive_definite(m: &Matrix) -> bool {
    m.clone().cholesky().is_some()
}
