// trackfit_core/src/sampling.rs

//! Multivariate-normal deviates for Monte-Carlo generation.
//!
//! Only track generation draws from here. The filter and smoother are
//! fully deterministic.

use nalgebra::SymmetricEigen;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::linalg::symmetrize;
use crate::types::{Matrix, Vector};

/// Draws one zero-mean deviate `η` with `Cov(η) = covariance`.
///
/// Uses the Cholesky factor `L` (`η = L·ξ`, `ξ ~ N(0, I)`). Covariances that are
/// positive semi-definite but singular, like the zero covariance of an ideal
/// state, have no Cholesky factor; those go through a symmetric
/// eigendecomposition instead.
pub fn sample_gaussian<R: Rng + ?Sized>(rng: &mut R, covariance: &Matrix) -> Vector {
    let n = covariance.nrows();
    let xi = Vector::from_fn(n, |_, _| StandardNormal.sample(rng));
    square_root(covariance) * xi
}

/// Returns a matrix `S` with `S·Sᵗ = covariance`.
pub fn square_root(covariance: &Matrix) -> Matrix {
    if let Some(chol) = covariance.clone().cholesky() {
        return chol.l();
    }

    let eigen = SymmetricEigen::new(symmetrize(covariance));
    // Round-off can leave tiny negative eigenvalues on a PSD matrix.
    let roots = eigen.eigenvalues.map(|v| v.max(0.0).sqrt());
    &eigen.eigenvectors * Matrix::from_diagonal(&roots)
}
