// trackfit_core/src/types.rs

use nalgebra::{DMatrix, DVector};

// --- Core Type Aliases ---
/// A state or measurement vector.
pub type Vector = DVector<f64>;
/// A covariance, transport, projection or noise matrix.
pub type Matrix = DMatrix<f64>;
