// trackfit_core/src/lib.rs

//! Kalman filter and RTS smoother for reconstructing particle tracks from
//! position measurements ordered along a run coordinate.

pub mod error;
pub mod estimation;
pub mod linalg;
pub mod models;
pub mod prelude;
pub mod sampling;
pub mod state;
pub mod types;
