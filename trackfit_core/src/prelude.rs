// trackfit_core/src/prelude.rs

// --- Core Abstractions ---
pub use crate::models::{IdentityModel, MotionModel, Propagated, Transport};

// --- Core Data Structures ---
pub use crate::estimation::{
    EngineStatus, FilterEngine, FitResult, Hit, Node, PassResult, Stage, StageRecord,
    DEFAULT_CHI2_CUT,
};
pub use crate::state::StateEstimate;
pub use crate::types::{Matrix, Vector};

// --- Errors ---
pub use crate::error::{KalmanError, Result};

// --- Concrete Model Implementations ---
pub use crate::models::straight_line::{
    position_projection, Kinematics, Medium, StraightLineModel,
};
