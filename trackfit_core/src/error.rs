// trackfit_core/src/error.rs

use thiserror::Error;

use crate::estimation::Stage;

/// Everything that can go wrong inside the filtering engine.
///
/// Sequence-level failures (a model rejecting a step) are not errors: the passes
/// report them through `PassResult::ok` together with the partial chi2.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KalmanError {
    /// A state was read from a stage that has not been recorded on the node.
    #[error("no '{stage}' state recorded on this node")]
    StageNotSet { stage: Stage },

    /// A chi2 was read from a stage that has no chi2 recorded.
    #[error("no '{stage}' chi2 recorded on this node")]
    Chi2NotSet { stage: Stage },

    /// The smoother needs the transport that carried the filter into the next node.
    #[error("no forward transport recorded on the node at z = {z}")]
    TransportNotSet { z: f64 },

    /// An inversion had no defined result.
    #[error("singular matrix: {context}")]
    SingularMatrix { context: &'static str },

    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("parameter index {index} out of range for a state of dimension {dim}")]
    IndexOutOfRange { index: usize, dim: usize },
}

pub type Result<T, E = KalmanError> = std::result::Result<T, E>;
