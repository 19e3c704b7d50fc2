// trackfit_core/src/estimation/mod.rs

//! The Kalman filter and Rauch–Tung–Striebel smoother over an ordered track.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The phase a recorded state estimate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// The Monte-Carlo truth.
    True,
    /// Forward prediction, before the measurement update.
    Pred,
    /// Forward filter.
    Filter,
    /// RTS smoother.
    Smooth,
    /// Reverse prediction.
    RPred,
    /// Reverse filter.
    RFilter,
}

impl Stage {
    pub const COUNT: usize = 6;
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::True => "true",
            Stage::Pred => "pred",
            Stage::Filter => "filter",
            Stage::Smooth => "smooth",
            Stage::RPred => "rpred",
            Stage::RFilter => "rfilter",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which passes of a `FilterEngine` have completed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// No nodes loaded.
    #[default]
    Empty,
    /// Nodes loaded, no pass run yet.
    Nodes,
    /// Forward filter completed.
    Filter,
    /// Reverse filter completed.
    RFilter,
    /// Smoother completed.
    Smooth,
    /// The last pass stopped early or hit a singular matrix.
    Failed,
}

/// Outcome of a single pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PassResult {
    /// `false` if the pass stopped before the last node.
    pub ok: bool,
    /// The chi2 accumulated up to where the pass ended.
    pub chi2: f64,
}

impl PassResult {
    pub fn completed(chi2: f64) -> Self {
        Self { ok: true, chi2 }
    }

    pub fn stopped(chi2: f64) -> Self {
        Self { ok: false, chi2 }
    }
}

/// Outcome of `FilterEngine::fit`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub ok: bool,
    pub filter_chi2: f64,
    /// Zero when the forward filter did not complete.
    pub smoother_chi2: f64,
}

pub mod engine;
pub mod node;

pub use engine::{FilterEngine, DEFAULT_CHI2_CUT};
pub use node::{Hit, Node, StageRecord};
