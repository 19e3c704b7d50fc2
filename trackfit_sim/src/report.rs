// trackfit_sim/src/report.rs

//! Per-event and per-run results of a toy Monte-Carlo run.

use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use trackfit_core::models::straight_line::STATE_DIM;
use trackfit_core::prelude::{FitResult, Kinematics, Node, Stage, StateEstimate};

use crate::error::SimError;

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub z: f64,
    pub measured: Vec<f64>,
    pub truth: Option<Vec<f64>>,
    pub filtered: Option<Vec<f64>>,
    pub smoothed: Option<Vec<f64>>,
    pub filter_chi2: Option<f64>,
    pub smoother_chi2: Option<f64>,
    pub rfilter_chi2: Option<f64>,
    /// `(smoothed − truth) / σ` for each coordinate.
    pub pulls: Option<Vec<f64>>,
}

impl NodeReport {
    pub fn from_node(node: &Node<Kinematics>) -> Self {
        let values = |stage: Stage| {
            node.state(stage)
                .ok()
                .map(|state| state.vector.iter().copied().collect::<Vec<f64>>())
        };

        Self {
            z: node.z(),
            measured: node.hit().vector.iter().copied().collect(),
            truth: values(Stage::True),
            filtered: values(Stage::Filter),
            smoothed: values(Stage::Smooth),
            filter_chi2: node.chi2(Stage::Filter).ok(),
            smoother_chi2: node.chi2(Stage::Smooth).ok(),
            rfilter_chi2: node.chi2(Stage::RFilter).ok(),
            pulls: pulls(node, Stage::Smooth),
        }
    }
}

fn pulls(node: &Node<Kinematics>, stage: Stage) -> Option<Vec<f64>> {
    let truth: &StateEstimate<Kinematics> = node.state(Stage::True).ok()?;
    (0..truth.dim())
        .map(|i| {
            let (value, sigma) = node.param(stage, i).ok()?;
            (sigma > 0.0).then_some((value - truth.vector[i]) / sigma)
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct EventReport {
    pub event: usize,
    /// Number of nodes the particle reached.
    pub nodes: usize,
    /// `None` when the engine raised an error for this event.
    pub fit: Option<FitResult>,
    /// Reverse filter chi2, when the reverse pass ran to the first node.
    pub rfilter_chi2: Option<f64>,
    /// Filter chi2 summed over the nodes below the outlier cut, and their count.
    pub clean_chi2: Option<(usize, f64)>,
    pub node_reports: Vec<NodeReport>,
}

impl EventReport {
    pub fn fitted(&self) -> bool {
        self.nodes > 0 && self.fit.is_some_and(|fit| fit.ok)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub events: usize,
    pub fitted: usize,
    /// Clean filter chi2 per measured degree of freedom.
    pub chi2_per_dof: f64,
    pub pull_mean: Vec<f64>,
    pub pull_rms: Vec<f64>,
}

impl RunSummary {
    pub fn from_events(events: &[EventReport], measurement_dim: usize) -> Self {
        let fitted: Vec<&EventReport> = events.iter().filter(|e| e.fitted()).collect();

        let (count, chi2) = fitted
            .iter()
            .filter_map(|e| e.clean_chi2)
            .fold((0usize, 0.0), |(n, sum), (k, c)| (n + k, sum + c));
        let dof = count * measurement_dim;
        let chi2_per_dof = if dof > 0 { chi2 / dof as f64 } else { 0.0 };

        let mut sum = vec![0.0; STATE_DIM];
        let mut sum_sq = vec![0.0; STATE_DIM];
        let mut samples = 0usize;
        for pulls in fitted
            .iter()
            .flat_map(|e| e.node_reports.iter())
            .filter_map(|n| n.pulls.as_ref())
        {
            for (i, p) in pulls.iter().enumerate().take(STATE_DIM) {
                sum[i] += p;
                sum_sq[i] += p * p;
            }
            samples += 1;
        }

        let (pull_mean, pull_rms) = if samples > 0 {
            let n = samples as f64;
            (
                sum.iter().map(|s| s / n).collect(),
                sum_sq.iter().map(|s| (s / n).sqrt()).collect(),
            )
        } else {
            (Vec::new(), Vec::new())
        };

        Self {
            events: events.len(),
            fitted: fitted.len(),
            chi2_per_dof,
            pull_mean,
            pull_rms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub events: Vec<EventReport>,
}

impl RunReport {
    pub fn write_json(&self, path: &Path) -> Result<(), SimError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn node_report(pulls: Option<Vec<f64>>) -> NodeReport {
        NodeReport {
            z: 0.0,
            measured: vec![0.0, 0.0],
            truth: None,
            filtered: None,
            smoothed: None,
            filter_chi2: Some(1.0),
            smoother_chi2: None,
            rfilter_chi2: None,
            pulls,
        }
    }

    fn event(ok: bool, clean: (usize, f64), pulls: Vec<Vec<f64>>) -> EventReport {
        EventReport {
            event: 0,
            nodes: pulls.len(),
            fit: Some(FitResult {
                ok,
                filter_chi2: clean.1,
                smoother_chi2: 0.0,
            }),
            rfilter_chi2: None,
            clean_chi2: Some(clean),
            node_reports: pulls.into_iter().map(|p| node_report(Some(p))).collect(),
        }
    }

    #[test]
    fn test_summary_skips_failed_events() {
        let events = vec![
            event(true, (2, 8.0), vec![vec![1.0, -1.0, 0.0, 2.0], vec![-1.0, 1.0, 0.0, 0.0]]),
            event(false, (1, 100.0), vec![vec![50.0; 4]]),
        ];
        let summary = RunSummary::from_events(&events, 2);

        assert_eq!(summary.events, 2);
        assert_eq!(summary.fitted, 1);
        assert_abs_diff_eq!(summary.chi2_per_dof, 2.0);
        assert_abs_diff_eq!(summary.pull_mean[0], 0.0);
        assert_abs_diff_eq!(summary.pull_mean[3], 1.0);
        assert_abs_diff_eq!(summary.pull_rms[1], 1.0);
        assert_abs_diff_eq!(summary.pull_rms[3], 2.0_f64.sqrt());
    }

    #[test]
    fn test_summary_of_nothing() {
        let summary = RunSummary::from_events(&[], 2);
        assert_eq!(summary.fitted, 0);
        assert_eq!(summary.chi2_per_dof, 0.0);
        assert!(summary.pull_mean.is_empty());
    }
}
