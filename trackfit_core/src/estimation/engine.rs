// trackfit_core/src/estimation/engine.rs

use rand::Rng;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::estimation::node::{Hit, Node};
use crate::estimation::{EngineStatus, FitResult, PassResult, Stage};
use crate::models::{MotionModel, Propagated};
use crate::state::StateEstimate;
use crate::types::Matrix;

/// Per-node chi2 above which `clean_chi2` treats a node as an outlier by default.
pub const DEFAULT_CHI2_CUT: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    fn stages(self) -> (Stage, Stage) {
        match self {
            Direction::Forward => (Stage::Pred, Stage::Filter),
            Direction::Reverse => (Stage::RPred, Stage::RFilter),
        }
    }

    /// Stages a new pass in this direction invalidates. The smoother is built on
    /// the forward filter, so it goes with it.
    fn stale_stages(self) -> &'static [Stage] {
        match self {
            Direction::Forward => &[Stage::Pred, Stage::Filter, Stage::Smooth],
            Direction::Reverse => &[Stage::RPred, Stage::RFilter],
        }
    }
}

/// Runs the Kalman passes over one track.
///
/// The engine owns its ordered node sequence and shares the motion model, so one
/// model instance can serve any number of engines (e.g. one per event).
#[derive(Debug)]
pub struct FilterEngine<A = ()>
where
    A: Clone,
{
    nodes: Vec<Node<A>>,
    model: Arc<dyn MotionModel<A>>,
    status: EngineStatus,
}

impl<A: Clone> FilterEngine<A> {
    /// Creates an engine with no nodes.
    pub fn new(model: Arc<dyn MotionModel<A>>) -> Self {
        Self {
            nodes: Vec::new(),
            model,
            status: EngineStatus::Empty,
        }
    }

    /// Creates an engine over an existing node sequence, ordered by increasing z.
    pub fn with_nodes(model: Arc<dyn MotionModel<A>>, nodes: Vec<Node<A>>) -> Self {
        let mut engine = Self::new(model);
        engine.set_nodes(nodes);
        engine
    }

    // --- Node management ---

    pub fn add_node(&mut self, hit: Hit, projection: Matrix) -> Result<()> {
        self.nodes.push(Node::new(hit, projection)?);
        self.status = EngineStatus::Nodes;
        Ok(())
    }

    pub fn set_nodes(&mut self, nodes: Vec<Node<A>>) {
        self.nodes = nodes;
        self.status = EngineStatus::Nodes;
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.status = EngineStatus::Empty;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node<A>] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&Node<A>> {
        self.nodes.get(index)
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn model(&self) -> &Arc<dyn MotionModel<A>> {
        &self.model
    }

    // --- Passes ---

    /// Walks the nodes from `seed`, synthesizing a Monte-Carlo node at each site.
    ///
    /// Stops at the first step the model rejects and returns what was generated
    /// up to there. The walk follows the drawn truth, not the seed mean.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        seed: &StateEstimate<A>,
        rng: &mut R,
    ) -> Result<Vec<Node<A>>> {
        let mut generated = Vec::with_capacity(self.nodes.len());
        let mut state = seed.clone();

        for node in &self.nodes {
            let Some(Propagated {
                state: propagated, ..
            }) = self.model.propagate(&state, node.z())
            else {
                warn!(z = node.z(), generated = generated.len(), "generation stopped");
                return Ok(generated);
            };

            let synthetic = node.generate(&propagated, rng);
            state = synthetic.state(Stage::True)?.clone();
            generated.push(synthetic);
        }

        debug!(nodes = generated.len(), "generated track");
        Ok(generated)
    }

    /// Forward Kalman filter from `seed`.
    ///
    /// Records `Pred` and `Filter` on every node. If the model rejects a step the
    /// pass stops there and reports the chi2 accumulated so far.
    pub fn filter(&mut self, seed: &StateEstimate<A>) -> Result<PassResult> {
        self.run_pass(seed, Direction::Forward)
    }

    /// Reverse Kalman filter from `seed`, last node first.
    ///
    /// Records `RPred` and `RFilter`; independent of the forward pass. If it
    /// stops early a completed forward status is kept.
    pub fn rfilter(&mut self, seed: &StateEstimate<A>) -> Result<PassResult> {
        self.run_pass(seed, Direction::Reverse)
    }

    fn run_pass(&mut self, seed: &StateEstimate<A>, direction: Direction) -> Result<PassResult> {
        self.clear_pass(direction);
        let outcome = self.walk(seed, direction);
        self.status = match (&outcome, direction) {
            (Ok(result), Direction::Forward) if result.ok => EngineStatus::Filter,
            (Ok(result), Direction::Reverse) if result.ok => EngineStatus::RFilter,
            // A stopped reverse pass leaves the forward results standing.
            (Ok(_), Direction::Reverse) if self.status != EngineStatus::RFilter => self.status,
            _ => EngineStatus::Failed,
        };
        debug!(?direction, status = ?self.status, "pass finished");
        outcome
    }

    /// Drops what an earlier pass in `direction` left on the nodes.
    fn clear_pass(&mut self, direction: Direction) {
        for node in &mut self.nodes {
            for stage in direction.stale_stages() {
                node.clear_stage(*stage);
            }
            match direction {
                Direction::Forward => node.clear_transport(),
                Direction::Reverse => node.clear_reverse_transport(),
            }
        }
    }

    fn walk(&mut self, seed: &StateEstimate<A>, direction: Direction) -> Result<PassResult> {
        let (pred_stage, filter_stage) = direction.stages();
        let order: Vec<usize> = match direction {
            Direction::Forward => (0..self.nodes.len()).collect(),
            Direction::Reverse => (0..self.nodes.len()).rev().collect(),
        };

        let mut total = 0.0;
        let mut state = seed.clone();
        for index in order {
            let node = &mut self.nodes[index];
            let Some(Propagated {
                state: predicted,
                transport,
            }) = self.model.propagate(&state, node.z())
            else {
                warn!(?direction, index, z = node.z(), "filter stopped");
                return Ok(PassResult::stopped(total));
            };

            match direction {
                Direction::Forward => node.set_transport(transport),
                Direction::Reverse => node.set_reverse_transport(transport),
            }
            node.set_state(pred_stage, predicted.clone());

            let (filtered, chi2) = node.predict(&predicted)?;
            node.set_state(filter_stage, filtered.clone());
            node.set_chi2(filter_stage, chi2)?;
            total += chi2;

            self.model.after_filter(node);
            state = filtered;
        }

        Ok(PassResult::completed(total))
    }

    /// RTS smoother over a completed forward filter.
    ///
    /// The last node's smoothed stage is a copy of its filter stage; its chi2 is
    /// not part of the returned total. Without a completed forward filter nothing
    /// is touched and `(false, 0)` is returned.
    pub fn smoother(&mut self) -> Result<PassResult> {
        if self.status != EngineStatus::Filter {
            warn!(status = ?self.status, "no smoothing without a completed forward filter");
            return Ok(PassResult::stopped(0.0));
        }

        let outcome = self.smooth_backward();
        self.status = match outcome {
            Ok(_) => EngineStatus::Smooth,
            Err(_) => {
                for node in &mut self.nodes {
                    node.clear_stage(Stage::Smooth);
                }
                EngineStatus::Failed
            }
        };
        outcome.map(PassResult::completed)
    }

    fn smooth_backward(&mut self) -> Result<f64> {
        let Some(last) = self.nodes.last_mut() else {
            return Ok(0.0);
        };
        let boundary = last.state(Stage::Filter)?.clone();
        let boundary_chi2 = last.chi2(Stage::Filter)?;
        last.set_state(Stage::Smooth, boundary);
        last.set_chi2(Stage::Smooth, boundary_chi2)?;

        let mut total = 0.0;
        for index in (0..self.nodes.len() - 1).rev() {
            let (head, tail) = self.nodes.split_at_mut(index + 1);
            let node = &mut head[index];
            let (smoothed, chi2) = node.smooth(&tail[0])?;
            node.set_state(Stage::Smooth, smoothed);
            node.set_chi2(Stage::Smooth, chi2)?;
            self.model.after_smooth(node);
            total += chi2;
        }

        debug!(chi2 = total, "smoothed track");
        Ok(total)
    }

    /// Forward filter followed, if it completed, by the smoother.
    pub fn fit(&mut self, seed: &StateEstimate<A>) -> Result<FitResult> {
        let forward = self.filter(seed)?;
        if !forward.ok {
            return Ok(FitResult {
                ok: false,
                filter_chi2: forward.chi2,
                smoother_chi2: 0.0,
            });
        }

        let backward = self.smoother()?;
        Ok(FitResult {
            ok: backward.ok,
            filter_chi2: forward.chi2,
            smoother_chi2: backward.chi2,
        })
    }

    // --- Chi2 summaries ---

    /// Sum of one stage's chi2 over all nodes.
    pub fn chi2(&self, stage: Stage) -> Result<f64> {
        self.nodes.iter().map(|node| node.chi2(stage)).sum()
    }

    /// Count and sum of the per-node chi2 values of `stage` below `cut`.
    pub fn clean_chi2(&self, stage: Stage, cut: f64) -> Result<(usize, f64)> {
        let kept = self
            .nodes
            .iter()
            .map(|node| node.chi2(stage))
            .collect::<Result<Vec<f64>>>()?
            .into_iter()
            .filter(|chi2| *chi2 < cut)
            .collect::<Vec<f64>>();
        Ok((kept.len(), kept.iter().sum()))
    }
}
