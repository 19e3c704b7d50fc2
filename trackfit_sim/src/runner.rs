// trackfit_sim/src/runner.rs

//! The toy Monte-Carlo loop: generate a track, fit it, report it.

use std::sync::Arc;
use tracing::{debug, error, info, warn};
use trackfit_core::models::straight_line::MEASUREMENT_DIM;
use trackfit_core::prelude::*;

use crate::config::RunConfig;
use crate::error::SimError;
use crate::prng::SimulationRng;
use crate::report::{EventReport, NodeReport, RunReport, RunSummary};

/// Inflation of the seed covariance used to start the reverse filter.
const REVERSE_SEED_INFLATION: f64 = 100.0;

pub struct ToyRunner {
    config: RunConfig,
    model: Arc<dyn MotionModel<Kinematics>>,
    /// One node per plane, carrying only the plane geometry and resolution.
    detector: FilterEngine<Kinematics>,
    rng: SimulationRng,
}

impl ToyRunner {
    pub fn new(config: RunConfig) -> Result<Self, SimError> {
        config.validate()?;
        let model: Arc<dyn MotionModel<Kinematics>> = Arc::new(config.model());

        let mut detector = FilterEngine::new(model.clone());
        let covariance = config.hit_covariance();
        for z in config.plane_z() {
            let hit = Hit::new(Vector::zeros(MEASUREMENT_DIM), covariance.clone(), z);
            detector.add_node(hit, position_projection())?;
        }

        let rng = SimulationRng::from_seed(config.seed);
        Ok(Self {
            config,
            model,
            detector,
            rng,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Generates and fits one track.
    ///
    /// Engine errors are fatal for the event only: they are logged and the
    /// event is reported without a fit.
    pub fn run_event(&mut self, event: usize, reverse: bool) -> Result<EventReport, SimError> {
        let seed = self.config.seed_state();
        let generated = self.detector.generate(&seed, &mut self.rng.0)?;
        let mut engine = FilterEngine::with_nodes(self.model.clone(), generated);

        if engine.is_empty() {
            warn!(event, "particle stopped before the first plane");
            return Ok(EventReport {
                event,
                nodes: 0,
                fit: None,
                rfilter_chi2: None,
                clean_chi2: None,
                node_reports: Vec::new(),
            });
        }

        let fit = match engine.fit(&seed) {
            Ok(fit) => Some(fit),
            Err(err) => {
                error!(event, %err, "track fit failed");
                None
            }
        };

        let clean_chi2 = match fit {
            Some(fit) if fit.ok => Some(engine.clean_chi2(Stage::Filter, self.config.chi2_cut)?),
            _ => None,
        };

        let rfilter_chi2 = if reverse && fit.is_some() {
            self.reverse_fit(event, &mut engine)
        } else {
            None
        };

        debug!(event, nodes = engine.len(), ?fit, "event done");
        Ok(EventReport {
            event,
            nodes: engine.len(),
            fit,
            rfilter_chi2,
            clean_chi2,
            node_reports: engine.nodes().iter().map(NodeReport::from_node).collect(),
        })
    }

    /// Runs the reverse filter from the last measurement back to the first plane.
    fn reverse_fit(&self, event: usize, engine: &mut FilterEngine<Kinematics>) -> Option<f64> {
        let last = engine.nodes().last()?;
        let template = self.config.seed_state();
        let mut seed = template
            .with_covariance(&template.covariance * REVERSE_SEED_INFLATION)
            .at(last.z());
        seed.vector[0] = last.hit().vector[0];
        seed.vector[1] = last.hit().vector[1];

        match engine.rfilter(&seed) {
            Ok(result) if result.ok => Some(result.chi2),
            Ok(_) => {
                warn!(event, "reverse filter stopped early");
                None
            }
            Err(err) => {
                error!(event, %err, "reverse filter failed");
                None
            }
        }
    }

    /// Runs all configured events and summarizes them.
    pub fn run(&mut self, reverse: bool) -> Result<RunReport, SimError> {
        info!(
            events = self.config.events,
            planes = self.detector.len(),
            seed = self.config.seed,
            "starting toy run"
        );

        let events = (0..self.config.events)
            .map(|event| self.run_event(event, reverse))
            .collect::<Result<Vec<_>, _>>()?;

        let summary = RunSummary::from_events(&events, MEASUREMENT_DIM);
        info!(
            fitted = summary.fitted,
            chi2_per_dof = summary.chi2_per_dof,
            "toy run finished"
        );
        Ok(RunReport { summary, events })
    }
}
