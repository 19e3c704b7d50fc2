// trackfit_core/src/estimation/node.rs

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{KalmanError, Result};
use crate::estimation::Stage;
use crate::linalg::{invert, is_positive_definite, quadratic_form};
use crate::models::Transport;
use crate::sampling::sample_gaussian;
use crate::state::StateEstimate;
use crate::types::{Matrix, Vector};

/// A measured position `m` with its covariance `V` at run coordinate `z`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub vector: Vector,
    pub covariance: Matrix,
    pub z: f64,
}

impl Hit {
    pub fn new(vector: Vector, covariance: Matrix, z: f64) -> Self {
        assert_eq!(vector.nrows(), covariance.nrows());
        assert_eq!(vector.nrows(), covariance.ncols());
        Self {
            vector,
            covariance,
            z,
        }
    }

    pub fn dim(&self) -> usize {
        self.vector.nrows()
    }
}

/// One recorded stage: the state estimate and, for fitted stages, its chi2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord<A> {
    pub state: StateEstimate<A>,
    pub chi2: Option<f64>,
}

/// A measurement site and the history of estimates made at it.
///
/// Nodes are only written by the engine that owns them. Each pass first drops
/// the records of its own stages (a forward pass also drops the smoother's) and
/// never touches the others, so the forward and reverse passes can be compared
/// on the same node.
#[derive(Debug, Clone)]
pub struct Node<A = ()> {
    hit: Hit,
    projection: Matrix,
    records: [Option<StageRecord<A>>; Stage::COUNT],
    transport: Option<Transport>,
    reverse_transport: Option<Transport>,
    status: Option<Stage>,
}

impl<A: Clone> Node<A> {
    /// Creates a node from a hit and the projection `H` onto its measurement space.
    pub fn new(hit: Hit, projection: Matrix) -> Result<Self> {
        if projection.nrows() != hit.dim() {
            return Err(KalmanError::DimensionMismatch {
                context: "projection rows vs. measurement dimension",
                expected: hit.dim(),
                found: projection.nrows(),
            });
        }
        Ok(Self::from_parts(hit, projection))
    }

    fn from_parts(hit: Hit, projection: Matrix) -> Self {
        Self {
            hit,
            projection,
            records: Default::default(),
            transport: None,
            reverse_transport: None,
            status: None,
        }
    }

    // --- Accessors ---

    pub fn hit(&self) -> &Hit {
        &self.hit
    }

    pub fn projection(&self) -> &Matrix {
        &self.projection
    }

    pub fn z(&self) -> f64 {
        self.hit.z
    }

    /// The most recently recorded stage.
    pub fn status(&self) -> Option<Stage> {
        self.status
    }

    /// The transport that carried the forward filter into this node.
    pub fn transport(&self) -> Option<&Transport> {
        self.transport.as_ref()
    }

    /// The transport that carried the reverse filter into this node.
    pub fn reverse_transport(&self) -> Option<&Transport> {
        self.reverse_transport.as_ref()
    }

    pub fn has_stage(&self, stage: Stage) -> bool {
        self.records[stage.index()].is_some()
    }

    pub fn record(&self, stage: Stage) -> Option<&StageRecord<A>> {
        self.records[stage.index()].as_ref()
    }

    pub fn state(&self, stage: Stage) -> Result<&StateEstimate<A>> {
        self.record(stage)
            .map(|r| &r.state)
            .ok_or(KalmanError::StageNotSet { stage })
    }

    pub fn chi2(&self, stage: Stage) -> Result<f64> {
        self.record(stage)
            .and_then(|r| r.chi2)
            .ok_or(KalmanError::Chi2NotSet { stage })
    }

    /// The measurement residual `m − H·x` of a recorded stage.
    pub fn residual(&self, stage: Stage) -> Result<Vector> {
        let state = self.state(stage)?;
        Ok(&self.hit.vector - &self.projection * &state.vector)
    }

    /// Value and standard deviation of coordinate `index` of a recorded stage.
    pub fn param(&self, stage: Stage, index: usize) -> Result<(f64, f64)> {
        let state = self.state(stage)?;
        let sigma = state.std_dev(index)?;
        Ok((state.vector[index], sigma))
    }

    // --- Mutation (engine only) ---

    pub(crate) fn set_state(&mut self, stage: Stage, state: StateEstimate<A>) {
        if state.z != self.hit.z {
            warn!(%stage, node_z = self.hit.z, state_z = state.z, "state recorded off its node");
        }
        self.records[stage.index()] = Some(StageRecord { state, chi2: None });
        self.status = Some(stage);
    }

    pub(crate) fn set_chi2(&mut self, stage: Stage, chi2: f64) -> Result<()> {
        match &mut self.records[stage.index()] {
            Some(record) => {
                record.chi2 = Some(chi2);
                Ok(())
            }
            None => Err(KalmanError::StageNotSet { stage }),
        }
    }

    pub(crate) fn set_transport(&mut self, transport: Transport) {
        self.transport = Some(transport);
    }

    pub(crate) fn set_reverse_transport(&mut self, transport: Transport) {
        self.reverse_transport = Some(transport);
    }

    /// Drops the record of `stage`, if any. If it was the latest, the status
    /// falls back to the truth stage when there is one.
    pub(crate) fn clear_stage(&mut self, stage: Stage) {
        self.records[stage.index()] = None;
        if self.status == Some(stage) {
            self.status = self.has_stage(Stage::True).then_some(Stage::True);
        }
    }

    pub(crate) fn clear_transport(&mut self) {
        self.transport = None;
    }

    pub(crate) fn clear_reverse_transport(&mut self) {
        self.reverse_transport = None;
    }

    // --- Kalman Algorithm ---

    /// Measurement update of an already propagated state, in information form.
    ///
    /// Returns the filtered state at this node and its chi2: the measurement
    /// residual weighted by `V⁻¹` plus the shift from the prior weighted by `C⁻¹`.
    pub fn predict(&self, incoming: &StateEstimate<A>) -> Result<(StateEstimate<A>, f64)> {
        let x = &incoming.vector;
        let ci = invert(&incoming.covariance, "predicted state covariance")?;
        let m = &self.hit.vector;
        let vi = invert(&self.hit.covariance, "measurement covariance")?;
        let h = &self.projection;
        let ht = h.transpose();

        let cf = invert(&(&ci + &ht * &vi * h), "filtered information matrix")?;
        let xf = &cf * (&ci * x + &ht * (&vi * m));

        let measurement_residual = m - h * &xf;
        let state_residual = &xf - x;
        let chi2 =
            quadratic_form(&measurement_residual, &vi) + quadratic_form(&state_residual, &ci);

        debug!(z = self.hit.z, chi2, "filtered node");
        let filtered = StateEstimate::new(xf, cf, self.hit.z, incoming.aux.clone());
        Ok((filtered, chi2))
    }

    /// One backward RTS step, using the already smoothed `next` node.
    ///
    /// Needs this node's filter stage, the next node's pred and smooth stages and
    /// the transport that carried the filter from here into `next`. That transport
    /// is the one recorded on `next`, not this node's own: it is the `F` the next
    /// prediction `Cp1` was built with.
    pub fn smooth(&self, next: &Node<A>) -> Result<(StateEstimate<A>, f64)> {
        let filtered = self.state(Stage::Filter)?;
        let predicted_next = next.state(Stage::Pred)?;
        let smoothed_next = next.state(Stage::Smooth)?;
        let transport = next
            .transport()
            .ok_or(KalmanError::TransportNotSet { z: next.z() })?;

        let cp1i = invert(&predicted_next.covariance, "next predicted covariance")?;
        let gain = &filtered.covariance * transport.f.transpose() * cp1i;

        let xs = &filtered.vector + &gain * (&smoothed_next.vector - &predicted_next.vector);
        let cs = &filtered.covariance
            + &gain * (&smoothed_next.covariance - &predicted_next.covariance) * gain.transpose();

        let h = &self.projection;
        let residual = &self.hit.vector - h * &xs;
        let residual_cov = &self.hit.covariance - h * &cs * h.transpose();
        if !is_positive_definite(&residual_cov) {
            warn!(z = self.hit.z, "smoothed residual covariance is not positive definite");
        }
        let chi2 = quadratic_form(
            &residual,
            &invert(&residual_cov, "smoothed residual covariance")?,
        );

        debug!(z = self.hit.z, chi2, "smoothed node");
        let smoothed = StateEstimate::new(xs, cs, self.hit.z, filtered.aux.clone());
        Ok((smoothed, chi2))
    }

    // --- Monte-Carlo ---

    /// Synthesizes a node at this site from a state propagated to it.
    ///
    /// The true state is drawn from `incoming`'s covariance and stored with a zero
    /// covariance under `Stage::True`; the hit is `H·x_true` smeared by this node's
    /// measurement covariance.
    pub fn generate<R: Rng + ?Sized>(&self, incoming: &StateEstimate<A>, rng: &mut R) -> Node<A> {
        let true_state = StateEstimate::exact(incoming.random(rng), self.hit.z, incoming.aux.clone());

        let expected = &self.projection * &true_state.vector;
        let measured = expected + sample_gaussian(rng, &self.hit.covariance);
        let hit = Hit::new(measured, self.hit.covariance.clone(), self.hit.z);

        let mut node = Node::from_parts(hit, self.projection.clone());
        node.set_state(Stage::True, true_state);
        debug!(z = self.hit.z, "generated node");
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn diag(values: &[f64]) -> Matrix {
        Matrix::from_diagonal(&Vector::from_row_slice(values))
    }

    fn node_at(z: f64, m: &[f64], v: &[f64]) -> Node {
        let hit = Hit::new(Vector::from_row_slice(m), diag(v), z);
        Node::new(hit, Matrix::identity(m.len(), m.len())).unwrap()
    }

    fn prior(z: f64, x: &[f64], c: &[f64]) -> StateEstimate {
        StateEstimate::new(Vector::from_row_slice(x), diag(c), z, ())
    }

    #[test]
    fn test_new_checks_projection_rows() {
        let hit = Hit::new(Vector::zeros(2), Matrix::identity(2, 2), 0.0);
        let err = Node::<()>::new(hit, Matrix::identity(3, 3)).unwrap_err();
        assert_eq!(
            err,
            KalmanError::DimensionMismatch {
                context: "projection rows vs. measurement dimension",
                expected: 2,
                found: 3,
            }
        );
    }

    #[test]
    fn test_predict_precision_weighted_average() {
        let node = node_at(0.0, &[2.0, 2.0], &[1.0, 1.0]);
        let (filtered, chi2) = node.predict(&prior(0.0, &[0.0, 0.0], &[4.0, 4.0])).unwrap();

        // (0 / 4 + 2 / 1) / (1 / 4 + 1 / 1)
        assert_abs_diff_eq!(filtered.vector[0], 1.6, epsilon = 1e-12);
        assert_abs_diff_eq!(filtered.vector[1], 1.6, epsilon = 1e-12);
        assert_abs_diff_eq!(filtered.covariance[(0, 0)], 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(filtered.covariance[(0, 1)], 0.0, epsilon = 1e-12);
        // 2 * (0.4² / 1 + 1.6² / 4)
        assert_abs_diff_eq!(chi2, 1.6, epsilon = 1e-12);
        assert_eq!(filtered.z, 0.0);
    }

    #[test]
    fn test_predict_chi2_matches_explicit_formula() {
        let hit = Hit::new(
            Vector::from_row_slice(&[0.3, -0.2]),
            Matrix::from_row_slice(2, 2, &[0.5, 0.1, 0.1, 0.4]),
            1.0,
        );
        let h = Matrix::from_row_slice(2, 3, &[1.0, 0.0, 0.5, 0.0, 1.0, 0.0]);
        let node = Node::new(hit.clone(), h.clone()).unwrap();
        let incoming = StateEstimate::new(
            Vector::from_row_slice(&[0.1, 0.0, 0.2]),
            Matrix::from_row_slice(3, 3, &[2.0, 0.3, 0.0, 0.3, 1.5, 0.1, 0.0, 0.1, 1.0]),
            1.0,
            (),
        );

        let (filtered, chi2) = node.predict(&incoming).unwrap();

        let ci = incoming.covariance.clone().try_inverse().unwrap();
        let vi = hit.covariance.clone().try_inverse().unwrap();
        let mres = &hit.vector - &h * &filtered.vector;
        let xres = &filtered.vector - &incoming.vector;
        let expected = (mres.transpose() * &vi * &mres)[(0, 0)]
            + (xres.transpose() * &ci * &xres)[(0, 0)];
        assert_abs_diff_eq!(chi2, expected, epsilon = 1e-10);

        // Same as the gain form of the update.
        let s = &h * &incoming.covariance * h.transpose() + &hit.covariance;
        let k = &incoming.covariance * h.transpose() * s.clone().try_inverse().unwrap();
        let innovation = &hit.vector - &h * &incoming.vector;
        let xf = &incoming.vector + &k * &innovation;
        for i in 0..3 {
            assert_abs_diff_eq!(filtered.vector[i], xf[i], epsilon = 1e-10);
        }
        // And the two-term chi2 equals the innovation chi2.
        let innovation_chi2 = (innovation.transpose() * s.try_inverse().unwrap() * &innovation)[(0, 0)];
        assert_abs_diff_eq!(chi2, innovation_chi2, epsilon = 1e-10);
    }

    #[test]
    fn test_predict_singular_prior_fails() {
        let node = node_at(0.0, &[1.0], &[1.0]);
        let err = node.predict(&prior(0.0, &[0.0], &[0.0])).unwrap_err();
        assert_eq!(
            err,
            KalmanError::SingularMatrix {
                context: "predicted state covariance"
            }
        );
    }

    #[test]
    fn test_unset_stage_lookups_fail() {
        let mut node = node_at(0.0, &[1.0], &[1.0]);
        assert_eq!(
            node.state(Stage::Smooth).unwrap_err(),
            KalmanError::StageNotSet {
                stage: Stage::Smooth
            }
        );
        assert_eq!(
            node.set_chi2(Stage::Filter, 1.0),
            Err(KalmanError::StageNotSet {
                stage: Stage::Filter
            })
        );

        node.set_state(Stage::Pred, prior(0.0, &[0.0], &[1.0]));
        assert_eq!(
            node.chi2(Stage::Pred),
            Err(KalmanError::Chi2NotSet { stage: Stage::Pred })
        );
        assert_eq!(node.status(), Some(Stage::Pred));
    }

    #[test]
    fn test_residual_and_param() {
        let mut node = node_at(0.0, &[1.0, 3.0], &[1.0, 1.0]);
        node.set_state(Stage::Filter, prior(0.0, &[0.5, 2.0], &[0.25, 9.0]));
        node.set_chi2(Stage::Filter, 2.5).unwrap();

        assert_eq!(
            node.residual(Stage::Filter).unwrap(),
            Vector::from_row_slice(&[0.5, 1.0])
        );
        assert_eq!(node.param(Stage::Filter, 1).unwrap(), (2.0, 3.0));
        assert_eq!(node.chi2(Stage::Filter).unwrap(), 2.5);
        assert!(node.param(Stage::Filter, 2).is_err());
    }

    #[test]
    fn test_smooth_without_transport_fails() {
        let mut node = node_at(0.0, &[1.0], &[1.0]);
        let mut next = node_at(1.0, &[1.0], &[1.0]);
        node.set_state(Stage::Filter, prior(0.0, &[1.0], &[0.5]));
        next.set_state(Stage::Pred, prior(1.0, &[1.0], &[0.5]));
        next.set_state(Stage::Smooth, prior(1.0, &[1.0], &[0.3]));

        assert_eq!(
            node.smooth(&next).unwrap_err(),
            KalmanError::TransportNotSet { z: 1.0 }
        );
    }

    #[test]
    fn test_smooth_step() {
        let mut node = node_at(0.0, &[1.0], &[1.0]);
        let mut next = node_at(1.0, &[2.0], &[1.0]);
        node.set_state(Stage::Filter, prior(0.0, &[1.0], &[0.5]));
        next.set_transport(Transport {
            f: Matrix::identity(1, 1),
            q: None,
        });
        next.set_state(Stage::Pred, prior(1.0, &[1.0], &[0.5]));
        next.set_state(Stage::Smooth, prior(1.0, &[1.5], &[1.0 / 3.0]));

        let (smoothed, chi2) = node.smooth(&next).unwrap();

        // A = 0.5 / 0.5 = 1: the smoother hands the next estimate back unchanged.
        assert_abs_diff_eq!(smoothed.vector[0], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(smoothed.covariance[(0, 0)], 1.0 / 3.0, epsilon = 1e-12);
        // (1 - 1.5)² / (1 - 1/3)
        assert_abs_diff_eq!(chi2, 0.375, epsilon = 1e-12);
        assert_eq!(smoothed.z, 0.0);
    }

    #[test]
    fn test_generate_attaches_truth() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let site = node_at(2.0, &[0.0, 0.0], &[0.01, 0.01]);
        let incoming = prior(2.0, &[1.0, -1.0], &[1.0, 1.0]);

        let generated = site.generate(&incoming, &mut rng);

        let truth = generated.state(Stage::True).unwrap();
        assert_eq!(truth.covariance, Matrix::zeros(2, 2));
        assert_eq!(truth.z, 2.0);
        assert_eq!(generated.z(), 2.0);
        assert_eq!(generated.hit().covariance, site.hit().covariance);
        assert_eq!(generated.status(), Some(Stage::True));
        // The hit sits within a few measurement sigmas of the truth.
        let residual = generated.residual(Stage::True).unwrap();
        assert!(residual.amax() < 0.5);
    }

    #[test]
    fn test_generate_converges_to_propagated_mean() {
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        let site = node_at(1.0, &[0.0, 0.0], &[0.5, 0.5]);
        let incoming = prior(1.0, &[2.0, -3.0], &[1.0, 4.0]);
        let draws = 5_000;

        let mut truth_sum = Vector::zeros(2);
        let mut hit_sum = Vector::zeros(2);
        for _ in 0..draws {
            let generated = site.generate(&incoming, &mut rng);
            truth_sum += &generated.state(Stage::True).unwrap().vector;
            hit_sum += &generated.hit().vector;
        }
        let truth_mean = truth_sum / draws as f64;
        let hit_mean = hit_sum / draws as f64;

        assert_abs_diff_eq!(truth_mean[0], 2.0, epsilon = 0.1);
        assert_abs_diff_eq!(truth_mean[1], -3.0, epsilon = 0.15);
        assert_abs_diff_eq!(hit_mean[0], 2.0, epsilon = 0.1);
        assert_abs_diff_eq!(hit_mean[1], -3.0, epsilon = 0.15);
    }
}
