//! Interacting Multiple Model estimator.
//!
//! Each track carries an [`ImmBundle`]: one (state, covariance, probability)
//! triple per motion submodel, all in the uniform 10-dim space, plus the
//! fused output. The bank itself (submodels, Markov transition matrix,
//! measurement noise) is shared across tracks and built once from config.
//!
//! A full cycle is mixing → per-model prediction → per-model Joseph update →
//! mode-probability update → fusion. Missed tracks stop after prediction,
//! which leaves the mode distribution at the Markov-propagated weights.

use crate::config::TrackingConfig;
use crate::error::{ConfigError, NumericalError};
use crate::models::{h_position, h_position_velocity, MotionModel};
use crate::numerics::{gaussian_likelihood, repair_covariance, repair_innovation_cov};
use crate::types::{Cluster, DMat, DVec, StateCov, StateVec, STATE_DIM};
use nalgebra::{DMatrix, DVector};
use tracing::warn;

/// Mode probabilities are floored here and renormalised to keep the mixer
/// well-conditioned.
pub const MIN_MODE_PROB: f64 = 1e-4;

/// One submodel hypothesis inside a track.
#[derive(Clone, Debug)]
pub struct ImmSubmodel {
    pub prob: f64,
    pub state: StateVec,
    pub cov: StateCov,
}

/// Per-track IMM state: submodel bank hypotheses plus the fused estimate.
#[derive(Clone, Debug)]
pub struct ImmBundle {
    pub models: Vec<ImmSubmodel>,
    pub fused_state: StateVec,
    pub fused_cov: StateCov,
}

impl ImmBundle {
    /// Index of the most probable submodel.
    pub fn dominant_model(&self) -> usize {
        self.models
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.prob.total_cmp(&b.1.prob))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    pub fn mode_probabilities(&self) -> Vec<f64> {
        self.models.iter().map(|m| m.prob).collect()
    }

    fn fuse(&mut self) {
        let mut x = StateVec::zeros();
        for m in &self.models {
            x += m.state * m.prob;
        }
        let mut p = StateCov::zeros();
        for m in &self.models {
            p += m.cov * m.prob;
            let dx = m.state - x;
            p += (dx * dx.transpose()) * m.prob;
        }
        self.fused_state = x;
        self.fused_cov = p;
    }

    fn normalize_probs(&mut self) {
        let sum: f64 = self.models.iter().map(|m| m.prob).sum();
        let sum = sum.max(1e-30);
        for m in &mut self.models {
            m.prob /= sum;
        }
    }
}

/// Result of one measurement update.
#[derive(Clone, Copy, Debug, Default)]
pub struct UpdateOutcome {
    /// Covariance repairs applied during this update
    pub repairs: u32,
}

/// The shared filter bank: submodels, Markov chain and noise configuration.
#[derive(Clone, Debug)]
pub struct ImmFilterBank {
    models: Vec<MotionModel>,
    /// Row-stochastic: transition[i][j] = P(model j | model i)
    transition: Vec<Vec<f64>>,
    initial_probs: Vec<f64>,
    measurement_var_pos: f64,
    measurement_var_vel: f64,
    init_pos_var: f64,
    init_vel_var: f64,
    init_acc_var: f64,
    init_omega_var: f64,
}

impl ImmFilterBank {
    pub fn from_config(config: &TrackingConfig) -> Result<Self, ConfigError> {
        let models = config
            .imm
            .models
            .iter()
            .map(MotionModel::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            models,
            transition: config.imm.transition_matrix.clone(),
            initial_probs: config.imm.initial_probabilities.clone(),
            measurement_var_pos: config.measurement_noise_pos.powi(2),
            measurement_var_vel: config.measurement_noise_vel.powi(2),
            init_pos_var: config.init_pos_std.powi(2),
            init_vel_var: config.init_vel_std.powi(2),
            init_acc_var: config.init_acc_std.powi(2),
            init_omega_var: config.init_omega_std.powi(2),
        })
    }

    pub fn n_models(&self) -> usize {
        self.models.len()
    }

    pub fn model_label(&self, index: usize) -> &'static str {
        self.models[index].kind.label()
    }

    /// Birth-sized diagonal covariance; also the safe fallback when a
    /// predicted covariance turns out to be unrecoverable.
    fn birth_covariance(&self) -> StateCov {
        let mut cov = StateCov::zeros();
        for i in 0..3 {
            cov[(i, i)] = self.init_pos_var;
            cov[(i + 3, i + 3)] = self.init_vel_var;
            cov[(i + 6, i + 6)] = self.init_acc_var;
        }
        cov[(9, 9)] = self.init_omega_var;
        cov
    }

    /// Seed a bundle from a birth cluster. Position comes from the centroid,
    /// velocity from Doppler when present (zero with large variance
    /// otherwise); acceleration and ω start at zero with large variance.
    pub fn init_bundle(&self, cluster: &Cluster) -> ImmBundle {
        let mut state = StateVec::zeros();
        state[0] = cluster.centroid.x;
        state[1] = cluster.centroid.y;
        state[2] = cluster.centroid.z;
        let mut cov = self.birth_covariance();
        if let Some(v) = cluster.velocity {
            state[3] = v.x;
            state[4] = v.y;
            state[5] = v.z;
            for i in 3..6 {
                cov[(i, i)] = self.measurement_var_vel;
            }
        }

        let models = self
            .initial_probs
            .iter()
            .map(|&prob| ImmSubmodel { prob, state, cov })
            .collect();
        let mut bundle = ImmBundle { models, fused_state: state, fused_cov: cov };
        bundle.fuse();
        bundle
    }

    /// Mixing followed by per-model prediction. The mode probabilities end
    /// up at the Markov-propagated weights c_j, so a following measurement
    /// update only has to scale them by the model likelihoods.
    ///
    /// Returns the number of covariance repairs applied.
    pub fn predict(&self, bundle: &mut ImmBundle, dt: f64) -> u32 {
        let n = self.models.len();
        let mixed = self.mix(bundle);

        let mut repairs = 0;
        for j in 0..n {
            let (state, mut cov) = self.models[j].predict(&mixed[j].0, &mixed[j].1, dt);
            match repair_covariance(&mut cov) {
                Ok(false) => {}
                Ok(true) => repairs += 1,
                Err(err) => {
                    // Unrecoverable: fall back to birth-sized uncertainty so
                    // the bank stays usable
                    warn!(model = self.models[j].kind.label(), %err,
                        "predicted covariance unrecoverable, reset");
                    cov = self.birth_covariance();
                    repairs += 1;
                }
            }
            bundle.models[j].state = state;
            bundle.models[j].cov = cov;
        }

        // μ̄_j = c_j = Σ_i π_ij μ_i
        let prior: Vec<f64> = bundle.models.iter().map(|m| m.prob).collect();
        for j in 0..n {
            bundle.models[j].prob = (0..n)
                .map(|i| self.transition[i][j] * prior[i])
                .sum::<f64>()
                .max(1e-30);
        }
        bundle.normalize_probs();
        bundle.fuse();
        repairs
    }

    /// Per-model Joseph-form measurement update with the cluster centroid
    /// (and velocity when present), then mode-probability update and fusion.
    ///
    /// A submodel whose innovation covariance stays singular after repair
    /// gets likelihood 0 and keeps its predicted state. If every submodel
    /// degenerates the whole update is rejected and the bundle is left at
    /// its prediction.
    pub fn update(
        &self,
        bundle: &mut ImmBundle,
        cluster: &Cluster,
    ) -> Result<UpdateOutcome, NumericalError> {
        let (z, h, r) = self.measurement_for(cluster);
        let n = self.models.len();
        let mut outcome = UpdateOutcome::default();

        let mut likelihoods = vec![0.0f64; n];
        let mut updated: Vec<Option<(StateVec, StateCov)>> = vec![None; n];

        for j in 0..n {
            // Any numerical failure leaves likelihood 0: the model keeps
            // its predicted state and the mixer weights it out
            let mut step =
                match joseph_update(&bundle.models[j].state, &bundle.models[j].cov, &z, &h, &r) {
                    Ok(step) => step,
                    Err(_) => continue,
                };
            outcome.repairs += step.repairs;
            match repair_covariance(&mut step.cov) {
                Ok(false) => {}
                Ok(true) => outcome.repairs += 1,
                Err(_) => continue,
            }
            likelihoods[j] = gaussian_likelihood(&step.innovation, &step.innovation_cov);
            updated[j] = Some((step.state, step.cov));
        }

        let total: f64 = (0..n).map(|j| likelihoods[j] * bundle.models[j].prob).sum();
        if total <= 0.0 || !total.is_finite() {
            return Err(NumericalError::SingularInnovation { dim: z.len() });
        }

        // μ_j ← Λ_j·c_j / Σ, floored and renormalised
        for j in 0..n {
            if let Some((state, cov)) = updated[j].take() {
                bundle.models[j].state = state;
                bundle.models[j].cov = cov;
            }
            let posterior = likelihoods[j] * bundle.models[j].prob / total;
            bundle.models[j].prob = posterior.max(MIN_MODE_PROB);
        }
        bundle.normalize_probs();
        bundle.fuse();
        Ok(outcome)
    }

    /// Measurement vector, observation matrix and noise for a cluster.
    /// The sample spread of the member positions inflates the position
    /// noise block.
    pub fn measurement_for(&self, cluster: &Cluster) -> (DVec, DMat, DMat) {
        match cluster.velocity {
            Some(v) => {
                let z = DVector::from_vec(vec![
                    cluster.centroid.x,
                    cluster.centroid.y,
                    cluster.centroid.z,
                    v.x,
                    v.y,
                    v.z,
                ]);
                let mut r = DMatrix::zeros(6, 6);
                for i in 0..3 {
                    r[(i, i)] = self.measurement_var_pos;
                    r[(i + 3, i + 3)] = self.measurement_var_vel;
                    for k in 0..3 {
                        r[(i, k)] += cluster.position_cov[(i, k)];
                    }
                }
                (z, h_position_velocity(), r)
            }
            None => {
                let z = DVector::from_vec(vec![
                    cluster.centroid.x,
                    cluster.centroid.y,
                    cluster.centroid.z,
                ]);
                let mut r = DMatrix::zeros(3, 3);
                for i in 0..3 {
                    r[(i, i)] = self.measurement_var_pos;
                    for k in 0..3 {
                        r[(i, k)] += cluster.position_cov[(i, k)];
                    }
                }
                (z, h_position(), r)
            }
        }
    }
}

struct JosephStep {
    state: StateVec,
    cov: StateCov,
    innovation: DVec,
    innovation_cov: DMat,
    repairs: u32,
}

/// Linear Kalman update in Joseph form:
/// P' = (I − KH)·P·(I − KH)ᵀ + K·R·Kᵀ.
fn joseph_update(
    state: &StateVec,
    cov: &StateCov,
    z: &DVec,
    h: &DMat,
    r: &DMat,
) -> Result<JosephStep, NumericalError> {
    let x_dyn = DVec::from_iterator(STATE_DIM, state.iter().copied());
    let p_dyn = DMat::from_row_slice(STATE_DIM, STATE_DIM, cov.as_slice());

    let innovation = z - h * &x_dyn;
    let hp = h * &p_dyn;
    let mut s = &hp * h.transpose() + r;

    let mut repairs = 0;
    let s_inv = match s.clone().lu().try_inverse() {
        Some(inv) => inv,
        None => {
            repair_innovation_cov(&mut s)?;
            repairs += 1;
            s.clone()
                .lu()
                .try_inverse()
                .ok_or(NumericalError::SingularInnovation { dim: z.len() })?
        }
    };

    let k = &p_dyn * h.transpose() * &s_inv;
    let correction = &k * &innovation;
    let new_state = StateVec::from_fn(|row, _| state[row] + correction[row]);
    if new_state.iter().any(|v| !v.is_finite()) {
        return Err(NumericalError::NonFinite { context: "state after gain" });
    }

    let i_kh = DMat::identity(STATE_DIM, STATE_DIM) - &k * h;
    let new_p = &i_kh * &p_dyn * i_kh.transpose() + &k * r * k.transpose();
    let new_cov = StateCov::from_fn(|row, col| new_p[(row, col)]);

    Ok(JosephStep { state: new_state, cov: new_cov, innovation, innovation_cov: s, repairs })
}

// ---------------------------------------------------------------------------
// Mixing
// ---------------------------------------------------------------------------

impl ImmFilterBank {
    /// Mixed initial conditions: for each target model j,
    /// x₀_j = Σ_i μ_{i|j}·x_i and P₀_j adds the state-spread term.
    fn mix(&self, bundle: &ImmBundle) -> Vec<(StateVec, StateCov)> {
        let n = self.models.len();
        let mut mixed = Vec::with_capacity(n);
        for j in 0..n {
            let c_j: f64 = (0..n)
                .map(|i| self.transition[i][j] * bundle.models[i].prob)
                .sum::<f64>()
                .max(1e-30);

            let mut x0 = StateVec::zeros();
            for i in 0..n {
                let mu_ij = self.transition[i][j] * bundle.models[i].prob / c_j;
                x0 += bundle.models[i].state * mu_ij;
            }
            let mut p0 = StateCov::zeros();
            for i in 0..n {
                let mu_ij = self.transition[i][j] * bundle.models[i].prob / c_j;
                p0 += bundle.models[i].cov * mu_ij;
                let dx = bundle.models[i].state - x0;
                p0 += (dx * dx.transpose()) * mu_ij;
            }
            mixed.push((x0, p0));
        }
        mixed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BeamId, ClusterId};
    use approx::assert_abs_diff_eq;
    use nalgebra::{Matrix3, Vector3};

    fn bank() -> ImmFilterBank {
        ImmFilterBank::from_config(&TrackingConfig::default()).unwrap()
    }

    fn cluster_at(x: f64, y: f64, velocity: Option<Vector3<f64>>) -> Cluster {
        Cluster {
            id: ClusterId(0),
            centroid: Vector3::new(x, y, 0.0),
            velocity,
            position_cov: Matrix3::identity() * 4.0,
            confidence: 0.8,
            mean_snr_db: 25.0,
            members: vec![],
            beam_id: BeamId(0),
        }
    }

    fn assert_valid_distribution(bundle: &ImmBundle) {
        let sum: f64 = bundle.models.iter().map(|m| m.prob).sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-9);
        assert!(bundle.models.iter().all(|m| m.prob >= 0.0));
    }

    #[test]
    fn init_seeds_position_and_optional_velocity() {
        let bank = bank();
        let with_vel = bank.init_bundle(&cluster_at(1000.0, 500.0, Some(Vector3::new(100.0, 0.0, 0.0))));
        assert_abs_diff_eq!(with_vel.fused_state[0], 1000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(with_vel.fused_state[3], 100.0, epsilon = 1e-9);
        assert_valid_distribution(&with_vel);

        let without = bank.init_bundle(&cluster_at(1000.0, 500.0, None));
        assert_eq!(without.fused_state[3], 0.0);
        // Missing Doppler leaves a much larger velocity variance
        assert!(without.models[0].cov[(3, 3)] > with_vel.models[0].cov[(3, 3)] * 10.0);
    }

    #[test]
    fn probabilities_stay_a_distribution_through_cycles() {
        let bank = bank();
        let mut bundle = bank.init_bundle(&cluster_at(0.0, 0.0, Some(Vector3::new(100.0, 0.0, 0.0))));
        for step in 1..=20 {
            bank.predict(&mut bundle, 0.1);
            assert_valid_distribution(&bundle);
            let z = cluster_at(100.0 * 0.1 * step as f64, 0.0, None);
            bank.update(&mut bundle, &z).unwrap();
            assert_valid_distribution(&bundle);
            assert!(bundle.models.iter().all(|m| m.prob >= MIN_MODE_PROB / 2.0));
        }
        assert!(bundle.fused_state.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn update_at_prediction_tightens_covariance() {
        let bank = bank();
        let mut bundle = bank.init_bundle(&cluster_at(500.0, 0.0, None));
        bank.predict(&mut bundle, 1.0);
        let before = bundle.fused_cov[(0, 0)];
        let z = cluster_at(bundle.fused_state[0], bundle.fused_state[1], None);
        bank.update(&mut bundle, &z).unwrap();
        assert!(bundle.fused_cov[(0, 0)] < before);
    }

    #[test]
    fn ct_model_dominates_during_sustained_turn() {
        let bank = bank();
        let speed = 200.0;
        let omega = 0.15;
        let dt = 0.5;
        let mut bundle = bank.init_bundle(&cluster_at(0.0, 0.0, Some(Vector3::new(speed, 0.0, 0.0))));

        let (mut x, mut y, mut heading) = (0.0f64, 0.0f64, 0.0f64);
        for _ in 0..40 {
            x += speed * heading.cos() * dt;
            y += speed * heading.sin() * dt;
            heading += omega * dt;
            bank.predict(&mut bundle, dt);
            bank.update(&mut bundle, &cluster_at(x, y, None)).unwrap();
        }
        let probs = bundle.mode_probabilities();
        // Bank order from default config: [cv, ca, ct]
        assert!(
            probs[2] > probs[0],
            "CT should outweigh CV in a turn, got {probs:?}"
        );
        // The estimated turn rate should have the right sign
        assert!(bundle.fused_state[9] > 0.0);
    }

    #[test]
    fn straight_flight_keeps_cv_dominant() {
        let bank = bank();
        let mut bundle = bank.init_bundle(&cluster_at(0.0, 0.0, Some(Vector3::new(150.0, 0.0, 0.0))));
        for step in 1..=30 {
            bank.predict(&mut bundle, 0.5);
            bank.update(&mut bundle, &cluster_at(150.0 * 0.5 * step as f64, 0.0, None)).unwrap();
        }
        assert_eq!(bundle.dominant_model(), 0, "CV should dominate straight flight");
    }
}
