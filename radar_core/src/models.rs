//! Motion submodels (CV, CA, CT) in the uniform state space.
//!
//! Every submodel lives in the same 10-dimensional space
//! `[px py pz vx vy vz ax ay az ω]`, so IMM mixing never reshapes state.
//! Dimensions a submodel does not use get zeroed dynamics rows and a large
//! stationary variance, which keeps them weakly informative in the mix.
//!
//! CT is nonlinear in ω; its prediction propagates the exact turn equations
//! and linearises the Jacobian (including the ∂/∂ω column) for covariance.

use crate::config::ImmModelConfig;
use crate::error::ConfigError;
use crate::types::{DMat, StateCov, StateVec, STATE_DIM};
use nalgebra::DMatrix;

/// Stationary variance pinned on the acceleration block for models that do
/// not estimate acceleration: (30 m/s²)².
const UNUSED_ACC_VAR: f64 = 900.0;
/// Stationary variance pinned on ω for models that do not estimate it:
/// (0.3 rad/s)².
const UNUSED_OMEGA_VAR: f64 = 0.09;

/// Below this |ω| the coordinated-turn equations degenerate to straight
/// flight and the small-angle Jacobian limits are used.
const OMEGA_EPS: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    /// Constant velocity
    Cv,
    /// Constant acceleration
    Ca,
    /// Coordinated turn about the z-axis, ω estimated
    Ct,
}

impl ModelKind {
    pub fn label(&self) -> &'static str {
        match self {
            ModelKind::Cv => "CV",
            ModelKind::Ca => "CA",
            ModelKind::Ct => "CT",
        }
    }
}

/// One motion hypothesis: transition + process noise.
#[derive(Clone, Debug)]
pub struct MotionModel {
    pub kind: ModelKind,
    /// White-noise intensity: acceleration std (m/s²) for CV/CT, jerk std
    /// (m/s³) for CA
    noise: f64,
    /// Turn-rate random-walk std (rad/s per √s); CT only
    omega_noise: f64,
}

impl MotionModel {
    pub fn new(kind: ModelKind, noise: f64, omega_noise: f64) -> Self {
        Self { kind, noise, omega_noise }
    }

    pub fn from_config(config: &ImmModelConfig) -> Result<Self, ConfigError> {
        let kind = match config.kind.as_str() {
            "cv" => ModelKind::Cv,
            "ca" => ModelKind::Ca,
            "ct" => ModelKind::Ct,
            other => {
                return Err(ConfigError::UnknownAlgorithm {
                    kind: "imm model",
                    name: other.to_string(),
                    expected: "cv, ca, ct",
                })
            }
        };
        Ok(Self::new(kind, config.process_noise, config.turn_rate_noise))
    }

    /// Propagate state and covariance forward by `dt` seconds.
    pub fn predict(&self, state: &StateVec, cov: &StateCov, dt: f64) -> (StateVec, StateCov) {
        let (new_state, f) = match self.kind {
            ModelKind::Cv => (transition_cv(state, dt), jacobian_cv(dt)),
            ModelKind::Ca => (transition_ca(state, dt), jacobian_ca(dt)),
            ModelKind::Ct => (transition_ct(state, dt), jacobian_ct(state, dt)),
        };
        let q = self.process_noise(dt);
        let new_cov = f * cov * f.transpose() + q;
        (new_state, new_cov)
    }

    fn process_noise(&self, dt: f64) -> StateCov {
        let mut q = StateCov::zeros();
        let qv = self.noise * self.noise;
        match self.kind {
            ModelKind::Cv | ModelKind::Ct => {
                // Discrete white-noise acceleration on position/velocity
                let dt2 = dt * dt;
                let dt3 = dt2 * dt;
                let dt4 = dt3 * dt;
                for i in 0..3 {
                    q[(i, i)] = qv * dt4 / 4.0;
                    q[(i, i + 3)] = qv * dt3 / 2.0;
                    q[(i + 3, i)] = qv * dt3 / 2.0;
                    q[(i + 3, i + 3)] = qv * dt2;
                }
                for i in 6..9 {
                    q[(i, i)] = UNUSED_ACC_VAR;
                }
                q[(9, 9)] = if self.kind == ModelKind::Ct {
                    self.omega_noise * self.omega_noise * dt
                } else {
                    UNUSED_OMEGA_VAR
                };
            }
            ModelKind::Ca => {
                // Piecewise-constant white jerk over (position, velocity,
                // acceleration): Q = q²·G·Gᵀ with G = [dt³/6, dt²/2, dt]ᵀ
                let g = [dt * dt * dt / 6.0, dt * dt / 2.0, dt];
                for axis in 0..3 {
                    for r in 0..3 {
                        for c in 0..3 {
                            q[(axis + 3 * r, axis + 3 * c)] = qv * g[r] * g[c];
                        }
                    }
                }
                q[(9, 9)] = UNUSED_OMEGA_VAR;
            }
        }
        q
    }
}

// ---------------------------------------------------------------------------
// Transitions & Jacobians
// ---------------------------------------------------------------------------

fn transition_cv(x: &StateVec, dt: f64) -> StateVec {
    let mut out = StateVec::zeros();
    for i in 0..3 {
        out[i] = x[i] + x[i + 3] * dt;
        out[i + 3] = x[i + 3];
    }
    out
}

fn jacobian_cv(dt: f64) -> StateCov {
    let mut f = StateCov::zeros();
    for i in 0..3 {
        f[(i, i)] = 1.0;
        f[(i, i + 3)] = dt;
        f[(i + 3, i + 3)] = 1.0;
    }
    f
}

fn transition_ca(x: &StateVec, dt: f64) -> StateVec {
    let mut out = StateVec::zeros();
    let half_dt2 = 0.5 * dt * dt;
    for i in 0..3 {
        out[i] = x[i] + x[i + 3] * dt + x[i + 6] * half_dt2;
        out[i + 3] = x[i + 3] + x[i + 6] * dt;
        out[i + 6] = x[i + 6];
    }
    out
}

fn jacobian_ca(dt: f64) -> StateCov {
    let mut f = StateCov::zeros();
    let half_dt2 = 0.5 * dt * dt;
    for i in 0..3 {
        f[(i, i)] = 1.0;
        f[(i, i + 3)] = dt;
        f[(i, i + 6)] = half_dt2;
        f[(i + 3, i + 3)] = 1.0;
        f[(i + 3, i + 6)] = dt;
        f[(i + 6, i + 6)] = 1.0;
    }
    f
}

fn transition_ct(x: &StateVec, dt: f64) -> StateVec {
    let (vx, vy) = (x[3], x[4]);
    let omega = x[9];
    let mut out = StateVec::zeros();
    out[2] = x[2] + x[5] * dt;
    out[5] = x[5];
    out[9] = omega;
    if omega.abs() < OMEGA_EPS {
        out[0] = x[0] + vx * dt;
        out[1] = x[1] + vy * dt;
        out[3] = vx;
        out[4] = vy;
    } else {
        let (s, c) = (omega * dt).sin_cos();
        out[0] = x[0] + (vx * s - vy * (1.0 - c)) / omega;
        out[1] = x[1] + (vx * (1.0 - c) + vy * s) / omega;
        out[3] = vx * c - vy * s;
        out[4] = vx * s + vy * c;
    }
    out
}

fn jacobian_ct(x: &StateVec, dt: f64) -> StateCov {
    let (vx, vy) = (x[3], x[4]);
    let omega = x[9];
    let mut f = StateCov::zeros();
    f[(0, 0)] = 1.0;
    f[(1, 1)] = 1.0;
    f[(2, 2)] = 1.0;
    f[(2, 5)] = dt;
    f[(5, 5)] = 1.0;
    f[(9, 9)] = 1.0;

    if omega.abs() < OMEGA_EPS {
        // Small-angle limits of the turn Jacobian
        f[(0, 3)] = dt;
        f[(1, 4)] = dt;
        f[(3, 3)] = 1.0;
        f[(4, 4)] = 1.0;
        f[(0, 9)] = -vy * dt * dt / 2.0;
        f[(1, 9)] = vx * dt * dt / 2.0;
        f[(3, 9)] = -vy * dt;
        f[(4, 9)] = vx * dt;
    } else {
        let (s, c) = (omega * dt).sin_cos();
        let so = s / omega;
        let co = (1.0 - c) / omega;
        f[(0, 3)] = so;
        f[(0, 4)] = -co;
        f[(1, 3)] = co;
        f[(1, 4)] = so;
        f[(3, 3)] = c;
        f[(3, 4)] = -s;
        f[(4, 3)] = s;
        f[(4, 4)] = c;

        let o2 = omega * omega;
        let dso = (dt * c * omega - s) / o2;
        let dco = (dt * s * omega - (1.0 - c)) / o2;
        f[(0, 9)] = vx * dso - vy * dco;
        f[(1, 9)] = vx * dco + vy * dso;
        f[(3, 9)] = dt * (-vx * s - vy * c);
        f[(4, 9)] = dt * (vx * c - vy * s);
    }
    f
}

// ---------------------------------------------------------------------------
// Observation matrices
// ---------------------------------------------------------------------------

/// 3×10 selector of the position block.
pub fn h_position() -> DMat {
    let mut h = DMatrix::zeros(3, STATE_DIM);
    for i in 0..3 {
        h[(i, i)] = 1.0;
    }
    h
}

/// 6×10 selector of the position and velocity blocks.
pub fn h_position_velocity() -> DMat {
    let mut h = DMatrix::zeros(6, STATE_DIM);
    for i in 0..6 {
        h[(i, i)] = 1.0;
    }
    h
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn state(px: f64, vx: f64, vy: f64) -> StateVec {
        let mut x = StateVec::zeros();
        x[0] = px;
        x[3] = vx;
        x[4] = vy;
        x
    }

    #[test]
    fn cv_integrates_velocity_and_zeroes_acceleration() {
        let model = MotionModel::new(ModelKind::Cv, 1.0, 0.0);
        let mut x = state(0.0, 10.0, 0.0);
        x[6] = 5.0; // mixed-in acceleration must not survive CV prediction
        let (x1, p1) = model.predict(&x, &StateCov::identity(), 1.0);
        assert_abs_diff_eq!(x1[0], 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x1[3], 10.0, epsilon = 1e-12);
        assert_eq!(x1[6], 0.0);
        // Unused dimensions keep a large stationary variance
        assert_abs_diff_eq!(p1[(6, 6)], UNUSED_ACC_VAR, epsilon = 1e-9);
    }

    #[test]
    fn ca_matches_constant_acceleration_kinematics() {
        let model = MotionModel::new(ModelKind::Ca, 1.0, 0.0);
        let mut x = StateVec::zeros();
        x[3] = 10.0;
        x[6] = 2.0;
        let (x1, _) = model.predict(&x, &StateCov::identity(), 2.0);
        assert_abs_diff_eq!(x1[0], 10.0 * 2.0 + 0.5 * 2.0 * 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x1[3], 14.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x1[6], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn ct_preserves_speed_and_rotates_heading() {
        let model = MotionModel::new(ModelKind::Ct, 1.0, 0.05);
        let mut x = state(0.0, 200.0, 0.0);
        x[9] = 0.1;
        let mut cov = StateCov::identity();
        let mut cur = x;
        for _ in 0..10 {
            let (nx, ncov) = model.predict(&cur, &cov, 0.5);
            cur = nx;
            cov = ncov;
        }
        let speed = (cur[3] * cur[3] + cur[4] * cur[4]).sqrt();
        assert_abs_diff_eq!(speed, 200.0, epsilon = 1e-6);
        let heading = cur[4].atan2(cur[3]);
        assert_abs_diff_eq!(heading, 0.1 * 5.0, epsilon = 1e-9);
        assert!(cov[(9, 9)].is_finite());
    }

    #[test]
    fn ct_jacobian_is_continuous_through_zero_omega() {
        let x = state(0.0, 150.0, 30.0);
        let dt = 0.5;
        let mut near = x;
        near[9] = 2.0 * OMEGA_EPS;
        let f_near = jacobian_ct(&near, dt);
        let f_limit = jacobian_ct(&x, dt);
        for r in 0..STATE_DIM {
            for c in 0..STATE_DIM {
                assert_abs_diff_eq!(f_near[(r, c)], f_limit[(r, c)], epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn observation_matrices_select_expected_blocks() {
        let h = h_position();
        assert_eq!(h.nrows(), 3);
        let hv = h_position_velocity();
        assert_eq!(hv.nrows(), 6);
        assert_eq!(hv[(5, 5)], 1.0);
        assert_eq!(hv[(5, 6)], 0.0);
    }
}
