//! Statistical gating: is a cluster close enough to a predicted track to be
//! a feasible pairing?
//!
//! The Mahalanobis distance d² = νᵀ·S⁻¹·ν is tested against a χ² threshold.
//! The position gate is always applied; the velocity gate only when the
//! cluster carries a Doppler velocity. A pairing must pass every enabled
//! gate, and the position d² doubles as the assignment cost.

use crate::numerics::MIN_EIGENVALUE;
use crate::types::{Cluster, StateCov, StateVec};
use nalgebra::{Matrix3, Vector3};

/// Gate thresholds and measurement noise, extracted from config once.
#[derive(Clone, Copy, Debug)]
pub struct GateParams {
    /// χ² threshold on the position innovation (3 d.o.f.)
    pub position_gate: f64,
    /// χ² threshold on the velocity innovation (3 d.o.f.)
    pub velocity_gate: f64,
    /// Position measurement noise variance (m²)
    pub measurement_var_pos: f64,
    /// Velocity measurement noise variance ((m/s)²)
    pub measurement_var_vel: f64,
}

/// Outcome of one (track, cluster) gate check.
#[derive(Clone, Copy, Debug)]
pub struct GateResult {
    /// Position Mahalanobis distance squared (assignment cost)
    pub d2: f64,
    pub passes: bool,
    /// An innovation covariance needed the ½(S+Sᵀ)+εI repair
    pub repaired: bool,
}

impl GateResult {
    fn reject(repaired: bool) -> Self {
        Self { d2: f64::INFINITY, passes: false, repaired }
    }
}

/// Check all enabled gates for a predicted track state against a cluster.
pub fn gate(state: &StateVec, cov: &StateCov, cluster: &Cluster, params: &GateParams) -> GateResult {
    let mut repaired = false;

    // Position gate (always on)
    let predicted_pos = Vector3::new(state[0], state[1], state[2]);
    let nu_pos = cluster.centroid - predicted_pos;
    let p_pos: Matrix3<f64> = cov.fixed_view::<3, 3>(0, 0).into_owned();
    let mut s_pos = p_pos
        + Matrix3::identity() * params.measurement_var_pos
        + cluster.position_cov;
    let d2_pos = match mahalanobis_sq(&nu_pos, &s_pos) {
        Some(d2) => d2,
        None => {
            repair(&mut s_pos);
            repaired = true;
            match mahalanobis_sq(&nu_pos, &s_pos) {
                Some(d2) => d2,
                // Never apply an invalid pairing
                None => return GateResult::reject(true),
            }
        }
    };
    if d2_pos > params.position_gate {
        return GateResult { d2: d2_pos, passes: false, repaired };
    }

    // Velocity gate, when the cluster carries Doppler
    if let Some(cluster_vel) = cluster.velocity {
        let predicted_vel = Vector3::new(state[3], state[4], state[5]);
        let nu_vel = cluster_vel - predicted_vel;
        let p_vel: Matrix3<f64> = cov.fixed_view::<3, 3>(3, 3).into_owned();
        let mut s_vel = p_vel + Matrix3::identity() * params.measurement_var_vel;
        let d2_vel = match mahalanobis_sq(&nu_vel, &s_vel) {
            Some(d2) => d2,
            None => {
                repair(&mut s_vel);
                repaired = true;
                match mahalanobis_sq(&nu_vel, &s_vel) {
                    Some(d2) => d2,
                    None => return GateResult::reject(true),
                }
            }
        };
        if d2_vel > params.velocity_gate {
            return GateResult { d2: d2_pos, passes: false, repaired };
        }
    }

    GateResult { d2: d2_pos, passes: true, repaired }
}

fn mahalanobis_sq(nu: &Vector3<f64>, s: &Matrix3<f64>) -> Option<f64> {
    let inv = s.try_inverse()?;
    let d2 = (nu.transpose() * inv * nu)[0];
    d2.is_finite().then_some(d2.max(0.0))
}

/// S ← ½(S + Sᵀ) + εI
fn repair(s: &mut Matrix3<f64>) {
    *s = (*s + s.transpose()) * 0.5 + Matrix3::identity() * MIN_EIGENVALUE;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerics::CHI2_99;
    use crate::types::{BeamId, ClusterId};

    fn params() -> GateParams {
        GateParams {
            position_gate: CHI2_99[3],
            velocity_gate: CHI2_99[3],
            measurement_var_pos: 25.0,
            measurement_var_vel: 9.0,
        }
    }

    fn cluster_at(pos: Vector3<f64>, velocity: Option<Vector3<f64>>) -> Cluster {
        Cluster {
            id: ClusterId(0),
            centroid: pos,
            velocity,
            position_cov: Matrix3::zeros(),
            confidence: 1.0,
            mean_snr_db: 25.0,
            members: vec![],
            beam_id: BeamId(0),
        }
    }

    fn track_state(pos: Vector3<f64>, vel: Vector3<f64>) -> StateVec {
        let mut x = StateVec::zeros();
        for i in 0..3 {
            x[i] = pos[i];
            x[i + 3] = vel[i];
        }
        x
    }

    #[test]
    fn nearby_cluster_passes_with_small_distance() {
        let state = track_state(Vector3::new(1000.0, 0.0, 100.0), Vector3::zeros());
        let cov = StateCov::identity() * 100.0;
        let cluster = cluster_at(Vector3::new(1002.0, 1.0, 100.0), None);
        let result = gate(&state, &cov, &cluster, &params());
        assert!(result.passes);
        assert!(result.d2 < 1.0);
    }

    #[test]
    fn distant_cluster_fails_position_gate() {
        let state = track_state(Vector3::zeros(), Vector3::zeros());
        let cov = StateCov::identity();
        let cluster = cluster_at(Vector3::new(500.0, 0.0, 0.0), None);
        let result = gate(&state, &cov, &cluster, &params());
        assert!(!result.passes);
        assert!(result.d2 > params().position_gate);
    }

    #[test]
    fn velocity_gate_rejects_opposing_doppler() {
        let state = track_state(Vector3::zeros(), Vector3::new(200.0, 0.0, 0.0));
        let cov = StateCov::identity() * 4.0;
        // Position matches but Doppler is wildly inconsistent
        let cluster = cluster_at(Vector3::zeros(), Some(Vector3::new(-200.0, 0.0, 0.0)));
        let result = gate(&state, &cov, &cluster, &params());
        assert!(!result.passes);
        // No Doppler → only the position gate applies → passes
        let blind = cluster_at(Vector3::zeros(), None);
        assert!(gate(&state, &cov, &blind, &params()).passes);
    }

    #[test]
    fn degenerate_covariance_is_repaired_not_fatal() {
        let state = track_state(Vector3::zeros(), Vector3::zeros());
        // Zero covariance block with zero measurement noise → singular S
        let cov = StateCov::zeros();
        let p = GateParams { measurement_var_pos: 0.0, ..params() };
        let cluster = cluster_at(Vector3::zeros(), None);
        let result = gate(&state, &cov, &cluster, &p);
        assert!(result.repaired);
        assert!(result.passes); // ν = 0 passes after εI repair
    }
}
