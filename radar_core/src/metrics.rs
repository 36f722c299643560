//! Truth-matched tracking metrics for scenario evaluation: position RMSE,
//! precision/recall, id switches and per-target identity consistency.
//!
//! Matching is nearest-neighbour on position between confirmed tracks and
//! ground-truth targets, with a distance cap to reject spurious pairings.

use crate::track::Track;
use crate::types::{TrackId, TrackState};
use nalgebra::Vector3;
use serde::Serialize;
use std::collections::HashMap;

/// Ground-truth state of one target at evaluation time.
#[derive(Clone, Debug)]
pub struct TruthState {
    pub target_id: u64,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
}

/// Accumulated metrics over a scenario run.
#[derive(Clone, Debug, Default)]
pub struct TrackingMetrics {
    pub n_frames: u64,
    pub n_matched: u64,
    sum_sq_pos_err: f64,
    sum_sq_vel_err: f64,
    pub true_positives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
    pub id_switches: u64,
    /// target id → last matched track (for switch detection)
    last_assignment: HashMap<u64, TrackId>,
    /// target id → per-track match counts (for identity consistency)
    assignment_counts: HashMap<u64, HashMap<TrackId, u64>>,
}

/// Serializable summary for CLI output.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct MetricsSummary {
    pub frames: u64,
    pub rmse_position_m: f64,
    pub rmse_velocity_mps: f64,
    pub precision: f64,
    pub recall: f64,
    pub id_switches: u64,
    pub identity_consistency: f64,
}

impl TrackingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one frame: confirmed tracks vs. ground truth, matched
    /// nearest-first within `max_match_dist` metres.
    pub fn accumulate(&mut self, tracks: &[Track], truths: &[TruthState], max_match_dist: f64) {
        self.n_frames += 1;
        let confirmed: Vec<&Track> =
            tracks.iter().filter(|t| t.state == TrackState::Confirmed).collect();

        // Greedy nearest-first matching
        let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
        for (ti, track) in confirmed.iter().enumerate() {
            for (gi, truth) in truths.iter().enumerate() {
                let dist = (track.position - truth.position).norm();
                if dist <= max_match_dist {
                    candidates.push((dist, ti, gi));
                }
            }
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut track_used = vec![false; confirmed.len()];
        let mut truth_used = vec![false; truths.len()];
        for (dist, ti, gi) in candidates {
            if track_used[ti] || truth_used[gi] {
                continue;
            }
            track_used[ti] = true;
            truth_used[gi] = true;

            let track = confirmed[ti];
            let truth = &truths[gi];
            self.n_matched += 1;
            self.true_positives += 1;
            self.sum_sq_pos_err += dist * dist;
            self.sum_sq_vel_err += (track.velocity - truth.velocity).norm_squared();

            if let Some(previous) = self.last_assignment.insert(truth.target_id, track.id) {
                if previous != track.id {
                    self.id_switches += 1;
                }
            }
            *self
                .assignment_counts
                .entry(truth.target_id)
                .or_default()
                .entry(track.id)
                .or_insert(0) += 1;
        }

        self.false_positives += track_used.iter().filter(|&&used| !used).count() as u64;
        self.false_negatives += truth_used.iter().filter(|&&used| !used).count() as u64;
    }

    pub fn rmse_position(&self) -> f64 {
        if self.n_matched == 0 {
            return 0.0;
        }
        (self.sum_sq_pos_err / self.n_matched as f64).sqrt()
    }

    pub fn rmse_velocity(&self) -> f64 {
        if self.n_matched == 0 {
            return 0.0;
        }
        (self.sum_sq_vel_err / self.n_matched as f64).sqrt()
    }

    pub fn precision(&self) -> f64 {
        let denom = (self.true_positives + self.false_positives) as f64;
        if denom == 0.0 {
            1.0
        } else {
            self.true_positives as f64 / denom
        }
    }

    pub fn recall(&self) -> f64 {
        let denom = (self.true_positives + self.false_negatives) as f64;
        if denom == 0.0 {
            1.0
        } else {
            self.true_positives as f64 / denom
        }
    }

    /// Fraction of matched frames where a target was covered by its modal
    /// track. 1.0 means no target ever changed identity.
    pub fn identity_consistency(&self) -> f64 {
        let mut dominant = 0u64;
        let mut total = 0u64;
        for counts in self.assignment_counts.values() {
            dominant += counts.values().copied().max().unwrap_or(0);
            total += counts.values().sum::<u64>();
        }
        if total == 0 {
            1.0
        } else {
            dominant as f64 / total as f64
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames: self.n_frames,
            rmse_position_m: self.rmse_position(),
            rmse_velocity_mps: self.rmse_velocity(),
            precision: self.precision(),
            recall: self.recall(),
            id_switches: self.id_switches,
            identity_consistency: self.identity_consistency(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingConfig;
    use crate::imm::ImmFilterBank;
    use crate::types::{BeamId, Cluster, ClusterId, Timestamp};
    use nalgebra::Matrix3;

    fn confirmed_track(id: u64, x: f64, y: f64) -> Track {
        let bank = ImmFilterBank::from_config(&TrackingConfig::default()).unwrap();
        let cluster = Cluster {
            id: ClusterId(0),
            centroid: Vector3::new(x, y, 0.0),
            velocity: None,
            position_cov: Matrix3::identity(),
            confidence: 0.9,
            mean_snr_db: 25.0,
            members: vec![],
            beam_id: BeamId(0),
        };
        let mut track =
            Track::new(TrackId(id), bank.init_bundle(&cluster), Timestamp(0), 25.0, BeamId(0));
        track.state = TrackState::Confirmed;
        track
    }

    fn truth(target_id: u64, x: f64, y: f64) -> TruthState {
        TruthState { target_id, position: Vector3::new(x, y, 0.0), velocity: Vector3::zeros() }
    }

    #[test]
    fn rmse_reflects_position_error() {
        let mut metrics = TrackingMetrics::new();
        metrics.accumulate(&[confirmed_track(0, 103.0, 0.0)], &[truth(0, 100.0, 0.0)], 500.0);
        assert!((metrics.rmse_position() - 3.0).abs() < 1e-9);
        assert_eq!(metrics.precision(), 1.0);
        assert_eq!(metrics.recall(), 1.0);
    }

    #[test]
    fn unmatched_sides_count_as_fp_and_fn() {
        let mut metrics = TrackingMetrics::new();
        metrics.accumulate(
            &[confirmed_track(0, 0.0, 0.0), confirmed_track(1, 90_000.0, 0.0)],
            &[truth(0, 10.0, 0.0), truth(1, 50_000.0, 0.0)],
            500.0,
        );
        assert_eq!(metrics.true_positives, 1);
        assert_eq!(metrics.false_positives, 1);
        assert_eq!(metrics.false_negatives, 1);
    }

    #[test]
    fn id_switch_detected_and_consistency_drops() {
        let mut metrics = TrackingMetrics::new();
        for _ in 0..9 {
            metrics.accumulate(&[confirmed_track(0, 0.0, 0.0)], &[truth(7, 0.0, 0.0)], 500.0);
        }
        metrics.accumulate(&[confirmed_track(1, 0.0, 0.0)], &[truth(7, 0.0, 0.0)], 500.0);
        assert_eq!(metrics.id_switches, 1);
        assert!((metrics.identity_consistency() - 0.9).abs() < 1e-9);
    }
}
