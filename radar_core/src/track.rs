//! Track: fused estimate, lifecycle counters, IMM bundle, bounded history.

use crate::imm::ImmBundle;
use crate::types::{BeamId, TrackId, TrackState, Timestamp};
use nalgebra::Vector3;
use std::collections::VecDeque;

/// Trajectory ring-buffer depth.
pub const HISTORY_LEN: usize = 256;

/// One past fused position, kept for trajectory display and smoothing.
#[derive(Clone, Copy, Debug)]
pub struct TrajectoryPoint {
    pub timestamp: Timestamp,
    pub position: Vector3<f64>,
}

/// A persistent target hypothesis.
#[derive(Clone, Debug)]
pub struct Track {
    /// Monotonically unique, never reused
    pub id: TrackId,
    pub created_at: Timestamp,
    /// Time of the last associated detection (or birth)
    pub last_hit: Timestamp,
    /// Time the estimate was last propagated to
    pub last_update: Timestamp,
    pub state: TrackState,
    /// Consecutive hits (resets on miss); drives confirmation
    pub consecutive_hits: u32,
    /// Consecutive misses (resets on hit); drives deletion/coasting
    pub consecutive_misses: u32,
    pub total_hits: u32,
    pub total_misses: u32,
    /// Quality score in [0, 1], recomputed after every update
    pub quality: f64,
    /// Full estimator state (per-submodel + fused)
    pub imm: ImmBundle,
    /// Fused position estimate (m)
    pub position: Vector3<f64>,
    /// Fused velocity estimate (m/s)
    pub velocity: Vector3<f64>,
    /// Fused acceleration estimate (m/s²)
    pub acceleration: Vector3<f64>,
    /// Bounded trajectory history, most recent last
    pub history: VecDeque<TrajectoryPoint>,
    /// Running mean SNR of associated clusters (dB)
    pub avg_snr_db: f64,
    snr_samples: u32,
    /// Beam of the birth cluster, reused for cueing
    pub beam_id: BeamId,
    /// Last cue emission, for per-track rate limiting
    pub last_cue: Option<Timestamp>,
}

impl Track {
    /// Create a tentative track from a birth bundle. Birth counts as the
    /// first hit.
    pub fn new(
        id: TrackId,
        imm: ImmBundle,
        born_at: Timestamp,
        snr_db: f64,
        beam_id: BeamId,
    ) -> Self {
        let mut track = Self {
            id,
            created_at: born_at,
            last_hit: born_at,
            last_update: born_at,
            state: TrackState::Tentative,
            consecutive_hits: 1,
            consecutive_misses: 0,
            total_hits: 1,
            total_misses: 0,
            quality: 0.0,
            imm,
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            acceleration: Vector3::zeros(),
            history: VecDeque::with_capacity(HISTORY_LEN),
            avg_snr_db: snr_db,
            snr_samples: 1,
            beam_id,
            last_cue: None,
        };
        track.refresh_fused();
        track.push_history(born_at);
        track
    }

    /// Copy the fused estimate out of the IMM bundle.
    pub fn refresh_fused(&mut self) {
        let x = &self.imm.fused_state;
        self.position = Vector3::new(x[0], x[1], x[2]);
        self.velocity = Vector3::new(x[3], x[4], x[5]);
        self.acceleration = Vector3::new(x[6], x[7], x[8]);
    }

    /// Append the current fused position to the bounded history.
    pub fn push_history(&mut self, timestamp: Timestamp) {
        if self.history.len() >= HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(TrajectoryPoint { timestamp, position: self.position });
    }

    /// Fold one more SNR sample into the running mean.
    pub fn record_snr(&mut self, snr_db: f64) {
        self.snr_samples += 1;
        self.avg_snr_db += (snr_db - self.avg_snr_db) / self.snr_samples as f64;
    }

    pub fn hit_ratio(&self) -> f64 {
        let total = self.total_hits + self.total_misses;
        if total == 0 {
            return 0.0;
        }
        self.total_hits as f64 / total as f64
    }

    /// Age in seconds at `now`.
    pub fn age_secs(&self, now: Timestamp) -> f64 {
        now.seconds_since(self.created_at)
    }

    /// Seconds since the last associated detection.
    pub fn coast_secs(&self, now: Timestamp) -> f64 {
        now.seconds_since(self.last_hit)
    }

    /// True for every state that still takes part in association.
    pub fn is_active(&self) -> bool {
        self.state != TrackState::Terminated
    }

    /// Azimuth of the fused position (radians).
    pub fn azimuth(&self) -> f64 {
        self.position.y.atan2(self.position.x)
    }

    /// Elevation of the fused position (radians).
    pub fn elevation(&self) -> f64 {
        let ground = (self.position.x * self.position.x + self.position.y * self.position.y).sqrt();
        self.position.z.atan2(ground)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
