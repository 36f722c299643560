//! Fundamental types shared across the pipeline.

use nalgebra::{DMatrix, DVector, Matrix3, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Scalar & state-space types. All math is f64.
// ---------------------------------------------------------------------------

/// Dimension of the uniform motion-model state space.
/// Layout: [px, py, pz, vx, vy, vz, ax, ay, az, ω]
pub const STATE_DIM: usize = 10;

/// State vector in the uniform space.
pub type StateVec = SVector<f64, STATE_DIM>;

/// State covariance in the uniform space.
pub type StateCov = SMatrix<f64, STATE_DIM, STATE_DIM>;

/// Dynamic vector (measurement space: innovation, z).
pub type DVec = DVector<f64>;

/// Dynamic matrix (measurement space: H, R, S, K).
pub type DMat = DMatrix<f64>;

// ---------------------------------------------------------------------------
// Identifier types — newtype wrappers so ids are never confused at compile time
// ---------------------------------------------------------------------------

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TrackId(pub u64);

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DetectionId(pub u64);

/// Cluster ids are dense per batch, starting from 0.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ClusterId(pub u32);

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BeamId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Timestamps — nanosecond resolution, monotonic per sensor
// ---------------------------------------------------------------------------

/// Observation timestamp in nanoseconds on the sender's monotonic clock.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const NANOS_PER_SEC: u64 = 1_000_000_000;

    pub fn from_secs_f64(secs: f64) -> Self {
        Timestamp((secs.max(0.0) * Self::NANOS_PER_SEC as f64) as u64)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / Self::NANOS_PER_SEC as f64
    }

    /// Seconds elapsed since `earlier`. Saturates at zero for out-of-order
    /// timestamps so a stale batch can never produce a negative Δt.
    pub fn seconds_since(&self, earlier: Timestamp) -> f64 {
        self.0.saturating_sub(earlier.0) as f64 / Self::NANOS_PER_SEC as f64
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// A single thresholded radar measurement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Monotonically assigned by the sensor
    pub id: DetectionId,
    /// Observation instant (sender's monotonic clock)
    pub timestamp: Timestamp,
    /// Cartesian position, radar-local ENU (meters)
    pub position: Vector3<f64>,
    /// Cartesian velocity estimate (m/s); `None` when Doppler is unavailable
    pub velocity: Option<Vector3<f64>>,
    /// Slant range (meters), redundant with `position`
    pub range: f64,
    /// Azimuth (radians, |az| ≤ π)
    pub azimuth: f64,
    /// Elevation (radians, |el| ≤ π/2)
    pub elevation: f64,
    /// Signal-to-noise ratio (dB)
    pub snr_db: f64,
    /// Radar cross-section estimate (m²)
    pub rcs: f64,
    /// Originating beam
    pub beam_id: BeamId,
}

/// A decoded batch of detections, sorted by (timestamp, id).
#[derive(Clone, Debug, Default)]
pub struct DetectionBatch {
    /// Pipeline sequence number (FIFO across batches)
    pub seq: u64,
    /// Scan epoch: the latest detection timestamp in the batch
    pub timestamp: Timestamp,
    pub detections: Vec<Detection>,
}

impl DetectionBatch {
    pub fn new(seq: u64, mut detections: Vec<Detection>) -> Self {
        detections.sort_by_key(|d| (d.timestamp, d.id));
        let timestamp = detections.last().map(|d| d.timestamp).unwrap_or_default();
        Self { seq, timestamp, detections }
    }
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

/// A non-empty group of detections judged to originate from one target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cluster {
    /// Dense per batch, starting from 0
    pub id: ClusterId,
    /// Mean Cartesian position of the members
    pub centroid: Vector3<f64>,
    /// Mean member velocity; `None` when no member carries Doppler
    pub velocity: Option<Vector3<f64>>,
    /// Sample covariance of member positions
    pub position_cov: Matrix3<f64>,
    /// Confidence in [0, 1], derived from SNR and member count
    pub confidence: f64,
    /// Mean member SNR (dB)
    pub mean_snr_db: f64,
    /// Member detection ids (back-references)
    pub members: Vec<DetectionId>,
    /// Beam of the strongest member
    pub beam_id: BeamId,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Output of the CLUSTER stage for one batch.
#[derive(Clone, Debug, Default)]
pub struct ClusterBatch {
    pub seq: u64,
    pub timestamp: Timestamp,
    pub clusters: Vec<Cluster>,
    /// Detections classified as noise
    pub noise: u32,
    /// Detections dropped by the SNR preprocess filter
    pub dropped_low_snr: u32,
}

// ---------------------------------------------------------------------------
// Track lifecycle & modes
// ---------------------------------------------------------------------------

/// Lifecycle state of a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackState {
    /// Newborn, not yet confirmed — may be spurious
    Tentative,
    /// Seen `confirmation_threshold` consecutive times
    Confirmed,
    /// Alive on prediction only, no recent association
    Coasting,
    /// Marked for destruction; appears in exactly one more snapshot
    Terminated,
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrackState::Tentative => "TENTATIVE",
            TrackState::Confirmed => "CONFIRMED",
            TrackState::Coasting => "COASTING",
            TrackState::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// Operating mode of the radar system.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Track While Scan: detections arrive from an external scan
    #[default]
    Tws,
    /// Tracks produce cueing requests driving dedicated dwells
    BeamRequest,
}

/// Cueing request emitted for a confirmed track in Beam-Request mode.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BeamRequest {
    pub beam_id: BeamId,
    pub azimuth: f64,
    pub elevation: f64,
    pub dwell_time_ms: f64,
    pub track_id: TrackId,
    pub requested_at: Timestamp,
}

/// Overall health reported in snapshots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    #[default]
    Nominal,
    /// Backpressure drops or resource exhaustion within the last window
    Degraded,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_round_trip_and_saturation() {
        let t = Timestamp::from_secs_f64(1.5);
        assert_eq!(t.0, 1_500_000_000);
        let earlier = Timestamp(1_000_000_000);
        assert!((t.seconds_since(earlier) - 0.5).abs() < 1e-12);
        // Out-of-order clamps to zero instead of going negative
        assert_eq!(earlier.seconds_since(t), 0.0);
    }

    #[test]
    fn detection_batch_sorts_by_timestamp_then_id() {
        let mk = |id: u64, ns: u64| Detection {
            id: DetectionId(id),
            timestamp: Timestamp(ns),
            position: Vector3::zeros(),
            velocity: None,
            range: 0.0,
            azimuth: 0.0,
            elevation: 0.0,
            snr_db: 20.0,
            rcs: 1.0,
            beam_id: BeamId(0),
        };
        let batch = DetectionBatch::new(0, vec![mk(3, 200), mk(1, 100), mk(2, 100)]);
        let ids: Vec<u64> = batch.detections.iter().map(|d| d.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(batch.timestamp, Timestamp(200));
    }
}
