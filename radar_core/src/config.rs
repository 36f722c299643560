//! YAML configuration for the tracking pipeline.
//!
//! The configuration is loaded once at startup, validated, and thereafter
//! treated as immutable; components receive it by reference at construction.
//! Every section has defaults, so an empty document is a valid configuration.
//!
//! ## Example
//!
//! ```yaml
//! system:
//!   tracking_mode: tws
//!   max_tracks: 1000
//!
//! algorithms:
//!   clustering:
//!     algorithm: dbscan
//!     epsilon: 50.0
//!     min_points: 2
//!   association:
//!     gating_threshold: 11.345
//!     assignment:
//!       algorithm: hungarian
//!   tracking:
//!     imm:
//!       initial_probabilities: [0.6, 0.3, 0.1]
//!
//! processing:
//!   queue_size_limit: 1024
//! ```

use crate::error::ConfigError;
use crate::types::TrackingMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root of the configuration document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub system: SystemSection,
    pub communication: CommunicationConfig,
    pub algorithms: AlgorithmsConfig,
    pub track_management: TrackManagementConfig,
    pub processing: ProcessingConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
    pub performance: PerformanceConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSection {
    pub tracking_mode: TrackingMode,
    /// Hard cap on registry size; worst-quality eviction above it
    pub max_tracks: usize,
}

impl Default for SystemSection {
    fn default() -> Self {
        Self { tracking_mode: TrackingMode::Tws, max_tracks: 1000 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicationConfig {
    /// Ingestion adapter name (resolved by the embedding application)
    pub adapter: String,
    /// Reject frames larger than this before decode
    pub max_frame_bytes: usize,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self { adapter: "loopback".to_string(), max_frame_bytes: 1 << 20 }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmsConfig {
    pub clustering: ClusteringConfig,
    pub association: AssociationConfig,
    pub tracking: TrackingConfig,
}

/// Weights of the composite clustering distance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceWeights {
    pub position: f64,
    pub velocity: f64,
    pub range: f64,
    pub azimuth: f64,
}

impl Default for DistanceWeights {
    fn default() -> Self {
        Self { position: 1.0, velocity: 0.1, range: 0.5, azimuth: 0.3 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Closed variant set; only "dbscan" is implemented
    pub algorithm: String,
    /// Base neighbourhood radius ε₀ (composite-distance units)
    pub epsilon: f64,
    /// Minimum neighbours for a core point, and minimum cluster size
    pub min_points: usize,
    pub distance_weights: DistanceWeights,
    /// Widen ε with range: ε(a) = ε₀·(1 + k·range)
    pub use_adaptive_epsilon: bool,
    pub adaptive_epsilon_factor: f64,
    /// Preprocess: drop detections below this SNR (dB)
    pub snr_threshold: f64,
    /// Cap on clusters per batch; excess points become noise
    pub max_clusters: usize,
    /// Validation: reject clusters larger than this
    pub max_cluster_size: usize,
    /// Validation: reject clusters sparser than this (members / m³)
    pub min_cluster_density: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            algorithm: "dbscan".to_string(),
            epsilon: 50.0,
            min_points: 2,
            distance_weights: DistanceWeights::default(),
            use_adaptive_epsilon: false,
            adaptive_epsilon_factor: 0.01,
            snr_threshold: 10.0,
            max_clusters: 100,
            max_cluster_size: 64,
            min_cluster_density: 0.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    /// "hungarian" or "greedy"
    pub algorithm: String,
    /// Greedy fallback engages when either side of the bipartite graph
    /// exceeds this, regardless of the configured algorithm
    pub max_tracks_for_parallel: usize,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self { algorithm: "hungarian".to_string(), max_tracks_for_parallel: 200 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationConfig {
    /// χ² gate on the position innovation (3 d.o.f., 99% by default)
    pub gating_threshold: f64,
    /// χ² gate on the velocity innovation, applied when the cluster
    /// carries velocity. Deliberately loose: Doppler lags the filter
    /// during manoeuvre onset
    pub velocity_gating_threshold: f64,
    pub assignment: AssignmentConfig,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            gating_threshold: crate::numerics::CHI2_99[3],
            velocity_gating_threshold: 30.0,
            assignment: AssignmentConfig::default(),
        }
    }
}

/// One IMM submodel with its process-noise intensity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImmModelConfig {
    /// "cv", "ca" or "ct"
    pub kind: String,
    /// Continuous white-noise intensity: acceleration (m/s²) for CV/CT,
    /// jerk (m/s³) for CA
    pub process_noise: f64,
    /// Turn-rate random-walk intensity (rad/s per √s); CT only
    #[serde(default)]
    pub turn_rate_noise: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ImmConfig {
    pub models: Vec<ImmModelConfig>,
    /// Row-stochastic Markov transition matrix, models × models
    pub transition_matrix: Vec<Vec<f64>>,
    /// Initial mode distribution
    pub initial_probabilities: Vec<f64>,
}

impl Default for ImmConfig {
    fn default() -> Self {
        Self {
            models: vec![
                ImmModelConfig { kind: "cv".into(), process_noise: 1.5, turn_rate_noise: 0.0 },
                ImmModelConfig { kind: "ca".into(), process_noise: 8.0, turn_rate_noise: 0.0 },
                ImmModelConfig { kind: "ct".into(), process_noise: 2.0, turn_rate_noise: 0.05 },
            ],
            transition_matrix: vec![
                vec![0.92, 0.04, 0.04],
                vec![0.05, 0.90, 0.05],
                vec![0.05, 0.05, 0.90],
            ],
            initial_probabilities: vec![0.6, 0.3, 0.1],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Closed variant set; only "imm" is implemented
    pub algorithm: String,
    pub imm: ImmConfig,
    /// Measurement noise std on cluster position (m)
    pub measurement_noise_pos: f64,
    /// Measurement noise std on cluster velocity (m/s)
    pub measurement_noise_vel: f64,
    /// Initial position uncertainty at birth (1σ, m)
    pub init_pos_std: f64,
    /// Initial velocity uncertainty at birth (1σ, m/s); also used when a
    /// cluster carries no Doppler velocity
    pub init_vel_std: f64,
    /// Initial acceleration uncertainty at birth (1σ, m/s²)
    pub init_acc_std: f64,
    /// Initial turn-rate uncertainty at birth (1σ, rad/s)
    pub init_omega_std: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            algorithm: "imm".to_string(),
            imm: ImmConfig::default(),
            measurement_noise_pos: 5.0,
            measurement_noise_vel: 3.0,
            init_pos_std: 30.0,
            init_vel_std: 50.0,
            init_acc_std: 30.0,
            init_omega_std: 0.3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackManagementConfig {
    /// Consecutive hits promoting a tentative track
    pub confirmation_threshold: u32,
    /// Consecutive misses terminating a tentative track
    pub deletion_threshold: u32,
    /// Coasting deadline since the last hit (seconds)
    pub max_coast_time_sec: f64,
    /// Coasting tracks below this quality are terminated
    pub quality_threshold: f64,
    /// Quality decay time constant while coasting (seconds)
    pub coast_decay_tau_sec: f64,
}

impl Default for TrackManagementConfig {
    fn default() -> Self {
        Self {
            confirmation_threshold: 3,
            deletion_threshold: 3,
            max_coast_time_sec: 10.0,
            quality_threshold: 0.05,
            coast_decay_tau_sec: 5.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Worker pool size; 0 = hardware concurrency
    pub thread_pool_size: usize,
    /// Capacity of every inter-stage queue
    pub queue_size_limit: usize,
    /// Soft per-stage deadline; exceeding it emits a latency event
    pub processing_timeout_ms: u64,
    /// How long a producer blocks on a full queue before the oldest
    /// batch is dropped
    pub backpressure_timeout_ms: u64,
    /// Stage drain timeout during shutdown
    pub drain_timeout_ms: u64,
    /// Offload per-item work to the pool above this batch size
    pub batch_parallel_threshold: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: 0,
            queue_size_limit: 1024,
            processing_timeout_ms: 100,
            backpressure_timeout_ms: 100,
            drain_timeout_ms: 100,
            batch_parallel_threshold: 64,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// HMI publication rate (Hz)
    pub hmi_rate_hz: f64,
    /// Fusion publication rate (Hz)
    pub fusion_rate_hz: f64,
    /// Per-track cue rate limit in Beam-Request mode (Hz)
    pub max_cue_rate_hz: f64,
    /// Dwell time requested per cue (ms)
    pub dwell_time_ms: f64,
    /// Capacity of the cueing channel
    pub cue_queue_capacity: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            hmi_rate_hz: 20.0,
            fusion_rate_hz: 50.0,
            max_cue_rate_hz: 10.0,
            dwell_time_ms: 40.0,
            cue_queue_capacity: 256,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing filter directive, e.g. "info" or "radar_core=debug"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Health/stats evaluation interval (seconds)
    pub stats_interval_sec: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { stats_interval_sec: 1.0 }
    }
}

impl SystemConfig {
    /// Parse a YAML document.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: SystemConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Validate every section. Called once at startup; any failure is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(key: &'static str, v: f64) -> Result<(), ConfigError> {
            if v > 0.0 && v.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::Invalid { key, reason: format!("must be positive, got {v}") })
            }
        }
        fn non_negative(key: &'static str, v: f64) -> Result<(), ConfigError> {
            if v >= 0.0 && v.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::Invalid { key, reason: format!("must be ≥ 0, got {v}") })
            }
        }

        if self.system.max_tracks == 0 {
            return Err(ConfigError::Invalid {
                key: "system.max_tracks",
                reason: "must be at least 1".into(),
            });
        }

        let c = &self.algorithms.clustering;
        if c.algorithm != "dbscan" {
            return Err(ConfigError::UnknownAlgorithm {
                kind: "clustering",
                name: c.algorithm.clone(),
                expected: "dbscan",
            });
        }
        positive("algorithms.clustering.epsilon", c.epsilon)?;
        if c.min_points == 0 {
            return Err(ConfigError::Invalid {
                key: "algorithms.clustering.min_points",
                reason: "must be at least 1".into(),
            });
        }
        if c.max_cluster_size < c.min_points {
            return Err(ConfigError::Invalid {
                key: "algorithms.clustering.max_cluster_size",
                reason: "must be ≥ min_points".into(),
            });
        }
        non_negative("algorithms.clustering.distance_weights.position", c.distance_weights.position)?;
        non_negative("algorithms.clustering.distance_weights.velocity", c.distance_weights.velocity)?;
        non_negative("algorithms.clustering.distance_weights.range", c.distance_weights.range)?;
        non_negative("algorithms.clustering.distance_weights.azimuth", c.distance_weights.azimuth)?;
        non_negative("algorithms.clustering.adaptive_epsilon_factor", c.adaptive_epsilon_factor)?;

        let a = &self.algorithms.association;
        positive("algorithms.association.gating_threshold", a.gating_threshold)?;
        positive("algorithms.association.velocity_gating_threshold", a.velocity_gating_threshold)?;
        match a.assignment.algorithm.as_str() {
            "hungarian" | "greedy" => {}
            other => {
                return Err(ConfigError::UnknownAlgorithm {
                    kind: "assignment",
                    name: other.to_string(),
                    expected: "hungarian, greedy",
                })
            }
        }

        let t = &self.algorithms.tracking;
        if t.algorithm != "imm" {
            return Err(ConfigError::UnknownAlgorithm {
                kind: "tracking",
                name: t.algorithm.clone(),
                expected: "imm",
            });
        }
        positive("algorithms.tracking.measurement_noise_pos", t.measurement_noise_pos)?;
        positive("algorithms.tracking.measurement_noise_vel", t.measurement_noise_vel)?;
        positive("algorithms.tracking.init_pos_std", t.init_pos_std)?;
        positive("algorithms.tracking.init_vel_std", t.init_vel_std)?;

        let imm = &t.imm;
        let n = imm.models.len();
        if n == 0 {
            return Err(ConfigError::Invalid {
                key: "algorithms.tracking.imm.models",
                reason: "at least one submodel required".into(),
            });
        }
        for m in &imm.models {
            match m.kind.as_str() {
                "cv" | "ca" | "ct" => {}
                other => {
                    return Err(ConfigError::UnknownAlgorithm {
                        kind: "imm model",
                        name: other.to_string(),
                        expected: "cv, ca, ct",
                    })
                }
            }
            positive("algorithms.tracking.imm.models.process_noise", m.process_noise)?;
        }
        if imm.initial_probabilities.len() != n {
            return Err(ConfigError::Invalid {
                key: "algorithms.tracking.imm.initial_probabilities",
                reason: format!("expected {n} entries"),
            });
        }
        let mu_sum: f64 = imm.initial_probabilities.iter().sum();
        if (mu_sum - 1.0).abs() > 1e-6 || imm.initial_probabilities.iter().any(|&p| p < 0.0) {
            return Err(ConfigError::Invalid {
                key: "algorithms.tracking.imm.initial_probabilities",
                reason: format!("must be a distribution, sums to {mu_sum}"),
            });
        }
        if imm.transition_matrix.len() != n {
            return Err(ConfigError::Invalid {
                key: "algorithms.tracking.imm.transition_matrix",
                reason: format!("expected {n} rows"),
            });
        }
        for (i, row) in imm.transition_matrix.iter().enumerate() {
            if row.len() != n {
                return Err(ConfigError::Invalid {
                    key: "algorithms.tracking.imm.transition_matrix",
                    reason: format!("row {i} has {} entries, expected {n}", row.len()),
                });
            }
            let row_sum: f64 = row.iter().sum();
            if (row_sum - 1.0).abs() > 1e-6 || row.iter().any(|&p| p < 0.0) {
                return Err(ConfigError::Invalid {
                    key: "algorithms.tracking.imm.transition_matrix",
                    reason: format!("row {i} is not stochastic (sums to {row_sum})"),
                });
            }
        }

        let tm = &self.track_management;
        if tm.confirmation_threshold == 0 || tm.deletion_threshold == 0 {
            return Err(ConfigError::Invalid {
                key: "track_management.confirmation_threshold",
                reason: "thresholds must be at least 1".into(),
            });
        }
        positive("track_management.max_coast_time_sec", tm.max_coast_time_sec)?;
        non_negative("track_management.quality_threshold", tm.quality_threshold)?;
        positive("track_management.coast_decay_tau_sec", tm.coast_decay_tau_sec)?;

        if self.processing.queue_size_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "processing.queue_size_limit",
                reason: "must be at least 1".into(),
            });
        }

        positive("output.hmi_rate_hz", self.output.hmi_rate_hz)?;
        positive("output.fusion_rate_hz", self.output.fusion_rate_hz)?;
        positive("output.max_cue_rate_hz", self.output.max_cue_rate_hz)?;
        positive("performance.stats_interval_sec", self.performance.stats_interval_sec)?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
