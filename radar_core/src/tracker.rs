//! The detection-to-track cycle.
//!
//! [`Associator`] is the ASSOCIATE+UPDATE stage engine: predict tracks to
//! the batch epoch, gate, assign, run the IMM update, and emit an
//! [`UpdateBatch`] for MANAGE. [`Tracker`] composes CLUSTER →
//! ASSOCIATE+UPDATE → MANAGE synchronously for batch evaluation and tests;
//! the threaded [`crate::system::RadarSystem`] drives the same engines
//! across queues.
//!
//! # Processing steps per batch
//! 1. Predict all live tracks to the batch timestamp
//! 2. Gate every (track, cluster) pair (Mahalanobis, position + velocity)
//! 3. Partition the feasible graph into connected components
//! 4. Solve each component (Hungarian, greedy above the size threshold)
//! 5. IMM update for matched pairs; prediction only for missed tracks
//! 6. Lifecycle state machine, births, eviction (MANAGE)
//! 7. Snapshot export and tombstone collection

use crate::association::{
    greedy_solve, hungarian_solve, partition_components, Assignment, BipartiteGraph,
};
use crate::clustering::DbscanClusterer;
use crate::config::SystemConfig;
use crate::error::ConfigError;
use crate::gating::{gate, GateParams};
use crate::imm::ImmFilterBank;
use crate::manager::{MissedTrack, TrackManager, TrackUpdate, UpdateBatch};
use crate::registry::{TrackRegistry, TrackSnapshot};
use crate::stats::{HealthMonitor, SystemStats};
use crate::track::Track;
use crate::types::{BeamRequest, Cluster, ClusterBatch, DetectionBatch};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Which assignment solver the configuration selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AssignmentAlgorithm {
    Hungarian,
    Greedy,
}

/// ASSOCIATE+UPDATE stage engine. Stateless between batches apart from the
/// shared filter bank; safe to call from a dedicated stage thread.
pub struct Associator {
    bank: ImmFilterBank,
    gate_params: GateParams,
    algorithm: AssignmentAlgorithm,
    /// Greedy fallback above this many tracks or clusters
    greedy_fallback: usize,
    /// Hungarian slack cost for missed/unmatched slots
    dummy_cost: f64,
    /// Offload per-track work to the pool above this batch size
    parallel_threshold: usize,
}

impl Associator {
    pub fn new(config: &SystemConfig) -> Result<Self, ConfigError> {
        let algorithms = &config.algorithms;
        let bank = ImmFilterBank::from_config(&algorithms.tracking)?;
        let algorithm = match algorithms.association.assignment.algorithm.as_str() {
            "greedy" => AssignmentAlgorithm::Greedy,
            _ => AssignmentAlgorithm::Hungarian,
        };
        Ok(Self {
            bank,
            gate_params: GateParams {
                position_gate: algorithms.association.gating_threshold,
                velocity_gate: algorithms.association.velocity_gating_threshold,
                measurement_var_pos: algorithms.tracking.measurement_noise_pos.powi(2),
                measurement_var_vel: algorithms.tracking.measurement_noise_vel.powi(2),
            },
            algorithm,
            greedy_fallback: algorithms.association.assignment.max_tracks_for_parallel,
            dummy_cost: algorithms.association.gating_threshold * 100.0,
            parallel_threshold: config.processing.batch_parallel_threshold,
        })
    }

    pub fn bank(&self) -> &ImmFilterBank {
        &self.bank
    }

    /// Run the full stage over deep copies of the live tracks. The caller
    /// owns `tracks` (clones from the registry), so prediction and update
    /// mutate locally and the results travel to MANAGE in the batch.
    pub fn associate(&self, mut tracks: Vec<Track>, batch: &ClusterBatch) -> UpdateBatch {
        let repairs = AtomicU64::new(0);

        // Step 1: predict to the batch epoch
        let predict_one = |track: &mut Track| {
            let dt = batch.timestamp.seconds_since(track.last_update);
            if dt > 0.0 {
                let fixed = self.bank.predict(&mut track.imm, dt);
                if fixed > 0 {
                    repairs.fetch_add(fixed as u64, Ordering::Relaxed);
                }
                track.refresh_fused();
            }
        };
        if tracks.len() >= self.parallel_threshold {
            tracks.par_iter_mut().for_each(predict_one);
        } else {
            tracks.iter_mut().for_each(predict_one);
        }

        // Step 2: gating, one edge list per track, deterministic traversal
        let gate_track = |(track_idx, track): (usize, &Track)| {
            let mut edges = Vec::new();
            for cluster in &batch.clusters {
                let result =
                    gate(&track.imm.fused_state, &track.imm.fused_cov, cluster, &self.gate_params);
                if result.repaired {
                    repairs.fetch_add(1, Ordering::Relaxed);
                }
                if result.passes {
                    edges.push((track_idx, cluster.id.0 as usize, result.d2));
                }
            }
            edges
        };
        let per_track_edges: Vec<Vec<(usize, usize, f64)>> = if tracks.len()
            >= self.parallel_threshold
        {
            tracks.par_iter().enumerate().map(gate_track).collect()
        } else {
            tracks.iter().enumerate().map(gate_track).collect()
        };

        let mut graph = BipartiteGraph::new(tracks.len(), batch.clusters.len());
        for edges in per_track_edges {
            for (t, c, d2) in edges {
                graph.add_edge(t, c, d2);
            }
        }

        // Steps 3–4: independent components, solved in parallel when many
        let use_greedy = self.algorithm == AssignmentAlgorithm::Greedy
            || tracks.len() > self.greedy_fallback
            || batch.clusters.len() > self.greedy_fallback;
        let components = partition_components(&graph);
        let solve = |comp: &crate::association::Component| -> Assignment {
            if use_greedy {
                greedy_solve(comp)
            } else {
                hungarian_solve(comp, self.dummy_cost)
            }
        };
        let assignments: Vec<Assignment> = if components.len() >= self.parallel_threshold {
            components.par_iter().map(solve).collect()
        } else {
            components.iter().map(solve).collect()
        };

        let mut matched_tracks = vec![false; tracks.len()];
        let mut matched_clusters = vec![false; batch.clusters.len()];
        let mut pairs: Vec<(usize, usize)> = Vec::new();
        for assignment in &assignments {
            for &(t, c) in &assignment.pairs {
                matched_tracks[t] = true;
                matched_clusters[c] = true;
                pairs.push((t, c));
            }
        }
        pairs.sort_unstable();

        // Step 5: IMM update per matched pair; rejections fall back to miss
        let mut updated = Vec::with_capacity(pairs.len());
        let mut rejected_updates = 0;
        for (t, c) in pairs {
            let cluster = &batch.clusters[c];
            match self.bank.update(&mut tracks[t].imm, cluster) {
                Ok(outcome) => {
                    if outcome.repairs > 0 {
                        repairs.fetch_add(outcome.repairs as u64, Ordering::Relaxed);
                    }
                    tracks[t].refresh_fused();
                    updated.push(TrackUpdate {
                        id: tracks[t].id,
                        bundle: tracks[t].imm.clone(),
                        cluster_snr_db: cluster.mean_snr_db,
                    });
                }
                Err(err) => {
                    // Never apply an invalid update: the track coasts on its
                    // prediction and the cluster is consumed without a birth
                    warn!(track = %tracks[t].id, %err, "rejected numerically invalid update");
                    matched_tracks[t] = false;
                    rejected_updates += 1;
                }
            }
        }

        let missed = tracks
            .iter()
            .enumerate()
            .filter(|(i, _)| !matched_tracks[*i])
            .map(|(_, track)| MissedTrack { id: track.id, bundle: track.imm.clone() })
            .collect();

        let unassociated: Vec<Cluster> = batch
            .clusters
            .iter()
            .filter(|c| !matched_clusters[c.id.0 as usize])
            .cloned()
            .collect();

        UpdateBatch {
            seq: batch.seq,
            timestamp: batch.timestamp,
            updated,
            missed,
            unassociated,
            repairs: repairs.into_inner(),
            rejected_updates,
        }
    }
}

// ---------------------------------------------------------------------------
// Synchronous tracker
// ---------------------------------------------------------------------------

/// Output of one synchronous tracking cycle.
#[derive(Clone, Debug)]
pub struct TrackerOutput {
    pub snapshot: TrackSnapshot,
    pub beam_requests: Vec<BeamRequest>,
    pub clusters: usize,
    pub births: u32,
    pub confirmations: u32,
    pub terminations: u32,
}

/// CLUSTER → ASSOCIATE+UPDATE → MANAGE in one call, sharing the stage
/// engines with the threaded pipeline.
pub struct Tracker {
    clusterer: DbscanClusterer,
    associator: Associator,
    manager: TrackManager,
    registry: Arc<TrackRegistry>,
    stats: Arc<SystemStats>,
    health: HealthMonitor,
    processing_timeout_ms: u64,
}

impl Tracker {
    pub fn new(config: &SystemConfig) -> Result<Self, ConfigError> {
        Self::with_shared(config, Arc::new(TrackRegistry::new()), Arc::new(SystemStats::new()))
    }

    /// Build on externally shared registry/stats (used by the threaded
    /// pipeline and by tests that inspect both sides).
    pub fn with_shared(
        config: &SystemConfig,
        registry: Arc<TrackRegistry>,
        stats: Arc<SystemStats>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let clusterer = DbscanClusterer::new(
            config.algorithms.clustering.clone(),
            config.processing.batch_parallel_threshold,
        );
        let associator = Associator::new(config)?;
        let manager = TrackManager::new(
            config.track_management.clone(),
            config.output.clone(),
            config.system.tracking_mode,
            config.system.max_tracks,
        );
        Ok(Self {
            clusterer,
            associator,
            manager,
            registry,
            stats,
            health: HealthMonitor::new(),
            processing_timeout_ms: config.processing.processing_timeout_ms,
        })
    }

    pub fn registry(&self) -> &Arc<TrackRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<SystemStats> {
        &self.stats
    }

    /// Process one detection batch end to end. An empty batch is one
    /// prediction-only MANAGE tick — the caller supplies its epoch via
    /// `batch.timestamp`.
    pub fn process(&mut self, batch: &DetectionBatch) -> TrackerOutput {
        let started = Instant::now();
        let stats = &self.stats;
        stats.add(&stats.detections_processed, batch.detections.len() as u64);

        let outcome = self.clusterer.cluster(&batch.detections);
        stats.add(&stats.clusters_formed, outcome.clusters.len() as u64);
        stats.add(&stats.noise_detections, outcome.noise as u64);
        stats.add(&stats.detections_dropped_low_snr, outcome.dropped_low_snr as u64);

        let cluster_batch = ClusterBatch {
            seq: batch.seq,
            timestamp: batch.timestamp,
            clusters: outcome.clusters,
            noise: outcome.noise,
            dropped_low_snr: outcome.dropped_low_snr,
        };
        let n_clusters = cluster_batch.clusters.len();

        let update_batch =
            self.associator.associate(self.registry.active_tracks(), &cluster_batch);
        stats.add(&stats.updates_applied, update_batch.updated.len() as u64);
        stats.add(&stats.updates_rejected, update_batch.rejected_updates as u64);
        stats.add(&stats.covariance_repairs, update_batch.repairs);

        let manage = self.manager.apply(&self.registry, self.associator.bank(), &update_batch);
        stats.add(&stats.tracks_created, manage.births as u64);
        stats.add(&stats.tracks_confirmed, manage.confirmations as u64);
        stats.add(&stats.tracks_terminated, manage.terminations as u64);
        stats.add(&stats.tracks_evicted, manage.evictions as u64);
        stats.add(&stats.cues_emitted, manage.beam_requests.len() as u64);

        let health = self.health.evaluate(stats);
        let snapshot = self.manager.finish_cycle(&self.registry, batch.seq, batch.timestamp, health);
        stats.add(&stats.snapshots_published, 1);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms > self.processing_timeout_ms {
            stats.add(&stats.latency_budget_exceeded, 1);
            warn!(seq = batch.seq, elapsed_ms, budget_ms = self.processing_timeout_ms,
                "latency budget exceeded");
        }

        TrackerOutput {
            snapshot,
            beam_requests: manage.beam_requests,
            clusters: n_clusters,
            births: manage.births,
            confirmations: manage.confirmations,
            terminations: manage.terminations,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BeamId, Detection, DetectionId, Timestamp, TrackState};
    use nalgebra::Vector3;

    fn detection(id: u64, secs: f64, x: f64, y: f64) -> Detection {
        let position = Vector3::new(x, y, 1000.0);
        Detection {
            id: DetectionId(id),
            timestamp: Timestamp::from_secs_f64(secs),
            position,
            velocity: None,
            range: position.norm(),
            azimuth: y.atan2(x),
            elevation: 0.1,
            snr_db: 25.0,
            rcs: 2.0,
            beam_id: BeamId(0),
        }
    }

    /// A little cloud of returns around each target position, so DBSCAN
    /// (min_points = 2) forms one cluster per target.
    fn batch(seq: u64, secs: f64, targets: &[(f64, f64)]) -> DetectionBatch {
        let mut detections = Vec::new();
        let mut id = seq * 1000;
        for &(x, y) in targets {
            for (dx, dy) in [(0.0, 0.0), (8.0, 3.0), (-5.0, 6.0)] {
                detections.push(detection(id, secs, x + dx, y + dy));
                id += 1;
            }
        }
        DetectionBatch::new(seq, detections)
    }

    #[test]
    fn births_then_continuous_tracking_without_duplicates() {
        let mut tracker = Tracker::new(&SystemConfig::default()).unwrap();

        let out = tracker.process(&batch(0, 0.0, &[(10_000.0, 0.0), (0.0, 20_000.0)]));
        assert_eq!(out.births, 2);

        // Subsequent batches update the same two tracks instead of spawning
        for step in 1..6u64 {
            let t = step as f64 * 0.1;
            let out = tracker.process(&batch(
                step,
                t,
                &[(10_000.0 + 100.0 * t, 0.0), (0.0, 20_000.0 - 80.0 * t)],
            ));
            assert_eq!(out.births, 0, "step {step} must not birth");
        }
        assert_eq!(tracker.registry().len(), 2);
        assert!(tracker
            .registry()
            .active_tracks()
            .iter()
            .all(|t| t.state == TrackState::Confirmed));
    }

    #[test]
    fn empty_batch_is_a_prediction_only_tick() {
        let mut tracker = Tracker::new(&SystemConfig::default()).unwrap();
        tracker.process(&batch(0, 0.0, &[(5000.0, 0.0)]));
        let before = tracker.registry().active_tracks()[0].clone();

        let empty = DetectionBatch { seq: 1, timestamp: Timestamp::from_secs_f64(0.1), detections: vec![] };
        let out = tracker.process(&empty);
        assert_eq!(out.clusters, 0);
        assert_eq!(out.births, 0);
        let after = tracker.registry().active_tracks()[0].clone();
        assert_eq!(after.id, before.id);
        assert_eq!(after.consecutive_misses, 1);
        // Prediction ran: uncertainty grew, no covariance reduction
        assert!(after.imm.fused_cov[(0, 0)] >= before.imm.fused_cov[(0, 0)]);
    }

    #[test]
    fn pairing_counts_respect_cardinality() {
        let mut tracker = Tracker::new(&SystemConfig::default()).unwrap();
        tracker.process(&batch(0, 0.0, &[(10_000.0, 0.0), (0.0, 20_000.0)]));

        // Three clusters against two tracks: at most two pairings, the
        // third cluster births
        let out = tracker.process(&batch(1, 0.1, &[
            (10_000.0, 0.0),
            (0.0, 20_000.0),
            (40_000.0, 40_000.0),
        ]));
        assert_eq!(out.births, 1);
        assert_eq!(tracker.registry().len(), 3);
    }

    #[test]
    fn coincident_clusters_yield_one_valid_assignment() {
        let mut tracker = Tracker::new(&SystemConfig::default()).unwrap();
        // Two coincident targets collapse into one cluster → one track
        let out = tracker.process(&batch(0, 0.0, &[(8000.0, 8000.0), (8000.0, 8000.0)]));
        assert_eq!(out.births, 1);
        let out = tracker.process(&batch(1, 0.1, &[(8000.0, 8000.0)]));
        assert_eq!(out.births, 0);
        assert_eq!(tracker.registry().len(), 1);
    }

    #[test]
    fn stats_accumulate_across_batches() {
        let mut tracker = Tracker::new(&SystemConfig::default()).unwrap();
        tracker.process(&batch(0, 0.0, &[(10_000.0, 0.0)]));
        tracker.process(&batch(1, 0.1, &[(10_010.0, 0.0)]));
        let report = tracker.stats().report();
        assert_eq!(report.detections_processed, 6);
        assert_eq!(report.clusters_formed, 2);
        assert_eq!(report.tracks_created, 1);
        assert_eq!(report.snapshots_published, 2);
    }
}
