//! Track lifecycle management: birth, confirmation, coasting, termination,
//! capacity eviction, quality scoring and cue generation.
//!
//! MANAGE is the single writer of the registry. ASSOCIATE+UPDATE hands it an
//! [`UpdateBatch`] of new estimator bundles; this module applies the state
//! machine:
//!
//! | from      | event | to                       |
//! |-----------|-------|--------------------------|
//! | —         | unassociated cluster | TENTATIVE (birth) |
//! | TENTATIVE | hit   | CONFIRMED at `confirmation_threshold` consecutive hits |
//! | TENTATIVE | miss  | TERMINATED at `deletion_threshold` consecutive misses |
//! | CONFIRMED | miss  | COASTING (TERMINATED past the coast deadline) |
//! | COASTING  | hit   | CONFIRMED |
//! | COASTING  | miss  | TERMINATED past `max_coast_time_sec` or below `quality_threshold` |
//! | any       | capacity overflow | TERMINATED (worst quality evicted) |

use crate::config::{OutputConfig, TrackManagementConfig};
use crate::imm::{ImmBundle, ImmFilterBank};
use crate::registry::{TrackRegistry, TrackSnapshot};
use crate::track::Track;
use crate::types::{
    BeamRequest, Cluster, HealthStatus, Timestamp, TrackId, TrackState, TrackingMode,
};
use tracing::debug;

/// One applied (track, cluster) filter update.
#[derive(Clone, Debug)]
pub struct TrackUpdate {
    pub id: TrackId,
    /// Post-update estimator bundle
    pub bundle: ImmBundle,
    /// Mean SNR of the associated cluster (dB)
    pub cluster_snr_db: f64,
}

/// Prediction-only result for a track that received no assignment.
#[derive(Clone, Debug)]
pub struct MissedTrack {
    pub id: TrackId,
    /// Predicted bundle; no covariance reduction was applied
    pub bundle: ImmBundle,
}

/// Everything ASSOCIATE+UPDATE emits for one batch.
#[derive(Clone, Debug, Default)]
pub struct UpdateBatch {
    pub seq: u64,
    pub timestamp: Timestamp,
    pub updated: Vec<TrackUpdate>,
    pub missed: Vec<MissedTrack>,
    /// Clusters that received no assignment: birth candidates
    pub unassociated: Vec<Cluster>,
    /// Covariance repairs performed while gating and updating
    pub repairs: u64,
    /// Pairings rejected because the update was numerically invalid
    pub rejected_updates: u32,
}

/// Counters for one MANAGE cycle.
#[derive(Clone, Debug, Default)]
pub struct ManageOutcome {
    pub births: u32,
    pub confirmations: u32,
    pub terminations: u32,
    pub evictions: u32,
    pub beam_requests: Vec<BeamRequest>,
}

/// The MANAGE stage engine.
pub struct TrackManager {
    config: TrackManagementConfig,
    output: OutputConfig,
    mode: TrackingMode,
    max_tracks: usize,
    next_id: u64,
}

impl TrackManager {
    pub fn new(
        config: TrackManagementConfig,
        output: OutputConfig,
        mode: TrackingMode,
        max_tracks: usize,
    ) -> Self {
        Self { config, output, mode, max_tracks, next_id: 0 }
    }

    /// Track ids are strictly increasing and never reused.
    fn next_track_id(&mut self) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Apply one update batch to the registry and run the state machine.
    pub fn apply(
        &mut self,
        registry: &TrackRegistry,
        bank: &ImmFilterBank,
        batch: &UpdateBatch,
    ) -> ManageOutcome {
        let now = batch.timestamp;
        let mut outcome = ManageOutcome::default();

        for update in &batch.updated {
            let mut confirmed = false;
            registry.update(update.id, |track| {
                confirmed = register_hit(track, &self.config, update, now);
            });
            if confirmed {
                outcome.confirmations += 1;
            }
        }

        for missed in &batch.missed {
            let mut terminated = false;
            registry.update(missed.id, |track| {
                terminated = register_miss(track, &self.config, &missed.bundle, now);
            });
            if terminated {
                outcome.terminations += 1;
            }
        }

        for cluster in &batch.unassociated {
            let id = self.next_track_id();
            let mut track =
                Track::new(id, bank.init_bundle(cluster), now, cluster.mean_snr_db, cluster.beam_id);
            track.quality = quality_score(&track, now);
            registry.register(track);
            outcome.births += 1;
        }

        outcome.evictions = self.evict_overflow(registry, now);
        outcome.terminations += outcome.evictions;

        if self.mode == TrackingMode::BeamRequest {
            outcome.beam_requests = self.cue_confirmed(registry, now);
        }

        debug!(
            seq = batch.seq,
            births = outcome.births,
            confirmations = outcome.confirmations,
            terminations = outcome.terminations,
            "manage cycle applied"
        );
        outcome
    }

    /// Export the snapshot for PUBLISH, then destroy the tombstones it
    /// carries. Ordering matters: a terminated track is observed by exactly
    /// one snapshot before it is gone.
    pub fn finish_cycle(
        &self,
        registry: &TrackRegistry,
        seq: u64,
        timestamp: Timestamp,
        health: HealthStatus,
    ) -> TrackSnapshot {
        let snapshot = registry.snapshot(seq, timestamp, health);
        registry.collect_terminated();
        snapshot
    }

    /// Evict worst-quality tracks while over capacity. Ties break on
    /// earliest creation.
    fn evict_overflow(&self, registry: &TrackRegistry, now: Timestamp) -> u32 {
        let mut evicted = 0;
        while registry.active_count() > self.max_tracks {
            let candidates = registry.active_tracks();
            let worst = candidates
                .iter()
                .min_by(|a, b| {
                    a.quality.total_cmp(&b.quality).then(a.created_at.cmp(&b.created_at))
                })
                .map(|t| t.id);
            let Some(id) = worst else { break };
            registry.update(id, |track| track.state = TrackState::Terminated);
            debug!(track = %id, at = now.as_secs_f64(), "evicted for capacity");
            evicted += 1;
        }
        evicted
    }

    /// Beam requests for confirmed tracks, rate-limited per track. The
    /// cue points at the predicted position one cue interval ahead.
    fn cue_confirmed(&self, registry: &TrackRegistry, now: Timestamp) -> Vec<BeamRequest> {
        let interval = 1.0 / self.output.max_cue_rate_hz;
        let mut requests = Vec::new();
        for track in registry.active_tracks() {
            if track.state != TrackState::Confirmed {
                continue;
            }
            if let Some(last) = track.last_cue {
                if now.seconds_since(last) < interval {
                    continue;
                }
            }
            let ahead = track.position + track.velocity * interval;
            let ground = (ahead.x * ahead.x + ahead.y * ahead.y).sqrt();
            requests.push(BeamRequest {
                beam_id: track.beam_id,
                azimuth: ahead.y.atan2(ahead.x),
                elevation: ahead.z.atan2(ground),
                dwell_time_ms: self.output.dwell_time_ms,
                track_id: track.id,
                requested_at: now,
            });
            registry.update(track.id, |t| t.last_cue = Some(now));
        }
        requests
    }
}

// ---------------------------------------------------------------------------
// State machine pieces
// ---------------------------------------------------------------------------

/// Apply a hit. Returns true when this hit promoted the track to CONFIRMED.
fn register_hit(
    track: &mut Track,
    config: &TrackManagementConfig,
    update: &TrackUpdate,
    now: Timestamp,
) -> bool {
    track.imm = update.bundle.clone();
    track.refresh_fused();
    track.consecutive_misses = 0;
    track.consecutive_hits += 1;
    track.total_hits += 1;
    track.last_hit = now;
    track.last_update = now;
    track.record_snr(update.cluster_snr_db);
    track.push_history(now);

    let mut promoted = false;
    match track.state {
        TrackState::Tentative if track.consecutive_hits >= config.confirmation_threshold => {
            track.state = TrackState::Confirmed;
            promoted = true;
        }
        TrackState::Coasting => {
            track.state = TrackState::Confirmed;
        }
        _ => {}
    }
    track.quality = quality_score(track, now);
    promoted
}

/// Apply a miss (prediction only). Returns true when the track terminated.
fn register_miss(
    track: &mut Track,
    config: &TrackManagementConfig,
    predicted: &ImmBundle,
    now: Timestamp,
) -> bool {
    track.imm = predicted.clone();
    track.refresh_fused();
    track.consecutive_hits = 0;
    track.consecutive_misses += 1;
    track.total_misses += 1;
    track.last_update = now;
    track.push_history(now);

    let coasted = track.coast_secs(now);
    track.quality = quality_score(track, now);
    if track.state == TrackState::Coasting {
        track.quality *= (-coasted / config.coast_decay_tau_sec).exp();
    }
    match track.state {
        TrackState::Tentative => {
            if track.consecutive_misses >= config.deletion_threshold {
                track.state = TrackState::Terminated;
            }
        }
        TrackState::Confirmed => {
            if coasted < config.max_coast_time_sec {
                track.state = TrackState::Coasting;
            } else {
                track.state = TrackState::Terminated;
            }
        }
        TrackState::Coasting => {
            if coasted >= config.max_coast_time_sec || track.quality < config.quality_threshold {
                track.state = TrackState::Terminated;
            }
        }
        TrackState::Terminated => {}
    }
    track.state == TrackState::Terminated
}

/// q = 0.5·hit_ratio + 0.3·snr_ratio + 0.2·age_bonus.
/// The age bonus rises logarithmically, saturating after a minute.
fn quality_score(track: &Track, now: Timestamp) -> f64 {
    let hit_ratio = track.hit_ratio();
    let snr_ratio = (track.avg_snr_db / 30.0).clamp(0.0, 1.0);
    let age_bonus = ((1.0 + track.age_secs(now)).ln() / (1.0 + 60.0f64).ln()).clamp(0.0, 1.0);
    (0.5 * hit_ratio + 0.3 * snr_ratio + 0.2 * age_bonus).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
