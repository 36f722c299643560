//! Shared track registry: the only globally shared mutable state in the
//! pipeline.
//!
//! Single-writer discipline: MANAGE alone calls the mutating methods;
//! ASSOCIATE+UPDATE reads live tracks under the reader lock and PUBLISH
//! consumes deep-copy snapshots, so no observer ever sees a
//! partially-updated track.

use crate::track::Track;
use crate::types::{HealthStatus, Timestamp, TrackId, TrackState};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Immutable deep copy of the active track set, id-sorted so repeated
/// exports without pipeline activity are bit-identical.
#[derive(Clone, Debug)]
pub struct TrackSnapshot {
    /// Sequence number of the batch that produced this snapshot
    pub seq: u64,
    pub timestamp: Timestamp,
    pub health: HealthStatus,
    pub tracks: Vec<Track>,
}

/// Owns all live tracks, keyed by id.
#[derive(Default)]
pub struct TrackRegistry {
    tracks: RwLock<HashMap<TrackId, Track>>,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newborn track. Returns its id.
    pub fn register(&self, track: Track) -> TrackId {
        let id = track.id;
        self.tracks.write().insert(id, track);
        id
    }

    /// Apply a mutation to one track. Returns false when the id is gone.
    pub fn update<F: FnOnce(&mut Track)>(&self, id: TrackId, mutate: F) -> bool {
        match self.tracks.write().get_mut(&id) {
            Some(track) => {
                mutate(track);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: TrackId) -> Option<Track> {
        self.tracks.write().remove(&id)
    }

    /// Deep copies of every non-terminated track, id-sorted. This is what
    /// ASSOCIATE+UPDATE gates against.
    pub fn active_tracks(&self) -> Vec<Track> {
        let guard = self.tracks.read();
        let mut tracks: Vec<Track> =
            guard.values().filter(|t| t.is_active()).cloned().collect();
        tracks.sort_by_key(|t| t.id);
        tracks
    }

    /// Deep copy of the whole set — terminated tombstones included, so each
    /// appears in exactly one published snapshot before garbage collection.
    pub fn snapshot(&self, seq: u64, timestamp: Timestamp, health: HealthStatus) -> TrackSnapshot {
        let guard = self.tracks.read();
        let mut tracks: Vec<Track> = guard.values().cloned().collect();
        tracks.sort_by_key(|t| t.id);
        TrackSnapshot { seq, timestamp, health, tracks }
    }

    /// Drop every terminated track. Called after its tombstone snapshot has
    /// been exported. Returns the number destroyed.
    pub fn collect_terminated(&self) -> usize {
        let mut guard = self.tracks.write();
        let before = guard.len();
        guard.retain(|_, t| t.state != TrackState::Terminated);
        before - guard.len()
    }

    /// Number of non-terminated tracks.
    pub fn active_count(&self) -> usize {
        self.tracks.read().values().filter(|t| t.is_active()).count()
    }

    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.read().is_empty()
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
    use crate::types::{BeamId, Cluster, ClusterId};
    use nalgebra::{Matrix3, Vector3};

    fn track(id: u64) -> Track {
        let bank = ImmFilterBank::from_config(&TrackingConfig::default()).unwrap();
        let cluster = Cluster {
            id: ClusterId(0),
            centroid: Vector3::new(id as f64, 0.0, 0.0),
            velocity: None,
            position_cov: Matrix3::identity(),
            confidence: 0.5,
            mean_snr_db: 20.0,
            members: vec![],
            beam_id: BeamId(0),
        };
        Track::new(TrackId(id), bank.init_bundle(&cluster), Timestamp(0), 20.0, BeamId(0))
    }

    #[test]
    fn register_update_remove_round_trip() {
        let registry = TrackRegistry::new();
        let id = registry.register(track(1));
        assert_eq!(registry.len(), 1);
        assert!(registry.update(id, |t| t.state = TrackState::Confirmed));
        assert_eq!(registry.active_tracks()[0].state, TrackState::Confirmed);
        assert!(registry.remove(id).is_some());
        assert!(!registry.update(id, |t| t.state = TrackState::Coasting));
    }

    #[test]
    fn snapshot_includes_tombstones_active_tracks_does_not() {
        let registry = TrackRegistry::new();
        registry.register(track(1));
        let dead = registry.register(track(2));
        registry.update(dead, |t| t.state = TrackState::Terminated);

        assert_eq!(registry.active_tracks().len(), 1);
        let snap = registry.snapshot(0, Timestamp(0), HealthStatus::Nominal);
        assert_eq!(snap.tracks.len(), 2);

        assert_eq!(registry.collect_terminated(), 1);
        let after = registry.snapshot(1, Timestamp(0), HealthStatus::Nominal);
        assert_eq!(after.tracks.len(), 1);
    }

    #[test]
    fn repeated_snapshots_without_activity_are_identical() {
        let registry = TrackRegistry::new();
        for id in [3, 1, 2] {
            registry.register(track(id));
        }
        let a = registry.snapshot(0, Timestamp(5), HealthStatus::Nominal);
        let b = registry.snapshot(0, Timestamp(5), HealthStatus::Nominal);
        let ids_a: Vec<u64> = a.tracks.iter().map(|t| t.id.0).collect();
        let ids_b: Vec<u64> = b.tracks.iter().map(|t| t.id.0).collect();
        assert_eq!(ids_a, vec![1, 2, 3]);
        assert_eq!(ids_a, ids_b);
        for (x, y) in a.tracks.iter().zip(&b.tracks) {
            assert_eq!(x.imm.fused_state, y.imm.fused_state);
            assert_eq!(x.quality.to_bits(), y.quality.to_bits());
        }
    }
}
