//! Monotonic pipeline counters and health derivation.
//!
//! Counters are lock-free atomics bumped by whichever stage observes the
//! event; the health monitor periodically samples them and flips the
//! published status to DEGRADED while backpressure drops are occurring.

use crate::types::HealthStatus;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

#[derive(Debug, Default)]
pub struct SystemStats {
    pub frames_received: AtomicU64,
    pub frames_decoded: AtomicU64,
    pub decode_errors: AtomicU64,
    pub detections_processed: AtomicU64,
    pub detections_dropped_low_snr: AtomicU64,
    pub clusters_formed: AtomicU64,
    pub noise_detections: AtomicU64,
    pub tracks_created: AtomicU64,
    pub tracks_confirmed: AtomicU64,
    pub tracks_terminated: AtomicU64,
    pub tracks_evicted: AtomicU64,
    pub updates_applied: AtomicU64,
    pub updates_rejected: AtomicU64,
    pub covariance_repairs: AtomicU64,
    /// Batches dropped by backpressure (oldest-first)
    pub batches_dropped: AtomicU64,
    /// Cue requests refused by a full cue channel
    pub cues_dropped: AtomicU64,
    pub cues_emitted: AtomicU64,
    pub snapshots_published: AtomicU64,
    /// Soft per-stage deadline overruns
    pub latency_budget_exceeded: AtomicU64,
    health: AtomicU8,
}

/// Point-in-time copy of every counter, for logging and the CLI.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct StatsReport {
    pub frames_received: u64,
    pub frames_decoded: u64,
    pub decode_errors: u64,
    pub detections_processed: u64,
    pub detections_dropped_low_snr: u64,
    pub clusters_formed: u64,
    pub noise_detections: u64,
    pub tracks_created: u64,
    pub tracks_confirmed: u64,
    pub tracks_terminated: u64,
    pub tracks_evicted: u64,
    pub updates_applied: u64,
    pub updates_rejected: u64,
    pub covariance_repairs: u64,
    pub batches_dropped: u64,
    pub cues_dropped: u64,
    pub cues_emitted: u64,
    pub snapshots_published: u64,
    pub latency_budget_exceeded: u64,
}

impl SystemStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn health(&self) -> HealthStatus {
        match self.health.load(Ordering::Relaxed) {
            0 => HealthStatus::Nominal,
            _ => HealthStatus::Degraded,
        }
    }

    pub fn set_health(&self, health: HealthStatus) {
        let value = match health {
            HealthStatus::Nominal => 0,
            HealthStatus::Degraded => 1,
        };
        self.health.store(value, Ordering::Relaxed);
    }

    pub fn report(&self) -> StatsReport {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsReport {
            frames_received: get(&self.frames_received),
            frames_decoded: get(&self.frames_decoded),
            decode_errors: get(&self.decode_errors),
            detections_processed: get(&self.detections_processed),
            detections_dropped_low_snr: get(&self.detections_dropped_low_snr),
            clusters_formed: get(&self.clusters_formed),
            noise_detections: get(&self.noise_detections),
            tracks_created: get(&self.tracks_created),
            tracks_confirmed: get(&self.tracks_confirmed),
            tracks_terminated: get(&self.tracks_terminated),
            tracks_evicted: get(&self.tracks_evicted),
            updates_applied: get(&self.updates_applied),
            updates_rejected: get(&self.updates_rejected),
            covariance_repairs: get(&self.covariance_repairs),
            batches_dropped: get(&self.batches_dropped),
            cues_dropped: get(&self.cues_dropped),
            cues_emitted: get(&self.cues_emitted),
            snapshots_published: get(&self.snapshots_published),
            latency_budget_exceeded: get(&self.latency_budget_exceeded),
        }
    }
}

/// Flips system health based on backpressure activity between samples.
/// DEGRADED while batches are being dropped; back to NOMINAL after one
/// clean interval.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    last_dropped: u64,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample the counters and update the published health status.
    pub fn evaluate(&mut self, stats: &SystemStats) -> HealthStatus {
        let dropped = stats.batches_dropped.load(Ordering::Relaxed);
        let health = if dropped > self.last_dropped {
            HealthStatus::Degraded
        } else {
            HealthStatus::Nominal
        };
        self.last_dropped = dropped;
        stats.set_health(health);
        health
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_report() {
        let stats = SystemStats::new();
        stats.add(&stats.frames_received, 3);
        stats.add(&stats.frames_received, 2);
        stats.add(&stats.decode_errors, 1);
        let report = stats.report();
        assert_eq!(report.frames_received, 5);
        assert_eq!(report.decode_errors, 1);
        assert_eq!(report.tracks_created, 0);
    }

    #[test]
    fn health_degrades_on_drops_and_recovers_after_clean_window() {
        let stats = SystemStats::new();
        let mut monitor = HealthMonitor::new();
        assert_eq!(monitor.evaluate(&stats), HealthStatus::Nominal);

        stats.add(&stats.batches_dropped, 1);
        assert_eq!(monitor.evaluate(&stats), HealthStatus::Degraded);
        assert_eq!(stats.health(), HealthStatus::Degraded);

        // No further drops → recovers
        assert_eq!(monitor.evaluate(&stats), HealthStatus::Nominal);
        assert_eq!(stats.health(), HealthStatus::Nominal);
    }
}
