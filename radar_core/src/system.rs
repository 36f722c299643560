//! The threaded five-stage pipeline.
//!
//! DECODE → CLUSTER → ASSOCIATE+UPDATE → MANAGE → PUBLISH, one dedicated
//! thread per stage, joined by bounded queues. The ingestion callback
//! [`RadarSystem::on_frame`] deposits raw frames from any thread at bounded
//! cost; a health thread samples the counters.
//!
//! The only suspension points are queue waits and the registry lock, per
//! the shared-resource policy: MANAGE is the sole registry writer,
//! ASSOCIATE+UPDATE reads live tracks, PUBLISH consumes deep snapshots.
//!
//! Shutdown is cooperative: [`RadarSystem::stop`] sets the stop flag and
//! closes the head queue; each stage drains its input with a bounded
//! timeout, closes its output, and exits, cascading to the tail.

use crate::clustering::DbscanClusterer;
use crate::config::SystemConfig;
use crate::decode;
use crate::error::{ConfigError, PipelineError};
use crate::imm::ImmFilterBank;
use crate::manager::{TrackManager, UpdateBatch};
use crate::output::OutputAdapter;
use crate::queue::{BoundedQueue, PopOutcome, PushOutcome};
use crate::registry::{TrackRegistry, TrackSnapshot};
use crate::stats::{HealthMonitor, SystemStats};
use crate::tracker::Associator;
use crate::types::{BeamRequest, ClusterBatch, DetectionBatch};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shutdown must complete within this budget; beyond it the supervisor
/// logs the overrun (threads cannot be force-killed safely).
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(30);

/// The radar tracking system orchestrator.
pub struct RadarSystem {
    config: Arc<SystemConfig>,
    registry: Arc<TrackRegistry>,
    stats: Arc<SystemStats>,
    frames: Arc<BoundedQueue<Vec<u8>>>,
    detections: Arc<BoundedQueue<DetectionBatch>>,
    cues: Arc<BoundedQueue<BeamRequest>>,
    seq: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl RadarSystem {
    pub fn new(config: SystemConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity = config.processing.queue_size_limit;
        let cue_capacity = config.output.cue_queue_capacity;
        if config.processing.thread_pool_size > 0 {
            // Best-effort: the global pool may already be initialised
            let _ = rayon::ThreadPoolBuilder::new()
                .num_threads(config.processing.thread_pool_size)
                .build_global();
        }
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(TrackRegistry::new()),
            stats: Arc::new(SystemStats::new()),
            frames: Arc::new(BoundedQueue::new("frames", capacity)),
            detections: Arc::new(BoundedQueue::new("detections", capacity)),
            cues: Arc::new(BoundedQueue::new("cues", cue_capacity)),
            seq: Arc::new(AtomicU64::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        })
    }

    pub fn registry(&self) -> &Arc<TrackRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<SystemStats> {
        &self.stats
    }

    /// Pop one pending beam request, if any (Beam-Request mode).
    pub fn try_next_cue(&self) -> Option<BeamRequest> {
        self.cues.try_pop()
    }

    /// Ingestion callback: enqueue one complete frame. Callable from any
    /// thread; blocks at most the backpressure timeout.
    pub fn on_frame(&self, payload: &[u8]) -> Result<(), PipelineError> {
        self.stats.add(&self.stats.frames_received, 1);
        if payload.len() > self.config.communication.max_frame_bytes {
            self.stats.add(&self.stats.decode_errors, 1);
            warn!(len = payload.len(), "oversized frame dropped");
            return Ok(());
        }
        match self.frames.push(payload.to_vec(), self.backpressure()) {
            Some(PushOutcome::Pushed) => Ok(()),
            Some(PushOutcome::DroppedOldest) => {
                self.stats.add(&self.stats.batches_dropped, 1);
                Ok(())
            }
            None => Err(PipelineError::Shutdown),
        }
    }

    /// Test hook: inject already-decoded detections, bypassing DECODE.
    pub fn inject_detections(
        &self,
        detections: Vec<crate::types::Detection>,
    ) -> Result<(), PipelineError> {
        let batch = DetectionBatch::new(self.seq.fetch_add(1, Ordering::Relaxed), detections);
        match self.detections.push(batch, self.backpressure()) {
            Some(PushOutcome::Pushed) => Ok(()),
            Some(PushOutcome::DroppedOldest) => {
                self.stats.add(&self.stats.batches_dropped, 1);
                Ok(())
            }
            None => Err(PipelineError::Shutdown),
        }
    }

    fn backpressure(&self) -> Duration {
        Duration::from_millis(self.config.processing.backpressure_timeout_ms)
    }

    /// Spawn all stage threads. Call once.
    pub fn start(
        &mut self,
        adapters: Vec<Box<dyn OutputAdapter>>,
    ) -> Result<(), PipelineError> {
        if !self.handles.is_empty() {
            return Ok(());
        }
        let config = Arc::clone(&self.config);
        let capacity = config.processing.queue_size_limit;
        let clusters: Arc<BoundedQueue<ClusterBatch>> =
            Arc::new(BoundedQueue::new("clusters", capacity));
        let updates: Arc<BoundedQueue<UpdateBatch>> =
            Arc::new(BoundedQueue::new("updates", capacity));
        let snapshots: Arc<BoundedQueue<TrackSnapshot>> =
            Arc::new(BoundedQueue::new("snapshots", capacity));

        let clusterer = DbscanClusterer::new(
            config.algorithms.clustering.clone(),
            config.processing.batch_parallel_threshold,
        );
        let associator = Associator::new(&config)?;
        let bank = associator.bank().clone();
        let manager = TrackManager::new(
            config.track_management.clone(),
            config.output.clone(),
            config.system.tracking_mode,
            config.system.max_tracks,
        );

        let timing = StageTiming {
            drain: Duration::from_millis(config.processing.drain_timeout_ms),
            backpressure: Duration::from_millis(config.processing.backpressure_timeout_ms),
            budget_ms: config.processing.processing_timeout_ms,
        };

        self.spawn("decode", {
            let frames = Arc::clone(&self.frames);
            let out = Arc::clone(&self.detections);
            let stats = Arc::clone(&self.stats);
            let seq = Arc::clone(&self.seq);
            let stop = Arc::clone(&self.stop);
            let timing = timing.clone();
            move || decode_stage(&frames, &out, &stats, &seq, &stop, &timing)
        })?;

        self.spawn("cluster", {
            let input = Arc::clone(&self.detections);
            let out = Arc::clone(&clusters);
            let stats = Arc::clone(&self.stats);
            let stop = Arc::clone(&self.stop);
            let timing = timing.clone();
            move || cluster_stage(&input, &out, &clusterer, &stats, &stop, &timing)
        })?;

        self.spawn("associate", {
            let input = Arc::clone(&clusters);
            let out = Arc::clone(&updates);
            let registry = Arc::clone(&self.registry);
            let stats = Arc::clone(&self.stats);
            let stop = Arc::clone(&self.stop);
            let timing = timing.clone();
            move || associate_stage(&input, &out, &associator, &registry, &stats, &stop, &timing)
        })?;

        self.spawn("manage", {
            let input = Arc::clone(&updates);
            let out = Arc::clone(&snapshots);
            let cues = Arc::clone(&self.cues);
            let registry = Arc::clone(&self.registry);
            let stats = Arc::clone(&self.stats);
            let stop = Arc::clone(&self.stop);
            let timing = timing.clone();
            let mut manager = manager;
            move || {
                manage_stage(
                    &input, &out, &cues, &mut manager, &bank, &registry, &stats, &stop, &timing,
                )
            }
        })?;

        self.spawn("publish", {
            let input = Arc::clone(&snapshots);
            let stats = Arc::clone(&self.stats);
            let mut adapters = adapters;
            move || publish_stage(&input, &mut adapters, &stats)
        })?;

        self.spawn("health", {
            let stats = Arc::clone(&self.stats);
            let stop = Arc::clone(&self.stop);
            let interval = Duration::from_secs_f64(config.performance.stats_interval_sec);
            move || health_stage(&stats, &stop, interval)
        })?;

        info!(mode = ?self.config.system.tracking_mode, "radar system started");
        Ok(())
    }

    fn spawn<F>(&mut self, name: &'static str, body: F) -> Result<(), PipelineError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map_err(|e| PipelineError::SpawnFailed { name, reason: e.to_string() })?;
        self.handles.push(handle);
        Ok(())
    }

    /// Cooperative shutdown: drain every stage, then join.
    pub fn stop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        let started = Instant::now();
        self.stop.store(true, Ordering::SeqCst);
        // Close only the head queue: each stage drains its input, closes
        // its output on exit, and the shutdown cascades to the tail
        self.frames.close();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        self.cues.close();
        let elapsed = started.elapsed();
        if elapsed > SHUTDOWN_BUDGET {
            warn!(?elapsed, "shutdown exceeded its budget");
        } else {
            info!(?elapsed, "radar system stopped");
        }
    }
}

impl Drop for RadarSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Stage bodies
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct StageTiming {
    drain: Duration,
    backpressure: Duration,
    budget_ms: u64,
}

impl StageTiming {
    fn check_budget(&self, stage: &'static str, started: Instant, stats: &SystemStats) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms > self.budget_ms {
            stats.add(&stats.latency_budget_exceeded, 1);
            warn!(stage, elapsed_ms, budget_ms = self.budget_ms, "latency budget exceeded");
        }
    }
}

fn forward<T>(
    queue: &BoundedQueue<T>,
    item: T,
    timing: &StageTiming,
    stats: &SystemStats,
) -> bool {
    match queue.push(item, timing.backpressure) {
        Some(PushOutcome::Pushed) => true,
        Some(PushOutcome::DroppedOldest) => {
            stats.add(&stats.batches_dropped, 1);
            warn!(queue = queue.name(), "backpressure: dropped oldest batch");
            true
        }
        None => false,
    }
}

fn decode_stage(
    frames: &BoundedQueue<Vec<u8>>,
    out: &BoundedQueue<DetectionBatch>,
    stats: &SystemStats,
    seq: &AtomicU64,
    stop: &AtomicBool,
    timing: &StageTiming,
) {
    loop {
        match frames.pop(timing.drain) {
            PopOutcome::Item(payload) => {
                let started = Instant::now();
                match decode::decode(&payload) {
                    Ok(detections) => {
                        stats.add(&stats.frames_decoded, 1);
                        let batch =
                            DetectionBatch::new(seq.fetch_add(1, Ordering::Relaxed), detections);
                        if !forward(out, batch, timing, stats) {
                            break;
                        }
                    }
                    Err(err) => {
                        // Malformed frames fail locally and are dropped
                        stats.add(&stats.decode_errors, 1);
                        debug!(%err, "dropped malformed frame");
                    }
                }
                timing.check_budget("decode", started, stats);
            }
            PopOutcome::TimedOut => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
            }
            PopOutcome::Closed => break,
        }
    }
    out.close();
}

fn cluster_stage(
    input: &BoundedQueue<DetectionBatch>,
    out: &BoundedQueue<ClusterBatch>,
    clusterer: &DbscanClusterer,
    stats: &SystemStats,
    stop: &AtomicBool,
    timing: &StageTiming,
) {
    loop {
        match input.pop(timing.drain) {
            PopOutcome::Item(batch) => {
                let started = Instant::now();
                stats.add(&stats.detections_processed, batch.detections.len() as u64);
                let outcome = clusterer.cluster(&batch.detections);
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
                timing.check_budget("cluster", started, stats);
                if !forward(out, cluster_batch, timing, stats) {
                    break;
                }
            }
            PopOutcome::TimedOut => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
            }
            PopOutcome::Closed => break,
        }
    }
    out.close();
}

#[allow(clippy::too_many_arguments)]
fn associate_stage(
    input: &BoundedQueue<ClusterBatch>,
    out: &BoundedQueue<UpdateBatch>,
    associator: &Associator,
    registry: &TrackRegistry,
    stats: &SystemStats,
    stop: &AtomicBool,
    timing: &StageTiming,
) {
    loop {
        match input.pop(timing.drain) {
            PopOutcome::Item(batch) => {
                let started = Instant::now();
                let update_batch = associator.associate(registry.active_tracks(), &batch);
                stats.add(&stats.updates_applied, update_batch.updated.len() as u64);
                stats.add(&stats.updates_rejected, update_batch.rejected_updates as u64);
                stats.add(&stats.covariance_repairs, update_batch.repairs);
                timing.check_budget("associate", started, stats);
                if !forward(out, update_batch, timing, stats) {
                    break;
                }
            }
            PopOutcome::TimedOut => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
            }
            PopOutcome::Closed => break,
        }
    }
    out.close();
}

#[allow(clippy::too_many_arguments)]
fn manage_stage(
    input: &BoundedQueue<UpdateBatch>,
    out: &BoundedQueue<TrackSnapshot>,
    cues: &BoundedQueue<BeamRequest>,
    manager: &mut TrackManager,
    bank: &ImmFilterBank,
    registry: &TrackRegistry,
    stats: &SystemStats,
    stop: &AtomicBool,
    timing: &StageTiming,
) {
    loop {
        match input.pop(timing.drain) {
            PopOutcome::Item(batch) => {
                let started = Instant::now();
                let outcome = manager.apply(registry, bank, &batch);
                stats.add(&stats.tracks_created, outcome.births as u64);
                stats.add(&stats.tracks_confirmed, outcome.confirmations as u64);
                stats.add(&stats.tracks_terminated, outcome.terminations as u64);
                stats.add(&stats.tracks_evicted, outcome.evictions as u64);
                for cue in outcome.beam_requests {
                    if cues.try_push(cue) {
                        stats.add(&stats.cues_emitted, 1);
                    } else {
                        // The cue channel never blocks MANAGE
                        stats.add(&stats.cues_dropped, 1);
                    }
                }
                let snapshot =
                    manager.finish_cycle(registry, batch.seq, batch.timestamp, stats.health());
                timing.check_budget("manage", started, stats);
                if !forward(out, snapshot, timing, stats) {
                    break;
                }
            }
            PopOutcome::TimedOut => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
            }
            PopOutcome::Closed => break,
        }
    }
    out.close();
}

fn publish_stage(
    input: &BoundedQueue<TrackSnapshot>,
    adapters: &mut [Box<dyn OutputAdapter>],
    stats: &SystemStats,
) {
    let intervals: Vec<Duration> =
        adapters.iter().map(|a| Duration::from_secs_f64(1.0 / a.rate_hz())).collect();
    let poll = intervals
        .iter()
        .min()
        .copied()
        .unwrap_or(Duration::from_millis(50))
        .div_f64(2.0)
        .max(Duration::from_millis(1));
    let mut next_due: Vec<Instant> = intervals.iter().map(|_| Instant::now()).collect();
    let mut latest: Option<TrackSnapshot> = None;
    let mut published_seq: Vec<Option<u64>> = vec![None; adapters.len()];

    loop {
        match input.pop(poll) {
            PopOutcome::Item(snapshot) => latest = Some(snapshot),
            PopOutcome::TimedOut => {}
            PopOutcome::Closed => break,
        }
        let now = Instant::now();
        if let Some(snapshot) = &latest {
            for (i, adapter) in adapters.iter_mut().enumerate() {
                // Each adapter runs at its own cycle; a snapshot is handed
                // out at most once per adapter
                if now >= next_due[i] && published_seq[i] != Some(snapshot.seq) {
                    adapter.publish(snapshot);
                    stats.add(&stats.snapshots_published, 1);
                    published_seq[i] = Some(snapshot.seq);
                    next_due[i] = now + intervals[i];
                }
            }
        }
    }

    // Final cycle on shutdown so the last tombstones are observed
    if let Some(snapshot) = &latest {
        for (i, adapter) in adapters.iter_mut().enumerate() {
            if published_seq[i] != Some(snapshot.seq) {
                adapter.publish(snapshot);
                stats.add(&stats.snapshots_published, 1);
            }
        }
    }
}

fn health_stage(stats: &SystemStats, stop: &AtomicBool, interval: Duration) {
    let mut monitor = HealthMonitor::new();
    let tick = Duration::from_millis(50);
    let mut elapsed = Duration::ZERO;
    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(tick);
        elapsed += tick;
        if elapsed >= interval {
            elapsed = Duration::ZERO;
            let health = monitor.evaluate(stats);
            let report = stats.report();
            debug!(
                ?health,
                detections = report.detections_processed,
                tracks_created = report.tracks_created,
                dropped = report.batches_dropped,
                "health sample"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
