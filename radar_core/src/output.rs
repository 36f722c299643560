//! Track publication contract.
//!
//! The PUBLISH stage hands each registered adapter an immutable snapshot at
//! the adapter's own rate. Adapters own the snapshot only for the duration
//! of the call and must not retain mutable references.

use crate::registry::TrackSnapshot;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// A downstream consumer of track snapshots (HMI, fusion, ...).
pub trait OutputAdapter: Send {
    fn name(&self) -> &str;

    /// Desired publication rate (Hz).
    fn rate_hz(&self) -> f64;

    /// Called once per publication cycle with the newest snapshot.
    fn publish(&mut self, snapshot: &TrackSnapshot);
}

/// Logs a one-line summary per cycle. The default HMI-side adapter when
/// nothing else is registered.
pub struct LogAdapter {
    name: String,
    rate_hz: f64,
}

impl LogAdapter {
    pub fn new(name: impl Into<String>, rate_hz: f64) -> Self {
        Self { name: name.into(), rate_hz }
    }
}

impl OutputAdapter for LogAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn rate_hz(&self) -> f64 {
        self.rate_hz
    }

    fn publish(&mut self, snapshot: &TrackSnapshot) {
        info!(
            adapter = %self.name,
            seq = snapshot.seq,
            tracks = snapshot.tracks.len(),
            health = ?snapshot.health,
            "published snapshot"
        );
    }
}

/// Keeps deep copies of everything it receives. Test/analysis adapter.
pub struct CollectingAdapter {
    name: String,
    rate_hz: f64,
    store: Arc<Mutex<Vec<TrackSnapshot>>>,
}

impl CollectingAdapter {
    pub fn new(name: impl Into<String>, rate_hz: f64) -> Self {
        Self { name: name.into(), rate_hz, store: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Shared handle to the collected snapshots.
    pub fn store(&self) -> Arc<Mutex<Vec<TrackSnapshot>>> {
        Arc::clone(&self.store)
    }
}

impl OutputAdapter for CollectingAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn rate_hz(&self) -> f64 {
        self.rate_hz
    }

    fn publish(&mut self, snapshot: &TrackSnapshot) {
        self.store.lock().push(snapshot.clone());
    }
}
