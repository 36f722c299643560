//! `radar_sim` — Scenario simulator for the tracking pipeline.
//!
//! Produces noisy detections from ground-truth trajectories and encodes
//! them into the wire format the DECODE stage consumes. Depends only on the
//! ingestion contract of `radar_core` (frame layout and the detection
//! types), never on tracker internals.

pub mod emitter;
pub mod frame;
pub mod scenario;
pub mod target;

pub use emitter::{EmitterParams, RadarEmitter};
pub use frame::encode_frame;
pub use scenario::{ScanOutput, Scenario, ScenarioKind, Simulation};
pub use target::{MotionSpec, Target};
