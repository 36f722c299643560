//! Named deterministic scenarios and the scan-by-scan simulation driver.

use crate::emitter::{EmitterParams, RadarEmitter};
use crate::target::{MotionSpec, Target};
use radar_core::metrics::TruthState;
use radar_core::types::Detection;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Which pre-defined scenario to run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// One target in straight flight, 10 Hz, σ = 5 m
    SingleStraight,
    /// Two targets crossing head-on at different altitudes
    CrossingPair,
    /// Single target with a 3 s detection blackout
    Dropout,
    /// Single target plus sustained clutter
    ClutterBurst,
    /// 20 simultaneous targets (run with a small `max_tracks`)
    Overflow,
    /// Straight flight, then a 3 g coordinated turn, then straight again
    ManeuverTurn,
}

/// A fully configured scenario.
#[derive(Clone, Debug)]
pub struct Scenario {
    pub name: String,
    pub duration: f64,
    /// Scan period (seconds)
    pub scan_dt: f64,
    pub targets: Vec<Target>,
    pub emitter: EmitterParams,
    /// All emissions suppressed inside this window
    pub blackout: Option<(f64, f64)>,
}

impl Scenario {
    pub fn build(kind: ScenarioKind) -> Self {
        match kind {
            ScenarioKind::SingleStraight => Self::single_straight(),
            ScenarioKind::CrossingPair => Self::crossing_pair(),
            ScenarioKind::Dropout => Self::dropout(),
            ScenarioKind::ClutterBurst => Self::clutter_burst(),
            ScenarioKind::Overflow => Self::overflow(),
            ScenarioKind::ManeuverTurn => Self::maneuver_turn(),
        }
    }

    fn single_straight() -> Self {
        Self {
            name: "single_straight".into(),
            duration: 300.0,
            scan_dt: 0.1,
            targets: vec![Target::new(
                0,
                [10_000.0, 0.0, 1000.0],
                [100.0, 50.0, 0.0],
                MotionSpec::ConstantVelocity,
            )],
            emitter: EmitterParams { p_detection: 1.0, ..Default::default() },
            blackout: None,
        }
    }

    fn crossing_pair() -> Self {
        Self {
            name: "crossing_pair".into(),
            duration: 400.0,
            scan_dt: 0.1,
            targets: vec![
                Target::new(
                    0,
                    [-40_000.0, 0.0, 2000.0],
                    [220.0, 0.0, 0.0],
                    MotionSpec::ConstantVelocity,
                ),
                Target::new(
                    1,
                    [40_000.0, 0.0, 2200.0],
                    [-200.0, 0.0, 0.0],
                    MotionSpec::ConstantVelocity,
                ),
            ],
            emitter: EmitterParams { p_detection: 0.98, ..Default::default() },
            blackout: None,
        }
    }

    fn dropout() -> Self {
        Self {
            name: "dropout".into(),
            duration: 30.0,
            scan_dt: 0.1,
            targets: vec![Target::new(
                0,
                [15_000.0, 5000.0, 1500.0],
                [120.0, -20.0, 0.0],
                MotionSpec::ConstantVelocity,
            )],
            emitter: EmitterParams { p_detection: 1.0, ..Default::default() },
            blackout: Some((10.0, 13.0)),
        }
    }

    fn clutter_burst() -> Self {
        Self {
            name: "clutter_burst".into(),
            duration: 60.0,
            scan_dt: 0.1,
            targets: vec![Target::new(
                0,
                [12_000.0, -3000.0, 1200.0],
                [90.0, 40.0, 0.0],
                MotionSpec::ConstantVelocity,
            )],
            emitter: EmitterParams { p_detection: 1.0, clutter_rate: 0.3, ..Default::default() },
            blackout: None,
        }
    }

    fn overflow() -> Self {
        let targets = (0..20)
            .map(|k| {
                let angle = k as f64 * std::f64::consts::TAU / 20.0;
                Target::new(
                    k,
                    [40_000.0 * angle.cos(), 40_000.0 * angle.sin(), 3000.0],
                    [150.0 * (-angle.sin()), 150.0 * angle.cos(), 0.0],
                    MotionSpec::ConstantVelocity,
                )
            })
            .collect();
        Self {
            name: "overflow".into(),
            duration: 30.0,
            scan_dt: 0.1,
            targets,
            emitter: EmitterParams { p_detection: 1.0, ..Default::default() },
            blackout: None,
        }
    }

    fn maneuver_turn() -> Self {
        // 3 g at 220 m/s → ω = a/v ≈ 0.134 rad/s
        let omega = 3.0 * 9.81 / 220.0;
        Self {
            name: "maneuver_turn".into(),
            duration: 40.0,
            scan_dt: 0.1,
            targets: vec![Target::new(
                0,
                [5000.0, -20_000.0, 4000.0],
                [220.0, 0.0, 0.0],
                MotionSpec::Segmented {
                    segments: vec![
                        (0.0, Box::new(MotionSpec::ConstantVelocity)),
                        (20.0, Box::new(MotionSpec::ConstantTurn { omega })),
                        (30.0, Box::new(MotionSpec::ConstantVelocity)),
                    ],
                },
            )],
            emitter: EmitterParams { p_detection: 1.0, ..Default::default() },
            blackout: None,
        }
    }
}

/// One emitted scan with its ground truth.
#[derive(Clone, Debug)]
pub struct ScanOutput {
    /// Scan epoch (seconds)
    pub t: f64,
    pub detections: Vec<Detection>,
    pub truth: Vec<TruthState>,
}

/// Steps a scenario scan by scan.
pub struct Simulation {
    scenario: Scenario,
    emitter: RadarEmitter,
    t: f64,
}

impl Simulation {
    pub fn new(scenario: Scenario, seed: u64) -> Self {
        let emitter = RadarEmitter::new(scenario.emitter.clone(), seed);
        Self { scenario, emitter, t: 0.0 }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Emit the next scan, or `None` once the scenario duration is over.
    pub fn next_scan(&mut self) -> Option<ScanOutput> {
        if self.t >= self.scenario.duration {
            return None;
        }
        let t = self.t;

        let suppressed = self
            .scenario
            .blackout
            .map(|(start, end)| t >= start && t < end)
            .unwrap_or(false);
        let detections =
            if suppressed { Vec::new() } else { self.emitter.scan(&self.scenario.targets, t) };

        let truth = self
            .scenario
            .targets
            .iter()
            .filter(|target| target.is_active(t))
            .map(|target| TruthState {
                target_id: target.id,
                position: Vector3::new(target.state[0], target.state[1], target.state[2]),
                velocity: Vector3::new(target.state[3], target.state[4], target.state[5]),
            })
            .collect();

        for target in &mut self.scenario.targets {
            target.step(t, self.scenario.scan_dt);
        }
        self.t += self.scenario.scan_dt;

        Some(ScanOutput { t, detections, truth })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_runs_for_the_configured_duration() {
        let mut scenario = Scenario::build(ScenarioKind::SingleStraight);
        scenario.duration = 1.0;
        let mut sim = Simulation::new(scenario, 42);
        let mut scans = 0;
        while let Some(out) = sim.next_scan() {
            scans += 1;
            assert_eq!(out.truth.len(), 1);
        }
        assert_eq!(scans, 10);
    }

    #[test]
    fn blackout_window_suppresses_detections() {
        let mut scenario = Scenario::build(ScenarioKind::Dropout);
        scenario.duration = 15.0;
        let mut sim = Simulation::new(scenario, 42);
        let mut before = 0;
        let mut inside = 0;
        while let Some(out) = sim.next_scan() {
            if out.t >= 10.0 && out.t < 13.0 {
                inside += out.detections.len();
            } else {
                before += out.detections.len();
            }
        }
        assert_eq!(inside, 0);
        assert!(before > 0);
    }

    #[test]
    fn maneuver_turn_bends_the_truth_after_onset() {
        let mut sim = Simulation::new(Scenario::build(ScenarioKind::ManeuverTurn), 1);
        let mut heading_at_19 = 0.0;
        let mut heading_at_29 = 0.0;
        while let Some(out) = sim.next_scan() {
            let truth = &out.truth[0];
            let heading = truth.velocity.y.atan2(truth.velocity.x);
            if (out.t - 19.0).abs() < 0.05 {
                heading_at_19 = heading;
            }
            if (out.t - 29.0).abs() < 0.05 {
                heading_at_29 = heading;
            }
        }
        assert!(heading_at_19.abs() < 1e-6, "straight before the turn");
        assert!((heading_at_29 - heading_at_19).abs() > 1.0, "turn must rotate the heading");
    }
}
