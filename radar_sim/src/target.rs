//! Ground-truth target trajectory models.
//!
//! Each target carries a true state [px,py,pz,vx,vy,vz] and a `MotionSpec`
//! describing how it moves. The simulation steps targets forward in time;
//! the tracker never sees these types.

use serde::{Deserialize, Serialize};

/// How a target moves between events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MotionSpec {
    /// Straight flight, no acceleration
    ConstantVelocity,
    /// Constant yaw rate on the XY plane (rad/s); speed is preserved
    ConstantTurn { omega: f64 },
    /// Constant acceleration (m/s²)
    ConstantAccel { ax: f64, ay: f64, az: f64 },
    /// Switch motion at given times; the active spec is the last whose
    /// start time ≤ t
    Segmented { segments: Vec<(f64, Box<MotionSpec>)> },
}

/// A simulated target with ground-truth state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Target {
    pub id: u64,
    /// True state [px, py, pz, vx, vy, vz]
    pub state: [f64; 6],
    pub motion: MotionSpec,
    /// No emissions before this time
    pub appear_at: Option<f64>,
    /// No emissions at or after this time
    pub disappear_at: Option<f64>,
}

impl Target {
    pub fn new(id: u64, position: [f64; 3], velocity: [f64; 3], motion: MotionSpec) -> Self {
        Self {
            id,
            state: [position[0], position[1], position[2], velocity[0], velocity[1], velocity[2]],
            motion,
            appear_at: None,
            disappear_at: None,
        }
    }

    /// Propagate the true state by `dt` seconds.
    pub fn step(&mut self, t: f64, dt: f64) {
        let motion = self.motion.clone();
        step_state(&mut self.state, &motion, t, dt);
    }

    pub fn is_active(&self, t: f64) -> bool {
        if let Some(appear) = self.appear_at {
            if t < appear {
                return false;
            }
        }
        if let Some(disappear) = self.disappear_at {
            if t >= disappear {
                return false;
            }
        }
        true
    }
}

fn step_state(s: &mut [f64; 6], motion: &MotionSpec, t: f64, dt: f64) {
    match motion {
        MotionSpec::ConstantVelocity => {
            s[0] += s[3] * dt;
            s[1] += s[4] * dt;
            s[2] += s[5] * dt;
        }
        MotionSpec::ConstantTurn { omega } => {
            let v = (s[3] * s[3] + s[4] * s[4]).sqrt();
            let heading = s[4].atan2(s[3]);
            let new_heading = heading + omega * dt;
            s[0] += v * heading.cos() * dt;
            s[1] += v * heading.sin() * dt;
            s[2] += s[5] * dt;
            s[3] = v * new_heading.cos();
            s[4] = v * new_heading.sin();
        }
        MotionSpec::ConstantAccel { ax, ay, az } => {
            s[0] += s[3] * dt + 0.5 * ax * dt * dt;
            s[1] += s[4] * dt + 0.5 * ay * dt * dt;
            s[2] += s[5] * dt + 0.5 * az * dt * dt;
            s[3] += ax * dt;
            s[4] += ay * dt;
            s[5] += az * dt;
        }
        MotionSpec::Segmented { segments } => {
            let active = segments.iter().filter(|(start, _)| *start <= t).last();
            match active {
                Some((_, spec)) => step_state(s, spec, t, dt),
                None => step_state(s, &MotionSpec::ConstantVelocity, t, dt),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_velocity_moves_linearly() {
        let mut target =
            Target::new(0, [0.0, 0.0, 1000.0], [100.0, 50.0, 0.0], MotionSpec::ConstantVelocity);
        for k in 0..10 {
            target.step(k as f64 * 0.1, 0.1);
        }
        assert!((target.state[0] - 100.0).abs() < 1e-9);
        assert!((target.state[1] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn constant_turn_preserves_speed() {
        let mut target = Target::new(
            0,
            [0.0, 0.0, 0.0],
            [200.0, 0.0, 0.0],
            MotionSpec::ConstantTurn { omega: 0.1 },
        );
        for k in 0..100 {
            target.step(k as f64 * 0.1, 0.1);
        }
        let speed = (target.state[3].powi(2) + target.state[4].powi(2)).sqrt();
        assert!((speed - 200.0).abs() < 1e-6);
        assert!(target.state[4].abs() > 1.0, "heading should have rotated");
    }

    #[test]
    fn segmented_switches_at_boundaries() {
        let mut target = Target::new(
            0,
            [0.0, 0.0, 0.0],
            [100.0, 0.0, 0.0],
            MotionSpec::Segmented {
                segments: vec![
                    (0.0, Box::new(MotionSpec::ConstantVelocity)),
                    (10.0, Box::new(MotionSpec::ConstantTurn { omega: 0.2 })),
                ],
            },
        );
        for k in 0..100 {
            target.step(k as f64 * 0.1, 0.1);
        }
        // Straight segment: still heading +x
        assert!(target.state[4].abs() < 1e-9);
        for k in 100..150 {
            target.step(k as f64 * 0.1, 0.1);
        }
        assert!(target.state[4].abs() > 1.0, "turn segment must bend the path");
    }

    #[test]
    fn activity_window_respected() {
        let mut target =
            Target::new(0, [0.0; 3], [0.0; 3], MotionSpec::ConstantVelocity);
        target.appear_at = Some(5.0);
        target.disappear_at = Some(20.0);
        assert!(!target.is_active(4.9));
        assert!(target.is_active(5.0));
        assert!(!target.is_active(20.0));
    }
}
