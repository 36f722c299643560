//! Detection emission: ground truth → noisy radar detections.
//!
//! Per scan each active target produces a small cloud of returns with
//! position noise, a range-dependent SNR, an optional Doppler velocity and
//! a miss probability; Poisson clutter is sprinkled over the surveillance
//! volume. Deterministic for a given seed.

use crate::target::Target;
use radar_core::types::{BeamId, Detection, DetectionId, Timestamp};
use nalgebra::Vector3;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Emission model parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmitterParams {
    /// Probability a target is seen at all on one scan
    pub p_detection: f64,
    /// Returns per detected target per scan
    pub returns_per_target: usize,
    /// Spread of the return cloud around the true position (1σ, m)
    pub spread_std: f64,
    /// Measurement position noise (1σ, m)
    pub position_noise_std: f64,
    /// Doppler velocity noise (1σ, m/s)
    pub velocity_noise_std: f64,
    /// Probability a return carries Doppler velocity
    pub doppler_availability: f64,
    /// SNR at the reference range (dB)
    pub snr_ref_db: f64,
    /// Range at which `snr_ref_db` applies (m)
    pub ref_range: f64,
    /// Mean false detections per scan
    pub clutter_rate: f64,
    /// Clutter is spread uniformly inside this range (m)
    pub max_range: f64,
    /// SNR of clutter returns (dB, uniform band centre)
    pub clutter_snr_db: f64,
}

impl Default for EmitterParams {
    fn default() -> Self {
        Self {
            p_detection: 0.95,
            returns_per_target: 3,
            spread_std: 6.0,
            position_noise_std: 5.0,
            velocity_noise_std: 2.0,
            doppler_availability: 0.8,
            snr_ref_db: 25.0,
            ref_range: 30_000.0,
            clutter_rate: 0.0,
            max_range: 150_000.0,
            clutter_snr_db: 14.0,
        }
    }
}

/// Generates one detection set per scan from the true target states.
pub struct RadarEmitter {
    pub params: EmitterParams,
    rng: ChaCha8Rng,
    next_id: u64,
}

impl RadarEmitter {
    pub fn new(params: EmitterParams, seed: u64) -> Self {
        Self { params, rng: ChaCha8Rng::seed_from_u64(seed), next_id: 0 }
    }

    /// Zero-mean noise draw with the given std (uniform, ±std).
    fn noise(&mut self, std: f64) -> f64 {
        self.rng.gen::<f64>() * 2.0 * std - std
    }

    /// Emit all detections for one scan at time `t` (seconds).
    pub fn scan(&mut self, targets: &[Target], t: f64) -> Vec<Detection> {
        let mut detections = Vec::new();
        let timestamp = Timestamp::from_secs_f64(t);

        for target in targets {
            if !target.is_active(t) {
                continue;
            }
            if self.rng.gen::<f64>() > self.params.p_detection {
                continue;
            }
            let true_pos = Vector3::new(target.state[0], target.state[1], target.state[2]);
            let true_vel = Vector3::new(target.state[3], target.state[4], target.state[5]);
            if true_pos.norm() > self.params.max_range {
                continue;
            }

            for _ in 0..self.params.returns_per_target {
                let jitter = Vector3::new(
                    self.noise(self.params.spread_std) + self.noise(self.params.position_noise_std),
                    self.noise(self.params.spread_std) + self.noise(self.params.position_noise_std),
                    self.noise(self.params.spread_std * 0.5),
                );
                let position = true_pos + jitter;
                let velocity = (self.rng.gen::<f64>() < self.params.doppler_availability).then(|| {
                    true_vel
                        + Vector3::new(
                            self.noise(self.params.velocity_noise_std),
                            self.noise(self.params.velocity_noise_std),
                            self.noise(self.params.velocity_noise_std * 0.5),
                        )
                });

                let range = position.norm();
                // SNR falls off with range; mild per-return scintillation
                let snr_db = self.params.snr_ref_db
                    - 20.0 * (range / self.params.ref_range).max(1e-3).log10()
                    + self.noise(2.0);

                detections.push(self.make_detection(position, velocity, range, snr_db, timestamp));
            }
        }

        // Poisson clutter (inversion sampling, capped)
        let lambda = self.params.clutter_rate;
        let n_clutter = if lambda <= 0.0 {
            0
        } else {
            let threshold = (-lambda).exp();
            let mut n = 0usize;
            let mut product = self.rng.gen::<f64>();
            while product > threshold && n < 50 {
                product *= self.rng.gen::<f64>();
                n += 1;
            }
            n
        };
        for _ in 0..n_clutter {
            let range = self.params.max_range * self.rng.gen::<f64>().sqrt();
            let azimuth = self.rng.gen::<f64>() * std::f64::consts::TAU - std::f64::consts::PI;
            let position = Vector3::new(
                range * azimuth.cos(),
                range * azimuth.sin(),
                500.0 + self.rng.gen::<f64>() * 10_000.0,
            );
            let snr_db = self.params.clutter_snr_db + self.noise(3.0);
            detections.push(self.make_detection(position, None, position.norm(), snr_db, timestamp));
        }

        detections
    }

    fn make_detection(
        &mut self,
        position: Vector3<f64>,
        velocity: Option<Vector3<f64>>,
        range: f64,
        snr_db: f64,
        timestamp: Timestamp,
    ) -> Detection {
        let id = DetectionId(self.next_id);
        self.next_id += 1;
        let azimuth = position.y.atan2(position.x);
        let ground = (position.x * position.x + position.y * position.y).sqrt();
        let elevation = position.z.atan2(ground);
        // 64 beams over the full azimuth circle
        let beam =
            ((azimuth + std::f64::consts::PI) / std::f64::consts::TAU * 64.0).floor() as u32 % 64;
        Detection {
            id,
            timestamp,
            position,
            velocity,
            range,
            azimuth,
            elevation,
            snr_db,
            rcs: 1.0 + self.rng.gen::<f64>() * 4.0,
            beam_id: BeamId(beam),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
