//! Density-based clustering of detection batches (weighted DBSCAN).
//!
//! Detections are grouped by a composite distance mixing Cartesian
//! separation, velocity disagreement, range difference and wrapped azimuth
//! difference. Points that never reach `min_points` neighbours stay noise.

use crate::config::ClusteringConfig;
use crate::numerics::angle_difference;
use crate::types::{BeamId, Cluster, ClusterId, Detection};
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use tracing::debug;

/// Result of clustering one batch.
#[derive(Clone, Debug, Default)]
pub struct ClusterOutcome {
    pub clusters: Vec<Cluster>,
    /// Detections that passed the SNR filter but joined no cluster
    pub noise: u32,
    /// Detections dropped by the SNR preprocess filter
    pub dropped_low_snr: u32,
}

/// Weighted-distance DBSCAN over one detection batch.
pub struct DbscanClusterer {
    config: ClusteringConfig,
    /// Offload the neighbour sweep to the worker pool above this batch size
    parallel_threshold: usize,
}

const UNCLASSIFIED: i32 = -1;
const NOISE: i32 = -2;

impl DbscanClusterer {
    pub fn new(config: ClusteringConfig, parallel_threshold: usize) -> Self {
        Self { config, parallel_threshold }
    }

    /// Partition `detections` into clusters plus a noise set.
    /// Empty input yields empty output.
    pub fn cluster(&self, detections: &[Detection]) -> ClusterOutcome {
        let valid: Vec<usize> = (0..detections.len())
            .filter(|&i| detections[i].snr_db >= self.config.snr_threshold)
            .collect();
        let dropped_low_snr = (detections.len() - valid.len()) as u32;
        if valid.is_empty() {
            return ClusterOutcome { dropped_low_snr, ..Default::default() };
        }

        // Neighbour lists over the valid subset. O(n²) pairwise sweep; the
        // per-point queries are independent, so large batches go parallel.
        let neighbors: Vec<Vec<usize>> = if valid.len() >= self.parallel_threshold {
            (0..valid.len())
                .into_par_iter()
                .map(|vi| self.range_query(detections, &valid, vi))
                .collect()
        } else {
            (0..valid.len()).map(|vi| self.range_query(detections, &valid, vi)).collect()
        };

        // Core DBSCAN expansion. Border points join but do not expand.
        let mut assignment = vec![UNCLASSIFIED; valid.len()];
        let mut next_cluster: i32 = 0;
        for vi in 0..valid.len() {
            if assignment[vi] != UNCLASSIFIED {
                continue;
            }
            if neighbors[vi].len() < self.config.min_points {
                assignment[vi] = NOISE;
                continue;
            }
            if next_cluster as usize >= self.config.max_clusters {
                // Cap against runaway inputs; the remainder becomes noise
                assignment[vi] = NOISE;
                continue;
            }
            let cluster = next_cluster;
            next_cluster += 1;
            assignment[vi] = cluster;

            let mut frontier: Vec<usize> = neighbors[vi].clone();
            let mut cursor = 0;
            while cursor < frontier.len() {
                let vj = frontier[cursor];
                cursor += 1;
                if assignment[vj] == NOISE {
                    assignment[vj] = cluster; // border point
                    continue;
                }
                if assignment[vj] != UNCLASSIFIED {
                    continue;
                }
                assignment[vj] = cluster;
                if neighbors[vj].len() >= self.config.min_points {
                    frontier.extend_from_slice(&neighbors[vj]);
                }
            }
        }

        // Materialise, validate, then re-assign dense ids from 0.
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); next_cluster as usize];
        let mut noise = 0u32;
        for (vi, &assigned) in assignment.iter().enumerate() {
            if assigned >= 0 {
                members[assigned as usize].push(valid[vi]);
            } else {
                noise += 1;
            }
        }

        let mut clusters = Vec::new();
        for group in members {
            if !self.validate(detections, &group) {
                noise += group.len() as u32;
                continue;
            }
            let id = ClusterId(clusters.len() as u32);
            clusters.push(build_cluster(id, detections, &group, &self.config));
        }

        debug!(
            clusters = clusters.len(),
            noise,
            dropped_low_snr,
            "clustered detection batch"
        );
        ClusterOutcome { clusters, noise, dropped_low_snr }
    }

    /// Indices (into the valid subset) within ε of valid point `vi`,
    /// including itself.
    fn range_query(&self, detections: &[Detection], valid: &[usize], vi: usize) -> Vec<usize> {
        let a = &detections[valid[vi]];
        let eps2 = self.epsilon_for(a).powi(2);
        (0..valid.len())
            .filter(|&vj| self.distance_sq(a, &detections[valid[vj]]) <= eps2)
            .collect()
    }

    /// ε for the query point; widens with range when adaptive ε is enabled
    /// (radar resolution degrades with distance).
    fn epsilon_for(&self, a: &Detection) -> f64 {
        if self.config.use_adaptive_epsilon {
            self.config.epsilon * (1.0 + self.config.adaptive_epsilon_factor * a.range)
        } else {
            self.config.epsilon
        }
    }

    /// Weighted composite distance squared. The velocity term contributes
    /// only when both detections carry Doppler.
    fn distance_sq(&self, a: &Detection, b: &Detection) -> f64 {
        let w = &self.config.distance_weights;
        let mut d2 = w.position * (a.position - b.position).norm_squared();
        if let (Some(va), Some(vb)) = (a.velocity, b.velocity) {
            d2 += w.velocity * (va - vb).norm_squared();
        }
        let dr = a.range - b.range;
        d2 += w.range * dr * dr;
        let daz = angle_difference(a.azimuth, b.azimuth);
        d2 += w.azimuth * daz * daz;
        d2.max(0.0)
    }

    /// Final validation: member count within bounds and density above floor.
    fn validate(&self, detections: &[Detection], group: &[usize]) -> bool {
        if group.len() < self.config.min_points || group.len() > self.config.max_cluster_size {
            return false;
        }
        if self.config.min_cluster_density > 0.0 {
            let density = group.len() as f64 / bounding_volume(detections, group);
            if density < self.config.min_cluster_density {
                return false;
            }
        }
        true
    }
}

/// Axis-aligned bounding volume of the member positions, with each extent
/// floored at 1 m so point-like clusters do not divide by zero.
fn bounding_volume(detections: &[Detection], group: &[usize]) -> f64 {
    let mut lo = detections[group[0]].position;
    let mut hi = lo;
    for &i in &group[1..] {
        let p = detections[i].position;
        lo = lo.inf(&p);
        hi = hi.sup(&p);
    }
    let extent = hi - lo;
    extent.x.max(1.0) * extent.y.max(1.0) * extent.z.max(1.0)
}

fn build_cluster(
    id: ClusterId,
    detections: &[Detection],
    group: &[usize],
    config: &ClusteringConfig,
) -> Cluster {
    let n = group.len() as f64;

    let mut centroid = Vector3::zeros();
    let mut mean_snr_db = 0.0;
    for &i in group {
        centroid += detections[i].position;
        mean_snr_db += detections[i].snr_db;
    }
    centroid /= n;
    mean_snr_db /= n;

    let mut velocity_sum = Vector3::zeros();
    let mut velocity_count = 0usize;
    for &i in group {
        if let Some(v) = detections[i].velocity {
            velocity_sum += v;
            velocity_count += 1;
        }
    }
    let velocity = (velocity_count > 0).then(|| velocity_sum / velocity_count as f64);

    let mut position_cov = Matrix3::zeros();
    for &i in group {
        let d = detections[i].position - centroid;
        position_cov += d * d.transpose();
    }
    position_cov /= n;

    let strongest = group
        .iter()
        .copied()
        .max_by(|&a, &b| detections[a].snr_db.total_cmp(&detections[b].snr_db))
        .map(|i| detections[i].beam_id)
        .unwrap_or(BeamId(0));

    // Confidence blends SNR margin and member support
    let snr_ratio = (mean_snr_db / 30.0).clamp(0.0, 1.0);
    let support = (group.len() as f64 / (3.0 * config.min_points as f64)).min(1.0);
    let confidence = (0.6 * snr_ratio + 0.4 * support).clamp(0.0, 1.0);

    Cluster {
        id,
        centroid,
        velocity,
        position_cov,
        confidence,
        mean_snr_db,
        members: group.iter().map(|&i| detections[i].id).collect(),
        beam_id: strongest,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DetectionId, Timestamp};

    fn detection(id: u64, x: f64, y: f64, snr: f64) -> Detection {
        let position = Vector3::new(x, y, 0.0);
        Detection {
            id: DetectionId(id),
            timestamp: Timestamp(0),
            position,
            velocity: None,
            range: position.norm(),
            azimuth: y.atan2(x),
            elevation: 0.0,
            snr_db: snr,
            rcs: 1.0,
            beam_id: BeamId(0),
        }
    }

    fn clusterer(config: ClusteringConfig) -> DbscanClusterer {
        DbscanClusterer::new(config, 64)
    }

    #[test]
    fn empty_input_returns_empty_output() {
        let out = clusterer(ClusteringConfig::default()).cluster(&[]);
        assert!(out.clusters.is_empty());
        assert_eq!(out.noise, 0);
    }

    #[test]
    fn two_groups_and_isolated_noise() {
        let mut detections = vec![
            detection(0, 1000.0, 0.0, 20.0),
            detection(1, 1010.0, 5.0, 20.0),
            detection(2, 1005.0, -5.0, 20.0),
            detection(3, 5000.0, 0.0, 20.0),
            detection(4, 5010.0, 5.0, 20.0),
            detection(5, 5005.0, -5.0, 20.0),
        ];
        detections.push(detection(6, 9000.0, 9000.0, 20.0)); // lone point
        let out = clusterer(ClusteringConfig::default()).cluster(&detections);
        assert_eq!(out.clusters.len(), 2);
        assert_eq!(out.noise, 1);
        // Dense ids from 0, no shared members
        assert_eq!(out.clusters[0].id, ClusterId(0));
        assert_eq!(out.clusters[1].id, ClusterId(1));
        let total: usize = out.clusters.iter().map(|c| c.len()).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn low_snr_detections_are_dropped_before_clustering() {
        let detections = vec![
            detection(0, 0.0, 0.0, 5.0),
            detection(1, 5.0, 0.0, 6.0),
            detection(2, 10.0, 0.0, 4.0),
        ];
        let out = clusterer(ClusteringConfig::default()).cluster(&detections);
        assert!(out.clusters.is_empty());
        assert_eq!(out.dropped_low_snr, 3);
    }

    #[test]
    fn membership_is_permutation_invariant() {
        let detections = vec![
            detection(0, 100.0, 0.0, 20.0),
            detection(1, 110.0, 0.0, 20.0),
            detection(2, 3000.0, 0.0, 20.0),
            detection(3, 3010.0, 0.0, 20.0),
            detection(4, 7000.0, 7000.0, 20.0),
        ];
        let mut reversed = detections.clone();
        reversed.reverse();

        let collect = |out: &ClusterOutcome| {
            let mut sets: Vec<Vec<u64>> = out
                .clusters
                .iter()
                .map(|c| {
                    let mut m: Vec<u64> = c.members.iter().map(|d| d.0).collect();
                    m.sort_unstable();
                    m
                })
                .collect();
            sets.sort();
            sets
        };

        let a = clusterer(ClusteringConfig::default()).cluster(&detections);
        let b = clusterer(ClusteringConfig::default()).cluster(&reversed);
        assert_eq!(collect(&a), collect(&b));
    }

    #[test]
    fn max_clusters_cap_sends_excess_to_noise() {
        let mut detections = Vec::new();
        for g in 0..5u64 {
            for k in 0..2u64 {
                detections.push(detection(g * 10 + k, g as f64 * 4000.0, k as f64 * 5.0, 20.0));
            }
        }
        let config = ClusteringConfig { max_clusters: 3, ..Default::default() };
        let out = clusterer(config).cluster(&detections);
        assert_eq!(out.clusters.len(), 3);
        assert_eq!(out.noise, 4);
    }

    #[test]
    fn oversized_cluster_is_rejected() {
        let detections: Vec<Detection> =
            (0..6).map(|i| detection(i, i as f64 * 2.0, 0.0, 20.0)).collect();
        let config = ClusteringConfig { max_cluster_size: 4, ..Default::default() };
        let out = clusterer(config).cluster(&detections);
        assert!(out.clusters.is_empty());
        assert_eq!(out.noise, 6);
    }

    #[test]
    fn centroid_velocity_and_covariance_aggregate_members() {
        let mut a = detection(0, 0.0, 0.0, 24.0);
        a.velocity = Some(Vector3::new(100.0, 0.0, 0.0));
        let mut b = detection(1, 10.0, 0.0, 36.0);
        b.velocity = Some(Vector3::new(120.0, 0.0, 0.0));
        let c = detection(2, 5.0, 3.0, 30.0);

        let out = clusterer(ClusteringConfig::default()).cluster(&[a, b, c]);
        assert_eq!(out.clusters.len(), 1);
        let cluster = &out.clusters[0];
        assert!((cluster.centroid.x - 5.0).abs() < 1e-9);
        assert!((cluster.mean_snr_db - 30.0).abs() < 1e-9);
        // Velocity averages only the Doppler-carrying members
        assert!((cluster.velocity.unwrap().x - 110.0).abs() < 1e-9);
        assert!(cluster.position_cov[(0, 0)] > 0.0);
    }
}
