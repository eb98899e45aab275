//! Object assembly: group associated keypoints into per-object
//! instances.
//!
//! One instance is emitted per detected centroid, ordered by descending
//! centroid confidence. A centroid with no associated corners still
//! produces an instance; whether that is enough for a pose is decided in
//! one place only, the solver.

use std::cmp::Ordering;

use nalgebra::Vector2;

use super::associate::Association;
use super::cuboid::CENTROID_INDEX;
use super::maps::{Keypoint, NUM_KEYPOINT_CHANNELS};

/// An assembled object candidate: up to 9 observed 2D points.
///
/// Slot layout matches [`crate::detection::cuboid::Cuboid3d::points`]:
/// 8 corners, then the centroid. `None` marks an absent observation.
#[derive(Debug, Clone)]
pub struct ObjectInstance {
    /// Observed keypoints, in map coordinates.
    pub points: [Option<Vector2<f64>>; NUM_KEYPOINT_CHANNELS],
    /// Confidence of the centroid that seeded this instance.
    pub centroid_confidence: f64,
}

impl ObjectInstance {
    /// Number of present (non-absent) observations.
    pub fn num_points(&self) -> usize {
        self.points.iter().filter(|p| p.is_some()).count()
    }
}

/// Build one instance per centroid from the channel associations.
pub fn assemble(
    corner_keypoints: &[Vec<Keypoint>],
    centroids: &[Keypoint],
    associations: &[Association],
) -> Vec<ObjectInstance> {
    // Descending centroid confidence fixes the output ordering.
    let mut order: Vec<usize> = (0..centroids.len()).collect();
    order.sort_by(|&a, &b| {
        centroids[b]
            .confidence
            .partial_cmp(&centroids[a].confidence)
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });

    order
        .into_iter()
        .map(|centroid_index| {
            let mut points = [None; NUM_KEYPOINT_CHANNELS];
            points[CENTROID_INDEX] = Some(centroids[centroid_index].position);
            for assoc in associations {
                if assoc.centroid_index != centroid_index {
                    continue;
                }
                points[assoc.channel] =
                    Some(corner_keypoints[assoc.channel][assoc.keypoint_index].position);
            }
            ObjectInstance {
                points,
                centroid_confidence: centroids[centroid_index].confidence,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypoint(x: f64, y: f64, confidence: f64, channel: usize) -> Keypoint {
        Keypoint {
            position: Vector2::new(x, y),
            confidence,
            channel,
        }
    }

    #[test]
    fn test_instances_ordered_by_centroid_confidence() {
        let centroids = vec![
            keypoint(10.0, 10.0, 0.4, CENTROID_INDEX),
            keypoint(50.0, 10.0, 0.9, CENTROID_INDEX),
        ];
        let corners: Vec<Vec<Keypoint>> = vec![Vec::new(); 8];

        let instances = assemble(&corners, &centroids, &[]);
        assert_eq!(instances.len(), 2);
        assert!(instances[0].centroid_confidence > instances[1].centroid_confidence);
        assert_eq!(instances[0].points[CENTROID_INDEX], Some(Vector2::new(50.0, 10.0)));
    }

    #[test]
    fn test_associated_corners_land_in_their_slots() {
        let centroids = vec![keypoint(20.0, 20.0, 0.8, CENTROID_INDEX)];
        let mut corners: Vec<Vec<Keypoint>> = vec![Vec::new(); 8];
        corners[2] = vec![keypoint(5.0, 5.0, 0.7, 2)];
        corners[7] = vec![keypoint(35.0, 30.0, 0.6, 7)];

        let associations = vec![
            Association {
                channel: 2,
                keypoint_index: 0,
                centroid_index: 0,
            },
            Association {
                channel: 7,
                keypoint_index: 0,
                centroid_index: 0,
            },
        ];

        let instances = assemble(&corners, &centroids, &associations);
        assert_eq!(instances.len(), 1);
        let instance = &instances[0];
        assert_eq!(instance.num_points(), 3);
        assert_eq!(instance.points[2], Some(Vector2::new(5.0, 5.0)));
        assert_eq!(instance.points[7], Some(Vector2::new(35.0, 30.0)));
        assert_eq!(instance.points[0], None);
    }

    #[test]
    fn test_centroid_only_instance_still_emitted() {
        let centroids = vec![keypoint(20.0, 20.0, 0.8, CENTROID_INDEX)];
        let corners: Vec<Vec<Keypoint>> = vec![Vec::new(); 8];

        let instances = assemble(&corners, &centroids, &[]);
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].num_points(), 1);
    }

    #[test]
    fn test_no_centroids_yields_no_instances() {
        let corners: Vec<Vec<Keypoint>> = vec![Vec::new(); 8];
        assert!(assemble(&corners, &[], &[]).is_empty());
    }
}
