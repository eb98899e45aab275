//! Greedy keypoint-to-centroid association via affinity fields.
//!
//! For each corner channel, every candidate keypoint samples the
//! channel's affinity field to get a predicted direction toward its
//! centroid. A centroid candidate is a valid match only when the angle
//! between prediction and the actual centroid direction is within
//! tolerance AND the centroid lies close to the predicted ray. Keypoints
//! are processed in strictly descending confidence order and each
//! centroid accepts at most one keypoint per channel, so a low
//! confidence keypoint can never steal a centroid from a higher
//! confidence one. The assignment is greedy, not globally optimal.

use std::cmp::Ordering;

use super::maps::{AffinityField, Keypoint};

/// Direction vectors shorter than this are treated as "no prediction".
const MIN_DIRECTION_NORM: f64 = 1e-6;

/// Tolerances for accepting a (keypoint, centroid) pair.
#[derive(Debug, Clone, Copy)]
pub struct AssociationConfig {
    /// Maximum angle (radians) between the predicted direction and the
    /// actual keypoint-to-centroid direction.
    pub angle_tolerance: f64,
    /// Maximum perpendicular distance (map pixels) from the centroid to
    /// the ray cast along the predicted direction.
    pub distance_tolerance: f64,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            angle_tolerance: 0.5,
            distance_tolerance: 20.0,
        }
    }
}

/// One accepted (channel, keypoint, centroid) assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Association {
    /// Corner channel index (0..8).
    pub channel: usize,
    /// Index into that channel's keypoint list.
    pub keypoint_index: usize,
    /// Index into the centroid keypoint list.
    pub centroid_index: usize,
}

/// Associate corner keypoints with centroid candidates.
///
/// `corner_keypoints[c]` holds the decoded keypoints of corner channel
/// `c` and `affinity_fields[c]` the matching field. Unmatched keypoints
/// are silently dropped.
pub fn associate(
    corner_keypoints: &[Vec<Keypoint>],
    centroids: &[Keypoint],
    affinity_fields: &[AffinityField],
    config: &AssociationConfig,
) -> Vec<Association> {
    debug_assert_eq!(corner_keypoints.len(), affinity_fields.len());

    let mut associations = Vec::new();
    if centroids.is_empty() {
        return associations;
    }

    for (channel, (keypoints, field)) in corner_keypoints
        .iter()
        .zip(affinity_fields.iter())
        .enumerate()
    {
        // Descending confidence; index tie-break keeps this reproducible.
        let mut order: Vec<usize> = (0..keypoints.len()).collect();
        order.sort_by(|&a, &b| {
            keypoints[b]
                .confidence
                .partial_cmp(&keypoints[a].confidence)
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });

        let mut claimed = vec![false; centroids.len()];
        for keypoint_index in order {
            let keypoint = &keypoints[keypoint_index];
            let Some(direction) = predicted_direction(field, keypoint) else {
                continue;
            };

            let mut best: Option<(usize, f64)> = None;
            for (centroid_index, centroid) in centroids.iter().enumerate() {
                if claimed[centroid_index] {
                    continue;
                }
                let Some((angle, perp)) = match_metrics(keypoint, centroid, &direction) else {
                    continue;
                };
                if angle > config.angle_tolerance || perp > config.distance_tolerance {
                    continue;
                }
                // Tie-break rule: weighted sum of the two normalized metrics
                let score = angle / config.angle_tolerance + perp / config.distance_tolerance;
                if best.map(|(_, s)| score < s).unwrap_or(true) {
                    best = Some((centroid_index, score));
                }
            }

            if let Some((centroid_index, _)) = best {
                claimed[centroid_index] = true;
                associations.push(Association {
                    channel,
                    keypoint_index,
                    centroid_index,
                });
            }
        }
    }
    associations
}

/// Normalized affinity direction at the keypoint's pixel, `None` when
/// the field gives no usable prediction there.
fn predicted_direction(field: &AffinityField, keypoint: &Keypoint) -> Option<nalgebra::Vector2<f64>> {
    let x = keypoint.position.x.round() as i64;
    let y = keypoint.position.y.round() as i64;
    let v = field.sample(x, y)?;
    let norm = v.norm();
    if norm < MIN_DIRECTION_NORM {
        return None;
    }
    Some(v / norm)
}

/// Angle between prediction and actual direction, plus the perpendicular
/// distance from the centroid to the predicted ray.
fn match_metrics(
    keypoint: &Keypoint,
    centroid: &Keypoint,
    direction: &nalgebra::Vector2<f64>,
) -> Option<(f64, f64)> {
    let to_centroid = centroid.position - keypoint.position;
    let length = to_centroid.norm();
    if length < MIN_DIRECTION_NORM {
        // Centroid sits on the keypoint; accept as a perfect match
        return Some((0.0, 0.0));
    }
    let unit = to_centroid / length;
    let angle = direction.dot(&unit).clamp(-1.0, 1.0).acos();
    let perp = (to_centroid.x * direction.y - to_centroid.y * direction.x).abs();
    Some((angle, perp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;

    fn keypoint(x: f64, y: f64, confidence: f64, channel: usize) -> Keypoint {
        Keypoint {
            position: Vector2::new(x, y),
            confidence,
            channel,
        }
    }

    /// One corner channel whose field points from (10,10) toward +x.
    fn field_pointing_right() -> AffinityField {
        let mut field = AffinityField::zeros(40, 40);
        for y in 0..40 {
            for x in 0..40 {
                field.set(x, y, Vector2::new(1.0, 0.0));
            }
        }
        field
    }

    #[test]
    fn test_matches_centroid_along_predicted_ray() {
        let corners = vec![vec![keypoint(10.0, 10.0, 0.9, 0)]];
        let centroids = vec![keypoint(30.0, 10.5, 0.8, 8)];
        let fields = vec![field_pointing_right()];

        let assoc = associate(&corners, &centroids, &fields, &AssociationConfig::default());
        assert_eq!(assoc.len(), 1);
        assert_eq!(assoc[0].centroid_index, 0);
    }

    #[test]
    fn test_rejects_centroid_off_the_ray() {
        let corners = vec![vec![keypoint(10.0, 10.0, 0.9, 0)]];
        // Angle to this centroid is ~90 degrees off the prediction
        let centroids = vec![keypoint(10.5, 35.0, 0.8, 8)];
        let fields = vec![field_pointing_right()];

        let assoc = associate(&corners, &centroids, &fields, &AssociationConfig::default());
        assert!(assoc.is_empty());
    }

    #[test]
    fn test_centroid_claimed_by_highest_confidence_keypoint() {
        let corners = vec![vec![
            keypoint(10.0, 12.0, 0.3, 0),
            keypoint(10.0, 10.0, 0.9, 0),
        ]];
        let centroids = vec![keypoint(30.0, 10.0, 0.8, 8)];
        let fields = vec![field_pointing_right()];

        let assoc = associate(&corners, &centroids, &fields, &AssociationConfig::default());
        // Only the stronger keypoint gets the single centroid
        assert_eq!(assoc.len(), 1);
        assert_eq!(assoc[0].keypoint_index, 1);
    }

    #[test]
    fn test_no_two_keypoints_share_a_centroid_per_channel() {
        let corners = vec![vec![
            keypoint(10.0, 10.0, 0.9, 0),
            keypoint(10.0, 11.0, 0.8, 0),
        ]];
        let centroids = vec![
            keypoint(30.0, 10.0, 0.8, 8),
            keypoint(30.0, 11.0, 0.7, 8),
        ];
        let fields = vec![field_pointing_right()];

        let assoc = associate(&corners, &centroids, &fields, &AssociationConfig::default());
        assert_eq!(assoc.len(), 2);
        assert_ne!(assoc[0].centroid_index, assoc[1].centroid_index);
    }

    #[test]
    fn test_association_is_deterministic() {
        let corners = vec![vec![
            keypoint(10.0, 10.0, 0.5, 0),
            keypoint(10.0, 11.0, 0.5, 0),
            keypoint(10.0, 12.0, 0.5, 0),
        ]];
        let centroids = vec![
            keypoint(30.0, 10.0, 0.8, 8),
            keypoint(30.0, 11.0, 0.7, 8),
        ];
        let fields = vec![field_pointing_right()];

        let first = associate(&corners, &centroids, &fields, &AssociationConfig::default());
        for _ in 0..10 {
            let again = associate(&corners, &centroids, &fields, &AssociationConfig::default());
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_zero_affinity_yields_no_match() {
        let corners = vec![vec![keypoint(10.0, 10.0, 0.9, 0)]];
        let centroids = vec![keypoint(30.0, 10.0, 0.8, 8)];
        let fields = vec![AffinityField::zeros(40, 40)];

        let assoc = associate(&corners, &centroids, &fields, &AssociationConfig::default());
        assert!(assoc.is_empty());
    }
}
