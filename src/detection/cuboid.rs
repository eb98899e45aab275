//! Object-class cuboid model: the fixed 3D coordinates of the 9
//! keypoints in the object-local frame.
//!
//! Vertex ordering matches the network's channel ordering:
//!
//! ```text
//!       5 ---------- 4        +Y (up)
//!      /|           /|         |
//!     1 ---------- 0 |         +--- +X (right)
//!     | |          | |        /
//!     | 6 ---------|-7      +Z (toward viewer, front face)
//!     |/           |/
//!     2 ---------- 3        index 8 = centroid
//! ```
//!
//! Indices 0..4 are the front face (right-top, left-top, left-bottom,
//! right-bottom), 4..8 the rear face in the same winding. Units are
//! centimeters, matching the configured object dimensions.

use nalgebra::Vector3;

use super::maps::NUM_KEYPOINT_CHANNELS;

/// Number of cuboid corners (the centroid is the ninth keypoint).
pub const NUM_CORNERS: usize = 8;

/// Keypoint slot index of the centroid.
pub const CENTROID_INDEX: usize = 8;

/// Corner sign pattern, one `(x, y, z)` sign triple per corner index.
#[rustfmt::skip]
const CORNER_SIGNS: [[f64; 3]; NUM_CORNERS] = [
    [ 1.0,  1.0,  1.0], // 0: front top right
    [-1.0,  1.0,  1.0], // 1: front top left
    [-1.0, -1.0,  1.0], // 2: front bottom left
    [ 1.0, -1.0,  1.0], // 3: front bottom right
    [ 1.0,  1.0, -1.0], // 4: rear top right
    [-1.0,  1.0, -1.0], // 5: rear top left
    [-1.0, -1.0, -1.0], // 6: rear bottom left
    [ 1.0, -1.0, -1.0], // 7: rear bottom right
];

/// The 3D bounding-box model of one object class.
///
/// Immutable after startup and shared read-only across frames.
#[derive(Debug, Clone)]
pub struct Cuboid3d {
    /// Box extents `(width, height, length)` in centimeters.
    pub dimensions: Vector3<f64>,
    points: [Vector3<f64>; NUM_KEYPOINT_CHANNELS],
}

impl Cuboid3d {
    /// Build from box dimensions `(width, height, length)` in cm,
    /// centered on the object origin.
    pub fn from_dimensions(width: f64, height: f64, length: f64) -> Self {
        let half = Vector3::new(width / 2.0, height / 2.0, length / 2.0);
        let mut points = [Vector3::zeros(); NUM_KEYPOINT_CHANNELS];
        for (i, signs) in CORNER_SIGNS.iter().enumerate() {
            points[i] = Vector3::new(signs[0] * half.x, signs[1] * half.y, signs[2] * half.z);
        }
        // points[CENTROID_INDEX] stays at the origin
        Self {
            dimensions: Vector3::new(width, height, length),
            points,
        }
    }

    /// All 9 model keypoints (8 corners, then the centroid).
    pub fn points(&self) -> &[Vector3<f64>; NUM_KEYPOINT_CHANNELS] {
        &self.points
    }
}
