//! Debug overlay rendering.
//!
//! A pure function from the camera image plus solved poses to a new
//! image with the projected cuboids drawn on top. The camera image is
//! never modified in place.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use nalgebra::Vector2;

use crate::detection::{NUM_CORNERS, NUM_KEYPOINT_CHANNELS};
use crate::geometry::PoseResult;

/// The 12 cuboid edges as corner-index pairs: front face, rear face,
/// then the four connecting sides.
const CUBOID_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (3, 2),
    (3, 0),
    (4, 5),
    (6, 5),
    (6, 7),
    (4, 7),
    (0, 4),
    (7, 3),
    (5, 1),
    (2, 6),
];

/// Diagonals across the top face, marking which way is up.
const TOP_CROSS: [(usize, usize); 2] = [(0, 5), (1, 4)];

/// Radius of the front-top corner markers, pixels.
const CORNER_DOT_RADIUS: i32 = 4;

/// One class worth of poses with its drawing color.
pub struct OverlayLayer<'a> {
    pub color: [u8; 3],
    pub poses: &'a [PoseResult],
}

/// Render the overlay: the input image with every solved cuboid drawn
/// in its class color.
pub fn render_overlay(image: &RgbImage, layers: &[OverlayLayer<'_>]) -> RgbImage {
    let mut canvas = image.clone();
    for layer in layers {
        for pose in layer.poses {
            draw_cuboid(&mut canvas, &pose.projected_points, layer.color);
        }
    }
    canvas
}

/// Draw one projected cuboid: the 12 edges, an X across the top face,
/// and dots on the two front-top corners. Skipped when any corner
/// projection is absent.
pub fn draw_cuboid(
    canvas: &mut RgbImage,
    points: &[Option<Vector2<f64>>; NUM_KEYPOINT_CHANNELS],
    color: [u8; 3],
) {
    let mut corners = [Vector2::zeros(); NUM_CORNERS];
    for (slot, corner) in corners.iter_mut().enumerate() {
        match points[slot] {
            Some(p) => *corner = p,
            None => return,
        }
    }

    let color = Rgb(color);
    for &(a, b) in CUBOID_EDGES.iter().chain(TOP_CROSS.iter()) {
        draw_line_segment_mut(
            canvas,
            (corners[a].x as f32, corners[a].y as f32),
            (corners[b].x as f32, corners[b].y as f32),
            color,
        );
    }
    for &slot in &[0, 1] {
        draw_filled_circle_mut(
            canvas,
            (corners[slot].x as i32, corners[slot].y as i32),
            CORNER_DOT_RADIUS,
            color,
        );
    }
}
