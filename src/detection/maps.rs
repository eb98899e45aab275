//! Network output grids: belief maps and affinity fields.
//!
//! Both grids live at the network's output resolution, a fixed integer
//! downsampling of the input image. Decoded keypoints stay in map
//! coordinates until the orchestrator scales them to image pixels.

use nalgebra::Vector2;
use ndarray::Array2;

/// Number of keypoint channels per object class: 8 cuboid corners plus
/// the centroid.
pub const NUM_KEYPOINT_CHANNELS: usize = 9;

/// Number of affinity channels: one corner-to-centroid field per corner.
pub const NUM_AFFINITY_CHANNELS: usize = 8;

/// Per-pixel confidence that one keypoint type is located there.
///
/// Stored row-major: `data[[y, x]]`.
#[derive(Debug, Clone)]
pub struct BeliefMap {
    data: Array2<f32>,
}

impl BeliefMap {
    pub fn new(data: Array2<f32>) -> Self {
        Self { data }
    }

    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            data: Array2::zeros((height, width)),
        }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Value at integer coordinates, `None` outside the grid.
    pub fn get(&self, x: i64, y: i64) -> Option<f32> {
        if x < 0 || y < 0 {
            return None;
        }
        self.data.get((y as usize, x as usize)).copied()
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<f32> {
        &mut self.data
    }
}

/// Per-pixel 2-vector pointing from a corner keypoint toward its
/// object's centroid.
#[derive(Debug, Clone)]
pub struct AffinityField {
    dx: Array2<f32>,
    dy: Array2<f32>,
}

impl AffinityField {
    /// Build from the x- and y-component grids. Panics if shapes differ.
    pub fn new(dx: Array2<f32>, dy: Array2<f32>) -> Self {
        assert_eq!(dx.dim(), dy.dim(), "affinity component shapes differ");
        Self { dx, dy }
    }

    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            dx: Array2::zeros((height, width)),
            dy: Array2::zeros((height, width)),
        }
    }

    pub fn width(&self) -> usize {
        self.dx.ncols()
    }

    pub fn height(&self) -> usize {
        self.dx.nrows()
    }

    /// Direction vector at integer coordinates, `None` outside the grid.
    pub fn sample(&self, x: i64, y: i64) -> Option<Vector2<f64>> {
        if x < 0 || y < 0 {
            return None;
        }
        let idx = (y as usize, x as usize);
        let dx = *self.dx.get(idx)?;
        let dy = *self.dy.get(idx)?;
        Some(Vector2::new(dx as f64, dy as f64))
    }

    /// Write one direction vector (used by tests and synthetic inputs).
    pub fn set(&mut self, x: usize, y: usize, v: Vector2<f64>) {
        self.dx[[y, x]] = v.x as f32;
        self.dy[[y, x]] = v.y as f32;
    }
}

/// Candidate keypoint decoded from one belief-map channel.
///
/// Position is sub-pixel, in map coordinates. Frame-scoped: built fresh
/// per frame and discarded with it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Sub-pixel location in map coordinates.
    pub position: Vector2<f64>,
    /// Belief value at the peak.
    pub confidence: f64,
    /// Which of the 9 keypoint types this is.
    pub channel: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_belief_map_out_of_range_is_none() {
        let map = BeliefMap::zeros(4, 3);
        assert_eq!(map.get(-1, 0), None);
        assert_eq!(map.get(0, 3), None);
        assert_eq!(map.get(4, 0), None);
        assert_eq!(map.get(3, 2), Some(0.0));
    }

    #[test]
    fn test_affinity_sample_roundtrip() {
        let mut field = AffinityField::zeros(5, 5);
        field.set(2, 3, Vector2::new(0.6, -0.8));
        let v = field.sample(2, 3).unwrap();
        assert!((v.x - 0.6).abs() < 1e-6);
        assert!((v.y + 0.8).abs() < 1e-6);
        assert!(field.sample(5, 0).is_none());
    }
}
