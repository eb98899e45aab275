//! The pose network boundary.
//!
//! The network itself is an opaque collaborator: it maps an RGB image to
//! 9 belief maps and 8 affinity fields at a downsampled resolution. The
//! [`PoseNetwork`] trait is that boundary; the ONNX Runtime backend
//! behind the `onnx` feature is one implementation, and tests substitute
//! synthetic ones.

use anyhow::{Result, bail};
use image::RgbImage;
use ndarray::{Array3, Axis};

use crate::detection::{
    AffinityField, BeliefMap, NUM_AFFINITY_CHANNELS, NUM_KEYPOINT_CHANNELS,
};

#[cfg(feature = "onnx")]
pub mod onnx;

/// One forward pass worth of network output.
#[derive(Debug, Clone)]
pub struct NetworkOutput {
    /// 9 belief maps: 8 corners + centroid.
    pub beliefs: Vec<BeliefMap>,
    /// 8 corner-to-centroid affinity fields.
    pub affinities: Vec<AffinityField>,
}

impl NetworkOutput {
    /// Assemble from raw channel-major tensors: beliefs `[9, h, w]` and
    /// affinities `[16, h, w]` with interleaved (dx, dy) channel pairs.
    pub fn from_tensors(beliefs: Array3<f32>, affinities: Array3<f32>) -> Result<Self> {
        if beliefs.shape()[0] != NUM_KEYPOINT_CHANNELS {
            bail!(
                "expected {} belief channels, got {}",
                NUM_KEYPOINT_CHANNELS,
                beliefs.shape()[0]
            );
        }
        if affinities.shape()[0] != 2 * NUM_AFFINITY_CHANNELS {
            bail!(
                "expected {} affinity channels, got {}",
                2 * NUM_AFFINITY_CHANNELS,
                affinities.shape()[0]
            );
        }
        if beliefs.shape()[1..] != affinities.shape()[1..] {
            bail!("belief and affinity grids have mismatched resolutions");
        }

        let belief_maps = (0..NUM_KEYPOINT_CHANNELS)
            .map(|c| BeliefMap::new(beliefs.index_axis(Axis(0), c).to_owned()))
            .collect();
        let affinity_fields = (0..NUM_AFFINITY_CHANNELS)
            .map(|c| {
                AffinityField::new(
                    affinities.index_axis(Axis(0), 2 * c).to_owned(),
                    affinities.index_axis(Axis(0), 2 * c + 1).to_owned(),
                )
            })
            .collect();

        Ok(Self {
            beliefs: belief_maps,
            affinities: affinity_fields,
        })
    }

    /// Resolution of the output grids.
    pub fn map_size(&self) -> (usize, usize) {
        (self.beliefs[0].width(), self.beliefs[0].height())
    }
}

/// The opaque forward pass: image in, belief/affinity grids out.
///
/// Implementations are deterministic for a given image and weights and
/// may be GPU-accelerated. One instance per object class.
pub trait PoseNetwork: Send {
    fn infer(&mut self, image: &RgbImage) -> Result<NetworkOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tensors_splits_channels() {
        let beliefs = Array3::<f32>::zeros((9, 60, 80));
        let mut affinities = Array3::<f32>::zeros((16, 60, 80));
        affinities[[6, 10, 20]] = 0.5; // channel 3, dx
        affinities[[7, 10, 20]] = -0.5; // channel 3, dy

        let output = NetworkOutput::from_tensors(beliefs, affinities).unwrap();
        assert_eq!(output.beliefs.len(), 9);
        assert_eq!(output.affinities.len(), 8);
        assert_eq!(output.map_size(), (80, 60));

        let v = output.affinities[3].sample(20, 10).unwrap();
        assert!((v.x - 0.5).abs() < 1e-6);
        assert!((v.y + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_from_tensors_rejects_wrong_channel_counts() {
        let beliefs = Array3::<f32>::zeros((8, 60, 80));
        let affinities = Array3::<f32>::zeros((16, 60, 80));
        assert!(NetworkOutput::from_tensors(beliefs, affinities).is_err());

        let beliefs = Array3::<f32>::zeros((9, 60, 80));
        let affinities = Array3::<f32>::zeros((8, 60, 80));
        assert!(NetworkOutput::from_tensors(beliefs, affinities).is_err());
    }

    #[test]
    fn test_from_tensors_rejects_mismatched_resolutions() {
        let beliefs = Array3::<f32>::zeros((9, 60, 80));
        let affinities = Array3::<f32>::zeros((16, 30, 40));
        assert!(NetworkOutput::from_tensors(beliefs, affinities).is_err());
    }
}
