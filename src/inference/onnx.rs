//! ONNX Runtime backend for the pose network.
//!
//! Loads one exported weight file per object class. The model takes a
//! normalized `[1, 3, H, W]` tensor and returns the belief tensor
//! `[1, 9, H/8, W/8]` and the affinity tensor `[1, 16, H/8, W/8]`.

use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::{Array4, ArrayViewD, Axis};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;

use super::{NetworkOutput, PoseNetwork};

/// A pose network executed through ONNX Runtime.
pub struct OrtPoseNetwork {
    session: Session,
    input_name: String,
    belief_output: String,
    affinity_output: String,
}

impl OrtPoseNetwork {
    /// Load the weight file for one object class.
    pub fn load<P: AsRef<Path>>(weights: P) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(weights.as_ref())
            .with_context(|| format!("failed to load weights {}", weights.as_ref().display()))?;

        let input_name = session
            .inputs
            .first()
            .context("model has no inputs")?
            .name
            .clone();
        let mut outputs = session.outputs.iter().map(|o| o.name.clone());
        let belief_output = outputs.next().context("model has no outputs")?;
        let affinity_output = outputs
            .next()
            .context("model is missing the affinity output")?;

        Ok(Self {
            session,
            input_name,
            belief_output,
            affinity_output,
        })
    }

    /// Normalize an RGB image into the `[1, 3, H, W]` input layout.
    fn preprocess(image: &RgbImage) -> Array4<f32> {
        let (width, height) = image.dimensions();
        let mut input = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        for (x, y, pixel) in image.enumerate_pixels() {
            for c in 0..3 {
                // Same normalization the network was trained with
                input[[0, c, y as usize, x as usize]] = (pixel[c] as f32 / 255.0 - 0.5) / 0.5;
            }
        }
        input
    }
}

impl PoseNetwork for OrtPoseNetwork {
    fn infer(&mut self, image: &RgbImage) -> Result<NetworkOutput> {
        let input = Tensor::from_array(Self::preprocess(image))?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input])
            .context("inference failed")?;

        let beliefs: ArrayViewD<f32> = outputs[self.belief_output.as_str()]
            .try_extract_array()
            .context("failed to extract belief tensor")?;
        let affinities: ArrayViewD<f32> = outputs[self.affinity_output.as_str()]
            .try_extract_array()
            .context("failed to extract affinity tensor")?;

        // Drop the batch dimension and hand over channel-major grids
        let beliefs = beliefs
            .into_dimensionality::<ndarray::Ix4>()
            .context("belief tensor is not 4-dimensional")?
            .index_axis(Axis(0), 0)
            .to_owned();
        let affinities = affinities
            .into_dimensionality::<ndarray::Ix4>()
            .context("affinity tensor is not 4-dimensional")?
            .index_axis(Axis(0), 0)
            .to_owned();

        NetworkOutput::from_tensors(beliefs, affinities)
    }
}
