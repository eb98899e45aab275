//! Single-frame detection pipeline: belief-map decoding, affinity
//! association, and object assembly.

pub mod assemble;
pub mod associate;
pub mod cuboid;
pub mod decoder;
pub mod maps;

pub use assemble::{ObjectInstance, assemble};
pub use associate::{Association, AssociationConfig, associate};
pub use cuboid::{CENTROID_INDEX, Cuboid3d, NUM_CORNERS};
pub use decoder::{DecoderConfig, decode};
pub use maps::{
    AffinityField, BeliefMap, Keypoint, NUM_AFFINITY_CHANNELS, NUM_KEYPOINT_CHANNELS,
};
