//! Geometry: camera model, rigid transforms, and the PnP pose solve.

pub mod camera;
pub mod pnp;
pub mod se3;
pub mod so3;

pub use camera::{CameraIntrinsics, CameraModel, Distortion};
pub use pnp::{MIN_CORRESPONDENCES, PnpOutcome, PoseResult, solve};
pub use se3::SE3;
