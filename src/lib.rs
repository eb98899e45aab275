//! Real-time 6-DoF object pose estimation.
//!
//! A camera image goes through a per-class pose network that emits
//! belief maps and affinity fields; those are decoded into keypoints,
//! associated into object instances, and solved into metric poses with
//! a PnP solve against each class's cuboid model. The node loop wires
//! this to a frame source and publishes poses plus a debug overlay at a
//! fixed rate.

pub mod config;
pub mod detection;
pub mod geometry;
pub mod inference;
pub mod io;
pub mod node;
pub mod viz;
