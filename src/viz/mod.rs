//! Visualization: the per-frame debug overlay.

pub mod overlay;

pub use overlay::{OverlayLayer, draw_cuboid, render_overlay};
