//! Input sources for the node.

pub mod image_dir;

pub use image_dir::ImageDirectorySource;
