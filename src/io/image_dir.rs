//! Frame input from a directory of image files, in filename order.
//!
//! Stands in for a live camera driver: the binary replays a directory
//! at the configured rate through the image slot.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use tracing::debug;

use crate::node::CameraFrame;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Replays the image files of one directory as camera frames.
pub struct ImageDirectorySource {
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageDirectorySource {
    /// Scan a directory for image files. Non-image entries are ignored;
    /// an empty result is an error since the node would idle forever.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref();
        let entries = fs::read_dir(directory)
            .with_context(|| format!("failed to read input directory {}", directory.display()))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| {
                        let ext = ext.to_ascii_lowercase();
                        IMAGE_EXTENSIONS.contains(&ext.as_str())
                    })
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            anyhow::bail!("no image files found in {}", directory.display());
        }
        debug!(count = files.len(), directory = %directory.display(), "scanned input frames");
        Ok(Self { files, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Load the next frame, or `None` when the directory is exhausted.
    /// An unreadable file is reported as an error for that frame only.
    pub fn next_frame(&mut self) -> Option<Result<CameraFrame>> {
        let path = self.files.get(self.next)?.clone();
        let sequence = self.next as u64;
        self.next += 1;

        let frame = image::open(&path)
            .with_context(|| format!("failed to load image {}", path.display()))
            .map(|loaded| CameraFrame {
                image: loaded.to_rgb8(),
                sequence,
                timestamp: SystemTime::now(),
            });
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cuboid_pose_{tag}_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_frames_come_back_in_filename_order() {
        let dir = scratch_dir("order");
        RgbImage::new(8, 8).save(dir.join("frame_002.png")).unwrap();
        RgbImage::new(8, 8).save(dir.join("frame_001.png")).unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let mut source = ImageDirectorySource::open(&dir).unwrap();
        assert_eq!(source.len(), 2);
        let first = source.next_frame().unwrap().unwrap();
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert!(source.next_frame().is_none());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = scratch_dir("empty");
        assert!(ImageDirectorySource::open(&dir).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_unreadable_file_fails_only_that_frame() {
        let dir = scratch_dir("corrupt");
        fs::write(dir.join("bad.png"), b"not a png").unwrap();
        RgbImage::new(8, 8).save(dir.join("good.png")).unwrap();

        let mut source = ImageDirectorySource::open(&dir).unwrap();
        assert!(source.next_frame().unwrap().is_err());
        assert!(source.next_frame().unwrap().is_ok());

        fs::remove_dir_all(&dir).unwrap();
    }
}
