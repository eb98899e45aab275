//! Outbound messages and the transport boundary.
//!
//! The node publishes one pose message per detected instance plus one
//! debug overlay per frame. The actual transport is behind the
//! [`PoseSink`] trait; the built-in sinks log or write to disk, and a
//! middleware binding would be another implementation.

use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use image::RgbImage;
use nalgebra::{UnitQuaternion, Vector3};
use tracing::info;

/// A solved pose, stamped and ready to publish.
///
/// Positions are in meters in the camera coordinate frame; the solver's
/// centimeter convention never leaves the process.
#[derive(Debug, Clone)]
pub struct PoseMessage {
    /// Object class name.
    pub class_name: String,
    /// Output channel this message belongs on.
    pub topic: String,
    /// Coordinate frame identifier of the source image.
    pub frame_id: String,
    /// Capture time of the source image.
    pub timestamp: SystemTime,
    /// Object position in the camera frame, meters.
    pub position: Vector3<f64>,
    /// Object orientation in the camera frame.
    pub orientation: UnitQuaternion<f64>,
    /// Cuboid dimensions `(width, height, length)` in centimeters.
    pub dimensions: Vector3<f64>,
}

impl PoseMessage {
    fn to_json(&self) -> serde_json::Value {
        let stamp = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let q = self.orientation.quaternion();
        serde_json::json!({
            "class": self.class_name,
            "topic": self.topic,
            "frame_id": self.frame_id,
            "stamp": stamp,
            "position": [self.position.x, self.position.y, self.position.z],
            "orientation": { "x": q.i, "y": q.j, "z": q.k, "w": q.w },
            "dimensions": [self.dimensions.x, self.dimensions.y, self.dimensions.z],
        })
    }
}

/// Where published output goes. One sink per node.
pub trait PoseSink: Send {
    fn publish_pose(&mut self, message: &PoseMessage) -> Result<()>;

    /// Publish the per-frame debug overlay.
    fn publish_overlay(&mut self, frame_sequence: u64, image: &RgbImage) -> Result<()>;
}

/// Sink that logs poses through the tracing stack and drops overlays.
#[derive(Debug, Default)]
pub struct LogSink;

impl PoseSink for LogSink {
    fn publish_pose(&mut self, message: &PoseMessage) -> Result<()> {
        info!(
            topic = %message.topic,
            class = %message.class_name,
            x = message.position.x,
            y = message.position.y,
            z = message.position.z,
            "pose"
        );
        Ok(())
    }

    fn publish_overlay(&mut self, _frame_sequence: u64, _image: &RgbImage) -> Result<()> {
        Ok(())
    }
}

/// Sink that records poses as JSON lines and overlays as PNGs under an
/// output directory.
pub struct DirectorySink {
    directory: PathBuf,
    poses: fs::File,
}

impl DirectorySink {
    pub fn create(directory: PathBuf) -> Result<Self> {
        fs::create_dir_all(&directory)
            .with_context(|| format!("failed to create output directory {}", directory.display()))?;
        let poses = fs::File::create(directory.join("poses.jsonl"))
            .context("failed to create pose record file")?;
        Ok(Self { directory, poses })
    }
}

impl PoseSink for DirectorySink {
    fn publish_pose(&mut self, message: &PoseMessage) -> Result<()> {
        serde_json::to_writer(&mut self.poses, &message.to_json())?;
        self.poses.write_all(b"\n")?;
        Ok(())
    }

    fn publish_overlay(&mut self, frame_sequence: u64, image: &RgbImage) -> Result<()> {
        let path = self.directory.join(format!("overlay_{frame_sequence:06}.png"));
        image
            .save(&path)
            .with_context(|| format!("failed to write overlay {}", path.display()))?;
        Ok(())
    }
}
