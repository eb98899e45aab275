//! Startup configuration: camera calibration, detection thresholds, and
//! the per-object-class table.
//!
//! Loaded once from a TOML file, validated eagerly, then shared
//! read-only. A malformed file or an unusable value is fatal at startup;
//! nothing here is reloaded at runtime.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::detection::{AssociationConfig, DecoderConfig};
use crate::geometry::{CameraIntrinsics, CameraModel, Distortion};

/// Fatal configuration problems. The process reports these and exits.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    #[serde(default)]
    pub detection: DetectionSettings,
    #[serde(default)]
    pub node: NodeSettings,
    /// One entry per object class to detect.
    #[serde(default, rename = "object")]
    pub objects: Vec<ObjectConfig>,
}

/// Camera calibration as written by calibration tools.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Brown-Conrady coefficients `[k1, k2, p1, p2, k3]`; shorter lists
    /// are zero-padded, absent means rectified input.
    #[serde(default)]
    pub distortion: Vec<f64>,
}

/// Detection thresholds shared by all object classes.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionSettings {
    /// Gaussian smoothing sigma for belief maps (map pixels).
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    /// Minimum smoothed peak value for a keypoint candidate.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Secondary threshold for the sub-pixel refinement window.
    #[serde(default = "default_map_threshold")]
    pub map_threshold: f64,
    /// Affinity angle tolerance (radians).
    #[serde(default = "default_angle_tolerance")]
    pub angle_tolerance: f64,
    /// Affinity perpendicular-distance tolerance (map pixels).
    #[serde(default = "default_distance_tolerance")]
    pub distance_tolerance: f64,
}

fn default_sigma() -> f64 {
    3.0
}
fn default_confidence_threshold() -> f64 {
    0.1
}
fn default_map_threshold() -> f64 {
    0.01
}
fn default_angle_tolerance() -> f64 {
    0.5
}
fn default_distance_tolerance() -> f64 {
    20.0
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            sigma: default_sigma(),
            confidence_threshold: default_confidence_threshold(),
            map_threshold: default_map_threshold(),
            angle_tolerance: default_angle_tolerance(),
            distance_tolerance: default_distance_tolerance(),
        }
    }
}

/// Node-level settings: naming and timing.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSettings {
    /// Coordinate frame identifier stamped on published poses.
    #[serde(default = "default_frame_id")]
    pub frame_id: String,
    /// Target processing rate in Hz. Overruns delay the next tick.
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f64,
    /// Prefix for per-class output channel names.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

fn default_frame_id() -> String {
    "camera_rgb_frame".to_string()
}
fn default_rate_hz() -> f64 {
    5.0
}
fn default_topic_prefix() -> String {
    "cuboid_pose".to_string()
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            frame_id: default_frame_id(),
            rate_hz: default_rate_hz(),
            topic_prefix: default_topic_prefix(),
        }
    }
}

/// One detectable object class.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectConfig {
    /// Class name; also keys the result map.
    pub name: String,
    /// Network weight file for this class.
    pub weights: PathBuf,
    /// Cuboid dimensions `(width, height, length)` in centimeters.
    pub dimensions: [f64; 3],
    /// Overlay color for this class.
    #[serde(default = "default_draw_color")]
    pub draw_color: [u8; 3],
    /// Output channel; defaults to `<topic_prefix>/pose_<name>`.
    #[serde(default)]
    pub topic: Option<String>,
}

fn default_draw_color() -> [u8; 3] {
    [255, 0, 0]
}

impl Config {
    /// Load and validate a configuration file. Fails fast on anything
    /// the node could not run with.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a string (used by tests); validates like [`load`].
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.camera_model().intrinsics.is_valid() {
            return Err(ConfigError::Invalid(
                "camera intrinsics are degenerate (fx/fy must be finite and non-zero)".into(),
            ));
        }
        if self.camera.distortion.len() > 5 {
            return Err(ConfigError::Invalid(format!(
                "expected at most 5 distortion coefficients, got {}",
                self.camera.distortion.len()
            )));
        }
        if self.objects.is_empty() {
            return Err(ConfigError::Invalid("no object classes configured".into()));
        }
        // Class names key the per-class result map; duplicates would
        // silently collapse into one entry.
        let mut names = HashSet::new();
        for object in &self.objects {
            if !names.insert(object.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate object class name '{}'",
                    object.name
                )));
            }
            if object.dimensions.iter().any(|&d| !(d > 0.0) || !d.is_finite()) {
                return Err(ConfigError::Invalid(format!(
                    "object '{}' has non-positive dimensions",
                    object.name
                )));
            }
        }
        let d = &self.detection;
        if d.sigma < 0.0 || !d.sigma.is_finite() {
            return Err(ConfigError::Invalid("detection.sigma must be >= 0".into()));
        }
        if !(d.confidence_threshold > 0.0) || !(d.angle_tolerance > 0.0)
            || !(d.distance_tolerance > 0.0)
        {
            return Err(ConfigError::Invalid(
                "detection thresholds must be positive".into(),
            ));
        }
        if !(self.node.rate_hz > 0.0) {
            return Err(ConfigError::Invalid("node.rate_hz must be positive".into()));
        }
        Ok(())
    }

    /// Camera model assembled from the calibration section.
    pub fn camera_model(&self) -> CameraModel {
        CameraModel {
            intrinsics: CameraIntrinsics {
                fx: self.camera.fx,
                fy: self.camera.fy,
                cx: self.camera.cx,
                cy: self.camera.cy,
            },
            distortion: Distortion::from_coeffs(&self.camera.distortion),
        }
    }

    /// Decoder settings derived from the detection section.
    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            sigma: self.detection.sigma,
            confidence_threshold: self.detection.confidence_threshold,
            window_threshold: self.detection.map_threshold,
        }
    }

    /// Association tolerances derived from the detection section.
    pub fn association_config(&self) -> AssociationConfig {
        AssociationConfig {
            angle_tolerance: self.detection.angle_tolerance,
            distance_tolerance: self.detection.distance_tolerance,
        }
    }

    /// Output channel name for one object class.
    pub fn topic_for(&self, object: &ObjectConfig) -> String {
        object
            .topic
            .clone()
            .unwrap_or_else(|| format!("{}/pose_{}", self.node.topic_prefix, object.name))
    }
}
