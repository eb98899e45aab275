//! The perception node: per-class pipelines, the frame orchestrator,
//! and the fixed-rate processing loop.
//!
//! One node owns one camera feed and N object classes. Every tick it
//! takes the latest image, runs each class pipeline (network inference
//! plus detection plus pose solve) on its own thread, then publishes
//! the pose messages and one combined debug overlay. Class pipelines
//! are independent; a failure in one never aborts the others.

pub mod image_slot;
pub mod messages;

pub use image_slot::{CameraFrame, ImageSlot};
pub use messages::{DirectorySink, LogSink, PoseMessage, PoseSink};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use image::RgbImage;
use nalgebra::Vector2;
use tracing::{debug, info, warn};

use crate::detection::{
    AssociationConfig, CENTROID_INDEX, Cuboid3d, DecoderConfig, Keypoint, NUM_CORNERS,
    ObjectInstance, assemble, associate, decode,
};
use crate::geometry::{CameraModel, PnpOutcome, PoseResult, solve};
use crate::inference::PoseNetwork;
use crate::viz::{OverlayLayer, render_overlay};

/// Conversion applied once at the publishing boundary: the solver works
/// in centimeters, messages carry meters.
const CM_TO_METERS: f64 = 0.01;

/// Everything needed to detect one object class: its cuboid model, its
/// network, and its output naming.
pub struct ClassPipeline {
    pub name: String,
    pub cuboid: Cuboid3d,
    pub draw_color: [u8; 3],
    pub topic: String,
    network: Box<dyn PoseNetwork>,
}

impl ClassPipeline {
    pub fn new(
        name: impl Into<String>,
        cuboid: Cuboid3d,
        draw_color: [u8; 3],
        topic: impl Into<String>,
        network: Box<dyn PoseNetwork>,
    ) -> Self {
        Self {
            name: name.into(),
            cuboid,
            draw_color,
            topic: topic.into(),
            network,
        }
    }
}

/// Runs the full detection pipeline for every configured class on one
/// image and collects the per-class poses.
pub struct FrameOrchestrator {
    camera: CameraModel,
    decoder: DecoderConfig,
    association: AssociationConfig,
    classes: Vec<ClassPipeline>,
}

impl FrameOrchestrator {
    pub fn new(
        camera: CameraModel,
        decoder: DecoderConfig,
        association: AssociationConfig,
    ) -> Self {
        Self {
            camera,
            decoder,
            association,
            classes: Vec::new(),
        }
    }

    pub fn add_class(&mut self, pipeline: ClassPipeline) {
        self.classes.push(pipeline);
    }

    pub fn classes(&self) -> &[ClassPipeline] {
        &self.classes
    }

    /// Process one image: every class pipeline in parallel, results
    /// keyed by class name. A class whose inference fails logs a
    /// warning and contributes an empty list.
    pub fn process_frame(&mut self, image: &RgbImage) -> HashMap<String, Vec<PoseResult>> {
        let camera = &self.camera;
        let decoder = &self.decoder;
        let association = &self.association;

        let mut results = HashMap::with_capacity(self.classes.len());
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .classes
                .iter_mut()
                .map(|pipeline| {
                    scope.spawn(move || {
                        let outcome =
                            detect_class(pipeline, image, camera, decoder, association);
                        (pipeline.name.clone(), outcome)
                    })
                })
                .collect();

            for handle in handles {
                // Scoped threads only panic if the closure does; the
                // closures return their errors instead.
                let (name, outcome) = match handle.join() {
                    Ok(pair) => pair,
                    Err(_) => continue,
                };
                let poses = match outcome {
                    Ok(poses) => poses,
                    Err(error) => {
                        warn!(class = %name, %error, "class pipeline failed, skipping frame");
                        Vec::new()
                    }
                };
                results.insert(name, poses);
            }
        });
        results
    }
}

/// One class on one image: inference, decode, associate, assemble,
/// solve.
fn detect_class(
    pipeline: &mut ClassPipeline,
    image: &RgbImage,
    camera: &CameraModel,
    decoder: &DecoderConfig,
    association: &AssociationConfig,
) -> Result<Vec<PoseResult>> {
    let output = pipeline.network.infer(image)?;
    let (map_width, map_height) = output.map_size();
    if map_width == 0 || map_height == 0 {
        bail!("network returned empty output grids");
    }
    // Map-space keypoints are scaled up to image pixels before the
    // solve; the solver never sees the downsample factor.
    let scale_x = image.width() as f64 / map_width as f64;
    let scale_y = image.height() as f64 / map_height as f64;

    let corners: Vec<Vec<Keypoint>> = (0..NUM_CORNERS)
        .map(|channel| decode(&output.beliefs[channel], channel, decoder))
        .collect();
    let centroids = decode(&output.beliefs[CENTROID_INDEX], CENTROID_INDEX, decoder);
    let associations = associate(&corners, &centroids, &output.affinities, association);
    let instances = assemble(&corners, &centroids, &associations);

    let mut poses = Vec::new();
    for instance in &instances {
        let scaled = scale_to_image(instance, scale_x, scale_y);
        match solve(&scaled, &pipeline.cuboid, camera) {
            PnpOutcome::Pose(pose) => poses.push(pose),
            PnpOutcome::Insufficient => {
                debug!(
                    class = %pipeline.name,
                    points = instance.num_points(),
                    "instance geometry insufficient for a pose"
                );
            }
        }
    }
    Ok(poses)
}

fn scale_to_image(instance: &ObjectInstance, scale_x: f64, scale_y: f64) -> ObjectInstance {
    let mut scaled = instance.clone();
    for point in scaled.points.iter_mut().flatten() {
        *point = Vector2::new(point.x * scale_x, point.y * scale_y);
    }
    scaled
}

/// The fixed-rate processing loop wired to a frame source and a sink.
pub struct PoseNode {
    orchestrator: FrameOrchestrator,
    slot: Arc<ImageSlot>,
    sink: Box<dyn PoseSink>,
    frame_id: String,
    period: Duration,
    shutdown: Arc<AtomicBool>,
}

impl PoseNode {
    pub fn new(
        orchestrator: FrameOrchestrator,
        slot: Arc<ImageSlot>,
        sink: Box<dyn PoseSink>,
        frame_id: impl Into<String>,
        rate_hz: f64,
    ) -> Self {
        Self {
            orchestrator,
            slot,
            sink,
            frame_id: frame_id.into(),
            period: Duration::from_secs_f64(1.0 / rate_hz),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag handle for signal handlers; setting it ends [`run`] after
    /// the current tick.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run until shutdown. Each tick takes the latest frame (dropping
    /// stale ones), processes it, and publishes. Ticks with no frame
    /// are idle; overruns delay the next tick rather than queue.
    pub fn run(&mut self) -> Result<()> {
        info!(
            classes = self.orchestrator.classes().len(),
            period_ms = self.period.as_millis() as u64,
            "node loop started"
        );
        while !self.shutdown.load(Ordering::Relaxed) {
            let tick = Instant::now();
            let Some(frame) = self.slot.take(self.period) else {
                continue;
            };
            self.process_and_publish(&frame);
            let elapsed = tick.elapsed();
            if elapsed < self.period {
                std::thread::sleep(self.period - elapsed);
            }
        }
        info!("node loop stopped");
        Ok(())
    }

    fn process_and_publish(&mut self, frame: &CameraFrame) {
        let results = self.orchestrator.process_frame(&frame.image);

        for class in self.orchestrator.classes() {
            let Some(poses) = results.get(&class.name) else {
                continue;
            };
            for pose in poses {
                let message = PoseMessage {
                    class_name: class.name.clone(),
                    topic: class.topic.clone(),
                    frame_id: self.frame_id.clone(),
                    timestamp: frame.timestamp,
                    position: pose.translation * CM_TO_METERS,
                    orientation: pose.rotation,
                    dimensions: class.cuboid.dimensions,
                };
                if let Err(error) = self.sink.publish_pose(&message) {
                    warn!(topic = %message.topic, %error, "failed to publish pose");
                }
            }
        }

        let layers: Vec<OverlayLayer<'_>> = self
            .orchestrator
            .classes()
            .iter()
            .filter_map(|class| {
                results.get(&class.name).map(|poses| OverlayLayer {
                    color: class.draw_color,
                    poses,
                })
            })
            .collect();
        let overlay = render_overlay(&frame.image, &layers);
        if let Err(error) = self.sink.publish_overlay(frame.sequence, &overlay) {
            warn!(%error, "failed to publish overlay");
        }
    }
}
