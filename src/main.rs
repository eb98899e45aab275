use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cuboid_pose::config::Config;
use cuboid_pose::detection::Cuboid3d;
use cuboid_pose::inference::PoseNetwork;
use cuboid_pose::io::ImageDirectorySource;
use cuboid_pose::node::{
    ClassPipeline, DirectorySink, FrameOrchestrator, ImageSlot, LogSink, PoseNode, PoseSink,
};

/// Detect configured object classes in a stream of camera images and
/// publish their 6-DoF poses.
#[derive(Parser)]
#[command(name = "cuboid-pose", version)]
struct Args {
    /// Configuration file (camera calibration, thresholds, objects).
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Directory of input frames, replayed in filename order.
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for pose records and overlays. Poses are only
    /// logged when absent.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    info!(
        config = %args.config.display(),
        classes = config.objects.len(),
        rate_hz = config.node.rate_hz,
        "starting"
    );

    let mut orchestrator = FrameOrchestrator::new(
        config.camera_model(),
        config.decoder_config(),
        config.association_config(),
    );
    for object in &config.objects {
        let network = load_network(&object.weights)
            .with_context(|| format!("failed to set up network for class '{}'", object.name))?;
        let cuboid = Cuboid3d::from_dimensions(
            object.dimensions[0],
            object.dimensions[1],
            object.dimensions[2],
        );
        info!(class = %object.name, weights = %object.weights.display(), "class ready");
        orchestrator.add_class(ClassPipeline::new(
            &object.name,
            cuboid,
            object.draw_color,
            config.topic_for(object),
            network,
        ));
    }

    let sink: Box<dyn PoseSink> = match &args.output {
        Some(directory) => Box::new(DirectorySink::create(directory.clone())?),
        None => Box::new(LogSink),
    };

    let slot = ImageSlot::new();
    let mut node = PoseNode::new(
        orchestrator,
        slot.clone(),
        sink,
        config.node.frame_id.clone(),
        config.node.rate_hz,
    );

    let shutdown = node.shutdown_handle();
    let signal_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        signal_flag.store(true, Ordering::Relaxed);
    })
    .context("failed to install signal handler")?;

    // Replay the input directory at the node rate on its own thread;
    // the slot drops frames the loop does not keep up with.
    let mut source = ImageDirectorySource::open(&args.input)?;
    let period = Duration::from_secs_f64(1.0 / config.node.rate_hz);
    let max_frames = args.max_frames;
    let feeder_flag = shutdown.clone();
    let feeder = std::thread::spawn(move || {
        let mut published = 0usize;
        while !feeder_flag.load(Ordering::Relaxed) {
            if max_frames.is_some_and(|limit| published >= limit) {
                break;
            }
            match source.next_frame() {
                Some(Ok(frame)) => {
                    slot.publish(frame);
                    published += 1;
                }
                Some(Err(error)) => warn!(%error, "skipping unreadable frame"),
                None => break,
            }
            std::thread::sleep(period);
        }
        // Give the loop one more tick to drain the last frame.
        std::thread::sleep(2 * period);
        feeder_flag.store(true, Ordering::Relaxed);
        info!(frames = published, "input exhausted");
    });

    node.run()?;
    if feeder.join().is_err() {
        warn!("frame feeder thread panicked");
    }
    Ok(())
}

#[cfg(feature = "onnx")]
fn load_network(weights: &Path) -> Result<Box<dyn PoseNetwork>> {
    Ok(Box::new(cuboid_pose::inference::onnx::OrtPoseNetwork::load(
        weights,
    )?))
}

#[cfg(not(feature = "onnx"))]
fn load_network(_weights: &Path) -> Result<Box<dyn PoseNetwork>> {
    anyhow::bail!("built without the `onnx` feature; rebuild with `--features onnx` to run inference")
}
