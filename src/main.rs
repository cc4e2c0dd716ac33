//! Passthrough-cam binary for testing the capture pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use passthrough_cam::mock::{MockBackend, PlaneLayout, TestPattern};
use passthrough_cam::validation::{validate_color_bars, validate_frame_size, validate_gradient};
use passthrough_cam::{
    CameraBackend, CameraController, CameraDescriptor, CameraError, CameraSettings,
    FallbackPolicy, LensFacing, Resolution, Result, SessionState,
};
use tracing::{info, warn};

/// How long to wait for the session to reach streaming.
const STREAM_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// V4L2 capture devices
    V4l2,
    /// In-process test pattern generator
    Mock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PatternKind {
    Bars,
    Gradient,
}

#[derive(Debug, Parser)]
#[command(name = "passthrough-cam")]
#[command(about = "Open a camera and poll BGRA frames the way a consumer would")]
#[command(version)]
struct Args {
    /// Camera backend
    #[arg(short, long, value_enum, default_value_t = BackendKind::V4l2)]
    backend: BackendKind,

    /// List cameras and exit
    #[arg(short, long)]
    list: bool,

    /// Requested capture width
    #[arg(long, default_value_t = Resolution::DEFAULT.width)]
    width: u32,

    /// Requested capture height
    #[arg(long, default_value_t = Resolution::DEFAULT.height)]
    height: u32,

    /// Fail instead of proceeding when no supported size is found
    #[arg(long)]
    strict: bool,

    /// Number of distinct frames to receive before exiting
    #[arg(short, long, default_value_t = 30)]
    frames: u64,

    /// Consumer poll interval in milliseconds
    #[arg(long, default_value_t = 33)]
    poll_ms: u64,

    /// Pattern produced by the mock backend
    #[arg(long, value_enum, default_value_t = PatternKind::Bars)]
    pattern: PatternKind,
}

impl Args {
    fn settings(&self) -> CameraSettings {
        let fallback = if self.strict {
            FallbackPolicy::Strict
        } else {
            FallbackPolicy::Lenient
        };
        CameraSettings::default()
            .with_resolution(Resolution::new(self.width, self.height))
            .with_fallback(fallback)
    }
}

fn main() {
    // Set RUST_LOG to control the log level, e.g. RUST_LOG=passthrough_cam=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    if let Err(err) = run(&Args::parse()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    match args.backend {
        BackendKind::V4l2 => run_v4l2(args),
        BackendKind::Mock => {
            let camera = CameraDescriptor::new("50", LensFacing::External)
                .with_resolutions(vec![Resolution::new(640, 480), Resolution::DEFAULT]);
            let backend = MockBackend::new(vec![camera]);
            run_backend(backend.clone(), args, Some(backend))
        }
    }
}

#[cfg(feature = "v4l2")]
fn run_v4l2(args: &Args) -> Result<()> {
    run_backend(passthrough_cam::V4l2Backend::new(), args, None)
}

#[cfg(not(feature = "v4l2"))]
fn run_v4l2(_args: &Args) -> Result<()> {
    Err(CameraError::DeviceOpenFailed(
        "built without the v4l2 feature".to_owned(),
    ))
}

fn run_backend<B: CameraBackend>(
    backend: B,
    args: &Args,
    producer: Option<MockBackend>,
) -> Result<()> {
    if args.list {
        for camera in backend.descriptors()? {
            println!(
                "Camera {}: {:?}, sizes: {:?}",
                camera.id, camera.facing, camera.resolutions
            );
        }
        return Ok(());
    }

    let mut controller = CameraController::new(backend).with_settings(args.settings());
    controller.initialize()?;
    controller.open_camera()?;
    wait_for_streaming(&controller)?;

    let config = controller.config().ok_or(CameraError::NotInitialized)?;
    info!(
        camera_id = %config.camera_id,
        resolution = %config.resolution,
        "streaming"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let poll = Duration::from_millis(args.poll_ms);
    let producer = producer.map(|mock| spawn_producer(mock, args.pattern, poll, &stop));

    let mut received = 0;
    let mut last_sequence = None;
    let started = Instant::now();
    while received < args.frames {
        if let Some(err) = controller.last_error() {
            stop.store(true, Ordering::SeqCst);
            return Err(err);
        }
        if let Some(frame) = controller.capture_image_now() {
            let sequence = frame.metadata().sequence;
            if last_sequence != Some(sequence) {
                validate_frame_size(&frame, config.resolution)?;
                println!(
                    "Frame {sequence}: {}x{} {} bytes, timestamp: {:?}",
                    frame.width(),
                    frame.height(),
                    frame.as_bytes().len(),
                    frame.metadata().timestamp
                );
                if producer.is_some() {
                    let check = match args.pattern {
                        PatternKind::Bars => validate_color_bars(&frame),
                        PatternKind::Gradient => validate_gradient(&frame),
                    };
                    if let Err(err) = check {
                        warn!(sequence, error = %err, "pattern check failed");
                    }
                }
                last_sequence = Some(sequence);
                received += 1;
            }
        }
        thread::sleep(poll);
    }

    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = producer {
        if handle.join().is_err() {
            warn!("mock producer thread panicked");
        }
    }

    let frames_converted = controller.frames_converted();
    controller.close_camera();
    info!(
        received,
        frames_converted,
        elapsed_ms = started.elapsed().as_millis(),
        "capture finished"
    );
    Ok(())
}

fn wait_for_streaming<B: CameraBackend>(controller: &CameraController<B>) -> Result<()> {
    let deadline = Instant::now() + STREAM_TIMEOUT;
    while controller.state() != SessionState::Streaming {
        if let Some(err) = controller.last_error() {
            return Err(err);
        }
        if Instant::now() >= deadline {
            return Err(CameraError::StreamError(format!(
                "camera did not start streaming within {STREAM_TIMEOUT:?}"
            )));
        }
        thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}

fn spawn_producer(
    mock: MockBackend,
    pattern: PatternKind,
    interval: Duration,
    stop: &Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    let stop = Arc::clone(stop);
    let pattern = match pattern {
        PatternKind::Bars => TestPattern::ColorBars,
        PatternKind::Gradient => TestPattern::Gradient,
    };
    thread::spawn(move || {
        while !stop.load(Ordering::SeqCst) {
            mock.emit_pattern(pattern, PlaneLayout::SemiPlanar { row_padding: 32 });
            thread::sleep(interval);
        }
    })
}
