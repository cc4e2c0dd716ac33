//! V4L2 backend using the v4l crate.
//!
//! Cameras are identified by their `/dev/videoN` index. Frames are captured
//! as YU12 (planar YUV 4:2:0) on a dedicated thread and split into three
//! planes before they are offered to the output target.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::frame::{FrameMetadata, Plane, RawPlaneImage};
use crate::target::OutputTarget;
use crate::traits::{
    CameraBackend, CameraDescriptor, CameraDevice, CameraError, CaptureRequest, DeviceEvent,
    DeviceEvents, LensFacing, Resolution, Result,
};

/// Planar YUV 4:2:0, Y then U then V.
const YU12: [u8; 4] = *b"YU12";

/// Mmap buffers queued with the driver.
const BUFFER_COUNT: u32 = 4;

/// Longest wait for a filled buffer before the running flag is checked again.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

/// errno reported once a device node is unplugged.
const ENODEV: i32 = 19;

/// Sizes tried on drivers reporting a stepwise range.
const STEPWISE_CANDIDATES: [Resolution; 3] = [
    Resolution::new(1280, 720),
    Resolution::new(640, 480),
    Resolution::DEFAULT,
];

/// Backend enumerating `/dev/video*` capture nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Backend;

impl V4l2Backend {
    /// Create the backend.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl CameraBackend for V4l2Backend {
    fn descriptors(&self) -> Result<Vec<CameraDescriptor>> {
        let mut cameras = Vec::new();
        for node in v4l::context::enum_devices() {
            let index = node.index();
            let Ok(device) = Device::new(index) else {
                debug!(index, "skipping unopenable video node");
                continue;
            };
            let caps = match device.query_caps() {
                Ok(caps) => caps,
                Err(err) => {
                    debug!(index, error = %err, "skipping video node without caps");
                    continue;
                }
            };
            if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                continue;
            }

            let facing = if caps.bus.starts_with("usb") {
                LensFacing::External
            } else {
                LensFacing::Unknown
            };
            let resolutions = yu12_sizes(&device);
            debug!(
                index,
                card = %caps.card,
                driver = %caps.driver,
                bus = %caps.bus,
                sizes = resolutions.len(),
                "found capture device"
            );
            cameras.push(
                CameraDescriptor::new(&index.to_string(), facing).with_resolutions(resolutions),
            );
        }
        Ok(cameras)
    }

    fn open(&self, camera_id: &str, events: DeviceEvents) -> Result<()> {
        let index: usize = camera_id.parse().map_err(|_| {
            CameraError::DeviceOpenFailed(format!("invalid V4L2 camera id {camera_id}"))
        })?;
        let device =
            Device::new(index).map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        events.post(DeviceEvent::Opened(Box::new(V4l2Camera {
            id: camera_id.to_owned(),
            device: Some(device),
            target: None,
            events: None,
            format: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        })));
        Ok(())
    }
}

/// Supported YU12 frame sizes of `device`.
fn yu12_sizes(device: &Device) -> Vec<Resolution> {
    let Ok(sizes) = device.enum_framesizes(FourCC::new(&YU12)) else {
        return Vec::new();
    };
    let mut resolutions = Vec::new();
    for size in sizes {
        match size.size {
            FrameSizeEnum::Discrete(discrete) => {
                resolutions.push(Resolution::new(discrete.width, discrete.height));
            }
            FrameSizeEnum::Stepwise(step) => {
                let fits = |value: u32, min: u32, max: u32, step: u32| {
                    (min..=max).contains(&value) && (step == 0 || (value - min) % step == 0)
                };
                resolutions.extend(STEPWISE_CANDIDATES.iter().copied().filter(|res| {
                    fits(res.width, step.min_width, step.max_width, step.step_width)
                        && fits(res.height, step.min_height, step.max_height, step.step_height)
                }));
            }
        }
    }
    resolutions
}

/// Negotiated YU12 layout.
#[derive(Debug, Clone, Copy)]
struct Yu12Format {
    width: u32,
    height: u32,
    stride: u32,
}

/// An opened V4L2 capture node.
pub struct V4l2Camera {
    id: String,
    device: Option<Device>,
    target: Option<OutputTarget>,
    events: Option<DeviceEvents>,
    format: Option<Yu12Format>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CameraDevice for V4l2Camera {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_session(&mut self, target: OutputTarget, events: DeviceEvents) -> Result<()> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| CameraError::StreamError("device already streaming".to_owned()))?;

        let mut fmt = device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        let requested = target.resolution();
        fmt.width = requested.width;
        fmt.height = requested.height;
        fmt.fourcc = FourCC::new(&YU12);

        let fmt = device
            .set_format(&fmt)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        if fmt.fourcc != FourCC::new(&YU12) {
            warn!(camera_id = %self.id, fourcc = %fmt.fourcc, "device refused YU12");
            events.post(DeviceEvent::SessionConfigureFailed);
            return Ok(());
        }
        if (fmt.width, fmt.height) != (requested.width, requested.height) {
            warn!(
                camera_id = %self.id,
                %requested,
                width = fmt.width,
                height = fmt.height,
                "driver adjusted capture size"
            );
        }

        info!(
            camera_id = %self.id,
            width = fmt.width,
            height = fmt.height,
            stride = fmt.stride,
            "configured YU12 capture"
        );
        self.format = Some(Yu12Format {
            width: fmt.width,
            height: fmt.height,
            stride: fmt.stride,
        });
        self.target = Some(target);
        self.events = Some(events.clone());
        events.post(DeviceEvent::SessionConfigured);
        Ok(())
    }

    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<()> {
        let (Some(target), Some(events), Some(format)) =
            (self.target.clone(), self.events.clone(), self.format)
        else {
            return Err(CameraError::StreamError("session not configured".to_owned()));
        };
        let device = self
            .device
            .take()
            .ok_or_else(|| CameraError::StreamError("device already streaming".to_owned()))?;

        debug!(
            camera_id = %self.id,
            template = ?request.template,
            auto_focus = ?request.auto_focus,
            auto_exposure = ?request.auto_exposure,
            "starting repeating request"
        );

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let worker = thread::Builder::new()
            .name("v4l2-capture".to_owned())
            .spawn(move || capture_loop(&device, format, &target, &events, &running))
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        self.worker = Some(worker);
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(camera_id = %self.id, "capture thread panicked");
            }
        }
        self.target = None;
        self.events = None;
        self.device = None;
        debug!(camera_id = %self.id, "V4L2 device closed");
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        self.close();
    }
}

fn capture_loop(
    device: &Device,
    format: Yu12Format,
    target: &OutputTarget,
    events: &DeviceEvents,
    running: &AtomicBool,
) {
    let mut stream = match Stream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "failed to start V4L2 stream");
            events.post(stream_failure(&err));
            return;
        }
    };
    stream.set_timeout(DEQUEUE_TIMEOUT);
    info!(buffers = BUFFER_COUNT, "V4L2 capture stream started");

    while running.load(Ordering::SeqCst) {
        let idle = match stream.next() {
            Ok((buf, meta)) => {
                // V4L2 timestamps are never negative in practice
                #[allow(clippy::cast_sign_loss)]
                let secs = meta.timestamp.sec.max(0) as u64;
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

                let used = buf
                    .get(..meta.bytesused as usize)
                    .filter(|used| !used.is_empty())
                    .unwrap_or(buf);
                let image = split_yu12(used, format).with_metadata(FrameMetadata {
                    sequence: meta.sequence,
                    timestamp: Duration::new(secs, nanos),
                });
                target.offer(image);
                false
            }
            Err(err) if is_idle(&err) => true,
            Err(err) => {
                if running.load(Ordering::SeqCst) {
                    warn!(error = %err, "V4L2 capture failed");
                    events.post(stream_failure(&err));
                }
                break;
            }
        };

        if idle {
            trace!(timeout = ?DEQUEUE_TIMEOUT, "no V4L2 frame before timeout");
            if let Err(err) = reclaim_buffer(&mut stream, running) {
                if running.load(Ordering::SeqCst) {
                    warn!(error = %err, "V4L2 capture failed");
                    events.post(stream_failure(&err));
                }
                break;
            }
        }
    }
    debug!("V4L2 capture thread exiting");
}

/// Dequeue one buffer after `next()` timed out.
///
/// `next()` requeues the previous buffer before it waits, so after a timeout
/// that buffer is already with the driver and must not be queued twice. The
/// frame dequeued here is skipped; its buffer is requeued by the next
/// `next()`. Returns early once `running` is cleared.
fn reclaim_buffer(stream: &mut Stream<'_>, running: &AtomicBool) -> io::Result<()> {
    while running.load(Ordering::SeqCst) {
        match CaptureStream::dequeue(stream) {
            Ok(index) => {
                trace!(index, "skipping frame dequeued after timeout");
                return Ok(());
            }
            Err(err) if is_idle(&err) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// A dequeue that timed out without the driver reporting an error.
fn is_idle(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::TimedOut
}

fn stream_failure(err: &io::Error) -> DeviceEvent {
    match err.raw_os_error() {
        Some(ENODEV) => DeviceEvent::Disconnected,
        Some(code) => DeviceEvent::Error(code),
        None => DeviceEvent::Error(-1),
    }
}

/// Split a YU12 buffer into Y, U and V planes.
///
/// Chroma planes use half the luma stride. A short buffer yields short
/// planes; the converter reads missing samples as neutral.
fn split_yu12(buf: &[u8], format: Yu12Format) -> RawPlaneImage {
    let stride = format.stride.max(format.width) as usize;
    let chroma_stride = stride.div_ceil(2);
    let luma_len = stride * format.height as usize;
    let chroma_len = chroma_stride * format.height.div_ceil(2) as usize;

    let slice = |start: usize, len: usize| {
        let end = buf.len().min(start.saturating_add(len));
        buf.get(start.min(end)..end).map(<[u8]>::to_vec).unwrap_or_default()
    };

    RawPlaneImage::new(
        vec![
            Plane::new(slice(0, luma_len), stride, 1),
            Plane::new(slice(luma_len, chroma_len), chroma_stride, 1),
            Plane::new(slice(luma_len + chroma_len, chroma_len), chroma_stride, 1),
        ],
        format.width,
        format.height,
    )
}
