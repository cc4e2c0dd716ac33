//! Mock backend for testing without hardware.
//!
//! [`MockBackend`] behaves like an asynchronous camera stack: opening and
//! configuring complete through [`DeviceEvent`]s, and frames are pushed by the
//! test (or demo producer) through [`MockBackend::emit`] or
//! [`MockBackend::emit_pattern`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::frame::{FrameMetadata, Plane, RawPlaneImage};
use crate::target::OutputTarget;
use crate::traits::{
    CameraBackend, CameraDescriptor, CameraDevice, CameraError, CaptureRequest, DeviceEvent,
    DeviceEvents, LensFacing, Resolution, Result,
};

/// Frame interval used for mock timestamps (~30fps).
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Default)]
struct MockState {
    descriptors: Vec<CameraDescriptor>,
    fail_open: bool,
    fail_session: bool,
    events: Option<DeviceEvents>,
    target: Option<OutputTarget>,
    streaming: bool,
    last_request: Option<CaptureRequest>,
    open_count: usize,
    close_count: usize,
    sequence: u32,
}

/// Scriptable in-process camera backend.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    /// Create a backend enumerating `descriptors`.
    #[must_use]
    pub fn new(descriptors: Vec<CameraDescriptor>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                descriptors,
                ..MockState::default()
            })),
        }
    }

    /// A single external camera "50" supporting the default size.
    #[must_use]
    pub fn passthrough() -> Self {
        Self::new(vec![CameraDescriptor::new("50", LensFacing::External)
            .with_resolutions(vec![Resolution::DEFAULT])])
    }

    /// Report an asynchronous open failure for every open.
    #[must_use]
    pub fn failing_open(self) -> Self {
        self.lock().fail_open = true;
        self
    }

    /// Report a session configuration failure for every session.
    #[must_use]
    pub fn failing_session(self) -> Self {
        self.lock().fail_session = true;
        self
    }

    /// Push `image` into the active session's output target.
    ///
    /// Sequence numbers and timestamps are assigned here. Returns `false`
    /// when nothing is streaming or the target refused the image.
    pub fn emit(&self, image: RawPlaneImage) -> bool {
        let (target, metadata) = {
            let mut state = self.lock();
            let Some(target) = state.target.clone().filter(|_| state.streaming) else {
                return false;
            };
            let sequence = state.sequence;
            state.sequence = state.sequence.wrapping_add(1);
            let metadata = FrameMetadata {
                sequence,
                timestamp: FRAME_INTERVAL * sequence,
            };
            (target, metadata)
        };
        target.offer(image.with_metadata(metadata))
    }

    /// Generate `pattern` at the session's resolution and push it.
    pub fn emit_pattern(&self, pattern: TestPattern, layout: PlaneLayout) -> bool {
        let Some(resolution) = self.lock().target.as_ref().map(OutputTarget::resolution) else {
            return false;
        };
        self.emit(pattern.yuv420(resolution, layout))
    }

    /// Simulate the camera going away.
    pub fn disconnect(&self) {
        self.post(DeviceEvent::Disconnected);
    }

    /// Simulate a device error with `code`.
    pub fn raise_error(&self, code: i32) {
        self.post(DeviceEvent::Error(code));
    }

    /// Whether a repeating request is active.
    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }

    /// The last repeating request issued.
    pub fn last_request(&self) -> Option<CaptureRequest> {
        self.lock().last_request.clone()
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.lock().open_count
    }

    /// Number of device closes.
    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }

    fn post(&self, event: DeviceEvent) {
        let events = self.lock().events.clone();
        if let Some(events) = events {
            events.post(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CameraBackend for MockBackend {
    fn descriptors(&self) -> Result<Vec<CameraDescriptor>> {
        Ok(self.lock().descriptors.clone())
    }

    fn open(&self, camera_id: &str, events: DeviceEvents) -> Result<()> {
        let fail_open = {
            let mut state = self.lock();
            if !state.descriptors.iter().any(|camera| camera.id == camera_id) {
                return Err(CameraError::DeviceOpenFailed(format!(
                    "no mock camera with id {camera_id}"
                )));
            }
            state.events = Some(events.clone());
            if !state.fail_open {
                state.open_count += 1;
            }
            state.fail_open
        };

        if fail_open {
            events.post(DeviceEvent::OpenFailed(format!("mock camera {camera_id} busy")));
        } else {
            events.post(DeviceEvent::Opened(Box::new(MockDevice {
                id: camera_id.to_owned(),
                backend: self.clone(),
            })));
        }
        Ok(())
    }
}

/// Device handle handed out by [`MockBackend`].
pub struct MockDevice {
    id: String,
    backend: MockBackend,
}

impl CameraDevice for MockDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_session(&mut self, target: OutputTarget, events: DeviceEvents) -> Result<()> {
        let fail_session = {
            let mut state = self.backend.lock();
            state.target = Some(target);
            state.fail_session
        };
        if fail_session {
            events.post(DeviceEvent::SessionConfigureFailed);
        } else {
            events.post(DeviceEvent::SessionConfigured);
        }
        Ok(())
    }

    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<()> {
        let mut state = self.backend.lock();
        state.last_request = Some(request.clone());
        state.streaming = true;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.backend.lock();
        state.streaming = false;
        state.target = None;
        state.close_count += 1;
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
}

/// How the chroma planes of a generated image are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneLayout {
    /// Separate U and V planes, pixel stride 1.
    Planar {
        /// Bytes appended to every row of every plane.
        row_padding: usize,
    },
    /// Interleaved UV buffer viewed as two planes, pixel stride 2.
    SemiPlanar {
        /// Bytes appended to every row of every plane.
        row_padding: usize,
    },
}

impl Default for PlaneLayout {
    fn default() -> Self {
        Self::Planar { row_padding: 0 }
    }
}

/// YUV values for the 8 color bars:
/// White, Yellow, Cyan, Green, Magenta, Red, Blue, Black.
const COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 128, 128),
    (210, 16, 146),
    (170, 166, 16),
    (145, 54, 34),
    (106, 202, 222),
    (81, 90, 240),
    (41, 240, 110),
    (16, 128, 128),
];

impl TestPattern {
    /// YUV triple at column `x` of a `width` wide frame.
    fn sample(self, x: u32, width: u32) -> (u8, u8, u8) {
        match self {
            Self::ColorBars => {
                let bar_width = (width / 8).max(1);
                let index = usize::try_from(x / bar_width).unwrap_or(usize::MAX).min(7);
                COLOR_BARS.get(index).copied().unwrap_or((16, 128, 128))
            }
            Self::Gradient => {
                let value = u64::from(x) * 255 / u64::from(width.max(1));
                (u8::try_from(value).unwrap_or(u8::MAX), 128, 128)
            }
        }
    }

    /// Render the pattern as a three-plane YUV 4:2:0 image.
    #[must_use]
    pub fn yuv420(self, resolution: Resolution, layout: PlaneLayout) -> RawPlaneImage {
        let Resolution { width, height } = resolution;
        let chroma_width = width.div_ceil(2);
        let chroma_height = height.div_ceil(2);

        let (semi_planar, padding) = match layout {
            PlaneLayout::Planar { row_padding } => (false, row_padding),
            PlaneLayout::SemiPlanar { row_padding } => (true, row_padding),
        };

        let luma = rows(height, padding, (0..width).map(|x| self.sample(x, width).0).collect());
        let luma_stride = width as usize + padding;

        let planes = if semi_planar {
            let interleaved = (0..chroma_width)
                .flat_map(|cx| {
                    let (_, u, v) = self.sample(cx * 2, width);
                    [u, v]
                })
                .collect();
            let uv = rows(chroma_height, padding, interleaved);
            let uv_stride = chroma_width as usize * 2 + padding;
            let v_data = uv.get(1..).map(<[u8]>::to_vec).unwrap_or_default();
            vec![
                Plane::new(luma, luma_stride, 1),
                Plane::new(uv, uv_stride, 2),
                Plane::new(v_data, uv_stride, 2),
            ]
        } else {
            let chroma = |pick: fn((u8, u8, u8)) -> u8| {
                let row = (0..chroma_width)
                    .map(|cx| pick(self.sample(cx * 2, width)))
                    .collect();
                rows(chroma_height, padding, row)
            };
            let chroma_stride = chroma_width as usize + padding;
            vec![
                Plane::new(luma, luma_stride, 1),
                Plane::new(chroma(|(_, u, _)| u), chroma_stride, 1),
                Plane::new(chroma(|(_, _, v)| v), chroma_stride, 1),
            ]
        };

        RawPlaneImage::new(planes, width, height)
    }
}

/// Repeat `row` `count` times, each copy followed by `padding` zero bytes.
fn rows(count: u32, padding: usize, mut row: Vec<u8>) -> Vec<u8> {
    row.resize(row.len() + padding, 0);
    row.repeat(count as usize)
}
