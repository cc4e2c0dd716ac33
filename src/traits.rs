//! Core traits and types for the camera device layer.
//!
//! A backend enumerates cameras and opens one of them. Everything that
//! happens after the open call (the device becoming available, session
//! configuration, images arriving, disconnects) is reported back as a
//! [`DeviceEvent`] through a [`DeviceEvents`] handle, which the capture
//! session routes onto its background executor.

use std::fmt;
use std::sync::Arc;

use crate::target::{AcquiredImage, OutputTarget};

/// Output resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Resolution {
    /// Hardcoded preview resolution used when the requested one is unsupported.
    pub const DEFAULT: Self = Self::new(320, 240);

    /// Create a new resolution.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels in a frame of this size.
    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size in bytes of a packed 4-channel frame of this size.
    #[must_use]
    pub const fn byte_len(self) -> usize {
        self.pixel_count() * 4
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Direction the camera lens faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LensFacing {
    /// Facing the user.
    Front,
    /// Facing away from the user.
    Back,
    /// Externally attached or head-mounted sensor.
    External,
    /// The backend could not tell.
    #[default]
    Unknown,
}

/// Static description of one camera, queried once at selection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDescriptor {
    /// Backend-specific camera id.
    pub id: String,
    /// Lens facing.
    pub facing: LensFacing,
    /// Output sizes supported for [`PixelFormat::Yuv420`].
    pub resolutions: Vec<Resolution>,
}

impl CameraDescriptor {
    /// Create a descriptor with no supported resolutions.
    #[must_use]
    pub fn new(id: &str, facing: LensFacing) -> Self {
        Self {
            id: id.to_owned(),
            facing,
            resolutions: Vec::new(),
        }
    }

    /// Set the supported output sizes.
    #[must_use]
    pub fn with_resolutions(mut self, resolutions: Vec<Resolution>) -> Self {
        self.resolutions = resolutions;
        self
    }

    /// Whether `resolution` is one of the supported output sizes.
    #[must_use]
    pub fn supports(&self, resolution: Resolution) -> bool {
        self.resolutions.contains(&resolution)
    }
}

/// Capture pixel format. Only planar YUV 4:2:0 with per-plane strides is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// Three planes (Y, U, V), chroma subsampled by two in both directions.
    #[default]
    Yuv420,
}

/// What to do when the fallback resolution is itself unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Proceed with [`Resolution::DEFAULT`] anyway and let the device clamp it.
    #[default]
    Lenient,
    /// Refuse to open with [`CameraError::ResolutionUnsupported`].
    Strict,
}

/// Negotiated capture configuration for one open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Selected camera id.
    pub camera_id: String,
    /// Target output resolution; every published frame has this size.
    pub resolution: Resolution,
    /// Sensor pixel format.
    pub pixel_format: PixelFormat,
    /// Maximum number of images the device may have outstanding.
    pub max_images: usize,
}

impl CaptureConfig {
    /// Create a configuration for `camera_id` at `resolution`.
    #[must_use]
    pub fn new(camera_id: &str, resolution: Resolution) -> Self {
        Self {
            camera_id: camera_id.to_owned(),
            resolution,
            pixel_format: PixelFormat::Yuv420,
            max_images: 2,
        }
    }

    /// Set the output target pool depth.
    #[must_use]
    pub const fn with_max_images(mut self, max_images: usize) -> Self {
        self.max_images = max_images;
        self
    }
}

/// Capture request template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    /// Preview stream: favors frame rate over quality.
    Preview,
}

/// Autofocus mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoFocusMode {
    /// Continuously refocus as the scene changes.
    ContinuousPicture,
}

/// Auto-exposure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoExposureMode {
    /// Auto exposure, flash fired automatically when available.
    OnAutoFlash,
}

/// A standing capture request that keeps frames flowing into the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Request template.
    pub template: RequestTemplate,
    /// Autofocus mode.
    pub auto_focus: AutoFocusMode,
    /// Auto-exposure mode.
    pub auto_exposure: AutoExposureMode,
    /// Output size of the registered target.
    pub resolution: Resolution,
}

impl CaptureRequest {
    /// Repeating preview request with continuous autofocus and auto exposure.
    #[must_use]
    pub const fn preview(resolution: Resolution) -> Self {
        Self {
            template: RequestTemplate::Preview,
            auto_focus: AutoFocusMode::ContinuousPicture,
            auto_exposure: AutoExposureMode::OnAutoFlash,
            resolution,
        }
    }
}

/// Error type for camera operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// No camera was enumerated.
    NoDeviceAvailable,
    /// The host has not granted camera access.
    PermissionDenied,
    /// The capture session could not be configured.
    SessionConfigFailed,
    /// The device went away while open.
    DeviceDisconnected,
    /// The device reported an error code.
    DeviceError(i32),
    /// Strict mode: neither the requested nor the fallback size is supported.
    ResolutionUnsupported(Resolution),
    /// `open_camera` was called before `initialize`.
    NotInitialized,
    /// The background executor thread could not be started.
    ExecutorUnavailable(String),
    /// Failed to open device.
    DeviceOpenFailed(String),
    /// Error during streaming operation.
    StreamError(String),
    /// A frame buffer has the wrong size for its dimensions.
    InvalidFrame(String),
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDeviceAvailable => write!(f, "No camera device available"),
            Self::PermissionDenied => write!(f, "Camera permission denied"),
            Self::SessionConfigFailed => write!(f, "Capture session configuration failed"),
            Self::DeviceDisconnected => write!(f, "Camera disconnected"),
            Self::DeviceError(code) => write!(f, "Camera device error {code}"),
            Self::ResolutionUnsupported(res) => write!(f, "Resolution {res} not supported"),
            Self::NotInitialized => write!(f, "Camera not initialized"),
            Self::ExecutorUnavailable(msg) => {
                write!(f, "Failed to start background executor: {msg}")
            }
            Self::DeviceOpenFailed(msg) => write!(f, "Failed to open device: {msg}"),
            Self::StreamError(msg) => write!(f, "Stream error: {msg}"),
            Self::InvalidFrame(msg) => write!(f, "Invalid frame: {msg}"),
        }
    }
}

impl std::error::Error for CameraError {}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Asynchronous notification from the device layer.
pub enum DeviceEvent {
    /// The device handle was acquired.
    Opened(Box<dyn CameraDevice>),
    /// The open request failed after it was accepted.
    OpenFailed(String),
    /// The device went away.
    Disconnected,
    /// The device reported an error code.
    Error(i32),
    /// The output target is registered and the session can stream.
    SessionConfigured,
    /// The session could not be configured.
    SessionConfigureFailed,
    /// A completed image is waiting in the output target.
    ImageAvailable(AcquiredImage),
}

impl fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened(device) => f.debug_tuple("Opened").field(&device.id()).finish(),
            Self::OpenFailed(reason) => f.debug_tuple("OpenFailed").field(reason).finish(),
            Self::Disconnected => f.write_str("Disconnected"),
            Self::Error(code) => f.debug_tuple("Error").field(code).finish(),
            Self::SessionConfigured => f.write_str("SessionConfigured"),
            Self::SessionConfigureFailed => f.write_str("SessionConfigureFailed"),
            Self::ImageAvailable(image) => f.debug_tuple("ImageAvailable").field(image).finish(),
        }
    }
}

/// Cloneable handle through which the device layer reports [`DeviceEvent`]s.
#[derive(Clone)]
pub struct DeviceEvents {
    sink: Arc<dyn Fn(DeviceEvent) + Send + Sync>,
}

impl DeviceEvents {
    /// Wrap a callback that receives every posted event.
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(DeviceEvent) + Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Report an event. Never blocks on the receiving side.
    pub fn post(&self, event: DeviceEvent) {
        (self.sink)(event);
    }
}

impl fmt::Debug for DeviceEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEvents").finish_non_exhaustive()
    }
}

/// Abstraction over the platform's camera service.
pub trait CameraBackend: Send + Sync {
    /// Enumerate cameras with their supported YUV 4:2:0 output sizes.
    fn descriptors(&self) -> Result<Vec<CameraDescriptor>>;

    /// Begin opening `camera_id`.
    ///
    /// Returns once the request is issued. Completion is reported later as
    /// [`DeviceEvent::Opened`] or [`DeviceEvent::OpenFailed`].
    fn open(&self, camera_id: &str, events: DeviceEvents) -> Result<()>;
}

/// An open camera device.
pub trait CameraDevice: Send {
    /// Id of the camera this device was opened from.
    fn id(&self) -> &str;

    /// Register `target` as the session output.
    ///
    /// Completion is reported as [`DeviceEvent::SessionConfigured`] or
    /// [`DeviceEvent::SessionConfigureFailed`].
    fn create_session(&mut self, target: OutputTarget, events: DeviceEvents) -> Result<()>;

    /// Start producing frames into the registered target until closed.
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<()>;

    /// Stop streaming and release the device. Must be idempotent.
    fn close(&mut self);
}
