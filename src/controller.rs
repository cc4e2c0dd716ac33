//! Boundary surface a host application drives.
//!
//! A [`CameraController`] owns one backend, one permission provider, the
//! frame slot and the background executor. There is no global state; hosts
//! that need a single camera keep one controller.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::executor::BackgroundExecutor;
use crate::frame::FrameBuffer;
use crate::selector::{negotiate_resolution, DeviceSelector, PASSTHROUGH_CAMERA_IDS};
use crate::session::{CaptureSession, OpenOutcome, SessionState};
use crate::slot::{FrameListener, FrameSlot};
use crate::traits::{CameraBackend, CameraError, CaptureConfig, FallbackPolicy, Resolution, Result};

/// Name of the worker thread running device events and conversions.
pub const EXECUTOR_NAME: &str = "camera-bg";

/// Host-side camera permission.
pub trait PermissionProvider: Send + Sync {
    /// Whether the camera permissions are currently granted.
    fn has_permission(&self) -> bool;

    /// Ask the host to prompt for the camera permissions.
    fn request_permission(&self);
}

/// Permission provider for hosts without a permission model.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

impl PermissionProvider for AlwaysGranted {
    fn has_permission(&self) -> bool {
        true
    }

    fn request_permission(&self) {}
}

/// Capture settings applied on every open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    /// Requested capture size.
    pub resolution: Resolution,
    /// Behavior when neither the requested nor the default size is supported.
    pub fallback: FallbackPolicy,
    /// Output target pool depth.
    pub max_images: usize,
    /// Camera ids preferred over every other camera.
    pub passthrough_ids: Vec<String>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::DEFAULT,
            fallback: FallbackPolicy::default(),
            max_images: 2,
            passthrough_ids: PASSTHROUGH_CAMERA_IDS
                .iter()
                .map(|id| (*id).to_owned())
                .collect(),
        }
    }
}

impl CameraSettings {
    /// Set the requested capture size.
    #[must_use]
    pub const fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set the fallback policy.
    #[must_use]
    pub const fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    /// Set the output target pool depth.
    #[must_use]
    pub const fn with_max_images(mut self, max_images: usize) -> Self {
        self.max_images = max_images;
        self
    }

    /// Replace the passthrough allowlist.
    #[must_use]
    pub fn with_passthrough_ids(mut self, ids: Vec<String>) -> Self {
        self.passthrough_ids = ids;
        self
    }
}

/// Single-camera capture controller.
pub struct CameraController<B: CameraBackend> {
    backend: B,
    permissions: Box<dyn PermissionProvider>,
    settings: CameraSettings,
    slot: Arc<FrameSlot>,
    listeners: Vec<Arc<dyn FrameListener>>,
    executor: Option<BackgroundExecutor>,
    session: Option<CaptureSession>,
}

impl<B: CameraBackend> CameraController<B> {
    /// Create a controller with default settings and no permission model.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            permissions: Box::new(AlwaysGranted),
            settings: CameraSettings::default(),
            slot: Arc::new(FrameSlot::new()),
            listeners: Vec::new(),
            executor: None,
            session: None,
        }
    }

    /// Use `settings` for subsequent opens.
    #[must_use]
    pub fn with_settings(mut self, settings: CameraSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Gate opens behind `permissions`.
    #[must_use]
    pub fn with_permissions<P: PermissionProvider + 'static>(mut self, permissions: P) -> Self {
        self.permissions = Box::new(permissions);
        self
    }

    /// Notify `listener` after every published frame of later sessions.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn FrameListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// The backend this controller opens cameras on.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Current settings.
    pub const fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    /// Start the background executor. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::ExecutorUnavailable`] if the worker thread
    /// cannot be spawned.
    pub fn initialize(&mut self) -> Result<()> {
        if self
            .executor
            .as_ref()
            .is_some_and(BackgroundExecutor::is_running)
        {
            debug!("controller already initialized");
            return Ok(());
        }
        self.executor = Some(BackgroundExecutor::start(EXECUTOR_NAME)?);
        Ok(())
    }

    /// Select a camera, negotiate its resolution and start streaming.
    ///
    /// Streaming starts asynchronously; poll [`state`](Self::state) or
    /// [`capture_image_now`](Self::capture_image_now).
    ///
    /// # Errors
    ///
    /// - [`CameraError::PermissionDenied`] when permission is missing; a
    ///   permission request is issued first.
    /// - [`CameraError::NotInitialized`] before [`initialize`](Self::initialize).
    /// - [`CameraError::NoDeviceAvailable`] when no camera is enumerated.
    /// - [`CameraError::ResolutionUnsupported`] under [`FallbackPolicy::Strict`].
    /// - Any error the backend returns while enumerating or opening.
    pub fn open_camera(&mut self) -> Result<OpenOutcome> {
        if !self.permissions.has_permission() {
            warn!("camera permission not granted, requesting");
            self.permissions.request_permission();
            return Err(CameraError::PermissionDenied);
        }

        let sender = self
            .executor
            .as_ref()
            .and_then(BackgroundExecutor::sender)
            .ok_or(CameraError::NotInitialized)?;

        if self.state() != SessionState::Closed {
            warn!(state = ?self.state(), "camera already open");
            return Ok(OpenOutcome::AlreadyOpen);
        }

        let descriptors = self.backend.descriptors()?;
        info!(count = descriptors.len(), "enumerated cameras");
        let selector = DeviceSelector::new(self.settings.passthrough_ids.clone());
        let camera = selector.select(&descriptors)?;
        let resolution =
            negotiate_resolution(camera, self.settings.resolution, self.settings.fallback)?;
        let config = CaptureConfig::new(&camera.id, resolution)
            .with_max_images(self.settings.max_images);

        let session = CaptureSession::new(Arc::clone(&self.slot), self.listeners.clone());
        self.session = Some(session.clone());
        session.open(&self.backend, config, &sender)
    }

    /// Stop streaming, release the camera and stop the executor.
    ///
    /// Returns once the in-flight conversion and every queued device event
    /// have drained. Idempotent; reopening requires
    /// [`initialize`](Self::initialize).
    pub fn close_camera(&mut self) {
        let Some(mut executor) = self.executor.take() else {
            if let Some(session) = &self.session {
                session.close();
            }
            return;
        };

        if let Some(session) = self.session.clone() {
            if !executor.execute(move || session.close()) {
                debug!("executor stopped before close could be queued");
            }
        }
        executor.shutdown();

        // Covers a close that could not be queued.
        if let Some(session) = &self.session {
            session.close();
        }
        info!("camera controller closed");
    }

    /// The most recent frame, `None` until the first one is published.
    /// Never blocks.
    pub fn capture_image_now(&self) -> Option<Arc<FrameBuffer>> {
        self.slot.read()
    }

    /// Whether camera permission is granted.
    pub fn has_permission(&self) -> bool {
        self.permissions.has_permission()
    }

    /// Request camera permission. When it is already granted, initialize
    /// and open the camera instead.
    ///
    /// # Errors
    ///
    /// Propagates [`initialize`](Self::initialize) and
    /// [`open_camera`](Self::open_camera) failures.
    pub fn request_permission(&mut self) -> Result<()> {
        if self.permissions.has_permission() {
            info!("camera permission already granted, opening camera");
            self.initialize()?;
            self.open_camera()?;
        } else {
            self.permissions.request_permission();
        }
        Ok(())
    }

    /// Session lifecycle state.
    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Closed, CaptureSession::state)
    }

    /// Most recent lifecycle error of the current or last session.
    pub fn last_error(&self) -> Option<CameraError> {
        self.session.as_ref().and_then(CaptureSession::last_error)
    }

    /// Negotiated configuration of the current or last session.
    pub fn config(&self) -> Option<CaptureConfig> {
        self.session.as_ref().and_then(CaptureSession::config)
    }

    /// Frames converted by the current or last session.
    pub fn frames_converted(&self) -> u64 {
        self.session
            .as_ref()
            .map_or(0, CaptureSession::frames_converted)
    }

    /// Shared handle to the latest-frame slot.
    pub fn frame_slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.slot)
    }
}

impl<B: CameraBackend> Drop for CameraController<B> {
    fn drop(&mut self) {
        self.close_camera();
    }
}

impl<B: CameraBackend> std::fmt::Debug for CameraController<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraController")
            .field("settings", &self.settings)
            .field("state", &self.state())
            .field("initialized", &self.executor.is_some())
            .finish_non_exhaustive()
    }
}
