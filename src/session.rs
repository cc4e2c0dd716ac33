//! Capture session state machine.
//!
//! The session owns the device handle and the output target. Device callbacks
//! arrive as [`DeviceEvent`]s and are applied on the background executor, in
//! arrival order:
//!
//! ```text
//! Closed -> Opening -> Opened -> SessionConfiguring -> Streaming
//!    ^                                                     |
//!    +------------------------- Closing <------------------+
//! ```
//!
//! Lifecycle failures are recorded as the session's last error and logged;
//! they never cross the executor boundary as a panic or return value.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, error, info, trace, warn};

use crate::convert::convert;
use crate::executor::TaskSender;
use crate::slot::{FrameListener, FrameSlot};
use crate::target::{AcquiredImage, OutputTarget};
use crate::traits::{
    CameraBackend, CameraDevice, CameraError, CaptureConfig, CaptureRequest, DeviceEvent,
    DeviceEvents, Result,
};

/// Lifecycle state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No device held.
    #[default]
    Closed,
    /// Open requested, waiting for the device.
    Opening,
    /// Device handle acquired.
    Opened,
    /// Output target registered, waiting for the session to configure.
    SessionConfiguring,
    /// Repeating request issued; frames are flowing.
    Streaming,
    /// Releasing target and device.
    Closing,
}

/// Result of a successful open call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The device open was issued; streaming starts asynchronously.
    Opening,
    /// A session is already active; nothing was done.
    AlreadyOpen,
}

struct SessionCore {
    state: SessionState,
    config: Option<CaptureConfig>,
    device: Option<Box<dyn CameraDevice>>,
    target: Option<OutputTarget>,
    events: Option<DeviceEvents>,
    last_error: Option<CameraError>,
    frames_converted: u64,
    generation: u64,
    slot: Arc<FrameSlot>,
    listeners: Vec<Arc<dyn FrameListener>>,
}

/// Shared handle to one camera's capture session.
#[derive(Clone)]
pub struct CaptureSession {
    core: Arc<Mutex<SessionCore>>,
}

impl CaptureSession {
    /// Create a closed session publishing into `slot` and notifying `listeners`.
    #[must_use]
    pub fn new(slot: Arc<FrameSlot>, listeners: Vec<Arc<dyn FrameListener>>) -> Self {
        Self {
            core: Arc::new(Mutex::new(SessionCore {
                state: SessionState::Closed,
                config: None,
                device: None,
                target: None,
                events: None,
                last_error: None,
                frames_converted: 0,
                generation: 0,
                slot,
                listeners,
            })),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Most recent lifecycle error, cleared by the next open.
    #[must_use]
    pub fn last_error(&self) -> Option<CameraError> {
        self.lock().last_error.clone()
    }

    /// Configuration of the current or most recent session.
    #[must_use]
    pub fn config(&self) -> Option<CaptureConfig> {
        self.lock().config.clone()
    }

    /// Number of frames converted and published so far.
    #[must_use]
    pub fn frames_converted(&self) -> u64 {
        self.lock().frames_converted
    }

    /// Begin opening the configured camera.
    ///
    /// Device events are queued onto `executor`. Returns
    /// [`OpenOutcome::AlreadyOpen`] without side effects unless the session
    /// is closed.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if it refuses the open request outright;
    /// the session is back in [`SessionState::Closed`] in that case.
    pub fn open(
        &self,
        backend: &dyn CameraBackend,
        config: CaptureConfig,
        executor: &TaskSender,
    ) -> Result<OpenOutcome> {
        let events = self.device_events(executor.clone());
        {
            let mut core = self.lock();
            if core.state != SessionState::Closed {
                warn!(state = ?core.state, "camera already open");
                return Ok(OpenOutcome::AlreadyOpen);
            }
            core.state = SessionState::Opening;
            core.last_error = None;
            core.generation += 1;
            core.slot.clear();
            core.target = Some(OutputTarget::new(
                config.resolution,
                config.max_images,
                events.clone(),
            ));
            core.events = Some(events.clone());
            core.config = Some(config.clone());
        }

        info!(
            camera_id = %config.camera_id,
            width = config.resolution.width,
            height = config.resolution.height,
            "opening camera"
        );
        if let Err(err) = backend.open(&config.camera_id, events) {
            error!(camera_id = %config.camera_id, error = %err, "failed to open camera");
            self.lock().fail(err.clone());
            return Err(err);
        }
        Ok(OpenOutcome::Opening)
    }

    /// Release the output target, then the device. Idempotent.
    pub fn close(&self) {
        self.lock().teardown();
    }

    /// Apply one device event. Called on the background executor.
    pub fn handle_event(&self, event: DeviceEvent) {
        dispatch(&self.core, event);
    }

    fn device_events(&self, executor: TaskSender) -> DeviceEvents {
        let core = Arc::downgrade(&self.core);
        DeviceEvents::new(move |event| {
            let core = Weak::clone(&core);
            let queued = executor.execute(move || {
                if let Some(core) = core.upgrade() {
                    dispatch(&core, event);
                }
            });
            if !queued {
                trace!("background executor stopped, dropping device event");
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionCore> {
        lock(&self.core)
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.lock();
        f.debug_struct("CaptureSession")
            .field("state", &core.state)
            .field("config", &core.config)
            .field("last_error", &core.last_error)
            .field("frames_converted", &core.frames_converted)
            .finish_non_exhaustive()
    }
}

fn lock(core: &Mutex<SessionCore>) -> MutexGuard<'_, SessionCore> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Apply one device event. Only image delivery runs partly unlocked.
fn dispatch(core: &Mutex<SessionCore>, event: DeviceEvent) {
    trace!(?event, "device event");
    match event {
        DeviceEvent::Opened(device) => lock(core).on_opened(device),
        DeviceEvent::OpenFailed(reason) => {
            error!(%reason, "camera open failed");
            lock(core).fail(CameraError::DeviceOpenFailed(reason));
        }
        DeviceEvent::Disconnected => {
            warn!("camera disconnected");
            lock(core).fail(CameraError::DeviceDisconnected);
        }
        DeviceEvent::Error(code) => {
            error!(code, "camera error");
            lock(core).fail(CameraError::DeviceError(code));
        }
        DeviceEvent::SessionConfigured => lock(core).on_configured(),
        DeviceEvent::SessionConfigureFailed => {
            error!("capture session configuration failed");
            lock(core).fail(CameraError::SessionConfigFailed);
        }
        DeviceEvent::ImageAvailable(image) => deliver(core, &image),
    }
}

/// Convert one image and publish it.
///
/// Conversion and listener callbacks run without the session lock, so a
/// listener may query the session. The frame is dropped if the session
/// stopped streaming or was reopened while converting.
fn deliver(core: &Mutex<SessionCore>, image: &AcquiredImage) {
    let (resolution, generation) = {
        let core = lock(core);
        if core.state != SessionState::Streaming {
            trace!(state = ?core.state, "releasing image outside streaming state");
            return;
        }
        let Some(config) = core.config.as_ref() else {
            return;
        };
        (config.resolution, core.generation)
    };

    let frame = Arc::new(convert(image.image(), resolution));

    let listeners = {
        let mut core = lock(core);
        if core.state != SessionState::Streaming || core.generation != generation {
            trace!(state = ?core.state, "session changed during conversion, dropping frame");
            return;
        }
        core.frames_converted += 1;
        trace!(
            sequence = frame.metadata().sequence,
            bytes = frame.as_bytes().len(),
            "publishing frame"
        );
        core.slot.publish_shared(Arc::clone(&frame));
        core.listeners.clone()
    };
    for listener in &listeners {
        listener.on_frame(&frame);
    }
}

impl SessionCore {
    fn on_opened(&mut self, mut device: Box<dyn CameraDevice>) {
        if self.state != SessionState::Opening {
            debug!(camera_id = device.id(), state = ?self.state, "late open, releasing device");
            device.close();
            return;
        }
        self.state = SessionState::Opened;
        info!(camera_id = device.id(), "camera opened");

        let (Some(target), Some(events)) = (self.target.clone(), self.events.clone()) else {
            device.close();
            self.fail(CameraError::SessionConfigFailed);
            return;
        };

        self.state = SessionState::SessionConfiguring;
        let result = device.create_session(target, events);
        self.device = Some(device);
        if let Err(err) = result {
            error!(error = %err, "failed to create capture session");
            self.fail(CameraError::SessionConfigFailed);
        }
    }

    fn on_configured(&mut self) {
        if self.state != SessionState::SessionConfiguring {
            debug!(state = ?self.state, "ignoring late session configuration");
            return;
        }
        let Some(resolution) = self.config.as_ref().map(|config| config.resolution) else {
            self.fail(CameraError::SessionConfigFailed);
            return;
        };
        let Some(device) = self.device.as_mut() else {
            self.fail(CameraError::SessionConfigFailed);
            return;
        };

        match device.set_repeating_request(&CaptureRequest::preview(resolution)) {
            Ok(()) => {
                self.state = SessionState::Streaming;
                info!(%resolution, "camera capture started");
            }
            Err(err) => {
                error!(error = %err, "failed to start capture");
                self.fail(err);
            }
        }
    }

    fn fail(&mut self, err: CameraError) {
        if self.state == SessionState::Closed {
            debug!(error = %err, "ignoring error reported after close");
            return;
        }
        self.last_error = Some(err);
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;
        if let Some(target) = self.target.take() {
            target.close();
        }
        if let Some(mut device) = self.device.take() {
            device.close();
        }
        self.events = None;
        self.state = SessionState::Closed;
        info!("camera closed");
    }
}
