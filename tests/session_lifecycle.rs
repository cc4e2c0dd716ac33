//! Capture lifecycle tests driven through the mock backend.
//!
//! These run the full pipeline (controller, background executor, session
//! state machine, converter and slot) without hardware.

use passthrough_cam::mock::{MockBackend, PlaneLayout, TestPattern};
use passthrough_cam::session::{OpenOutcome, SessionState};
use passthrough_cam::traits::CaptureRequest;
use passthrough_cam::validation::{
    validate_color_bars, validate_frame_sequence, validate_frame_size,
};
use passthrough_cam::{
    CameraController, CameraDescriptor, CameraError, CameraSettings, ChannelForwarder,
    FallbackPolicy, LensFacing, Resolution,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn streaming(backend: &MockBackend) -> CameraController<MockBackend> {
    streaming_with(backend, CameraSettings::default())
}

fn streaming_with(
    backend: &MockBackend,
    settings: CameraSettings,
) -> CameraController<MockBackend> {
    init_test_tracing();
    let mut controller =
        CameraController::new(backend.clone()).with_settings(settings);
    controller.initialize().expect("initialize failed");
    assert_eq!(controller.open_camera(), Ok(OpenOutcome::Opening));
    assert!(
        wait_until(|| controller.state() == SessionState::Streaming),
        "session did not reach streaming: {:?}",
        controller.last_error()
    );
    controller
}

/// Emit one pattern frame and wait until it has been converted.
fn emit_and_wait(controller: &CameraController<MockBackend>, backend: &MockBackend) {
    let before = controller.frames_converted();
    assert!(backend.emit_pattern(TestPattern::ColorBars, PlaneLayout::default()));
    assert!(
        wait_until(|| controller.frames_converted() > before),
        "frame was not converted"
    );
}

#[test]
fn test_open_reaches_streaming_with_preview_request() {
    let backend = MockBackend::passthrough();
    let controller = streaming(&backend);

    assert!(backend.is_streaming());
    assert_eq!(
        backend.last_request(),
        Some(CaptureRequest::preview(Resolution::DEFAULT))
    );
    let config = controller.config().expect("config after open");
    assert_eq!(config.camera_id, "50");
    assert_eq!(config.max_images, 2);
    assert_eq!(controller.last_error(), None);
}

#[test]
fn test_frames_are_converted_and_published() {
    let backend = MockBackend::passthrough();
    let controller = streaming(&backend);
    assert!(controller.capture_image_now().is_none());

    emit_and_wait(&controller, &backend);

    let frame = controller.capture_image_now().expect("frame published");
    validate_frame_size(&frame, Resolution::DEFAULT).expect("frame size mismatch");
    validate_color_bars(&frame).expect("color bars mismatch");

    let again = controller.capture_image_now().expect("frame still published");
    assert!(Arc::ptr_eq(&frame, &again));
}

#[test]
fn test_unsupported_resolution_end_to_end() {
    let camera = CameraDescriptor::new("50", LensFacing::External)
        .with_resolutions(vec![Resolution::new(320, 240), Resolution::new(1280, 720)]);
    let backend = MockBackend::new(vec![camera]);
    let settings = CameraSettings::default().with_resolution(Resolution::new(640, 480));
    let controller = streaming_with(&backend, settings);

    assert_eq!(
        controller.config().map(|config| config.resolution),
        Some(Resolution::new(320, 240))
    );

    emit_and_wait(&controller, &backend);

    let frame = controller.capture_image_now().expect("frame published");
    assert_eq!((frame.width(), frame.height()), (320, 240));
    assert_eq!(frame.as_bytes().len(), 320 * 240 * 4);
}

#[test]
fn test_strict_policy_rejects_unsupported_fallback() {
    let camera = CameraDescriptor::new("50", LensFacing::External)
        .with_resolutions(vec![Resolution::new(1280, 720)]);
    let backend = MockBackend::new(vec![camera]);
    let settings = CameraSettings::default()
        .with_resolution(Resolution::new(640, 480))
        .with_fallback(FallbackPolicy::Strict);
    let mut controller =
        CameraController::new(backend.clone()).with_settings(settings);
    controller.initialize().expect("initialize failed");

    assert_eq!(
        controller.open_camera(),
        Err(CameraError::ResolutionUnsupported(Resolution::DEFAULT))
    );
    assert_eq!(backend.open_count(), 0);
}

#[test]
fn test_passthrough_camera_selected() {
    let backend = MockBackend::new(vec![
        CameraDescriptor::new("10", LensFacing::Back).with_resolutions(vec![Resolution::DEFAULT]),
        CameraDescriptor::new("20", LensFacing::External)
            .with_resolutions(vec![Resolution::DEFAULT]),
        CameraDescriptor::new("51", LensFacing::Unknown)
            .with_resolutions(vec![Resolution::DEFAULT]),
    ]);
    let controller = streaming(&backend);
    assert_eq!(
        controller.config().map(|config| config.camera_id),
        Some("51".to_owned())
    );
}

#[test]
fn test_open_while_streaming_is_noop() {
    let backend = MockBackend::passthrough();
    let mut controller = streaming(&backend);

    assert_eq!(controller.open_camera(), Ok(OpenOutcome::AlreadyOpen));
    assert_eq!(backend.open_count(), 1);
    assert_eq!(controller.state(), SessionState::Streaming);
}

#[test]
fn test_session_config_failure_returns_to_closed() {
    init_test_tracing();
    let backend = MockBackend::passthrough().failing_session();
    let mut controller = CameraController::new(backend.clone());
    controller.initialize().expect("initialize failed");

    assert_eq!(controller.open_camera(), Ok(OpenOutcome::Opening));
    assert!(wait_until(|| controller.last_error().is_some()));

    assert_eq!(controller.last_error(), Some(CameraError::SessionConfigFailed));
    assert_eq!(controller.state(), SessionState::Closed);
    assert_eq!(backend.close_count(), 1);
    assert!(!backend.is_streaming());
}

#[test]
fn test_open_failure_is_recorded() {
    init_test_tracing();
    let backend = MockBackend::passthrough().failing_open();
    let mut controller = CameraController::new(backend);
    controller.initialize().expect("initialize failed");

    assert_eq!(controller.open_camera(), Ok(OpenOutcome::Opening));
    assert!(wait_until(|| controller.last_error().is_some()));

    assert!(matches!(
        controller.last_error(),
        Some(CameraError::DeviceOpenFailed(_))
    ));
    assert_eq!(controller.state(), SessionState::Closed);
}

#[test]
fn test_disconnect_closes_session_and_releases_target() {
    let backend = MockBackend::passthrough();
    let controller = streaming(&backend);
    emit_and_wait(&controller, &backend);

    backend.disconnect();
    assert!(wait_until(|| controller.state() == SessionState::Closed));

    assert_eq!(controller.last_error(), Some(CameraError::DeviceDisconnected));
    assert_eq!(backend.close_count(), 1);
    assert!(!backend.emit_pattern(TestPattern::ColorBars, PlaneLayout::default()));
}

#[test]
fn test_device_error_closes_session() {
    let backend = MockBackend::passthrough();
    let controller = streaming(&backend);

    backend.raise_error(3);
    assert!(wait_until(|| controller.state() == SessionState::Closed));

    assert_eq!(controller.last_error(), Some(CameraError::DeviceError(3)));
}

#[test]
fn test_close_is_idempotent_and_stops_frames() {
    let backend = MockBackend::passthrough();
    let mut controller = streaming(&backend);
    emit_and_wait(&controller, &backend);

    controller.close_camera();
    controller.close_camera();

    assert_eq!(controller.state(), SessionState::Closed);
    assert_eq!(controller.last_error(), None);
    assert_eq!(backend.close_count(), 1);

    let converted = controller.frames_converted();
    assert!(!backend.emit_pattern(TestPattern::ColorBars, PlaneLayout::default()));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(controller.frames_converted(), converted);
}

#[test]
fn test_reopen_requires_initialize() {
    let backend = MockBackend::passthrough();
    let mut controller = streaming(&backend);
    controller.close_camera();

    assert_eq!(controller.open_camera(), Err(CameraError::NotInitialized));

    controller.initialize().expect("initialize failed");
    assert_eq!(controller.open_camera(), Ok(OpenOutcome::Opening));
    assert!(wait_until(|| controller.state() == SessionState::Streaming));
    assert_eq!(backend.open_count(), 2);
}

#[test]
fn test_reopen_does_not_serve_previous_frame() {
    let backend = MockBackend::passthrough();
    let mut controller = streaming(&backend);
    emit_and_wait(&controller, &backend);
    controller.close_camera();
    assert!(controller.capture_image_now().is_some());

    controller.initialize().expect("initialize failed");
    assert_eq!(controller.open_camera(), Ok(OpenOutcome::Opening));
    assert!(controller.capture_image_now().is_none());

    assert!(wait_until(|| controller.state() == SessionState::Streaming));
    emit_and_wait(&controller, &backend);
    let frame = controller.capture_image_now().expect("frame published");
    assert_eq!(
        Some(frame.resolution()),
        controller.config().map(|config| config.resolution)
    );
}

#[test]
fn test_request_permission_opens_when_granted() {
    init_test_tracing();
    let backend = MockBackend::passthrough();
    let mut controller = CameraController::new(backend.clone());
    assert!(controller.has_permission());

    controller.request_permission().expect("request_permission failed");

    assert!(wait_until(|| controller.state() == SessionState::Streaming));
    assert_eq!(backend.open_count(), 1);
}

#[test]
fn test_listener_receives_published_frames() {
    let backend = MockBackend::passthrough();
    let (forwarder, receiver) = ChannelForwarder::channel(4);
    init_test_tracing();
    let mut controller =
        CameraController::new(backend.clone()).with_listener(Arc::new(forwarder));
    controller.initialize().expect("initialize failed");
    controller.open_camera().expect("open_camera failed");
    assert!(wait_until(|| controller.state() == SessionState::Streaming));

    emit_and_wait(&controller, &backend);

    let forwarded = receiver
        .recv_timeout(TIMEOUT)
        .expect("listener did not receive a frame");
    let published = controller.capture_image_now().expect("frame published");
    assert!(Arc::ptr_eq(&forwarded, &published));
}

#[test]
fn test_sequence_numbers_increase() {
    let backend = MockBackend::passthrough();
    let controller = streaming(&backend);

    let mut frames = Vec::new();
    for _ in 0..5 {
        emit_and_wait(&controller, &backend);
        frames.push(controller.capture_image_now().expect("frame published"));
    }

    validate_frame_sequence(&frames).expect("sequence not increasing");
    assert_eq!(frames.last().map(|f| f.metadata().sequence), Some(4));
}
