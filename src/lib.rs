//! Passthrough-Cam: a single-camera capture pipeline producing BGRA frames
//!
//! This library selects one camera, negotiates a capture size, converts each
//! YUV 4:2:0 sensor image to packed BGRA on a background worker, and keeps
//! the latest frame in a lock-free slot for a consumer to poll. Devices sit
//! behind trait-based abstractions, enabling both production use with V4L2
//! hardware and testing with the mock backend.

pub mod controller;
pub mod convert;
#[cfg(feature = "v4l2")]
pub mod device;
pub mod executor;
pub mod frame;
pub mod mock;
pub mod selector;
pub mod session;
pub mod slot;
pub mod target;
pub mod traits;
pub mod validation;

pub use controller::{AlwaysGranted, CameraController, CameraSettings, PermissionProvider};
#[cfg(feature = "v4l2")]
pub use device::V4l2Backend;
pub use frame::{FrameBuffer, FrameMetadata, Plane, RawPlaneImage};
pub use session::{OpenOutcome, SessionState};
pub use slot::{ChannelForwarder, FrameListener, FrameSlot};
pub use traits::{
    CameraBackend, CameraDescriptor, CameraDevice, CameraError, CaptureConfig, DeviceEvent,
    DeviceEvents, FallbackPolicy, LensFacing, Resolution, Result,
};
