//! Camera and resolution selection policy.

use tracing::{debug, warn};

use crate::traits::{CameraDescriptor, CameraError, FallbackPolicy, LensFacing, Resolution, Result};

/// Ids reserved for head-mounted passthrough cameras.
pub const PASSTHROUGH_CAMERA_IDS: [&str; 2] = ["50", "51"];

/// Picks one camera out of the enumerated candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSelector {
    passthrough_ids: Vec<String>,
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self::new(PASSTHROUGH_CAMERA_IDS.iter().map(|id| (*id).to_owned()).collect())
    }
}

impl DeviceSelector {
    /// Create a selector preferring the given passthrough ids.
    #[must_use]
    pub const fn new(passthrough_ids: Vec<String>) -> Self {
        Self { passthrough_ids }
    }

    /// Choose a camera, first match wins:
    ///
    /// 1. an id in the passthrough allowlist,
    /// 2. an externally facing camera,
    /// 3. the first camera enumerated.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::NoDeviceAvailable`] for an empty candidate list.
    pub fn select<'a>(&self, candidates: &'a [CameraDescriptor]) -> Result<&'a CameraDescriptor> {
        if let Some(camera) = candidates
            .iter()
            .find(|camera| self.passthrough_ids.contains(&camera.id))
        {
            debug!(camera_id = %camera.id, facing = ?camera.facing, "selected passthrough camera");
            return Ok(camera);
        }

        if let Some(camera) = candidates
            .iter()
            .find(|camera| camera.facing == LensFacing::External)
        {
            debug!(camera_id = %camera.id, "selected external camera");
            return Ok(camera);
        }

        let camera = candidates.first().ok_or(CameraError::NoDeviceAvailable)?;
        debug!(camera_id = %camera.id, "falling back to first camera");
        Ok(camera)
    }
}

/// Pick the capture resolution for `camera`.
///
/// An unsupported `requested` size degrades to [`Resolution::DEFAULT`]. When
/// the default is unsupported as well, [`FallbackPolicy::Lenient`] proceeds
/// with it anyway and [`FallbackPolicy::Strict`] fails.
///
/// # Errors
///
/// Returns [`CameraError::ResolutionUnsupported`] in strict mode when the
/// fallback is not supported either.
pub fn negotiate_resolution(
    camera: &CameraDescriptor,
    requested: Resolution,
    policy: FallbackPolicy,
) -> Result<Resolution> {
    debug!(
        camera_id = %camera.id,
        supported = ?camera.resolutions,
        "supported YUV sizes"
    );
    if camera.supports(requested) {
        return Ok(requested);
    }

    let fallback = Resolution::DEFAULT;
    warn!(
        camera_id = %camera.id,
        %requested,
        %fallback,
        "requested resolution not supported, falling back"
    );
    if camera.supports(fallback) {
        return Ok(fallback);
    }

    match policy {
        FallbackPolicy::Lenient => {
            warn!(
                camera_id = %camera.id,
                %fallback,
                "fallback resolution not supported either, proceeding anyway"
            );
            Ok(fallback)
        }
        FallbackPolicy::Strict => Err(CameraError::ResolutionUnsupported(fallback)),
    }
}
