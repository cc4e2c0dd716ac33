//! Output target registered with the device for a capture session.
//!
//! The target is a bounded pool: the device may have at most `max_images`
//! images acquired by the pipeline at once. Each offered image is handed out
//! as an [`AcquiredImage`] that returns its pool slot when dropped, so release
//! happens even if processing unwinds.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::frame::RawPlaneImage;
use crate::traits::{DeviceEvent, DeviceEvents, Resolution};

struct Pool {
    resolution: Resolution,
    max_images: usize,
    outstanding: AtomicUsize,
    closed: AtomicBool,
    events: DeviceEvents,
}

/// Image sink the device writes completed frames into.
#[derive(Clone)]
pub struct OutputTarget {
    pool: Arc<Pool>,
}

impl OutputTarget {
    /// Create a target for `resolution` images, notifying through `events`.
    #[must_use]
    pub fn new(resolution: Resolution, max_images: usize, events: DeviceEvents) -> Self {
        Self {
            pool: Arc::new(Pool {
                resolution,
                max_images,
                outstanding: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Size the device was asked to produce.
    #[must_use]
    pub fn resolution(&self) -> Resolution {
        self.pool.resolution
    }

    /// Pool depth.
    #[must_use]
    pub fn max_images(&self) -> usize {
        self.pool.max_images
    }

    /// Images acquired and not yet released.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pool.outstanding.load(Ordering::Acquire)
    }

    /// Offer a completed image.
    ///
    /// Returns `false` when the target is closed or every pool slot is held,
    /// in which case the image is dropped.
    pub fn offer(&self, image: RawPlaneImage) -> bool {
        if self.is_closed() {
            tracing::trace!(sequence = image.metadata.sequence, "target closed, dropping image");
            return false;
        }

        let max = self.pool.max_images;
        let reserved = self
            .pool
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < max).then_some(held + 1)
            })
            .is_ok();
        if !reserved {
            tracing::trace!(
                sequence = image.metadata.sequence,
                max_images = max,
                "output target pool exhausted, dropping image"
            );
            return false;
        }

        let acquired = AcquiredImage {
            image,
            pool: Arc::clone(&self.pool),
        };
        self.pool.events.post(DeviceEvent::ImageAvailable(acquired));
        true
    }

    /// Stop accepting images. Idempotent.
    pub fn close(&self) {
        self.pool.closed.store(true, Ordering::Release);
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputTarget")
            .field("resolution", &self.resolution())
            .field("max_images", &self.max_images())
            .field("outstanding", &self.outstanding())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// An image held by the pipeline; returns its pool slot on drop.
pub struct AcquiredImage {
    image: RawPlaneImage,
    pool: Arc<Pool>,
}

impl AcquiredImage {
    /// The sensor image.
    #[must_use]
    pub const fn image(&self) -> &RawPlaneImage {
        &self.image
    }
}

impl Drop for AcquiredImage {
    fn drop(&mut self) {
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for AcquiredImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquiredImage")
            .field("width", &self.image.width)
            .field("height", &self.image.height)
            .field("sequence", &self.image.metadata.sequence)
            .finish_non_exhaustive()
    }
}
