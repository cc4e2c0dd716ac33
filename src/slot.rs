//! Latest-frame slot shared between the capture pipeline and its consumer.
//!
//! The slot holds at most one frame. Publishing replaces the current frame
//! atomically, so a reader either sees the previous frame or the new one,
//! never a partially written buffer. There is no queue and no backpressure.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::frame::FrameBuffer;

/// Single-writer, multi-reader holder for the most recent frame.
#[derive(Debug, Default)]
pub struct FrameSlot {
    current: ArcSwapOption<FrameBuffer>,
}

impl FrameSlot {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame.
    pub fn publish(&self, frame: FrameBuffer) {
        self.publish_shared(Arc::new(frame));
    }

    /// Replace the current frame with an already shared one.
    pub fn publish_shared(&self, frame: Arc<FrameBuffer>) {
        self.current.store(Some(frame));
    }

    /// The current frame without consuming it; `None` until the first publish.
    #[must_use]
    pub fn read(&self) -> Option<Arc<FrameBuffer>> {
        self.current.load_full()
    }

    /// Drop the current frame.
    pub fn clear(&self) {
        self.current.store(None);
    }
}

/// Receives every frame right after it is published.
///
/// Listeners run on the background executor and must not block.
pub trait FrameListener: Send + Sync {
    /// Called once per published frame.
    fn on_frame(&self, frame: &Arc<FrameBuffer>);
}

/// Listener that forwards frames into a bounded channel.
///
/// A full channel drops the frame instead of stalling the capture pipeline.
#[derive(Debug)]
pub struct ChannelForwarder {
    sender: SyncSender<Arc<FrameBuffer>>,
}

impl ChannelForwarder {
    /// Create a forwarder and the receiving end of its channel.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, Receiver<Arc<FrameBuffer>>) {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        (Self { sender }, receiver)
    }
}

impl FrameListener for ChannelForwarder {
    fn on_frame(&self, frame: &Arc<FrameBuffer>) {
        match self.sender.try_send(Arc::clone(frame)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::trace!(
                    sequence = frame.metadata().sequence,
                    "frame channel full, dropping frame"
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::trace!("frame channel receiver gone");
            }
        }
    }
}
