//! Sensor images and converted frame buffers.

use std::slice::ChunksExactMut;
use std::time::Duration;

use crate::traits::{CameraError, Resolution, Result};

/// Metadata for a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
}

/// One single-channel sub-image of a multi-plane image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    /// Raw plane bytes.
    pub data: Vec<u8>,
    /// Bytes between the starts of consecutive rows.
    pub row_stride: usize,
    /// Bytes between consecutive samples within a row.
    pub pixel_stride: usize,
}

impl Plane {
    /// Create a plane with explicit strides.
    #[must_use]
    pub const fn new(data: Vec<u8>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }

    /// Create a fully packed plane: pixel stride 1, no row padding.
    #[must_use]
    pub const fn packed(data: Vec<u8>, width: usize) -> Self {
        Self::new(data, width, 1)
    }

    /// Byte offset of the sample at (`row`, `col`), `None` on overflow.
    #[must_use]
    pub fn offset(&self, row: usize, col: usize) -> Option<usize> {
        row.checked_mul(self.row_stride)?
            .checked_add(col.checked_mul(self.pixel_stride)?)
    }

    /// Sample at (`row`, `col`), `None` if it falls outside the buffer.
    #[must_use]
    pub fn sample(&self, row: usize, col: usize) -> Option<u8> {
        self.offset(row, col)
            .and_then(|offset| self.data.get(offset).copied())
    }
}

/// A multi-plane chroma-subsampled image as delivered by the sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPlaneImage {
    /// Planes in Y, U, V order. Fewer than three means luma only.
    pub planes: Vec<Plane>,
    /// Width reported by the sensor.
    pub width: u32,
    /// Height reported by the sensor.
    pub height: u32,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl RawPlaneImage {
    /// Create an image from its planes and sensor-reported size.
    #[must_use]
    pub fn new(planes: Vec<Plane>, width: u32, height: u32) -> Self {
        Self {
            planes,
            width,
            height,
            metadata: FrameMetadata::default(),
        }
    }

    /// Attach capture metadata.
    #[must_use]
    pub const fn with_metadata(mut self, metadata: FrameMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The luma plane, if any.
    #[must_use]
    pub fn luma(&self) -> Option<&Plane> {
        self.planes.first()
    }
}

/// Packed B, G, R, A frame sized for the capture target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    data: Vec<u8>,
    resolution: Resolution,
    metadata: FrameMetadata,
}

impl FrameBuffer {
    /// All-zero frame (fully transparent black).
    #[must_use]
    pub fn zeroed(resolution: Resolution) -> Self {
        Self {
            data: vec![0; resolution.byte_len()],
            resolution,
            metadata: FrameMetadata::default(),
        }
    }

    /// Wrap existing BGRA bytes, checking the length against the dimensions.
    pub fn from_bgra(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let resolution = Resolution::new(width, height);
        if data.len() != resolution.byte_len() {
            return Err(CameraError::InvalidFrame(format!(
                "expected {} bytes for {resolution}, got {}",
                resolution.byte_len(),
                data.len()
            )));
        }
        Ok(Self {
            data,
            resolution,
            metadata: FrameMetadata::default(),
        })
    }

    /// Attach metadata carried over from the source image.
    #[must_use]
    pub const fn with_metadata(mut self, metadata: FrameMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Frame width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.resolution.width
    }

    /// Frame height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Frame dimensions.
    #[must_use]
    pub const fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Metadata of the sensor image this frame was converted from.
    #[must_use]
    pub const fn metadata(&self) -> FrameMetadata {
        self.metadata
    }

    /// Raw BGRA bytes, `width * height * 4` long.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the frame, returning its BGRA bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// RGB values of the pixel at (`x`, `y`), `None` outside the frame.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.resolution.width || y >= self.resolution.height {
            return None;
        }
        let offset = (y as usize * self.resolution.width as usize + x as usize) * 4;
        match self.data.get(offset..offset + 4)? {
            [b, g, r, _] => Some((*r, *g, *b)),
            _ => None,
        }
    }

    /// Mutable rows of the frame, `width * 4` bytes each.
    pub(crate) fn rows_mut(&mut self) -> ChunksExactMut<'_, u8> {
        // A zero-width frame has no bytes, so any non-zero chunk size yields no rows.
        let row_bytes = (self.resolution.width as usize * 4).max(1);
        self.data.chunks_exact_mut(row_bytes)
    }
}
