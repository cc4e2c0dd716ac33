//! YUV 4:2:0 to packed BGRA conversion.
//!
//! Conversion is total: every call returns a frame sized for the target
//! resolution. Samples that fall outside their plane read as neutral 128, a
//! malformed color image is converted through the grayscale path instead, and
//! pixels outside `min(target, source)` stay zero-filled.

use std::fmt;
use std::iter;

use crate::frame::{FrameBuffer, Plane, RawPlaneImage};
use crate::traits::Resolution;

/// Mid-scale value substituted for out-of-range luma and chroma samples.
pub const NEUTRAL_SAMPLE: u8 = 128;

/// Reason the full-color path rejected an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionError {
    /// The image has fewer than three planes.
    MissingPlanes(usize),
    /// A plane cannot address distinct samples.
    InvalidStride {
        /// Plane name (`"Y"`, `"U"` or `"V"`).
        plane: &'static str,
    },
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPlanes(count) => write!(f, "expected 3 planes, got {count}"),
            Self::InvalidStride { plane } => write!(f, "{plane} plane has a zero stride"),
        }
    }
}

impl std::error::Error for ConversionError {}

/// Convert a sensor image into a BGRA frame of size `target`.
///
/// Images with fewer than three planes, and color images the full-color path
/// rejects, are converted to grayscale from the luma plane.
#[must_use]
pub fn convert(image: &RawPlaneImage, target: Resolution) -> FrameBuffer {
    if image.planes.len() < 3 {
        tracing::trace!(
            planes = image.planes.len(),
            "not enough planes for color, converting to grayscale"
        );
        return luma_to_bgra(image, target);
    }

    match yuv420_to_bgra(image, target) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::debug!(error = %err, "color conversion failed, falling back to grayscale");
            luma_to_bgra(image, target)
        }
    }
}

/// Full-color conversion of a three-plane YUV 4:2:0 image.
pub fn yuv420_to_bgra(
    image: &RawPlaneImage,
    target: Resolution,
) -> Result<FrameBuffer, ConversionError> {
    let [y_plane, u_plane, v_plane] = match image.planes.as_slice() {
        [y, u, v, ..] => [y, u, v],
        planes => return Err(ConversionError::MissingPlanes(planes.len())),
    };
    for (plane, name) in [(y_plane, "Y"), (u_plane, "U"), (v_plane, "V")] {
        check_strides(plane, name)?;
    }

    let mut frame = FrameBuffer::zeroed(target).with_metadata(image.metadata);
    let rows = target.height.min(image.height) as usize;
    let cols = target.width.min(image.width) as usize;

    for (row, out_row) in frame.rows_mut().enumerate().take(rows) {
        let uv_row = row / 2;
        for (col, pixel) in out_row.chunks_exact_mut(4).enumerate().take(cols) {
            let uv_col = col / 2;
            let y = y_plane.sample(row, col).unwrap_or(NEUTRAL_SAMPLE);
            let u = u_plane.sample(uv_row, uv_col).unwrap_or(NEUTRAL_SAMPLE);
            let v = v_plane.sample(uv_row, uv_col).unwrap_or(NEUTRAL_SAMPLE);
            let (r, g, b) = yuv_to_rgb(y, u, v);
            pixel.copy_from_slice(&[b, g, r, u8::MAX]);
        }
    }

    Ok(frame)
}

/// Grayscale conversion from the luma plane: R = G = B = Y, A = 255.
///
/// With no planes at all, every in-bounds pixel is neutral gray.
#[must_use]
pub fn luma_to_bgra(image: &RawPlaneImage, target: Resolution) -> FrameBuffer {
    let mut frame = FrameBuffer::zeroed(target).with_metadata(image.metadata);
    let rows = target.height.min(image.height) as usize;
    let cols = target.width.min(image.width) as usize;
    let luma = image.luma();

    for (row, out_row) in frame.rows_mut().enumerate().take(rows) {
        let pixels = out_row.chunks_exact_mut(4).take(cols);
        match luma {
            Some(plane) if plane.pixel_stride == 1 && plane.row_stride == image.width as usize => {
                // Rows are contiguous: copy the row slice directly.
                let start = row.saturating_mul(plane.row_stride);
                let src = plane.data.get(start..).unwrap_or_default();
                let samples = src.iter().copied().chain(iter::repeat(NEUTRAL_SAMPLE));
                write_gray(pixels, samples);
            }
            Some(plane) => {
                let samples =
                    (0..cols).map(|col| plane.sample(row, col).unwrap_or(NEUTRAL_SAMPLE));
                write_gray(pixels, samples);
            }
            None => write_gray(pixels, iter::repeat(NEUTRAL_SAMPLE)),
        }
    }

    frame
}

fn write_gray<'a, P, S>(pixels: P, samples: S)
where
    P: Iterator<Item = &'a mut [u8]>,
    S: Iterator<Item = u8>,
{
    for (pixel, y) in pixels.zip(samples) {
        pixel.copy_from_slice(&[y, y, y, u8::MAX]);
    }
}

fn check_strides(plane: &Plane, name: &'static str) -> Result<(), ConversionError> {
    if plane.pixel_stride == 0 || plane.row_stride == 0 {
        return Err(ConversionError::InvalidStride { plane: name });
    }
    Ok(())
}

/// Convert one YUV sample triple to RGB.
///
/// Uses the BT.601 full-range coefficients; each channel is truncated toward
/// zero and clamped to 0-255.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714f32.mul_add(-v_f, 0.344f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    (clamp_channel(r), clamp_channel(g), clamp_channel(b))
}

fn clamp_channel(value: f32) -> u8 {
    #[allow(clippy::cast_possible_truncation)]
    let truncated = value as i32;
    u8::try_from(truncated.clamp(0, 255)).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameMetadata;

    fn neutral_image(width: u32, height: u32, luma: u8) -> RawPlaneImage {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        RawPlaneImage::new(
            vec![
                Plane::packed(vec![luma; w * h], w),
                Plane::packed(vec![NEUTRAL_SAMPLE; cw * ch], cw),
                Plane::packed(vec![NEUTRAL_SAMPLE; cw * ch], cw),
            ],
            width,
            height,
        )
    }

    #[test]
    fn test_grayscale_packed_plane_is_identity_copy() {
        let (width, height) = (16u32, 8u32);
        let luma: Vec<u8> = (0..width * height).map(|i| (i * 7 % 256) as u8).collect();
        let image = RawPlaneImage::new(
            vec![Plane::packed(luma.clone(), width as usize)],
            width,
            height,
        );

        let frame = luma_to_bgra(&image, Resolution::new(width, height));

        for (pixel, expected) in frame.as_bytes().chunks_exact(4).zip(&luma) {
            assert_eq!(pixel, [*expected, *expected, *expected, 255]);
        }
    }

    #[test]
    fn test_grayscale_strided_gather() {
        // 3x2 luma samples, pixel stride 2, row stride 8
        let data = vec![10, 0, 20, 0, 30, 0, 0, 0, 40, 0, 50, 0, 60, 0, 0, 0];
        let image = RawPlaneImage::new(vec![Plane::new(data, 8, 2)], 3, 2);

        let frame = luma_to_bgra(&image, Resolution::new(3, 2));

        let luma: Vec<u8> = frame.as_bytes().chunks_exact(4).map(|px| px[0]).collect();
        assert_eq!(luma, [10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn test_grayscale_short_plane_reads_neutral() {
        let image = RawPlaneImage::new(vec![Plane::packed(vec![200; 4], 4)], 4, 2);

        let frame = luma_to_bgra(&image, Resolution::new(4, 2));

        assert_eq!(frame.pixel_at(3, 0), Some((200, 200, 200)));
        assert_eq!(frame.pixel_at(0, 1), Some((128, 128, 128)));
    }

    #[test]
    fn test_neutral_color_matches_grayscale() {
        for luma in [0u8, 17, 128, 200, 255] {
            let image = neutral_image(10, 6, luma);
            let target = Resolution::new(10, 6);

            let color = yuv420_to_bgra(&image, target).expect("valid image");
            let gray = luma_to_bgra(&image, target);

            assert_eq!(color.as_bytes(), gray.as_bytes(), "luma {luma}");
        }
    }

    #[test]
    fn test_extreme_chroma_is_clamped() {
        for (u, v) in [(0u8, 0u8), (0, 255), (255, 0), (255, 255)] {
            let (r, g, b) = yuv_to_rgb(255, u, v);
            let (r0, g0, b0) = yuv_to_rgb(0, u, v);
            // u8 cannot exceed the range; check the saturated ends are hit.
            assert!(r == 255 || g == 255 || b == 255, "u={u} v={v}");
            assert!(r0 == 0 || g0 == 0 || b0 == 0, "u={u} v={v}");
        }
        assert_eq!(yuv_to_rgb(255, 255, 255), (255, 120, 255));
        assert_eq!(yuv_to_rgb(0, 0, 0), (0, 135, 0));
    }

    #[test]
    fn test_known_colors() {
        assert_eq!(yuv_to_rgb(128, 128, 128), (128, 128, 128));
        // Pure red-ish: high V
        let (r, g, b) = yuv_to_rgb(81, 90, 240);
        assert!(r > 230 && g < 30 && b < 30, "got ({r}, {g}, {b})");
    }

    #[test]
    fn test_output_order_is_bgra() {
        let mut image = neutral_image(2, 2, 100);
        image.planes[1] = Plane::packed(vec![200], 1);

        let frame = yuv420_to_bgra(&image, Resolution::new(2, 2)).expect("valid image");

        let (r, g, b) = yuv_to_rgb(100, 200, 128);
        assert_eq!(&frame.as_bytes()[..4], &[b, g, r, 255]);
    }

    #[test]
    fn test_semi_planar_chroma_strides() {
        // Interleaved UV buffer shared by both chroma planes (pixel stride 2).
        let y = vec![120; 4 * 2];
        let uv = vec![60, 200, 70, 190];
        let image = RawPlaneImage::new(
            vec![
                Plane::packed(y, 4),
                Plane::new(uv.clone(), 4, 2),
                Plane::new(uv[1..].to_vec(), 4, 2),
            ],
            4,
            2,
        );

        let frame = yuv420_to_bgra(&image, Resolution::new(4, 2)).expect("valid image");

        let expected_left = yuv_to_rgb(120, 60, 200);
        let expected_right = yuv_to_rgb(120, 70, 190);
        assert_eq!(frame.pixel_at(1, 1), Some(expected_left));
        assert_eq!(frame.pixel_at(2, 0), Some(expected_right));
    }

    #[test]
    fn test_short_chroma_plane_reads_neutral() {
        let mut image = neutral_image(4, 4, 90);
        image.planes[1] = Plane::packed(vec![255], 2);
        image.planes[2] = Plane::packed(Vec::new(), 2);

        let frame = yuv420_to_bgra(&image, Resolution::new(4, 4)).expect("valid image");

        assert_eq!(frame.pixel_at(0, 0), Some(yuv_to_rgb(90, 255, 128)));
        assert_eq!(frame.pixel_at(3, 3), Some((90, 90, 90)));
    }

    #[test]
    fn test_output_sized_for_target_not_source() {
        let image = neutral_image(64, 48, 50);
        let target = Resolution::new(32, 24);

        let frame = convert(&image, target);

        assert_eq!(frame.resolution(), target);
        assert_eq!(frame.as_bytes().len(), target.byte_len());
        assert!(frame.as_bytes().chunks_exact(4).all(|px| px == [50, 50, 50, 255]));
    }

    #[test]
    fn test_pixels_beyond_source_are_zero_filled() {
        let image = neutral_image(4, 2, 50);

        let frame = convert(&image, Resolution::new(6, 3));

        assert_eq!(frame.as_bytes().len(), 6 * 3 * 4);
        assert_eq!(frame.pixel_at(3, 1), Some((50, 50, 50)));
        let bytes = frame.as_bytes();
        assert_eq!(&bytes[4 * 4..6 * 4], &[0; 8]);
        assert!(bytes[2 * 6 * 4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_single_plane_routes_to_grayscale() {
        let luma: Vec<u8> = (0u8..=255).cycle().take(20 * 10).collect();
        let image = RawPlaneImage::new(vec![Plane::packed(luma, 20)], 20, 10);
        let target = Resolution::new(20, 10);

        let frame = convert(&image, target);

        assert_eq!(frame.as_bytes().len(), target.byte_len());
        for px in frame.as_bytes().chunks_exact(4) {
            assert_eq!(px[0], px[1]);
            assert_eq!(px[1], px[2]);
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn test_invalid_stride_falls_back_to_grayscale() {
        let mut image = neutral_image(4, 4, 77);
        image.planes[2] = Plane::new(vec![255; 4], 2, 0);

        assert_eq!(
            yuv420_to_bgra(&image, Resolution::new(4, 4)),
            Err(ConversionError::InvalidStride { plane: "V" })
        );

        let frame = convert(&image, Resolution::new(4, 4));
        assert!(frame.as_bytes().chunks_exact(4).all(|px| px == [77, 77, 77, 255]));
    }

    #[test]
    fn test_no_planes_is_neutral_gray() {
        let image = RawPlaneImage::new(Vec::new(), 2, 2);

        let frame = convert(&image, Resolution::new(2, 2));

        assert!(frame.as_bytes().chunks_exact(4).all(|px| px == [128, 128, 128, 255]));
    }

    #[test]
    fn test_metadata_carried_over() {
        let metadata = FrameMetadata {
            sequence: 42,
            timestamp: std::time::Duration::from_millis(1386),
        };
        let image = neutral_image(2, 2, 10).with_metadata(metadata);

        assert_eq!(convert(&image, Resolution::new(2, 2)).metadata(), metadata);
    }
}
