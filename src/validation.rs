//! Frame validation utilities for test pattern verification.
//!
//! These check converted BGRA frames against the patterns the mock backend
//! (or a virtual V4L2 camera) produces.

use std::sync::Arc;

use crate::frame::FrameBuffer;
use crate::traits::{CameraError, Resolution, Result};

/// Expected RGB values for SMPTE color bars (8 bars).
///
/// These are the RGB values resulting from converting the YUV values
/// used by the mock backend's color bar pattern.
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235), // White
    (235, 235, 11),  // Yellow
    (12, 236, 237),  // Cyan
    (13, 237, 13),   // Green
    (237, 13, 237),  // Magenta
    (238, 14, 13),   // Red
    (15, 15, 239),   // Blue
    (16, 16, 16),    // Black
];

/// Tolerance for RGB color matching (accounts for YUV->RGB conversion errors).
const COLOR_TOLERANCE: u8 = 15;

/// Validates that a frame has the expected size and a `width*height*4`
/// byte buffer.
///
/// # Errors
///
/// Returns `InvalidFrame` on a size or buffer length mismatch.
pub fn validate_frame_size(frame: &FrameBuffer, expected: Resolution) -> Result<()> {
    if frame.resolution() != expected {
        return Err(CameraError::InvalidFrame(format!(
            "frame is {}, expected {expected}",
            frame.resolution()
        )));
    }
    if frame.as_bytes().len() != expected.byte_len() {
        return Err(CameraError::InvalidFrame(format!(
            "buffer holds {} bytes, expected {}",
            frame.as_bytes().len(),
            expected.byte_len()
        )));
    }
    Ok(())
}

/// Validates that a frame contains the SMPTE color bar pattern.
///
/// This function checks 8 vertical stripes at their center positions,
/// verifying that each stripe contains the expected color with a tolerance
/// for YUV-to-RGB conversion inaccuracies.
///
/// # Errors
///
/// Returns `InvalidFrame` if any color bar doesn't match the expected color
/// within tolerance.
pub fn validate_color_bars(frame: &FrameBuffer) -> Result<()> {
    let bar_width = frame.width() / 8;
    let center_y = frame.height() / 2;

    for (bar_idx, expected_rgb) in (0u32..).zip(SMPTE_COLOR_BARS.iter()) {
        // Sample the center of each bar
        let sample_x = (bar_idx * bar_width) + (bar_width / 2);

        let actual_rgb = frame.pixel_at(sample_x, center_y).ok_or_else(|| {
            CameraError::InvalidFrame(format!("Failed to get pixel at ({sample_x}, {center_y})"))
        })?;

        if !colors_match(actual_rgb, *expected_rgb, COLOR_TOLERANCE) {
            return Err(CameraError::InvalidFrame(format!(
                "Color bar {bar_idx} mismatch at ({sample_x}, {center_y}): \
                 expected RGB{expected_rgb:?}, got RGB{actual_rgb:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that a frame contains a horizontal gradient pattern.
///
/// Samples a horizontal line at the center of the frame and verifies that
/// the luminance increases monotonically from left to right, with a
/// significant overall change (not a solid color).
///
/// # Errors
///
/// Returns `InvalidFrame` if the luminance decreases or barely changes.
pub fn validate_gradient(frame: &FrameBuffer) -> Result<()> {
    let center_y = frame.height() / 2;

    // Sample every 10 pixels to check for monotonic increase
    let sample_step = 10;
    let mut first_luminance: Option<f32> = None;
    let mut prev_luminance: Option<f32> = None;

    for x in (0..frame.width()).step_by(sample_step) {
        let (r, g, b) = frame.pixel_at(x, center_y).ok_or_else(|| {
            CameraError::InvalidFrame(format!("Failed to get pixel at ({x}, {center_y})"))
        })?;

        // Calculate luminance (Y' in Rec. 601)
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        if let Some(prev) = prev_luminance {
            // Allow small decreases due to rounding
            if luminance < prev - 1.0 {
                return Err(CameraError::InvalidFrame(format!(
                    "Gradient not monotonically increasing at x={x}: \
                     luminance {luminance} < previous {prev}"
                )));
            }
        }

        first_luminance.get_or_insert(luminance);
        prev_luminance = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first_luminance, prev_luminance) {
        let luminance_change = last - first;
        if luminance_change < 50.0 {
            return Err(CameraError::InvalidFrame(format!(
                "Insufficient luminance change for gradient: {luminance_change} \
                 (expected at least 50.0)"
            )));
        }
    }

    Ok(())
}

/// Validates that frames read from the slot are strictly increasing in
/// sequence number.
///
/// Gaps are allowed: the slot only keeps the latest frame, so a consumer
/// polling slower than the camera skips frames.
///
/// # Errors
///
/// Returns `InvalidFrame` for an empty slice or a sequence number that does
/// not increase.
pub fn validate_frame_sequence(frames: &[Arc<FrameBuffer>]) -> Result<()> {
    if frames.is_empty() {
        return Err(CameraError::InvalidFrame(
            "Cannot validate empty frame sequence".to_owned(),
        ));
    }

    for (index, pair) in frames.windows(2).enumerate() {
        if let [prev, curr] = pair {
            let prev_seq = prev.metadata().sequence;
            let curr_seq = curr.metadata().sequence;
            if curr_seq <= prev_seq {
                return Err(CameraError::InvalidFrame(format!(
                    "Frame sequence not increasing at index {}: {prev_seq} then {curr_seq}",
                    index + 1
                )));
            }
        }
    }

    Ok(())
}

/// Check if two RGB colors match within `tolerance` per channel.
#[must_use]
pub const fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u8) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;

    ar.abs_diff(er) <= tolerance && ag.abs_diff(eg) <= tolerance && ab.abs_diff(eb) <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::convert;
    use crate::frame::FrameMetadata;
    use crate::mock::{PlaneLayout, TestPattern};

    fn frame(pattern: TestPattern) -> FrameBuffer {
        let res = Resolution::new(640, 480);
        convert(&pattern.yuv420(res, PlaneLayout::default()), res)
    }

    fn sequenced(sequence: u32) -> Arc<FrameBuffer> {
        Arc::new(FrameBuffer::zeroed(Resolution::new(2, 2)).with_metadata(FrameMetadata {
            sequence,
            ..FrameMetadata::default()
        }))
    }

    #[test]
    fn test_validate_color_bars_success() {
        let result = validate_color_bars(&frame(TestPattern::ColorBars));
        assert!(
            result.is_ok(),
            "Color bars validation should succeed: {result:?}"
        );
    }

    #[test]
    fn test_validate_color_bars_semi_planar_padded() {
        let res = Resolution::new(320, 240);
        let image = TestPattern::ColorBars.yuv420(res, PlaneLayout::SemiPlanar { row_padding: 64 });
        let result = validate_color_bars(&convert(&image, res));
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn test_validate_color_bars_wrong_pattern() {
        let result = validate_color_bars(&frame(TestPattern::Gradient));
        assert!(
            result.is_err(),
            "Color bars validation should fail for gradient pattern"
        );
    }

    #[test]
    fn test_validate_gradient_success() {
        let result = validate_gradient(&frame(TestPattern::Gradient));
        assert!(
            result.is_ok(),
            "Gradient validation should succeed: {result:?}"
        );
    }

    #[test]
    fn test_validate_gradient_wrong_pattern() {
        let result = validate_gradient(&frame(TestPattern::ColorBars));
        assert!(
            result.is_err(),
            "Gradient validation should fail for color bars"
        );
    }

    #[test]
    fn test_validate_frame_size() {
        let res = Resolution::new(320, 240);
        assert!(validate_frame_size(&FrameBuffer::zeroed(res), res).is_ok());
        assert!(validate_frame_size(&FrameBuffer::zeroed(res), Resolution::new(640, 480)).is_err());
    }

    #[test]
    fn test_validate_frame_sequence_success() {
        let frames: Vec<_> = [0, 1, 4, 9].into_iter().map(sequenced).collect();
        let result = validate_frame_sequence(&frames);
        assert!(
            result.is_ok(),
            "Frame sequence validation should succeed: {result:?}"
        );
    }

    #[test]
    fn test_validate_frame_sequence_empty() {
        let result = validate_frame_sequence(&[]);
        assert!(
            result.is_err(),
            "Frame sequence validation should fail for empty sequence"
        );
    }

    #[test]
    fn test_validate_frame_sequence_repeated() {
        let frames: Vec<_> = [3, 4, 4].into_iter().map(sequenced).collect();
        let result = validate_frame_sequence(&frames);
        assert!(
            result.is_err(),
            "Frame sequence validation should fail on a repeated frame"
        );
    }

    #[test]
    fn test_colors_match_exact() {
        assert!(colors_match((100, 150, 200), (100, 150, 200), 10));
    }

    #[test]
    fn test_colors_match_within_tolerance() {
        assert!(colors_match((100, 150, 200), (105, 155, 205), 10));
    }

    #[test]
    fn test_colors_match_outside_tolerance() {
        assert!(!colors_match((100, 150, 200), (120, 150, 200), 10));
    }
}
