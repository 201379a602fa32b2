//! Frame compositing: centering an edited image inside the event frame.
//!
//! Pure CPU work with fixed margin ratios. The edited image is resized to
//! fill the frame's interior region (aspect preserved, Lanczos resampling)
//! and alpha-blended onto the frame, then re-encoded as PNG.

use image::imageops::FilterType;
use image::{imageops, DynamicImage, ImageFormat};
use std::io::Cursor;

use crate::errors::PipelineError;

/// Horizontal margin as a fraction of frame width.
const WIDTH_MARGIN_RATIO: f64 = 0.051;
/// Top margin as a fraction of frame height.
const HEIGHT_MARGIN_RATIO: f64 = 0.071;
/// The frame art is bottom-heavy; total vertical inset is this multiple
/// of the top margin.
const VERTICAL_INSET_FACTOR: f64 = 3.3;

/// The content region inside a frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteriorRegion {
    /// Left/right margin.
    pub margin_w: u32,
    /// Top margin; also the paste y-offset.
    pub margin_h: u32,
    /// Content width.
    pub width: u32,
    /// Content height.
    pub height: u32,
}

/// Composites edited images onto a fixed frame asset.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCompositor;

impl FrameCompositor {
    /// Creates a compositor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Computes the interior content region for a frame of the given size.
    #[must_use]
    pub fn interior(frame_width: u32, frame_height: u32) -> InteriorRegion {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let margin_w = (f64::from(frame_width) * WIDTH_MARGIN_RATIO).round() as u32;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let margin_h = (f64::from(frame_height) * HEIGHT_MARGIN_RATIO).round() as u32;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let vertical_inset = (VERTICAL_INSET_FACTOR * f64::from(margin_h)).round() as u32;

        InteriorRegion {
            margin_w,
            margin_h,
            width: frame_width.saturating_sub(2 * margin_w),
            height: frame_height.saturating_sub(vertical_inset),
        }
    }

    /// Composites `image_bytes` into `frame_png` and returns the framed
    /// image as PNG bytes.
    ///
    /// Fails with [`PipelineError::Decode`] if either payload is not a
    /// decodable image or the frame leaves no interior region.
    pub fn compose(
        &self,
        frame_png: &[u8],
        image_bytes: &[u8],
    ) -> Result<Vec<u8>, PipelineError> {
        let frame = image::load_from_memory(frame_png)
            .map_err(|err| PipelineError::Decode(format!("frame asset: {err}")))?;
        let content = image::load_from_memory(image_bytes)
            .map_err(|err| PipelineError::Decode(format!("edited image: {err}")))?;

        let region = Self::interior(frame.width(), frame.height());
        if region.width == 0 || region.height == 0 {
            return Err(PipelineError::Decode(format!(
                "frame {}x{} leaves no interior region",
                frame.width(),
                frame.height()
            )));
        }

        let resized = content.resize_to_fill(region.width, region.height, FilterType::Lanczos3);

        let mut canvas = DynamicImage::ImageRgba8(frame.to_rgba8());
        imageops::overlay(
            &mut canvas,
            &resized,
            i64::from(region.margin_w),
            i64::from(region.margin_h),
        );

        let mut out = Vec::new();
        canvas
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(|err| PipelineError::Decode(format!("png encode: {err}")))?;
        Ok(out)
    }
}
