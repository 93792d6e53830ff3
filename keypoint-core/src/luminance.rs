//! RGBA to single-channel intensity conversion.

use image::RgbaImage;
use keypoint_utils::timing_guard;

const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

/// Row-major grid of normalized intensities in `[0, 1]`, one value per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct IntensityBuffer {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl IntensityBuffer {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Intensity at pixel `(x, y)`, if in bounds.
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y * self.width + x).copied()
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// Convert an RGBA pixel buffer to normalized luminance.
///
/// Each pixel becomes `(0.299 R + 0.587 G + 0.114 B) / 255` at index `y * width + x`. Alpha is
/// ignored and no gamma correction is applied.
pub fn luminance_from_rgba(image: &RgbaImage) -> IntensityBuffer {
    let _guard = timing_guard("keypoint_core::luminance_from_rgba", log::Level::Trace);
    let (width, height) = image.dimensions();
    let data = image
        .as_raw()
        .chunks_exact(4)
        .map(|px| {
            let luma = LUMA_R * px[0] as f32 + LUMA_G * px[1] as f32 + LUMA_B * px[2] as f32;
            (luma / 255.0).clamp(0.0, 1.0)
        })
        .collect();

    IntensityBuffer {
        width: width as usize,
        height: height as usize,
        data,
    }
}
