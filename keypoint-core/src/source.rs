//! Pixel buffer acquisition.

use image::RgbaImage;
use keypoint_utils::{decode_rgba, load_rgba, source_to_path};

use crate::error::{KeypointError, KeypointResult};

/// Produces RGBA pixel buffers from a source identifier (path or URI).
pub trait ImageSource {
    fn acquire(&self, source: &str) -> KeypointResult<RgbaImage>;
}

/// Reads images from the local filesystem; accepts plain paths and `file://` URIs.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileImageSource;

impl ImageSource for FileImageSource {
    fn acquire(&self, source: &str) -> KeypointResult<RgbaImage> {
        let path = source_to_path(source).map_err(|e| KeypointError::acquisition(source, e))?;
        let image =
            load_rgba(&path).map_err(|e| KeypointError::acquisition(source, format!("{e:#}")))?;
        ensure_non_empty(source, image)
    }
}

/// Decode an encoded image payload already held in memory.
pub fn decode_image_bytes(source: &str, bytes: &[u8]) -> KeypointResult<RgbaImage> {
    let image =
        decode_rgba(bytes).map_err(|e| KeypointError::acquisition(source, format!("{e:#}")))?;
    ensure_non_empty(source, image)
}

fn ensure_non_empty(source: &str, image: RgbaImage) -> KeypointResult<RgbaImage> {
    if image.width() == 0 || image.height() == 0 {
        return Err(KeypointError::acquisition(
            source,
            "decoded image has zero dimensions",
        ));
    }
    Ok(image)
}
