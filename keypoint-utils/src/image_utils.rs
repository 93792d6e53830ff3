use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{DynamicImage, RgbaImage};

/// Load an image from disk into memory.
///
/// # Arguments
///
/// * `path` - The path to the image file.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    let path_ref = path.as_ref();
    anyhow::ensure!(
        path_ref.exists(),
        "input image does not exist: {}",
        path_ref.display()
    );
    image::open(path_ref).with_context(|| format!("failed to open image {}", path_ref.display()))
}

/// Load an image from disk as an RGBA pixel buffer.
pub fn load_rgba<P: AsRef<Path>>(path: P) -> Result<RgbaImage> {
    Ok(load_image(path)?.to_rgba8())
}

/// Decode an encoded image (PNG, JPEG, ...) held in memory into an RGBA pixel buffer.
pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage> {
    anyhow::ensure!(!bytes.is_empty(), "cannot decode an empty image payload");
    let image = image::load_from_memory(bytes).context("failed to decode image bytes")?;
    Ok(image.to_rgba8())
}

/// Resolve an image source identifier to a filesystem path.
///
/// Plain paths pass through; `file://` URIs are stripped to their path component. Other URI
/// schemes are rejected.
pub fn source_to_path(source: &str) -> Result<PathBuf> {
    let trimmed = source.trim();
    anyhow::ensure!(!trimmed.is_empty(), "image source identifier is empty");
    if let Some(rest) = trimmed.strip_prefix("file://") {
        return Ok(PathBuf::from(rest));
    }
    if let Some((scheme, _)) = trimmed.split_once("://") {
        anyhow::bail!("unsupported image source scheme '{scheme}' in {trimmed}");
    }
    Ok(PathBuf::from(trimmed))
}
