//! Drawing keypoints over their source image.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_filled_circle_mut;

use crate::heatmap::Keypoint;

/// Radius of the marker drawn at each keypoint.
pub const MARKER_RADIUS: i32 = 2;
/// Default marker colour.
pub const MARKER_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);

/// Copy `image` and draw a filled circle at every keypoint.
///
/// Keypoints outside the image are skipped.
///
/// # Arguments
///
/// * `image` - The source image; left untouched.
/// * `keypoints` - Pixel positions to mark.
/// * `color` - Marker fill colour.
pub fn render_keypoints(image: &RgbaImage, keypoints: &[Keypoint], color: Rgba<u8>) -> RgbaImage {
    let mut surface = image.clone();
    let (width, height) = surface.dimensions();
    for keypoint in keypoints {
        if keypoint.x >= width || keypoint.y >= height {
            continue;
        }
        draw_filled_circle_mut(
            &mut surface,
            (keypoint.x as i32, keypoint.y as i32),
            MARKER_RADIUS,
            color,
        );
    }
    surface
}

/// Render keypoints and save the result, creating parent directories as needed.
pub fn save_annotated(
    output_path: &Path,
    image: &RgbaImage,
    keypoints: &[Keypoint],
) -> Result<()> {
    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    render_keypoints(image, keypoints, MARKER_COLOR)
        .save(output_path)
        .with_context(|| format!("failed to save annotated image {}", output_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn keypoint(x: u32, y: u32) -> Keypoint {
        Keypoint { x, y, score: 1.0 }
    }

    #[test]
    fn draws_marker_around_keypoint() {
        let image = RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 255]));
        let rendered = render_keypoints(&image, &[keypoint(8, 8)], MARKER_COLOR);

        assert_eq!(rendered.get_pixel(8, 8), &MARKER_COLOR);
        assert_eq!(rendered.get_pixel(10, 8), &MARKER_COLOR);
        assert_eq!(rendered.get_pixel(8, 6), &MARKER_COLOR);
        assert_eq!(rendered.get_pixel(12, 8), &Rgba([0, 0, 0, 255]));
        assert_eq!(image.get_pixel(8, 8), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn skips_out_of_bounds_keypoints() {
        let image = RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 255]));
        let rendered = render_keypoints(&image, &[keypoint(40, 1)], MARKER_COLOR);
        assert_eq!(rendered, image);
    }

    #[test]
    fn saves_into_nested_directory() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out/annotated.png");
        let image = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255]));

        save_annotated(&path, &image, &[keypoint(1, 1)]).expect("save");
        let reloaded = image::open(&path).expect("reopen").to_rgba8();
        assert_eq!(reloaded.get_pixel(1, 1), &MARKER_COLOR);
    }
}
