//! Depth-to-space decoding of keypoint heatmaps.
//!
//! The network emits a `[1, C, H, W]` tensor where every coarse cell covers a
//! `cell_size x cell_size` block of the image. The first `cell_size²` channels hold the
//! confidence of each sub-pixel position in that block (channel `c` sits at offset
//! `(c % cell_size, c / cell_size)`); the final channel is the dustbin ("no keypoint") bin and is
//! skipped. Confidences are compared against the threshold as raw channel values, no softmax is
//! applied across channels.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tract_onnx::prelude::{
    Tensor,
    tract_ndarray::{ArrayView4, Ix4},
};

use crate::error::{KeypointError, KeypointResult};
use crate::inference::OutputTensorSet;
use keypoint_utils::{config::DecoderSettings, timing_guard};

/// Default edge length of a coarse heatmap cell, in pixels.
pub const DEFAULT_CELL_SIZE: usize = 8;
/// Largest cell size accepted from settings.
pub const MAX_CELL_SIZE: usize = 64;
/// Default confidence a pixel must strictly exceed.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.015;

/// A keypoint at an integer pixel coordinate of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: u32,
    pub y: u32,
    /// Raw heatmap confidence at this pixel.
    pub score: f32,
}

/// Heatmap decoding parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
    /// Edge length of the coarse cell covered by one heatmap position.
    pub cell_size: usize,
    /// Values must be strictly greater than this to be emitted.
    pub confidence_threshold: f32,
    /// Decode rows on the rayon pool. Output is identical either way.
    pub parallel: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            parallel: false,
        }
    }
}

impl From<&DecoderSettings> for DecoderConfig {
    fn from(settings: &DecoderSettings) -> Self {
        DecoderConfig {
            cell_size: settings.cell_size,
            confidence_threshold: settings.confidence_threshold,
            parallel: settings.parallel,
        }
    }
}

impl From<DecoderSettings> for DecoderConfig {
    fn from(settings: DecoderSettings) -> Self {
        (&settings).into()
    }
}

/// Pick the heatmap from an inference result.
///
/// With a name the matching output is returned; without one the first declared output is used.
pub fn select_heatmap<'a>(
    outputs: &'a OutputTensorSet,
    name: Option<&str>,
) -> KeypointResult<&'a Tensor> {
    match name {
        Some(name) => outputs.get(name).ok_or_else(|| {
            KeypointError::HeatmapShape(format!(
                "output '{name}' not found (available: {})",
                outputs.names().collect::<Vec<_>>().join(", ")
            ))
        }),
        None => outputs
            .first()
            .map(|(_, tensor)| tensor)
            .ok_or_else(|| KeypointError::HeatmapShape("inference produced no outputs".into())),
    }
}

/// Decode a `[1, C, H, W]` heatmap into keypoints of a `width x height` image.
///
/// Every pixel `(x, y)` of the image reads its confidence from channel
/// `(y % cell) * cell + (x % cell)` at coarse cell `(x / cell, y / cell)`. Pixels whose confidence
/// is strictly greater than the threshold are returned in row-major order (ascending
/// `y * width + x`). Neighbouring detections are not suppressed.
///
/// # Arguments
///
/// * `heatmap` - The `[1, C, H, W]` network output.
/// * `width` - Width of the source image in pixels.
/// * `height` - Height of the source image in pixels.
/// * `config` - Cell size, threshold and row parallelism.
///
/// # Errors
///
/// [`KeypointError::HeatmapShape`] when the tensor is not a rank-4 f32 tensor with batch 1, when
/// `C != cell² + 1`, when `W * cell != width` or `H * cell != height`, or when `cell` is too
/// large for that arithmetic.
pub fn decode_heatmap(
    heatmap: &Tensor,
    width: u32,
    height: u32,
    config: &DecoderConfig,
) -> KeypointResult<Vec<Keypoint>> {
    let _guard = timing_guard("keypoint_core::decode_heatmap", log::Level::Trace);
    let view = heatmap_view(heatmap)?;
    let cell = config.cell_size;
    validate_shape(&view, width as usize, height as usize, cell)?;

    let width = width as usize;
    let threshold = config.confidence_threshold;
    let decode_row = |y: usize| -> Vec<Keypoint> {
        let cell_y = y / cell;
        let sub_y = y % cell;
        (0..width)
            .filter_map(|x| {
                let channel = sub_y * cell + x % cell;
                let score = view[[0, channel, cell_y, x / cell]];
                (score > threshold).then_some(Keypoint {
                    x: x as u32,
                    y: y as u32,
                    score,
                })
            })
            .collect()
    };

    let rows = 0..height as usize;
    let keypoints = if config.parallel {
        rows.into_par_iter()
            .map(decode_row)
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    } else {
        rows.flat_map(decode_row).collect()
    };

    Ok(keypoints)
}

fn heatmap_view(heatmap: &Tensor) -> KeypointResult<ArrayView4<'_, f32>> {
    heatmap
        .to_array_view::<f32>()
        .map_err(|e| KeypointError::HeatmapShape(format!("heatmap is not f32: {e}")))?
        .into_dimensionality::<Ix4>()
        .map_err(|_| {
            KeypointError::HeatmapShape(format!(
                "expected rank-4 [1, C, H, W] heatmap, got {:?}",
                heatmap.shape()
            ))
        })
}

fn validate_shape(
    view: &ArrayView4<'_, f32>,
    width: usize,
    height: usize,
    cell: usize,
) -> KeypointResult<()> {
    let (batch, channels, rows, cols) = view.dim();
    if cell == 0 {
        return Err(KeypointError::HeatmapShape(
            "cell size must be greater than zero".into(),
        ));
    }
    if batch != 1 {
        return Err(KeypointError::HeatmapShape(format!(
            "expected batch size 1, got {batch}"
        )));
    }
    let positions = cell
        .checked_mul(cell)
        .ok_or_else(|| KeypointError::HeatmapShape(format!("cell size {cell} is too large")))?;
    if channels != positions + 1 {
        return Err(KeypointError::HeatmapShape(format!(
            "expected {} channels for cell size {cell} ({positions} cells + dustbin), got {channels}",
            positions + 1
        )));
    }
    let covered = cols.checked_mul(cell).zip(rows.checked_mul(cell));
    if covered != Some((width, height)) {
        return Err(KeypointError::HeatmapShape(format!(
            "heatmap {cols}x{rows} cells of {cell}px does not cover image {width}x{height}"
        )));
    }
    Ok(())
}
