use tract_onnx::prelude::Tensor;

use crate::error::{KeypointError, KeypointResult};
use crate::luminance::IntensityBuffer;

/// Element type carried by a [`TensorDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    F32,
}

/// Single-channel `[1, 1, H, W]` input tensor borrowing its storage from an intensity buffer.
#[derive(Debug, Clone, Copy)]
pub struct TensorDescriptor<'a> {
    shape: [usize; 4],
    element_type: ElementType,
    data: &'a [f32],
}

impl<'a> TensorDescriptor<'a> {
    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn data(&self) -> &'a [f32] {
        self.data
    }

    pub fn height(&self) -> usize {
        self.shape[2]
    }

    pub fn width(&self) -> usize {
        self.shape[3]
    }

    /// Copy the descriptor into an engine-owned tract tensor.
    pub fn to_tensor(&self) -> KeypointResult<Tensor> {
        Tensor::from_shape(&self.shape, self.data).map_err(|e| {
            KeypointError::InferenceExecution(format!("failed to build input tensor: {e}"))
        })
    }
}

/// Wrap a flat intensity slice as a `[1, 1, height, width]` f32 tensor descriptor.
///
/// # Arguments
///
/// * `data` - Row-major intensities; borrowed, not copied.
/// * `height` - Number of rows in `data`.
/// * `width` - Number of columns in `data`.
///
/// # Errors
///
/// Returns [`KeypointError::ShapeMismatch`] when `data.len() != height * width` or either
/// dimension is zero.
pub fn assemble_tensor(
    data: &[f32],
    height: usize,
    width: usize,
) -> KeypointResult<TensorDescriptor<'_>> {
    let expected = height.checked_mul(width);
    if height == 0 || width == 0 || expected != Some(data.len()) {
        return Err(KeypointError::ShapeMismatch {
            len: data.len(),
            height,
            width,
        });
    }

    Ok(TensorDescriptor {
        shape: [1, 1, height, width],
        element_type: ElementType::F32,
        data,
    })
}

/// Assemble a descriptor using the buffer's own dimensions.
pub fn assemble_from_buffer(buffer: &IntensityBuffer) -> KeypointResult<TensorDescriptor<'_>> {
    assemble_tensor(buffer.as_slice(), buffer.height(), buffer.width())
}
