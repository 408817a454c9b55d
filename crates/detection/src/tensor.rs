use crate::decode::DecodedImage;
use crate::error::TensorError;
use common::span;
use ndarray::{Array4, ArrayView4};

pub const BATCH_SIZE: usize = 1;
pub const CHANNELS: usize = 3;

/// Raw u8 image tensor in NHWC layout, shape `[1, height, width, 3]`, channels R,G,B.
///
/// Values are the decoded intensities; the graph does its own normalization.
#[derive(Debug, Clone)]
pub struct InputTensor {
    data: Array4<u8>,
}

impl InputTensor {
    pub fn shape(&self) -> [usize; 4] {
        let s = self.data.shape();
        [s[0], s[1], s[2], s[3]]
    }

    pub fn height(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn width(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn view(&self) -> ArrayView4<'_, u8> {
        self.data.view()
    }

    /// Contiguous row-major bytes, exactly as handed to the graph.
    pub fn as_bytes(&self) -> &[u8] {
        // Built from a Vec in standard layout, so this never fails.
        self.data.as_slice().unwrap_or_default()
    }
}

/// Pack a decoded image into the graph's input layout.
pub fn build(image: DecodedImage) -> Result<InputTensor, TensorError> {
    let _s = span!("build_tensor");

    let height = image.height as usize;
    let width = image.width as usize;

    if height == 0 || width == 0 || image.pixels.is_empty() {
        return Err(TensorError::EmptyImage);
    }

    let expected = height * width * CHANNELS;
    if image.pixels.len() != expected {
        return Err(TensorError::SizeMismatch {
            expected,
            actual: image.pixels.len(),
        });
    }

    let data = Array4::from_shape_vec((BATCH_SIZE, height, width, CHANNELS), image.pixels)
        .map_err(|_| TensorError::SizeMismatch {
            expected,
            actual: expected,
        })?;

    tracing::trace!(height, width, bytes = expected, "Built input tensor");

    Ok(InputTensor { data })
}
