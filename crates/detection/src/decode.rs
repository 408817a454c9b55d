use crate::error::DecodeError;
use common::span;
use image::ImageFormat;
use serde::Serialize;

/// Container formats the pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageKind {
    Png,
    Jpeg,
    Gif,
}

impl ImageKind {
    fn from_format(format: ImageFormat) -> Result<Self, DecodeError> {
        match format {
            ImageFormat::Png => Ok(ImageKind::Png),
            ImageFormat::Jpeg => Ok(ImageKind::Jpeg),
            ImageFormat::Gif => Ok(ImageKind::Gif),
            other => Err(DecodeError::UnsupportedFormat(format!("{other:?}"))),
        }
    }

    fn as_format(self) -> ImageFormat {
        match self {
            ImageKind::Png => ImageFormat::Png,
            ImageKind::Jpeg => ImageFormat::Jpeg,
            ImageKind::Gif => ImageFormat::Gif,
        }
    }

    /// Media type reported to clients alongside the cached payload.
    pub fn media_type(self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpg",
            ImageKind::Gif => "image/gif",
        }
    }
}

/// A fully decoded image with tightly packed RGB8 pixels in scan order
/// (rows top to bottom, pixels left to right).
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub kind: ImageKind,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Decode raw bytes, sniffing the container format from the magic bytes.
///
/// Bytes whose signature matches a format we do not serve fail with
/// `UnsupportedFormat`; anything else that cannot be read fails with
/// `CorruptImage`.
pub fn decode(raw: &[u8]) -> Result<DecodedImage, DecodeError> {
    let _s = span!("decode_image", bytes = raw.len());

    let format = image::guess_format(raw)
        .map_err(|e| DecodeError::CorruptImage(format!("unrecognized image data: {e}")))?;
    let kind = ImageKind::from_format(format)?;

    let image = image::load_from_memory_with_format(raw, kind.as_format())
        .map_err(|e| DecodeError::CorruptImage(e.to_string()))?;

    let rgb = image.into_rgb8();
    let (width, height) = rgb.dimensions();
    let pixels = rgb.into_raw();

    tracing::debug!(width, height, kind = ?kind, "Decoded image");

    Ok(DecodedImage {
        width,
        height,
        kind,
        pixels,
    })
}
