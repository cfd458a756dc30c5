//! Compression codecs.
//!
//! Exactly one of `{sample_compression, chunk_compression}` is non-`None`
//! per tensor; `Chunk` picks its code path based on which one `TensorMeta`
//! carries.

use crate::error::{EngineError, Result};
use crate::meta::DType;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use std::io::Cursor;

/// Per-sample compression: applied to one sample's bytes before it is
/// appended to a chunk's `data` buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleCompression {
    #[default]
    None,
    Png,
    Jpeg,
}

/// Whole-chunk compression: applied to a chunk's entire `data` buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkCompression {
    #[default]
    None,
    Lz4,
}

impl SampleCompression {
    pub fn is_none(&self) -> bool {
        matches!(self, SampleCompression::None)
    }

    /// Encodes one sample's raw bytes into its on-chunk representation.
    pub fn encode(&self, raw: &[u8], shape: &[u32], dtype: DType) -> Result<Vec<u8>> {
        match self {
            SampleCompression::None => Ok(raw.to_vec()),
            SampleCompression::Png => encode_image(raw, shape, dtype, ImageFormat::Png),
            SampleCompression::Jpeg => encode_image(raw, shape, dtype, ImageFormat::Jpeg),
        }
    }

    /// Inverse of [`encode`](Self::encode); `shape`/`dtype` are the
    /// sample's decoded shape as recorded in the shape encoder, used to
    /// validate the decompressed image matches what was registered.
    pub fn decode(&self, encoded: &[u8], shape: &[u32], dtype: DType) -> Result<Vec<u8>> {
        match self {
            SampleCompression::None => Ok(encoded.to_vec()),
            SampleCompression::Png | SampleCompression::Jpeg => {
                decode_image(encoded, shape, dtype)
            }
        }
    }
}

impl ChunkCompression {
    pub fn is_none(&self) -> bool {
        matches!(self, ChunkCompression::None)
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            ChunkCompression::None => Ok(data.to_vec()),
            ChunkCompression::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        }
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            ChunkCompression::None => Ok(data.to_vec()),
            ChunkCompression::Lz4 => lz4_flex::decompress_size_prepended(data).map_err(|e| {
                EngineError::InvalidArgument(format!("lz4 decompression failed: {}", e))
            }),
        }
    }
}

/// Image codecs operate on `u8`-itemsize samples shaped `(h, w)` (grayscale)
/// or `(h, w, 3)` (RGB); any other dtype/shape is out of scope, since they
/// only make sense for image-shaped byte arrays.
fn encode_image(raw: &[u8], shape: &[u32], dtype: DType, format: ImageFormat) -> Result<Vec<u8>> {
    if dtype != DType::U8 {
        return Err(EngineError::InvalidArgument(format!(
            "image compression requires dtype u8, got {:?}",
            dtype
        )));
    }
    let (width, height, channels) = image_dims(shape)?;
    let bad_dims = || {
        EngineError::InvalidArgument(format!(
            "sample bytes do not match shape {:?} for image encoding",
            shape
        ))
    };

    let dyn_img = match channels {
        1 => DynamicImage::ImageLuma8(
            GrayImage::from_raw(width, height, raw.to_vec()).ok_or_else(bad_dims)?,
        ),
        3 => DynamicImage::ImageRgb8(
            RgbImage::from_raw(width, height, raw.to_vec()).ok_or_else(bad_dims)?,
        ),
        4 => DynamicImage::ImageRgba8(
            RgbaImage::from_raw(width, height, raw.to_vec()).ok_or_else(bad_dims)?,
        ),
        _ => return Err(bad_dims()),
    };

    let mut out = Cursor::new(Vec::new());
    dyn_img
        .write_to(&mut out, format)
        .map_err(|e| EngineError::InvalidArgument(format!("image encode failed: {}", e)))?;
    Ok(out.into_inner())
}

fn decode_image(encoded: &[u8], shape: &[u32], dtype: DType) -> Result<Vec<u8>> {
    if dtype != DType::U8 {
        return Err(EngineError::InvalidArgument(format!(
            "image compression requires dtype u8, got {:?}",
            dtype
        )));
    }
    let (expected_width, expected_height, _channels) = image_dims(shape)?;

    let img = image::load_from_memory(encoded)
        .map_err(|e| EngineError::InvalidArgument(format!("image decode failed: {}", e)))?;
    if img.width() != expected_width || img.height() != expected_height {
        return Err(EngineError::InvalidArgument(format!(
            "decoded image dims {}x{} do not match recorded shape {:?}",
            img.width(),
            img.height(),
            shape
        )));
    }

    Ok(match shape.len() {
        2 => img.into_luma8().into_raw(),
        3 if shape[2] == 1 => img.into_luma8().into_raw(),
        3 if shape[2] == 3 => img.into_rgb8().into_raw(),
        3 if shape[2] == 4 => img.into_rgba8().into_raw(),
        _ => {
            return Err(EngineError::InvalidArgument(format!(
                "unsupported image shape {:?}",
                shape
            )))
        }
    })
}

fn image_dims(shape: &[u32]) -> Result<(u32, u32, u32)> {
    match shape {
        [h, w] => Ok((*w, *h, 1)),
        [h, w, c @ (1 | 3 | 4)] => Ok((*w, *h, *c)),
        _ => Err(EngineError::InvalidArgument(format!(
            "unsupported image shape {:?}, expected (h,w), (h,w,1), (h,w,3) or (h,w,4)",
            shape
        ))),
    }
}
