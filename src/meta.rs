//! Tensor metadata: dtype, expected dimensionality, codecs, chunk budget,
//! and the running shape interval.

use crate::codec::{ChunkCompression, SampleCompression};
use crate::config::Config;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// The small closed set of numeric element types a tensor may hold. Just
/// enough to compute `itemsize` for byte-range math; a general ML dtype
/// system is out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl DType {
    pub fn itemsize(&self) -> usize {
        match self {
            DType::Bool | DType::I8 | DType::U8 => 1,
            DType::I16 | DType::U16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
        }
    }
}

/// Per-tensor metadata, persisted as JSON at `T/tensor_meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorMeta {
    pub dtype: DType,
    /// Elementwise minimum shape seen across all samples so far, for fast
    /// shape-interval queries. `None` until the first sample is appended.
    pub min_shape: Option<Vec<u32>>,
    pub max_shape: Option<Vec<u32>>,
    /// Convenience cache of `num_samples`, kept in sync by the engine.
    pub length: u64,
    pub sample_compression: SampleCompression,
    pub chunk_compression: ChunkCompression,
    pub max_chunk_size: u32,
    pub version: String,
}

/// Current on-disk layout version written by this build of the engine.
pub const CURRENT_VERSION: &str = "1.0.0";

impl TensorMeta {
    pub fn new(
        dtype: DType,
        sample_compression: SampleCompression,
        chunk_compression: ChunkCompression,
        max_chunk_size: Option<u32>,
        config: &Config,
    ) -> Result<Self> {
        if !sample_compression.is_none() && !chunk_compression.is_none() {
            return Err(EngineError::InvalidArgument(
                "sample_compression and chunk_compression are mutually exclusive".into(),
            ));
        }
        Ok(Self {
            dtype,
            min_shape: None,
            max_shape: None,
            length: 0,
            sample_compression,
            chunk_compression,
            max_chunk_size: max_chunk_size.unwrap_or(config.default_chunk_max_size),
            version: CURRENT_VERSION.to_string(),
        })
    }

    /// Widens the running shape interval to also cover `shape`, validating
    /// its dimensionality stays consistent across samples.
    pub fn update_shape_interval(&mut self, shape: &[u32]) -> Result<()> {
        match (&mut self.min_shape, &mut self.max_shape) {
            (None, None) => {
                self.min_shape = Some(shape.to_vec());
                self.max_shape = Some(shape.to_vec());
            }
            (Some(min), Some(max)) => {
                if min.len() != shape.len() {
                    return Err(EngineError::InvalidSampleShape {
                        expected_ndim: min.len(),
                        got_ndim: shape.len(),
                    });
                }
                for (m, s) in min.iter_mut().zip(shape.iter()) {
                    if *s < *m {
                        *m = *s;
                    }
                }
                for (m, s) in max.iter_mut().zip(shape.iter()) {
                    if *s > *m {
                        *m = *s;
                    }
                }
            }
            _ => unreachable!("min_shape and max_shape are always set together"),
        }
        Ok(())
    }

    /// `(lower_tuple, upper_tuple)` as exposed by the engine API.
    pub fn shape_interval(&self) -> (Vec<u32>, Vec<u32>) {
        (
            self.min_shape.clone().unwrap_or_default(),
            self.max_shape.clone().unwrap_or_default(),
        )
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json_bytes(buf: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_interval_widens_elementwise() {
        let config = Config::default();
        let mut meta = TensorMeta::new(
            DType::U8,
            SampleCompression::None,
            ChunkCompression::None,
            None,
            &config,
        )
        .unwrap();

        meta.update_shape_interval(&[1, 1]).unwrap();
        meta.update_shape_interval(&[99, 99]).unwrap();
        meta.update_shape_interval(&[50, 200]).unwrap();

        assert_eq!(meta.shape_interval(), (vec![1, 1], vec![99, 200]));
    }

    #[test]
    fn rejects_both_compressions_set() {
        let config = Config::default();
        assert!(TensorMeta::new(
            DType::U8,
            SampleCompression::Png,
            ChunkCompression::Lz4,
            None,
            &config,
        )
        .is_err());
    }

    #[test]
    fn json_roundtrips() {
        let config = Config::default();
        let meta = TensorMeta::new(
            DType::F32,
            SampleCompression::None,
            ChunkCompression::None,
            Some(1024),
            &config,
        )
        .unwrap();
        let bytes = meta.to_json_bytes().unwrap();
        let decoded = TensorMeta::from_json_bytes(&bytes).unwrap();
        assert_eq!(decoded.dtype, DType::F32);
        assert_eq!(decoded.max_chunk_size, 1024);
    }
}
