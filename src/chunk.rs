//! A capped byte blob storing a contiguous range of samples plus their
//! local shape/byte-position headers.
//!
//! `data` is kept decompressed in memory for the chunk's entire hot
//! lifetime; whole-chunk (LZ4) compression is applied only at the
//! serialize/deserialize boundary ([`Chunk::tobytes`]/[`Chunk::frombuffer`]).
//! Updating a sample under whole-chunk (LZ4) compression is therefore a
//! plain splice on the decompressed buffer — recompression happens
//! automatically the next time the chunk is serialized, and byte-position
//! offsets always index into the uncompressed buffer, which is the only
//! way per-sample ranges stay addressable when a single compression pass
//! covers the whole chunk.

use crate::codec::{ChunkCompression, SampleCompression};
use crate::encode::{BytePositionsEncoder, ShapeEncoder};
use crate::error::{EngineError, Result};
use crate::meta::{DType, CURRENT_VERSION};
use crate::serialize::{deserialize_chunk, infer_chunk_num_bytes, serialize_chunk};

/// A chunk's contribution to an `append`: when a sample's encoded size
/// exceeds what's left in this chunk, only the leading slice fits and the
/// remainder tiles into further chunks.
pub struct Chunk {
    pub data: Vec<u8>,
    pub shapes: ShapeEncoder,
    pub byte_positions: BytePositionsEncoder,
    pub version: String,
    decompressed_cache: Option<Vec<Vec<u8>>>,
}

impl Chunk {
    pub fn new(ndim: usize) -> Self {
        Self {
            data: Vec::new(),
            shapes: ShapeEncoder::new(ndim),
            byte_positions: BytePositionsEncoder::new(),
            version: CURRENT_VERSION.to_string(),
            decompressed_cache: None,
        }
    }

    pub fn num_samples(&self) -> u64 {
        self.byte_positions.num_samples()
    }

    pub fn num_data_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether appending `n` more bytes keeps this chunk at or under `max`.
    pub fn has_space_for(&self, n: usize, max: u32) -> bool {
        self.data.len() + n <= max as usize
    }

    /// Appends one sample's already-encoded bytes, registering it in both
    /// local encoders. Fails with [`EngineError::FullChunk`] if `buf` would
    /// push the chunk over `max`.
    pub fn append_sample(&mut self, buf: &[u8], max: u32, shape: &[u32]) -> Result<()> {
        self.ffw_chunk()?;
        if !self.has_space_for(buf.len(), max) {
            return Err(EngineError::FullChunk);
        }
        self.data.extend_from_slice(buf);
        self.shapes.register_samples(shape, 1)?;
        self.byte_positions.register_samples(buf.len() as u32, 1)?;
        self.invalidate_cache();
        Ok(())
    }

    /// Bulk variant of [`append_sample`](Self::append_sample) for samples
    /// that are already individually encoded and sized; `shapes.len() ==
    /// nbytes.len()` and `nbytes.iter().sum::<u32>() == buf.len()`.
    pub fn extend_samples(
        &mut self,
        buf: &[u8],
        max: u32,
        shapes: &[Vec<u32>],
        nbytes: &[u32],
    ) -> Result<()> {
        self.ffw_chunk()?;
        if shapes.len() != nbytes.len() {
            return Err(EngineError::InvalidArgument(
                "extend_samples: shapes and nbytes length mismatch".into(),
            ));
        }
        if nbytes.iter().map(|&n| n as usize).sum::<usize>() != buf.len() {
            return Err(EngineError::InvalidArgument(
                "extend_samples: nbytes does not sum to buffer length".into(),
            ));
        }
        if !self.has_space_for(buf.len(), max) {
            return Err(EngineError::FullChunk);
        }
        self.data.extend_from_slice(buf);
        for (shape, &n) in shapes.iter().zip(nbytes.iter()) {
            self.shapes.register_samples(shape, 1)?;
            self.byte_positions.register_samples(n, 1)?;
        }
        self.invalidate_cache();
        Ok(())
    }

    /// Replaces sample `local_i` with `new_raw` reshaped to `new_shape`,
    /// re-encoding it through `sample_compression` first. `new_shape` must
    /// keep the same dimensionality as the sample it replaces.
    pub fn update_sample(
        &mut self,
        local_i: u64,
        new_raw: &[u8],
        new_shape: &[u32],
        sample_compression: SampleCompression,
        dtype: DType,
    ) -> Result<()> {
        self.ffw_chunk()?;
        let old_shape = self.shapes.get(local_i)?;
        if old_shape.ndim() != new_shape.len() {
            return Err(EngineError::InvalidSampleShape {
                expected_ndim: old_shape.ndim(),
                got_ndim: new_shape.len(),
            });
        }

        let new_payload = sample_compression.encode(new_raw, new_shape, dtype)?;
        let (start, end) = self.byte_positions.get(local_i)?;

        let mut spliced = Vec::with_capacity(self.data.len() - (end - start) as usize + new_payload.len());
        spliced.extend_from_slice(&self.data[..start as usize]);
        spliced.extend_from_slice(&new_payload);
        spliced.extend_from_slice(&self.data[end as usize..]);
        self.data = spliced;

        self.byte_positions.set(local_i, new_payload.len() as u32)?;
        self.shapes.set(local_i, new_shape)?;
        self.invalidate_cache();
        Ok(())
    }

    /// Pops the last sample from this chunk, shrinking `data` accordingly.
    pub fn pop_sample(&mut self) -> Result<()> {
        self.ffw_chunk()?;
        let last = self.num_samples().checked_sub(1).ok_or_else(|| {
            EngineError::InvalidArgument("cannot pop from an empty chunk".into())
        })?;
        let (start, _end) = self.byte_positions.get(last)?;
        self.data.truncate(start as usize);
        self.byte_positions.pop()?;
        self.shapes.pop()?;
        self.invalidate_cache();
        Ok(())
    }

    /// Materializes and memoizes the decoded bytes of every sample in this
    /// chunk.
    pub fn decompressed_samples(
        &mut self,
        sample_compression: SampleCompression,
        dtype: DType,
    ) -> Result<&[Vec<u8>]> {
        if self.decompressed_cache.is_none() {
            let mut out = Vec::with_capacity(self.num_samples() as usize);
            for i in 0..self.num_samples() {
                let (start, end) = self.byte_positions.get(i)?;
                let encoded = &self.data[start as usize..end as usize];
                let shape = self.shapes.get(i)?;
                out.push(sample_compression.decode(encoded, shape.as_slice(), dtype)?);
            }
            self.decompressed_cache = Some(out);
        }
        Ok(self.decompressed_cache.as_ref().unwrap())
    }

    /// Decoded bytes of sample `local_i`, without decoding the others.
    pub fn decoded_sample(
        &self,
        local_i: u64,
        sample_compression: SampleCompression,
        dtype: DType,
    ) -> Result<Vec<u8>> {
        let (start, end) = self.byte_positions.get(local_i)?;
        let encoded = &self.data[start as usize..end as usize];
        let shape = self.shapes.get(local_i)?;
        sample_compression.decode(encoded, shape.as_slice(), dtype)
    }

    fn invalidate_cache(&mut self) {
        self.decompressed_cache = None;
    }

    /// Exact serialized size, computed without building the full blob.
    /// Cheap when `chunk_compression` is `None`; otherwise this still has
    /// to run the compressor once, since a compressed size cannot be
    /// predicted without compressing.
    pub fn nbytes(&self, chunk_compression: ChunkCompression) -> Result<usize> {
        let stored_len = match chunk_compression {
            ChunkCompression::None => self.data.len(),
            ChunkCompression::Lz4 => chunk_compression.compress(&self.data)?.len(),
        };
        Ok(infer_chunk_num_bytes(
            &self.version,
            &self.shapes,
            &self.byte_positions,
            stored_len,
        ))
    }

    pub fn tobytes(&self, chunk_compression: ChunkCompression) -> Result<Vec<u8>> {
        let stored = chunk_compression.compress(&self.data)?;
        Ok(serialize_chunk(&self.version, &self.shapes, &self.byte_positions, &stored))
    }

    pub fn frombuffer(buf: &[u8], chunk_compression: ChunkCompression) -> Result<Self> {
        if buf.is_empty() {
            return Ok(Self::new(0));
        }
        let (version, shapes, byte_positions, stored) = deserialize_chunk(buf)?;
        let data = chunk_compression.decompress(&stored)?;
        let mut chunk = Self {
            data,
            shapes,
            byte_positions,
            version,
            decompressed_cache: None,
        };
        chunk.ffw_chunk()?;
        Ok(chunk)
    }

    /// Forward-compatibility hook: upgrades an older on-disk layout to
    /// [`CURRENT_VERSION`] in place. No-op when already current; refuses
    /// blobs from a newer build than this one understands.
    fn ffw_chunk(&mut self) -> Result<()> {
        if self.version == CURRENT_VERSION {
            return Ok(());
        }
        if version_is_newer(&self.version, CURRENT_VERSION) {
            return Err(EngineError::VersionMismatch {
                found: self.version.clone(),
                supported: CURRENT_VERSION.to_string(),
            });
        }
        // No prior on-disk layouts to migrate from yet; only the version
        // stamp itself needs bumping.
        self.version = CURRENT_VERSION.to_string();
        Ok(())
    }
}

fn version_is_newer(candidate: &str, supported: &str) -> bool {
    let parse = |s: &str| -> Vec<u32> { s.split('.').filter_map(|p| p.parse().ok()).collect() };
    parse(candidate) > parse(supported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back_samples() {
        let mut chunk = Chunk::new(2);
        chunk.append_sample(&[1, 2, 3, 4], 1024, &[2, 2]).unwrap();
        chunk.append_sample(&[5, 6], 1024, &[1, 2]).unwrap();

        assert_eq!(chunk.num_samples(), 2);
        assert_eq!(
            chunk.decoded_sample(0, SampleCompression::None, DType::U8).unwrap(),
            vec![1, 2, 3, 4]
        );
        assert_eq!(
            chunk.decoded_sample(1, SampleCompression::None, DType::U8).unwrap(),
            vec![5, 6]
        );
    }

    #[test]
    fn append_rejects_when_full() {
        let mut chunk = Chunk::new(1);
        chunk.append_sample(&[1, 2, 3], 4, &[3]).unwrap();
        let err = chunk.append_sample(&[4, 5], 4, &[2]).unwrap_err();
        assert!(matches!(err, EngineError::FullChunk));
    }

    #[test]
    fn update_sample_resizes_and_preserves_others() {
        let mut chunk = Chunk::new(2);
        for _ in 0..5 {
            chunk.append_sample(&[1u8; 4], 1024, &[2, 2]).unwrap();
        }
        chunk
            .update_sample(2, &[9u8; 6], &[2, 3], SampleCompression::None, DType::U8)
            .unwrap();

        assert_eq!(
            chunk.decoded_sample(2, SampleCompression::None, DType::U8).unwrap(),
            vec![9u8; 6]
        );
        assert_eq!(
            chunk.decoded_sample(0, SampleCompression::None, DType::U8).unwrap(),
            vec![1u8; 4]
        );
        assert_eq!(
            chunk.decoded_sample(4, SampleCompression::None, DType::U8).unwrap(),
            vec![1u8; 4]
        );
        assert_eq!(chunk.shapes.get(2).unwrap().0, vec![2, 3]);
    }

    #[test]
    fn update_sample_rejects_dimensionality_change() {
        let mut chunk = Chunk::new(2);
        chunk.append_sample(&[1, 2, 3, 4], 1024, &[2, 2]).unwrap();
        let err = chunk
            .update_sample(0, &[1, 2, 3], &[3], SampleCompression::None, DType::U8)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidSampleShape { .. }));
    }

    #[test]
    fn chunk_roundtrips_through_bytes_uncompressed() {
        let mut chunk = Chunk::new(2);
        chunk.append_sample(&[1, 2, 3, 4], 1024, &[2, 2]).unwrap();
        chunk.append_sample(&[5, 6, 7, 8], 1024, &[2, 2]).unwrap();

        let bytes = chunk.tobytes(ChunkCompression::None).unwrap();
        assert_eq!(bytes.len(), chunk.nbytes(ChunkCompression::None).unwrap());

        let decoded = Chunk::frombuffer(&bytes, ChunkCompression::None).unwrap();
        assert_eq!(decoded.num_samples(), 2);
        assert_eq!(decoded.data, chunk.data);
    }

    #[test]
    fn chunk_roundtrips_through_bytes_lz4() {
        let mut chunk = Chunk::new(2);
        for _ in 0..5 {
            chunk.append_sample(&[7u8; 10], 4096, &[10]).unwrap();
        }

        let bytes = chunk.tobytes(ChunkCompression::Lz4).unwrap();
        let decoded = Chunk::frombuffer(&bytes, ChunkCompression::Lz4).unwrap();
        assert_eq!(decoded.data, chunk.data);
        assert_eq!(decoded.num_samples(), 5);
    }

    #[test]
    fn pop_sample_shrinks_data_and_headers() {
        let mut chunk = Chunk::new(1);
        chunk.append_sample(&[1, 2], 1024, &[2]).unwrap();
        chunk.append_sample(&[3, 4, 5], 1024, &[3]).unwrap();

        chunk.pop_sample().unwrap();
        assert_eq!(chunk.num_samples(), 1);
        assert_eq!(chunk.data, vec![1, 2]);
    }
}
