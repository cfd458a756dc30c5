//! Orchestrates appends, updates, and reads against the key-value store,
//! consulting the chunk-id encoder and instantiating/retiring chunks.
//!
//! This is the only component aware of the storage provider; every other
//! module operates purely on in-memory bytes and tables. One
//! [`ChunkEngine`] owns every tensor in a dataset: each tensor gets a
//! private slice of the key space (`<tensor>/chunks/<hex-id>`,
//! `<tensor>/chunks_index/unsharded`, `<tensor>/tensor_meta.json`) and its
//! own [`Cache`], which is where the chunk-id encoder actually lives
//! between calls — the engine never holds a separate copy of it.

use crate::cache::Cache;
use crate::chunk::Chunk;
use crate::codec::{ChunkCompression, SampleCompression};
use crate::config::Config;
use crate::encode::ChunkIdEncoder;
use crate::error::{EngineError, Result};
use crate::meta::{DType, TensorMeta};
use crate::slice::{self, Slice};
use crate::storage::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

const CHUNKS_DIR: &str = "chunks";
const CHUNK_INDEX_KEY: &str = "chunks_index/unsharded";
const TENSOR_META_KEY: &str = "tensor_meta.json";

struct Tensor {
    root: String,
    meta: TensorMeta,
    cache: Cache,
}

impl Tensor {
    fn chunk_key(&self, id: u64) -> String {
        format!("{}/{}/{}", self.root, CHUNKS_DIR, ChunkIdEncoder::name_from_id(id))
    }

    fn chunk_index_key(&self) -> String {
        format!("{}/{}", self.root, CHUNK_INDEX_KEY)
    }

    fn tensor_meta_key(&self) -> String {
        format!("{}/{}", self.root, TENSOR_META_KEY)
    }
}

/// A selection into a tensor's samples: either a single (possibly negative)
/// index, or a [`Slice`] over its axis.
#[derive(Debug, Clone, Copy)]
pub enum Selection {
    Index(i64),
    Slice(Slice),
}

/// One decoded sample: its raw bytes (after any sample-level decompression)
/// and its logical shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub bytes: Vec<u8>,
    pub shape: Vec<u32>,
}

pub struct ChunkEngine {
    provider: Arc<dyn Provider>,
    config: Config,
    tensors: HashMap<String, Tensor>,
}

impl ChunkEngine {
    pub fn new(provider: Arc<dyn Provider>, config: Config) -> Self {
        Self {
            provider,
            config,
            tensors: HashMap::new(),
        }
    }

    pub fn with_default_config(provider: Arc<dyn Provider>) -> Self {
        Self::new(provider, Config::from_env())
    }

    /// Registers a brand-new tensor under `name`, persisting its initial
    /// metadata. Errors if a tensor already exists at that root.
    pub fn create_tensor(
        &mut self,
        name: &str,
        dtype: DType,
        sample_compression: SampleCompression,
        chunk_compression: ChunkCompression,
        max_chunk_size: Option<u32>,
    ) -> Result<()> {
        if self.tensors.contains_key(name) {
            return Err(EngineError::InvalidArgument(format!(
                "tensor {} already exists",
                name
            )));
        }

        // The in-memory map only tracks tensors this engine instance has
        // touched; the provider may already hold a `tensor_meta.json` for
        // `name` from an earlier engine (or an earlier, now-dropped call).
        // Adopt it if it is compatible with what's being requested, and
        // refuse to silently paper over an incompatible one.
        let meta_key = format!("{}/{}", name, TENSOR_META_KEY);
        let meta = if self.provider.contains(&meta_key)? {
            let existing = TensorMeta::from_json_bytes(&self.provider.get(&meta_key)?)?;
            if existing.dtype != dtype
                || existing.sample_compression != sample_compression
                || existing.chunk_compression != chunk_compression
            {
                return Err(EngineError::MetaMismatch(format!(
                    "tensor {name} already exists in storage with dtype {:?}, sample_compression {:?}, chunk_compression {:?}; requested dtype {:?}, sample_compression {:?}, chunk_compression {:?}",
                    existing.dtype,
                    existing.sample_compression,
                    existing.chunk_compression,
                    dtype,
                    sample_compression,
                    chunk_compression,
                )));
            }
            existing
        } else {
            TensorMeta::new(dtype, sample_compression, chunk_compression, max_chunk_size, &self.config)?
        };

        let tensor = Tensor {
            root: name.to_string(),
            cache: Cache::new(self.provider.clone(), meta.chunk_compression, self.config.cache_byte_budget),
            meta,
        };
        self.provider.set(&tensor.tensor_meta_key(), tensor.meta.to_json_bytes()?)?;
        self.tensors.insert(name.to_string(), tensor);
        debug!(tensor = name, "created tensor");
        Ok(())
    }

    /// Loads an already-created tensor's metadata so a fresh `ChunkEngine`
    /// can resume appending/reading an existing dataset; its chunk-id
    /// encoder is pulled into the cache lazily on first access.
    pub fn load_tensor(&mut self, name: &str) -> Result<()> {
        if self.tensors.contains_key(name) {
            return Ok(());
        }
        let meta_key = format!("{}/{}", name, TENSOR_META_KEY);
        let meta = TensorMeta::from_json_bytes(&self.provider.get(&meta_key)?)?;
        let cache = Cache::new(self.provider.clone(), meta.chunk_compression, self.config.cache_byte_budget);
        self.tensors.insert(
            name.to_string(),
            Tensor {
                root: name.to_string(),
                meta,
                cache,
            },
        );
        Ok(())
    }

    fn tensor_mut(&mut self, name: &str) -> Result<&mut Tensor> {
        self.tensors
            .get_mut(name)
            .ok_or_else(|| EngineError::InvalidArgument(format!("no such tensor: {}", name)))
    }

    /// Total samples appended to `name` so far (last-seen + 1 of its
    /// chunk-id encoder, or 0 if empty).
    pub fn num_samples(&mut self, name: &str) -> Result<u64> {
        let tensor = self.tensor_mut(name)?;
        let index_key = tensor.chunk_index_key();
        Ok(tensor.cache.get_chunk_id_encoder(&index_key)?.num_samples())
    }

    pub fn shape_interval(&mut self, name: &str) -> Result<(Vec<u32>, Vec<u32>)> {
        Ok(self.tensor_mut(name)?.meta.shape_interval())
    }

    /// Appends one sample's raw bytes and logical shape.
    pub fn append(&mut self, name: &str, raw: &[u8], shape: &[u32]) -> Result<()> {
        self.append_one(name, raw, shape)
    }

    /// Appends several samples in order.
    pub fn extend(&mut self, name: &str, samples: &[(Vec<u8>, Vec<u32>)]) -> Result<()> {
        for (raw, shape) in samples {
            self.append_one(name, raw, shape)?;
        }
        Ok(())
    }

    fn append_one(&mut self, name: &str, raw: &[u8], shape: &[u32]) -> Result<()> {
        let uuid_shift_amount = self.config.uuid_shift_amount;
        let tensor = self.tensor_mut(name)?;
        let payload = tensor.meta.sample_compression.encode(raw, shape, tensor.meta.dtype)?;
        let max = tensor.meta.max_chunk_size;

        if payload.len() as u64 <= max as u64 {
            Self::append_whole_sample(tensor, &payload, shape, max, uuid_shift_amount)?;
        } else {
            Self::append_tiled_sample(tensor, &payload, shape, max, uuid_shift_amount)?;
        }

        tensor.meta.update_shape_interval(shape)?;
        tensor.meta.length += 1;
        trace!(tensor = name, nbytes = payload.len(), "appended sample");
        Ok(())
    }

    /// Appends a sample that fits within one chunk, reusing the last chunk
    /// if it has room, else allocating a fresh one.
    fn append_whole_sample(
        tensor: &mut Tensor,
        payload: &[u8],
        shape: &[u32],
        max: u32,
        uuid_shift_amount: u32,
    ) -> Result<()> {
        let index_key = tensor.chunk_index_key();
        let last_id = {
            let encoder = tensor.cache.get_chunk_id_encoder(&index_key)?;
            let num_samples = encoder.num_samples();
            // Only the chunk holding the *whole* last sample is eligible for
            // reuse; a chunk that is one of several tiles of the last sample
            // must not gain an unrelated sample, since a chunk id's row can
            // only ever mean "more of the previous sample" or "a new one",
            // never both.
            if num_samples > 0 && encoder.get(num_samples - 1)?.len() == 1 {
                encoder.last_chunk_id()
            } else {
                None
            }
        };

        let reuse_key = if let Some(last_id) = last_id {
            let key = tensor.chunk_key(last_id);
            if tensor.cache.get_chunk(&key)?.has_space_for(payload.len(), max) {
                Some(key)
            } else {
                None
            }
        } else {
            None
        };

        if let Some(key) = reuse_key {
            let chunk = tensor.cache.get_chunk_mut(&key)?;
            chunk.append_sample(payload, max, shape)?;
            tensor.cache.refresh_chunk_size(&key)?;
        } else {
            let id = tensor.cache.get_chunk_id_encoder_mut(&index_key)?.generate_chunk_id(uuid_shift_amount);
            let key = tensor.chunk_key(id);
            let mut chunk = Chunk::new(shape.len());
            chunk.append_sample(payload, max, shape)?;
            tensor.cache.put_new_chunk(key, chunk)?;
        }

        tensor.cache.get_chunk_id_encoder_mut(&index_key)?.register_samples(1)?;
        tensor.cache.refresh_chunk_id_encoder_size(&index_key)?;
        Ok(())
    }

    /// Splits an over-`max` sample across `ceil(len / max)` fresh chunks,
    /// one chunk id per piece. Overflow is always handled here, in the
    /// engine — individual chunks never reference a "next" chunk.
    fn append_tiled_sample(
        tensor: &mut Tensor,
        payload: &[u8],
        shape: &[u32],
        max: u32,
        uuid_shift_amount: u32,
    ) -> Result<()> {
        let index_key = tensor.chunk_index_key();
        let max_usize = max as usize;
        let mut offset = 0;
        let mut first = true;
        while offset < payload.len() {
            let end = (offset + max_usize).min(payload.len());
            let piece = &payload[offset..end];

            let id = tensor.cache.get_chunk_id_encoder_mut(&index_key)?.generate_chunk_id(uuid_shift_amount);
            let key = tensor.chunk_key(id);
            let mut chunk = Chunk::new(shape.len());
            chunk.append_sample(piece, max, shape)?;
            tensor.cache.put_new_chunk(key, chunk)?;

            let n = if first { 1 } else { 0 };
            tensor.cache.get_chunk_id_encoder_mut(&index_key)?.register_samples(n)?;
            first = false;
            offset = end;
        }
        tensor.cache.refresh_chunk_id_encoder_size(&index_key)?;
        Ok(())
    }

    /// Reads one or more samples selected by `selection`.
    pub fn read(&mut self, name: &str, selection: Selection) -> Result<Vec<Sample>> {
        let num_samples = self.num_samples(name)?;
        let indices: Vec<u64> = match selection {
            Selection::Index(i) => vec![slice::resolve_index(i, num_samples)?],
            Selection::Slice(s) => slice::resolve(s, num_samples),
        };
        indices.into_iter().map(|i| self.read_one(name, i)).collect()
    }

    fn read_one(&mut self, name: &str, i: u64) -> Result<Sample> {
        let tensor = self.tensor_mut(name)?;
        let index_key = tensor.chunk_index_key();
        let (chunk_ids, local_i) = {
            let encoder = tensor.cache.get_chunk_id_encoder(&index_key)?;
            (encoder.get(i)?, encoder.translate_index_relative_to_chunks(i)?)
        };

        if chunk_ids.len() == 1 {
            let key = tensor.chunk_key(chunk_ids[0]);
            let chunk = tensor.cache.get_chunk(&key)?;
            let shape = chunk.shapes.get(local_i)?;
            let bytes = chunk.decoded_sample(local_i, tensor.meta.sample_compression, tensor.meta.dtype)?;
            Ok(Sample { bytes, shape: shape.0 })
        } else {
            let mut concatenated = Vec::new();
            for &id in &chunk_ids {
                let key = tensor.chunk_key(id);
                concatenated.extend_from_slice(&tensor.cache.get_chunk(&key)?.data);
            }
            let first_key = tensor.chunk_key(chunk_ids[0]);
            let shape = tensor.cache.get_chunk(&first_key)?.shapes.get(local_i)?;
            let bytes = tensor
                .meta
                .sample_compression
                .decode(&concatenated, shape.as_slice(), tensor.meta.dtype)?;
            Ok(Sample { bytes, shape: shape.0 })
        }
    }

    /// Replaces sample `i`'s bytes and shape in place. Dimensionality must
    /// match the sample being replaced; tiled samples cannot be updated
    /// (re-tiling on update is out of scope).
    pub fn update(&mut self, name: &str, i: i64, raw: &[u8], shape: &[u32]) -> Result<()> {
        let num_samples = self.num_samples(name)?;
        let i = slice::resolve_index(i, num_samples)?;

        let tensor = self.tensor_mut(name)?;
        let index_key = tensor.chunk_index_key();
        let (chunk_ids, local_i) = {
            let encoder = tensor.cache.get_chunk_id_encoder(&index_key)?;
            (encoder.get(i)?, encoder.translate_index_relative_to_chunks(i)?)
        };
        if chunk_ids.len() > 1 {
            return Err(EngineError::InvalidArgument(
                "updating a tiled sample is not supported".into(),
            ));
        }
        let key = tensor.chunk_key(chunk_ids[0]);

        let chunk = tensor.cache.get_chunk_mut(&key)?;
        chunk.update_sample(local_i, raw, shape, tensor.meta.sample_compression, tensor.meta.dtype)?;
        tensor.cache.refresh_chunk_size(&key)?;
        tensor.meta.update_shape_interval(shape)?;
        Ok(())
    }

    /// Removes the last sample, deleting any chunks it made obsolete.
    pub fn pop(&mut self, name: &str) -> Result<()> {
        let tensor = self.tensor_mut(name)?;
        let index_key = tensor.chunk_index_key();

        if tensor.cache.get_chunk_id_encoder(&index_key)?.num_samples() == 0 {
            return Err(EngineError::InvalidArgument(format!(
                "cannot pop from empty tensor {}",
                name
            )));
        }

        let dropped = tensor.cache.get_chunk_id_encoder_mut(&index_key)?.pop()?;
        if dropped.is_empty() {
            let last_id = tensor
                .cache
                .get_chunk_id_encoder(&index_key)?
                .last_chunk_id()
                .expect("non-empty encoder after a pop that dropped no rows has a last chunk");
            let key = tensor.chunk_key(last_id);
            let chunk = tensor.cache.get_chunk_mut(&key)?;
            chunk.pop_sample()?;
            tensor.cache.refresh_chunk_size(&key)?;
        } else {
            for id in dropped {
                let key = tensor.chunk_key(id);
                tensor.cache.evict_and_delete(&key)?;
            }
        }

        tensor.cache.refresh_chunk_id_encoder_size(&index_key)?;
        tensor.meta.length = tensor.meta.length.saturating_sub(1);
        Ok(())
    }

    /// Flushes every dirty chunk, the chunk-id encoder, and the tensor
    /// metadata to the provider, in that order (chunk blobs must land
    /// before the index that references them, so a crash mid-flush never
    /// leaves the index pointing at a chunk the store doesn't have).
    pub fn flush(&mut self, name: &str) -> Result<()> {
        let tensor = self.tensor_mut(name)?;
        tensor.cache.flush()?;
        self.provider.set(&tensor.tensor_meta_key(), tensor.meta.to_json_bytes()?)?;
        Ok(())
    }
}
