//! Byte-budget LRU over a tensor's deserialized chunks and chunk-id
//! encoder, sitting in front of a [`Provider`].
//!
//! Clean entries are evicted least-recently-used first once the tracked
//! byte budget is exceeded; dirty entries are flushed to the provider
//! before they're dropped, so the provider always ends up holding whatever
//! the cache last saw. A chunk's cached size is only as fresh as the last
//! call to [`Cache::refresh_chunk_size`] — callers that mutate a chunk
//! through [`Cache::get_chunk_mut`] are responsible for calling it
//! afterwards, mirroring how [`Chunk::nbytes`](crate::chunk::Chunk::nbytes)
//! has to be asked for explicitly rather than kept eagerly in sync.

use crate::chunk::Chunk;
use crate::codec::ChunkCompression;
use crate::encode::ChunkIdEncoder;
use crate::error::{EngineError, Result};
use crate::meta::CURRENT_VERSION;
use crate::storage::Provider;
use lru::LruCache;
use std::sync::Arc;
use tracing::{debug, trace};

enum CacheObject {
    Chunk(Chunk),
    ChunkIdEncoder(ChunkIdEncoder),
}

struct Entry {
    object: CacheObject,
    size: usize,
    dirty: bool,
}

/// Per-tensor cache: one instance owns the chunk blobs and the chunk-id
/// encoder for a single tensor, scoped by the tensor's own
/// `chunk_compression` so it never has to be told which codec applies to a
/// given key.
pub struct Cache {
    provider: Arc<dyn Provider>,
    chunk_compression: ChunkCompression,
    entries: LruCache<String, Entry>,
    max_bytes: usize,
    used_bytes: usize,
}

impl Cache {
    pub fn new(provider: Arc<dyn Provider>, chunk_compression: ChunkCompression, max_bytes: usize) -> Self {
        Self {
            provider,
            chunk_compression,
            entries: LruCache::unbounded(),
            max_bytes,
            used_bytes: 0,
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    fn ensure_chunk_loaded(&mut self, key: &str) -> Result<()> {
        if self.entries.get(key).is_some() {
            return Ok(());
        }
        let bytes = self.provider.get(key)?;
        let chunk = Chunk::frombuffer(&bytes, self.chunk_compression)?;
        let size = chunk.nbytes(self.chunk_compression)?;
        self.insert(key.to_string(), CacheObject::Chunk(chunk), size, false)
    }

    pub fn get_chunk(&mut self, key: &str) -> Result<&Chunk> {
        self.ensure_chunk_loaded(key)?;
        match &self.entries.get(key).unwrap().object {
            CacheObject::Chunk(c) => Ok(c),
            CacheObject::ChunkIdEncoder(_) => unreachable!("key {key} holds a chunk-id encoder"),
        }
    }

    pub fn get_chunk_mut(&mut self, key: &str) -> Result<&mut Chunk> {
        self.ensure_chunk_loaded(key)?;
        let entry = self.entries.get_mut(key).unwrap();
        entry.dirty = true;
        match &mut entry.object {
            CacheObject::Chunk(c) => Ok(c),
            CacheObject::ChunkIdEncoder(_) => unreachable!("key {key} holds a chunk-id encoder"),
        }
    }

    /// Inserts a freshly created chunk (no prior storage entry), marking it
    /// dirty so it gets written out on the next flush.
    pub fn put_new_chunk(&mut self, key: String, chunk: Chunk) -> Result<()> {
        let size = chunk.nbytes(self.chunk_compression)?;
        self.insert(key, CacheObject::Chunk(chunk), size, true)
    }

    /// Recomputes and re-tracks a chunk's size after an in-place mutation,
    /// running eviction if the mutation pushed the cache over budget.
    pub fn refresh_chunk_size(&mut self, key: &str) -> Result<()> {
        let entry = self
            .entries
            .peek(key)
            .ok_or_else(|| EngineError::InvalidArgument(format!("no cached entry for {key}")))?;
        let new_size = match &entry.object {
            CacheObject::Chunk(c) => c.nbytes(self.chunk_compression)?,
            CacheObject::ChunkIdEncoder(e) => e.tobytes(CURRENT_VERSION).len(),
        };
        let old_size = entry.size;
        let entry = self.entries.get_mut(key).unwrap();
        entry.size = new_size;
        self.used_bytes = self.used_bytes + new_size - old_size;
        self.evict_to_budget()
    }

    /// Recomputes and re-tracks the chunk-id encoder's size after an
    /// in-place mutation, running eviction if needed.
    pub fn refresh_chunk_id_encoder_size(&mut self, key: &str) -> Result<()> {
        self.refresh_chunk_size(key)
    }

    fn ensure_chunk_id_encoder_loaded(&mut self, key: &str) -> Result<()> {
        if self.entries.get(key).is_some() {
            return Ok(());
        }
        // A genuinely missing key means "no chunk id encoder has ever been
        // written for this tensor yet" and starts from empty; any other
        // provider error (permissions, a transient I/O failure, ...) must
        // propagate rather than silently discard the tensor's chunk index.
        let bytes = match self.provider.get(key) {
            Ok(bytes) => bytes,
            Err(EngineError::KeyNotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        let (encoder, version) = ChunkIdEncoder::frombuffer(&bytes)?;
        ChunkIdEncoder::check_version(&version)?;
        let size = encoder.tobytes(CURRENT_VERSION).len();
        self.insert(key.to_string(), CacheObject::ChunkIdEncoder(encoder), size, false)
    }

    pub fn get_chunk_id_encoder(&mut self, key: &str) -> Result<&ChunkIdEncoder> {
        self.ensure_chunk_id_encoder_loaded(key)?;
        match &self.entries.get(key).unwrap().object {
            CacheObject::ChunkIdEncoder(e) => Ok(e),
            CacheObject::Chunk(_) => unreachable!("key {key} holds a chunk"),
        }
    }

    pub fn get_chunk_id_encoder_mut(&mut self, key: &str) -> Result<&mut ChunkIdEncoder> {
        self.ensure_chunk_id_encoder_loaded(key)?;
        let entry = self.entries.get_mut(key).unwrap();
        entry.dirty = true;
        match &mut entry.object {
            CacheObject::ChunkIdEncoder(e) => Ok(e),
            CacheObject::Chunk(_) => unreachable!("key {key} holds a chunk"),
        }
    }

    /// Drops `key` from the cache without flushing it, then deletes it from
    /// the provider — for chunks a pop or retiling has made obsolete.
    pub fn evict_and_delete(&mut self, key: &str) -> Result<()> {
        if let Some(entry) = self.entries.pop(key) {
            self.used_bytes -= entry.size;
        }
        self.provider.delete(key)
    }

    fn insert(&mut self, key: String, object: CacheObject, size: usize, dirty: bool) -> Result<()> {
        if let Some(old) = self.entries.put(key, Entry { object, size, dirty }) {
            self.used_bytes -= old.size;
        }
        self.used_bytes += size;
        self.evict_to_budget()
    }

    fn evict_to_budget(&mut self) -> Result<()> {
        while self.used_bytes > self.max_bytes {
            let Some((key, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.used_bytes -= entry.size;
            if entry.dirty {
                trace!(key = %key, size = entry.size, "flushing dirty entry before eviction");
                Self::flush_one(&self.provider, &key, &entry.object, self.chunk_compression)?;
            }
            debug!(key = %key, used_bytes = self.used_bytes, max_bytes = self.max_bytes, "evicted cache entry");
        }
        Ok(())
    }

    /// Writes every dirty entry to the provider without evicting it from
    /// memory (durability flush, as opposed to eviction under budget
    /// pressure).
    pub fn flush(&mut self) -> Result<()> {
        let mut flushed = 0usize;
        for (key, entry) in self.entries.iter_mut() {
            if entry.dirty {
                Self::flush_one(&self.provider, key, &entry.object, self.chunk_compression)?;
                entry.dirty = false;
                flushed += 1;
            }
        }
        debug!(flushed, "cache flush complete");
        Ok(())
    }

    fn flush_one(
        provider: &Arc<dyn Provider>,
        key: &str,
        object: &CacheObject,
        chunk_compression: ChunkCompression,
    ) -> Result<()> {
        let bytes = match object {
            CacheObject::Chunk(c) => c.tobytes(chunk_compression)?,
            CacheObject::ChunkIdEncoder(e) => e.tobytes(CURRENT_VERSION),
        };
        provider.set(key, bytes)
    }
}
