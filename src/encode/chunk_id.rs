//! Maps sample index to one or more chunk ids.
//!
//! Unlike the shape and byte-position tables, the chunk-id table's rows
//! hold a genuine 64-bit value (the chunk id itself), so it does not reuse
//! [`super::base::RunLengthEncoder`]'s `u32`-columnar wire format — its
//! blob is `[len(version):u4][version][row-count:u4][rows as u64 LE]`
//! two `u64`s per row (id, last-seen). The row-management
//! algorithm (binary search, split-free append, pop) still follows the
//! same shape as the base encoder; it is reimplemented here because the
//! combine condition, sentinel handling, and tiled-sample semantics are
//! specific enough to this encoder that sharing the generic type added
//! more indirection than it removed.

use crate::config::NO_SAMPLES_SENTINEL;
use crate::error::{EngineError, Result};
use crate::meta::CURRENT_VERSION;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkIdRow {
    id: u64,
    /// Sample index this row's chunk was last extended to, or
    /// [`NO_SAMPLES_SENTINEL`] if the chunk has no samples registered yet.
    last_seen: u32,
}

/// Run-length table mapping sample index to the chunk id(s) storing it.
#[derive(Debug, Clone, Default)]
pub struct ChunkIdEncoder {
    rows: Vec<ChunkIdRow>,
}

impl ChunkIdEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn num_samples(&self) -> u64 {
        match self.rows.last() {
            None => 0,
            Some(row) if row.last_seen == NO_SAMPLES_SENTINEL => 0,
            Some(row) => row.last_seen as u64 + 1,
        }
    }

    /// Number of distinct chunks this encoder has ever allocated an id for.
    pub fn num_chunks(&self) -> usize {
        self.rows.len()
    }

    /// The most recently allocated chunk id, if any.
    pub fn last_chunk_id(&self) -> Option<u64> {
        self.rows.last().map(|r| r.id)
    }

    /// Renders a chunk id as the lowercase hex storage-key suffix.
    pub fn name_from_id(id: u64) -> String {
        format!("{:x}", id)
    }

    /// Inverse of [`name_from_id`](Self::name_from_id).
    pub fn id_from_name(name: &str) -> Result<u64> {
        u64::from_str_radix(name, 16)
            .map_err(|_| EngineError::ChunkIdEncoder(format!("invalid chunk id name: {}", name)))
    }

    /// Generates a fresh 64-bit chunk id from a random UUIDv4, keeping only
    /// the low `64 - shift_amount` bits, and appends a new row
    /// for it covering zero samples so far.
    pub fn generate_chunk_id(&mut self, shift_amount: u32) -> u64 {
        let raw = Uuid::new_v4().as_u128();
        let id = (raw >> shift_amount) as u64;

        let last_seen = if self.rows.is_empty() {
            NO_SAMPLES_SENTINEL
        } else {
            self.rows.last().unwrap().last_seen
        };
        self.rows.push(ChunkIdRow { id, last_seen });
        id
    }

    /// Adds `n` to the last row's `last_seen`. `n` may be 0 only when this
    /// chunk is a tile continuation (i.e. at least 2 rows already exist),
    /// matching the encoder's guard against registering a continuation onto nothing.
    pub fn register_samples(&mut self, n: u64) -> Result<()> {
        let last = self
            .rows
            .last_mut()
            .ok_or_else(|| {
                EngineError::ChunkIdEncoder(
                    "cannot register samples because no chunk ids exist".into(),
                )
            })?;

        if n == 0 && self.rows.len() < 2 {
            return Err(EngineError::ChunkIdEncoder(
                "cannot register 0 samples (tile continuation) when no prior chunk exists".into(),
            ));
        }

        let base = if last.last_seen == NO_SAMPLES_SENTINEL {
            0
        } else {
            last.last_seen as u64 + 1
        };
        let new_last_seen = base
            .checked_add(n)
            .and_then(|v| v.checked_sub(1))
            .ok_or_else(|| EngineError::ChunkIdEncoder("sample count overflowed".into()))?;
        last.last_seen = u32::try_from(new_last_seen)
            .map_err(|_| EngineError::InvalidArgument("sample index exceeds u32 range".into()))?;
        Ok(())
    }

    /// Binary search for the smallest row whose `last_seen >= i`.
    fn translate_index(&self, i: u64) -> Result<usize> {
        let num_samples = self.num_samples();
        if i >= num_samples {
            return Err(EngineError::InvalidArgument(format!(
                "sample index {} out of range (num_samples = {})",
                i, num_samples
            )));
        }
        Ok(self.rows.partition_point(|r| (r.last_seen as u64) < i))
    }

    /// Returns every chunk id whose row matches sample `i`. A single id
    /// means the sample lives wholly in one chunk; more than one means it
    /// is tiled across consecutive chunks in storage order.
    pub fn get(&self, i: u64) -> Result<Vec<u64>> {
        let row_index = self.translate_index(i)?;
        let mut out = vec![self.rows[row_index].id];

        let mut next = row_index + 1;
        while next < self.rows.len() && self.rows[next].last_seen as u64 == i {
            out.push(self.rows[next].id);
            next += 1;
        }
        Ok(out)
    }

    /// Sample `i`'s offset relative to the start of its (first) chunk.
    /// Only meaningful for non-tiled samples.
    pub fn translate_index_relative_to_chunks(&self, i: u64) -> Result<u64> {
        let row_index = self.translate_index(i)?;
        if row_index == 0 {
            return Ok(i);
        }
        let prev_last_seen = self.rows[row_index - 1].last_seen;
        let prev_num_samples = if prev_last_seen == NO_SAMPLES_SENTINEL {
            0
        } else {
            prev_last_seen as u64 + 1
        };
        Ok(i - prev_num_samples)
    }

    fn num_samples_in_last_chunk(&self) -> u64 {
        match self.rows.len() {
            0 => 0,
            1 => {
                let row = &self.rows[0];
                if row.last_seen == NO_SAMPLES_SENTINEL {
                    0
                } else {
                    row.last_seen as u64 + 1
                }
            }
            n => {
                let last = self.rows[n - 1].last_seen;
                let prev = self.rows[n - 2].last_seen;
                last as u64 - prev as u64
            }
        }
    }

    /// Pops the last sample, returning the chunk ids whose storage keys the
    /// caller must delete (empty if the last chunk still has samples left
    /// after the pop).
    pub fn pop(&mut self) -> Result<Vec<u64>> {
        if self.rows.is_empty() {
            return Err(EngineError::InvalidArgument(
                "cannot pop from an empty chunk id encoder".into(),
            ));
        }
        let last_index_ids = self.get(self.num_samples() - 1)?;

        if last_index_ids.len() > 1 {
            let drop_count = last_index_ids.len();
            self.rows.truncate(self.rows.len() - drop_count);
            Ok(last_index_ids)
        } else if self.num_samples_in_last_chunk() == 1 {
            self.rows.pop();
            Ok(last_index_ids)
        } else {
            let last = self.rows.last_mut().unwrap();
            last.last_seen -= 1;
            Ok(Vec::new())
        }
    }

    /// Bulk-appends another encoder's rows, shifting their `last_seen`
    /// values by this encoder's current `num_samples`.
    pub fn extend_from(&mut self, other: &ChunkIdEncoder) -> Result<()> {
        let offset = self.num_samples();
        for row in &other.rows {
            let last_seen = if row.last_seen == NO_SAMPLES_SENTINEL {
                NO_SAMPLES_SENTINEL
            } else {
                u32::try_from(row.last_seen as u64 + offset).map_err(|_| {
                    EngineError::InvalidArgument("sample index exceeds u32 range".into())
                })?
            };
            self.rows.push(ChunkIdRow {
                id: row.id,
                last_seen,
            });
        }
        Ok(())
    }

    pub fn tobytes(&self, version: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + version.len() + 4 + self.rows.len() * 16);
        out.write_u32::<LittleEndian>(version.len() as u32).unwrap();
        out.extend_from_slice(version.as_bytes());
        out.write_u32::<LittleEndian>(self.rows.len() as u32).unwrap();
        for row in &self.rows {
            out.write_u64::<LittleEndian>(row.id).unwrap();
            out.write_u64::<LittleEndian>(row.last_seen as u64).unwrap();
        }
        out
    }

    pub fn frombuffer(buf: &[u8]) -> Result<(Self, String)> {
        if buf.is_empty() {
            return Ok((Self::default(), String::new()));
        }
        let mut cursor = Cursor::new(buf);
        let version_len = cursor.read_u32::<LittleEndian>()? as usize;
        let mut version_bytes = vec![0u8; version_len];
        std::io::Read::read_exact(&mut cursor, &mut version_bytes)?;
        let version = String::from_utf8(version_bytes)
            .map_err(|_| EngineError::InvalidArgument("chunk id version is not UTF-8".into()))?;

        let row_count = cursor.read_u32::<LittleEndian>()? as usize;
        let mut rows = Vec::with_capacity(row_count);
        for _ in 0..row_count {
            let id = cursor.read_u64::<LittleEndian>()?;
            let last_seen = cursor.read_u64::<LittleEndian>()? as u32;
            rows.push(ChunkIdRow { id, last_seen });
        }
        Ok((Self { rows }, version))
    }

    /// Forward-compatibility check for the version stamp read alongside
    /// `frombuffer`'s rows, mirroring [`crate::chunk::Chunk`]'s `ffw_chunk`.
    /// The encoder has no version field of its own to migrate in place —
    /// a compatible on-disk stamp is simply accepted, since it gets
    /// replaced with `CURRENT_VERSION` the next time the encoder is
    /// serialized — but a blob from a newer build than this one
    /// understands is still rejected.
    pub fn check_version(version: &str) -> Result<()> {
        if version.is_empty() || version == CURRENT_VERSION {
            return Ok(());
        }
        if version_is_newer(version, CURRENT_VERSION) {
            return Err(EngineError::VersionMismatch {
                found: version.to_string(),
                supported: CURRENT_VERSION.to_string(),
            });
        }
        Ok(())
    }
}

fn version_is_newer(candidate: &str, supported: &str) -> bool {
    let parse = |s: &str| -> Vec<u32> { s.split('.').filter_map(|p| p.parse().ok()).collect() };
    parse(candidate) > parse(supported)
}
