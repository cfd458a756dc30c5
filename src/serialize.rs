//! Frames chunk and chunk-id-encoder blobs with a version header.
//!
//! The version prefix (`[len(version):u4][version:UTF-8]`) is shared by
//! both blob kinds; [`Chunk`](crate::chunk::Chunk) and
//! [`ChunkIdEncoder`](crate::encode::ChunkIdEncoder) each append their own
//! table/data payload after it.

use crate::encode::{BytePositionsEncoder, ShapeEncoder};
use crate::error::{EngineError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

pub fn write_version_prefix(out: &mut Vec<u8>, version: &str) {
    out.write_u32::<LittleEndian>(version.len() as u32).unwrap();
    out.extend_from_slice(version.as_bytes());
}

/// Reads the `[len(version):u4][version:UTF-8]` prefix. Returns the
/// version string and the number of bytes consumed.
pub fn read_version_prefix(buf: &[u8]) -> Result<(String, usize)> {
    if buf.len() < 4 {
        return Err(EngineError::InvalidArgument(
            "blob too short for version prefix".into(),
        ));
    }
    let mut cursor = Cursor::new(buf);
    let len = cursor.read_u32::<LittleEndian>()? as usize;
    let start = cursor.position() as usize;
    let end = start
        .checked_add(len)
        .filter(|&e| e <= buf.len())
        .ok_or_else(|| EngineError::InvalidArgument("blob version length out of range".into()))?;
    let version = String::from_utf8(buf[start..end].to_vec())
        .map_err(|_| EngineError::InvalidArgument("blob version is not UTF-8".into()))?;
    Ok((version, end))
}

/// Serializes a chunk's full on-disk blob: `[len(version):u4][version]
/// [shape-table][bytepos-table][data...]`.
pub fn serialize_chunk(
    version: &str,
    shapes: &ShapeEncoder,
    byte_positions: &BytePositionsEncoder,
    data: &[u8],
) -> Vec<u8> {
    let shape_bytes = shapes.table_to_bytes();
    let bytepos_bytes = byte_positions.table_to_bytes();

    let mut out = Vec::with_capacity(4 + version.len() + shape_bytes.len() + bytepos_bytes.len() + data.len());
    write_version_prefix(&mut out, version);
    out.extend_from_slice(&shape_bytes);
    out.extend_from_slice(&bytepos_bytes);
    out.extend_from_slice(data);
    out
}

/// Inverse of [`serialize_chunk`]. `data` is length-implicit: the
/// remainder of the blob after both tables.
pub fn deserialize_chunk(buf: &[u8]) -> Result<(String, ShapeEncoder, BytePositionsEncoder, Vec<u8>)> {
    let (version, mut offset) = read_version_prefix(buf)?;

    let (shapes, consumed) = ShapeEncoder::table_from_bytes(&buf[offset..])?;
    offset += consumed;

    let (byte_positions, consumed) = BytePositionsEncoder::table_from_bytes(&buf[offset..])?;
    offset += consumed;

    let data = buf[offset..].to_vec();
    Ok((version, shapes, byte_positions, data))
}

/// Computes the exact serialized size of a chunk blob without building the
/// buffer — used by
/// [`Chunk::nbytes`](crate::chunk::Chunk::nbytes) so the LRU cache can
/// account for a chunk's size without serializing it first.
pub fn infer_chunk_num_bytes(
    version: &str,
    shapes: &ShapeEncoder,
    byte_positions: &BytePositionsEncoder,
    len_data: usize,
) -> usize {
    let shape_cols = shapes.ndim() + 1;
    let shape_table_bytes = 8 + shapes.num_rows() * shape_cols * 4;
    let bytepos_cols = 3;
    let bytepos_table_bytes = 8 + byte_positions.num_rows() * bytepos_cols * 4;
    4 + version.len() + shape_table_bytes + bytepos_table_bytes + len_data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_blob_roundtrips() {
        let mut shapes = ShapeEncoder::new(2);
        shapes.register_samples(&[2, 2], 3).unwrap();
        let mut bytepos = BytePositionsEncoder::new();
        bytepos.register_samples(4, 3).unwrap();
        let data = vec![1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];

        let blob = serialize_chunk("1.0.0", &shapes, &bytepos, &data);
        assert_eq!(blob.len(), infer_chunk_num_bytes("1.0.0", &shapes, &bytepos, data.len()));

        let (version, decoded_shapes, decoded_bytepos, decoded_data) =
            deserialize_chunk(&blob).unwrap();
        assert_eq!(version, "1.0.0");
        assert_eq!(decoded_shapes.num_rows(), 1);
        assert_eq!(decoded_bytepos.num_rows(), 1);
        assert_eq!(decoded_data, data);
    }
}
