//! The three run-length-encoded header tables. Shape
//! and byte-position rows are thin [`base::RunLengthEncoder`] instantiations;
//! the chunk-id table has its own 64-bit row format (see
//! [`chunk_id::ChunkIdEncoder`]).

pub mod base;
pub mod byte_positions;
pub mod chunk_id;
pub mod shape;

pub use base::{EncodedValue, RunLengthEncoder};
pub use byte_positions::BytePositionsEncoder;
pub use chunk_id::ChunkIdEncoder;
pub use shape::ShapeEncoder;
