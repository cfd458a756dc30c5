//! Definitions of error related things.

use std::fmt;

/// Errors surfaced by this crate.
///
/// [`EngineError::FullChunk`] is the one expected-control-flow variant: the
/// engine catches it internally when appending and allocates a new chunk,
/// so callers of the public API should rarely see it escape.
#[derive(Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// A chunk has no space left for the next append.
    FullChunk,
    /// A sample's new shape does not have the same number of dimensions as
    /// the sample it is replacing.
    InvalidSampleShape { expected_ndim: usize, got_ndim: usize },
    /// The chunk-id encoder was asked to do something invalid for its
    /// current state (e.g. register samples before a chunk id exists).
    ChunkIdEncoder(String),
    /// The key-value store does not have an entry for the given key.
    KeyNotFound(String),
    /// The tensor metadata loaded from storage does not match what the
    /// caller expects (dtype, compression, or dimensionality mismatch).
    MetaMismatch(String),
    /// An on-disk blob's version string is newer than this build of the
    /// engine understands.
    VersionMismatch { found: String, supported: String },
    /// A register/overwrite call received an invalid argument.
    InvalidArgument(String),
    /// Wrapper around an io error from the std lib.
    Io(std::io::Error),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::InvalidArgument(format!("json error: {}", e))
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match self {
            EngineError::FullChunk => write!(f, "chunk has no space left for this append"),
            EngineError::InvalidSampleShape {
                expected_ndim,
                got_ndim,
            } => write!(
                f,
                "sample has {} dimensions, expected {}",
                got_ndim, expected_ndim
            ),
            EngineError::ChunkIdEncoder(msg) => write!(f, "chunk id encoder error: {}", msg),
            EngineError::KeyNotFound(key) => write!(f, "key not found: {}", key),
            EngineError::MetaMismatch(msg) => write!(f, "tensor meta mismatch: {}", msg),
            EngineError::VersionMismatch { found, supported } => write!(
                f,
                "blob version {} is newer than the supported version {}",
                found, supported
            ),
            EngineError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            EngineError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}

pub type Result<T> = std::result::Result<T, EngineError>;
