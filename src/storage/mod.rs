//! The pluggable byte-addressable key-value store the chunk engine is built
//! against.
//!
//! All keys are POSIX-style paths (`T/chunks/<hex-id>`, see
//! [`crate::engine`]'s key scheme); values are opaque bytes. Two providers
//! ship in-crate — [`memory::MemoryProvider`] for tests and ephemeral
//! datasets, [`local::LocalProvider`] for an on-disk directory tree. Object
//! stores (S3, GCS) are out of scope but could implement the same trait.

pub mod local;
pub mod memory;

use crate::error::{EngineError, Result};

/// A byte-addressable key-value store.
///
/// Implementations must be safe to share behind an `Arc` and call from
/// multiple reader threads; the engine itself assumes a single logical
/// writer but does not require the provider to enforce that.
pub trait Provider: Send + Sync {
    /// Fetches the bytes stored at `key`, or [`EngineError::KeyNotFound`] if
    /// absent.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Writes `value` at `key`, creating or overwriting it.
    fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Removes `key`. Not an error if the key is already absent.
    fn delete(&self, key: &str) -> Result<()>;

    /// Whether `key` currently has a value.
    fn contains(&self, key: &str) -> Result<bool>;

    /// Lists every key starting with `prefix`, in no particular order.
    fn iter_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Deletes every key starting with `prefix`.
    fn clear(&self, prefix: &str) -> Result<()>;

    /// Whether this provider refuses writes (`set`/`delete`/`clear`).
    fn check_readonly(&self) -> bool;
}

/// Helper shared by providers: turns "not found" into the crate's
/// [`EngineError::KeyNotFound`] rather than a provider-specific error type.
pub(crate) fn key_not_found(key: &str) -> EngineError {
    EngineError::KeyNotFound(key.to_string())
}
