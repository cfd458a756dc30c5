//! Tunable constants, overridable by environment variable.
//!
//! Mirrors `laz`'s habit of keeping a handful of `const` defaults (e.g.
//! `DEFAULT_CHUNK_SIZE`) near the top of the module that uses them, but
//! generalized to the small set of knobs this crate needs, read once at
//! [`Config::from_env`] rather than scattered across call sites.

use std::env;

/// The dtype used to encode run-length table rows.
pub type EncodingDType = u32;

/// Default soft byte budget for a chunk, 16 MiB.
pub const DEFAULT_CHUNK_MAX_SIZE: u32 = 16 * 1024 * 1024;

/// Number of high bits discarded from a 128-bit UUIDv4 to produce a 64-bit
/// chunk id.
pub const UUID_SHIFT_AMOUNT: u32 = 64;

/// Sentinel stored in the last-seen column of a freshly generated chunk id
/// row that has not yet had any samples registered to it.
pub const NO_SAMPLES_SENTINEL: EncodingDType = EncodingDType::MAX;

/// Default per-tensor LRU cache byte budget, 256 MiB.
pub const DEFAULT_CACHE_BYTES: usize = 256 * 1024 * 1024;

const ENV_MAX_CHUNK_SIZE: &str = "CHUNK_STORE_MAX_CHUNK_SIZE";
const ENV_UUID_SHIFT_AMOUNT: &str = "CHUNK_STORE_UUID_SHIFT_AMOUNT";
const ENV_CACHE_BYTES: &str = "CHUNK_STORE_CACHE_BYTES";

/// Process-wide engine configuration.
///
/// Constructed once via [`Config::from_env`] and passed down to the
/// [`crate::engine::ChunkEngine`]; never read from the environment again
/// after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub default_chunk_max_size: u32,
    pub uuid_shift_amount: u32,
    pub cache_byte_budget: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_chunk_max_size: DEFAULT_CHUNK_MAX_SIZE,
            uuid_shift_amount: UUID_SHIFT_AMOUNT,
            cache_byte_budget: DEFAULT_CACHE_BYTES,
        }
    }
}

impl Config {
    /// Builds a [`Config`], letting `CHUNK_STORE_MAX_CHUNK_SIZE`,
    /// `CHUNK_STORE_UUID_SHIFT_AMOUNT` and `CHUNK_STORE_CACHE_BYTES`
    /// override the compiled-in defaults. Unparsable or missing values fall
    /// back silently to the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var(ENV_MAX_CHUNK_SIZE) {
            if let Ok(parsed) = val.parse() {
                config.default_chunk_max_size = parsed;
            }
        }

        if let Ok(val) = env::var(ENV_UUID_SHIFT_AMOUNT) {
            if let Ok(parsed) = val.parse() {
                config.uuid_shift_amount = parsed;
            }
        }

        if let Ok(val) = env::var(ENV_CACHE_BYTES) {
            if let Ok(parsed) = val.parse() {
                config.cache_byte_budget = parsed;
            }
        }

        config
    }
}
