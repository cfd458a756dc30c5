//! In-memory [`Provider`], for tests and ephemeral datasets.

use super::{key_not_found, Provider};
use crate::error::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug, Default)]
pub struct MemoryProvider {
    map: RwLock<HashMap<String, Vec<u8>>>,
    readonly: bool,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a provider that rejects every write (`check_readonly` returns
    /// `true`), useful for exercising read-only callers in tests.
    pub fn new_readonly() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            readonly: true,
        }
    }
}

impl Provider for MemoryProvider {
    fn get(&self, key: &str) -> Result<Vec<u8>> {
        trace!(key, "reading key from memory provider");
        self.map.read().get(key).cloned().ok_or_else(|| key_not_found(key))
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        trace!(key, nbytes = value.len(), "writing key to memory provider");
        self.map.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        trace!(key, "deleting key from memory provider");
        self.map.write().remove(key);
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.map.read().contains_key(key))
    }

    fn iter_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .map
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn clear(&self, prefix: &str) -> Result<()> {
        trace!(prefix, "clearing keys from memory provider");
        self.map.write().retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }

    fn check_readonly(&self) -> bool {
        self.readonly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let provider = MemoryProvider::new();
        provider.set("t/chunks/abc", vec![1, 2, 3]).unwrap();
        assert_eq!(provider.get("t/chunks/abc").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn missing_key_errors() {
        let provider = MemoryProvider::new();
        assert!(provider.get("nope").is_err());
    }

    #[test]
    fn clear_removes_only_matching_prefix() {
        let provider = MemoryProvider::new();
        provider.set("t/chunks/a", vec![1]).unwrap();
        provider.set("t/chunks/b", vec![2]).unwrap();
        provider.set("u/chunks/a", vec![3]).unwrap();

        provider.clear("t/").unwrap();

        assert!(!provider.contains("t/chunks/a").unwrap());
        assert!(!provider.contains("t/chunks/b").unwrap());
        assert!(provider.contains("u/chunks/a").unwrap());
    }
}
