//! Filesystem-backed [`Provider`]: keys map to files under a root directory.

use super::{key_not_found, Provider};
use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

#[derive(Debug)]
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    /// Builds a provider rooted at `root`, creating the directory if it does
    /// not exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are POSIX-style paths; join components directly
        // rather than via `Path::join` on the whole string so a leading `/`
        // in a malformed key can't escape `root`.
        let mut path = self.root.clone();
        for component in key.split('/').filter(|c| !c.is_empty()) {
            path.push(component);
        }
        path
    }
}

impl Provider for LocalProvider {
    fn get(&self, key: &str) -> Result<Vec<u8>> {
        trace!(key, "reading key from local provider");
        fs::read(self.path_for(key)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                key_not_found(key)
            } else {
                e.into()
            }
        })
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        trace!(key, nbytes = value.len(), "writing key to local provider");
        fs::write(path, value)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        trace!(key, "deleting key from local provider");
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key).is_file())
    }

    fn iter_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        collect_keys(&self.root, &self.root, &mut out)?;
        Ok(out.into_iter().filter(|k| k.starts_with(prefix)).collect())
    }

    fn clear(&self, prefix: &str) -> Result<()> {
        let keys = self.iter_keys(prefix)?;
        trace!(prefix, count = keys.len(), "clearing keys from local provider");
        for key in keys {
            self.delete(&key)?;
        }
        Ok(())
    }

    fn check_readonly(&self) -> bool {
        false
    }
}

fn collect_keys(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_keys(root, &path, out)?;
        } else {
            let relative = path.strip_prefix(root).unwrap();
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(key);
        }
    }
    Ok(())
}
