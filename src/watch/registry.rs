// src/watch/registry.rs

//! The set of watched roots and their opaque configuration.
//!
//! Keys are expected to be canonical already (the `Uploader` resolves them
//! through the `FileSystem` before calling in). Iteration order is
//! registration order, which decides ownership when roots nest.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::types::{read, write, RootConfig};
use crate::watch::path_utils::{find_owning_root, CASE_INSENSITIVE_FS};

#[derive(Debug, Clone, PartialEq)]
pub struct WatchRoot {
    pub path: PathBuf,
    pub config: RootConfig,
}

#[derive(Debug, Default)]
pub struct PathRegistry {
    roots: RwLock<Vec<WatchRoot>>,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` or overwrite its config. Returns true if it was new.
    pub fn insert(&self, path: PathBuf, config: RootConfig) -> bool {
        let mut roots = write(&self.roots);
        match roots.iter_mut().find(|r| r.path == path) {
            Some(existing) => {
                existing.config = config;
                false
            }
            None => {
                roots.push(WatchRoot { path, config });
                true
            }
        }
    }

    pub fn remove(&self, path: &Path) -> Option<RootConfig> {
        let mut roots = write(&self.roots);
        let idx = roots.iter().position(|r| r.path == path)?;
        Some(roots.remove(idx).config)
    }

    /// Drop every root, returning the paths that were registered.
    pub fn clear(&self) -> Vec<PathBuf> {
        write(&self.roots).drain(..).map(|r| r.path).collect()
    }

    pub fn get(&self, path: &Path) -> Option<RootConfig> {
        read(&self.roots)
            .iter()
            .find(|r| r.path == path)
            .map(|r| r.config.clone())
    }

    pub fn contains(&self, path: &Path) -> bool {
        read(&self.roots).iter().any(|r| r.path == path)
    }

    pub fn is_empty(&self) -> bool {
        read(&self.roots).is_empty()
    }

    pub fn len(&self) -> usize {
        read(&self.roots).len()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        read(&self.roots).iter().map(|r| r.path.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<WatchRoot> {
        read(&self.roots).clone()
    }

    /// Resolve the root owning `path`, using platform case folding.
    pub fn resolve(&self, path: &Path) -> Option<PathBuf> {
        let roots = read(&self.roots);
        find_owning_root(path, roots.iter().map(|r| &r.path), CASE_INSENSITIVE_FS)
    }
}
