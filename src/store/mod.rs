// src/store/mod.rs

//! Persisted uploader state.
//!
//! One JSON document per instance, at `<config_path>/.<name>.json`:
//!
//! ```json
//! {
//!   "cache": { "/photos/a.jpg": { "mtime": "2024-05-01T10:00:00Z" } },
//!   "paths": { "/photos": { "album": "holiday" } },
//!   "customConfig": { "token": "..." }
//! }
//! ```
//!
//! The cache is a "seen" marker: an entry is written when a file is handed to
//! the upload queue, not when its transfer succeeds.

pub mod debounce;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{DropshipError, Result};
use crate::events::EventBus;
use crate::fs::FileSystem;
use crate::types::{lock, RootConfig};
use crate::watch::registry::PathRegistry;

pub use debounce::SaveScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub mtime: DateTime<Utc>,
}

impl CacheEntry {
    pub fn from_system_time(time: SystemTime) -> Self {
        Self { mtime: time.into() }
    }
}

/// On-disk layout of the state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistentState {
    #[serde(default)]
    pub cache: BTreeMap<String, CacheEntry>,

    /// Roots in registration order; root resolution depends on it.
    #[serde(default)]
    pub paths: serde_json::Map<String, RootConfig>,

    #[serde(default, rename = "customConfig")]
    pub custom_config: BTreeMap<String, serde_json::Value>,
}

/// Read the state file. A missing file is a fresh start; a malformed one is
/// an error the caller should treat as fatal.
pub fn read_state(fs: &dyn FileSystem, file: &Path) -> Result<PersistentState> {
    if !fs.exists(file) {
        debug!(?file, "no state file; starting fresh");
        return Ok(PersistentState::default());
    }
    let contents = fs.read_to_string(file)?;
    serde_json::from_str(&contents).map_err(|source| DropshipError::StateError {
        path: file.to_path_buf(),
        source,
    })
}

fn cache_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// In-memory owner of the cache and custom settings, plus the write path.
///
/// Roots are owned by the [`PathRegistry`]; the store only reads them when
/// serialising.
#[derive(Debug)]
pub struct StateStore {
    fs: Arc<dyn FileSystem>,
    file: PathBuf,
    registry: Arc<PathRegistry>,
    cache: Mutex<BTreeMap<String, CacheEntry>>,
    custom: Mutex<BTreeMap<String, serde_json::Value>>,
    events: EventBus,
}

impl StateStore {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        file: PathBuf,
        registry: Arc<PathRegistry>,
        events: EventBus,
        cache: BTreeMap<String, CacheEntry>,
        custom: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            fs,
            file,
            registry,
            cache: Mutex::new(cache),
            custom: Mutex::new(custom),
            events,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn cached(&self, path: &Path) -> Option<CacheEntry> {
        lock(&self.cache).get(&cache_key(path)).copied()
    }

    /// Mark the current version of `path` as seen.
    pub fn record(&self, path: &Path, modified: SystemTime) {
        lock(&self.cache).insert(cache_key(path), CacheEntry::from_system_time(modified));
    }

    pub fn evict(&self, path: &Path) -> bool {
        lock(&self.cache).remove(&cache_key(path)).is_some()
    }

    pub fn custom(&self, name: &str) -> Option<serde_json::Value> {
        lock(&self.custom).get(name).cloned()
    }

    pub fn set_custom(&self, name: &str, value: serde_json::Value) {
        lock(&self.custom).insert(name.to_string(), value);
    }

    pub fn snapshot(&self) -> PersistentState {
        let paths = self
            .registry
            .snapshot()
            .into_iter()
            .map(|root| (cache_key(&root.path), root.config))
            .collect();
        PersistentState {
            cache: lock(&self.cache).clone(),
            paths,
            custom_config: lock(&self.custom).clone(),
        }
    }

    /// Serialise and write the state file now.
    pub fn flush(&self) -> Result<()> {
        self.events
            .log(format!("Writing cache to {}...", self.file.display()));
        let state = self.snapshot();
        let bytes = serde_json::to_vec(&state).context("serialising uploader state")?;
        self.fs.write(&self.file, &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use serde_json::json;
    use std::time::Duration;

    fn store(fs: &MockFileSystem, registry: Arc<PathRegistry>) -> StateStore {
        StateStore::new(
            Arc::new(fs.clone()),
            PathBuf::from("/cfg/.dropship.json"),
            registry,
            EventBus::new(),
            BTreeMap::new(),
            BTreeMap::new(),
        )
    }

    #[test]
    fn missing_state_file_is_a_fresh_start() {
        let fs = MockFileSystem::new();
        let state = read_state(&fs, Path::new("/cfg/.dropship.json")).unwrap();
        assert_eq!(state, PersistentState::default());
    }

    #[test]
    fn malformed_state_file_is_an_error() {
        let fs = MockFileSystem::new();
        fs.add_file("/cfg/.dropship.json", "{ not json");
        match read_state(&fs, Path::new("/cfg/.dropship.json")) {
            Err(DropshipError::StateError { path, .. }) => {
                assert_eq!(path, PathBuf::from("/cfg/.dropship.json"))
            }
            other => panic!("expected StateError, got {:?}", other),
        }
    }

    #[test]
    fn flush_writes_cache_paths_and_custom_config() {
        let fs = MockFileSystem::new();
        let registry = Arc::new(PathRegistry::new());
        registry.insert("/photos".into(), json!({"album": "x"}));
        let store = store(&fs, registry);

        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        store.record(Path::new("/photos/a.jpg"), mtime);
        store.set_custom("token", json!("abc"));
        store.flush().unwrap();

        let written = fs.contents("/cfg/.dropship.json").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&written).unwrap();
        assert_eq!(value["paths"]["/photos"], json!({"album": "x"}));
        assert_eq!(value["customConfig"]["token"], json!("abc"));
        assert_eq!(
            value["cache"]["/photos/a.jpg"]["mtime"],
            json!("2023-11-14T22:13:20Z")
        );

        let reread = read_state(&fs, Path::new("/cfg/.dropship.json")).unwrap();
        assert_eq!(
            reread.cache.get("/photos/a.jpg"),
            Some(&CacheEntry::from_system_time(mtime))
        );
    }

    #[test]
    fn roots_keep_registration_order_through_a_write() {
        let fs = MockFileSystem::new();
        let registry = Arc::new(PathRegistry::new());
        registry.insert("/w/sub".into(), json!({"dest": "inner"}));
        registry.insert("/w".into(), json!({"dest": "outer"}));
        store(&fs, registry).flush().unwrap();

        let reread = read_state(&fs, Path::new("/cfg/.dropship.json")).unwrap();
        let keys: Vec<&str> = reread.paths.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["/w/sub", "/w"]);
    }

    #[test]
    fn evict_removes_entry() {
        let fs = MockFileSystem::new();
        let store = store(&fs, Arc::new(PathRegistry::new()));
        store.record(Path::new("/w/a"), SystemTime::now());
        assert!(store.evict(Path::new("/w/a")));
        assert!(store.cached(Path::new("/w/a")).is_none());
        assert!(!store.evict(Path::new("/w/a")));
    }
}
