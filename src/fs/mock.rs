// src/fs/mock.rs

use super::{ByteStream, FileStat, FileSystem};
use anyhow::{anyhow, Result};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::types::lock;

#[derive(Debug, Clone)]
pub struct MockFile {
    pub content: Vec<u8>,
    pub modified: SystemTime,
    /// Sizes reported by successive `metadata` calls. The last one sticks.
    /// Empty means "report the content length".
    pub size_script: VecDeque<u64>,
}

#[derive(Debug, Clone)]
pub enum MockEntry {
    File(MockFile),
    Dir,
}

#[derive(Debug, Default)]
struct MockState {
    entries: HashMap<PathBuf, MockEntry>,
    writes: HashMap<PathBuf, usize>,
    stats: HashMap<PathBuf, usize>,
}

/// In-memory filesystem for tests.
///
/// Besides plain contents it can script the sizes seen by consecutive stat
/// calls (to simulate a file that is still being written) and count writes.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    state: Arc<Mutex<MockState>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut state = lock(&self.state);
        ensure_dir_entry(&mut state.entries, path.as_ref());
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        let mut state = lock(&self.state);
        if let Some(parent) = path.parent() {
            ensure_dir_entry(&mut state.entries, parent);
        }
        state.entries.insert(
            path,
            MockEntry::File(MockFile {
                content: content.into(),
                modified: SystemTime::now(),
                size_script: VecDeque::new(),
            }),
        );
    }

    pub fn set_modified(&self, path: impl AsRef<Path>, modified: SystemTime) {
        let mut state = lock(&self.state);
        if let Some(MockEntry::File(file)) = state.entries.get_mut(path.as_ref()) {
            file.modified = modified;
        }
    }

    /// Make successive `metadata` calls report these sizes in order.
    pub fn script_sizes(&self, path: impl AsRef<Path>, sizes: impl IntoIterator<Item = u64>) {
        let mut state = lock(&self.state);
        if let Some(MockEntry::File(file)) = state.entries.get_mut(path.as_ref()) {
            file.size_script = sizes.into_iter().collect();
        }
    }

    pub fn remove(&self, path: impl AsRef<Path>) {
        lock(&self.state).entries.remove(path.as_ref());
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match lock(&self.state).entries.get(path.as_ref()) {
            Some(MockEntry::File(file)) => Some(file.content.clone()),
            _ => None,
        }
    }

    /// Number of `write` calls made against `path`.
    pub fn write_count(&self, path: impl AsRef<Path>) -> usize {
        lock(&self.state)
            .writes
            .get(path.as_ref())
            .copied()
            .unwrap_or(0)
    }

    /// Number of `metadata` calls made against `path`.
    pub fn stat_count(&self, path: impl AsRef<Path>) -> usize {
        lock(&self.state)
            .stats
            .get(path.as_ref())
            .copied()
            .unwrap_or(0)
    }
}

fn ensure_dir_entry(entries: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
    if path.as_os_str().is_empty() || entries.contains_key(path) {
        return;
    }
    entries.insert(path.to_path_buf(), MockEntry::Dir);
    if let Some(parent) = path.parent() {
        if parent != path {
            ensure_dir_entry(entries, parent);
        }
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let state = lock(&self.state);
        match state.entries.get(path) {
            Some(MockEntry::File(file)) => String::from_utf8(file.content.clone())
                .map_err(|e| anyhow!("Invalid UTF-8: {}", e)),
            Some(MockEntry::Dir) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        *lock(&self.state).writes.entry(path.to_path_buf()).or_default() += 1;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        lock(&self.state).entries.contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(lock(&self.state).entries.get(path), Some(MockEntry::Dir))
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        // Tests use absolute paths; there are no symlinks to resolve.
        if self.exists(path) {
            Ok(path.to_path_buf())
        } else {
            Err(anyhow!("No such file or directory: {:?}", path))
        }
    }

    fn metadata(&self, path: &Path) -> Result<FileStat> {
        let mut state = lock(&self.state);
        *state.stats.entry(path.to_path_buf()).or_default() += 1;
        match state.entries.get_mut(path) {
            Some(MockEntry::File(file)) => {
                let len = if file.size_script.len() > 1 {
                    file.size_script.pop_front().unwrap_or_default()
                } else {
                    file.size_script
                        .front()
                        .copied()
                        .unwrap_or(file.content.len() as u64)
                };
                Ok(FileStat {
                    len,
                    modified: file.modified,
                    is_file: true,
                })
            }
            Some(MockEntry::Dir) => Ok(FileStat {
                len: 0,
                modified: SystemTime::UNIX_EPOCH,
                is_file: false,
            }),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn open_read(&self, path: &Path) -> Result<ByteStream> {
        let state = lock(&self.state);
        match state.entries.get(path) {
            Some(MockEntry::File(file)) => Ok(Box::new(Cursor::new(file.content.clone()))),
            Some(MockEntry::Dir) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }
}
