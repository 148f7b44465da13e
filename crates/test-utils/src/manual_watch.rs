use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use dropship::errors::{DropshipError, Result};
use dropship::types::{FsEvent, FsEventKind};
use dropship::watch::{WatchBackend, WatchSession};

#[derive(Debug, Default)]
struct ManualState {
    sender: Option<mpsc::UnboundedSender<FsEvent>>,
    generation: u64,
    roots: Vec<PathBuf>,
    starts: usize,
    reject_roots: bool,
}

/// Watch backend driven by the test instead of the OS.
///
/// Events pushed with [`emit`](Self::emit) reach the uploader only while a
/// session is running, just like a real watcher that has been paused.
#[derive(Debug, Clone, Default)]
pub struct ManualWatchBackend {
    state: Arc<Mutex<ManualState>>,
}

impl ManualWatchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event. Returns false when no session is running.
    pub fn emit(&self, kind: FsEventKind, path: impl Into<PathBuf>) -> bool {
        let state = self.state.lock().unwrap();
        match &state.sender {
            Some(tx) => tx.send(FsEvent::new(kind, path)).is_ok(),
            None => false,
        }
    }

    pub fn add(&self, path: impl Into<PathBuf>) -> bool {
        self.emit(FsEventKind::Add, path)
    }

    pub fn change(&self, path: impl Into<PathBuf>) -> bool {
        self.emit(FsEventKind::Change, path)
    }

    pub fn remove(&self, path: impl Into<PathBuf>) -> bool {
        self.emit(FsEventKind::Remove, path)
    }

    /// Roots the current session was asked to watch.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().roots.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().sender.is_some()
    }

    /// Make sessions refuse every `add_root` call.
    pub fn reject_roots(&self, reject: bool) {
        self.state.lock().unwrap().reject_roots = reject;
    }

    /// How many sessions have been started so far.
    pub fn start_count(&self) -> usize {
        self.state.lock().unwrap().starts
    }
}

impl WatchBackend for ManualWatchBackend {
    fn start(&self, events: mpsc::UnboundedSender<FsEvent>) -> Result<Box<dyn WatchSession>> {
        let mut state = self.state.lock().unwrap();
        state.generation += 1;
        state.starts += 1;
        state.sender = Some(events);
        state.roots.clear();
        Ok(Box::new(ManualSession {
            state: Arc::clone(&self.state),
            generation: state.generation,
        }))
    }
}

struct ManualSession {
    state: Arc<Mutex<ManualState>>,
    generation: u64,
}

impl ManualSession {
    fn with_current<F: FnOnce(&mut ManualState)>(&self, f: F) {
        let mut state = self.state.lock().unwrap();
        if state.generation == self.generation {
            f(&mut state);
        }
    }
}

impl WatchSession for ManualSession {
    fn add_root(&mut self, root: &Path) -> Result<()> {
        if self.state.lock().unwrap().reject_roots {
            return Err(DropshipError::Other(anyhow::anyhow!(
                "watch limit reached for {}",
                root.display()
            )));
        }
        self.with_current(|s| s.roots.push(root.to_path_buf()));
        Ok(())
    }

    fn remove_root(&mut self, root: &Path) -> Result<()> {
        self.with_current(|s| s.roots.retain(|r| r != root));
        Ok(())
    }
}

impl Drop for ManualSession {
    fn drop(&mut self) {
        self.with_current(|s| {
            s.sender = None;
            s.roots.clear();
        });
    }
}
