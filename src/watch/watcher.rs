// src/watch/watcher.rs

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::types::{FsEvent, FsEventKind};
use crate::watch::event_handler::{run_event_loop, WatchContext};

/// A running native watch. Dropping it stops event delivery.
pub trait WatchSession: Send {
    fn add_root(&mut self, root: &Path) -> Result<()>;
    fn remove_root(&mut self, root: &Path) -> Result<()>;
}

/// Factory for watch sessions.
///
/// Production uses [`NotifyBackend`]; tests inject a backend that lets them
/// push events by hand.
pub trait WatchBackend: Send + Sync + Debug {
    fn start(&self, events: mpsc::UnboundedSender<FsEvent>) -> Result<Box<dyn WatchSession>>;
}

/// Recursive watching through the platform's `notify` watcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyBackend;

struct NotifySession {
    inner: RecommendedWatcher,
}

impl WatchBackend for NotifyBackend {
    fn start(&self, events: mpsc::UnboundedSender<FsEvent>) -> Result<Box<dyn WatchSession>> {
        let inner = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for fs_event in translate_event(event) {
                        // Closed only while the session is being torn down.
                        let _ = events.send(fs_event);
                    }
                }
                Err(err) => warn!(error = %err, "file watch error"),
            },
            Config::default(),
        )?;
        Ok(Box::new(NotifySession { inner }))
    }
}

impl WatchSession for NotifySession {
    fn add_root(&mut self, root: &Path) -> Result<()> {
        self.inner.watch(root, RecursiveMode::Recursive)?;
        debug!(?root, "watching root");
        Ok(())
    }

    fn remove_root(&mut self, root: &Path) -> Result<()> {
        self.inner.unwatch(root)?;
        debug!(?root, "stopped watching root");
        Ok(())
    }
}

/// Map a raw `notify` event onto add/change/remove.
///
/// Access and metadata-only events are dropped. Renames become a remove of the
/// old name and an add of the new one; an unpaired rename is reported as a
/// change and resolved against the filesystem by the event loop.
pub fn translate_event(event: Event) -> Vec<FsEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => FsEventKind::Add,
        EventKind::Remove(_) => FsEventKind::Remove,
        EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FsEventKind::Remove,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FsEventKind::Add,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            return paths
                .next()
                .map(|from| FsEvent::new(FsEventKind::Remove, from))
                .into_iter()
                .chain(paths.next().map(|to| FsEvent::new(FsEventKind::Add, to)))
                .collect();
        }
        EventKind::Modify(_) => FsEventKind::Change,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };
    event
        .paths
        .into_iter()
        .map(|path| FsEvent::new(kind, path))
        .collect()
}

/// A live watch session plus the task draining its events.
///
/// Dropping the handle stops the native watcher and aborts the event loop.
/// Settle polls already in progress run to completion.
pub struct ActiveWatch {
    session: Box<dyn WatchSession>,
    task: JoinHandle<()>,
}

impl Debug for ActiveWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveWatch").finish_non_exhaustive()
    }
}

impl ActiveWatch {
    /// Start a session over `roots`. Must be called within a tokio runtime.
    pub fn start(
        backend: &dyn WatchBackend,
        ctx: Arc<WatchContext>,
        roots: &[impl AsRef<Path>],
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut session = backend.start(tx)?;
        for root in roots {
            session.add_root(root.as_ref())?;
        }
        info!(roots = roots.len(), "file watcher started");
        let task = tokio::spawn(run_event_loop(ctx, rx));
        Ok(Self { session, task })
    }

    pub fn add_root(&mut self, root: &Path) -> Result<()> {
        self.session.add_root(root)
    }

    pub fn remove_root(&mut self, root: &Path) -> Result<()> {
        self.session.remove_root(root)
    }
}

impl Drop for ActiveWatch {
    fn drop(&mut self) {
        self.task.abort();
        debug!("file watcher stopped");
    }
}
