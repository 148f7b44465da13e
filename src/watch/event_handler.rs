// src/watch/event_handler.rs

//! Event processing for filesystem changes.
//!
//! Add/change events pass the ignore filter and are then settled on their
//! own task; a path that is already settling is not polled twice. Remove
//! events bypass settling: they evict the cache entry and schedule a save.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::events::{EventBus, IgnoreReason};
use crate::fs::FileSystem;
use crate::store::{SaveScheduler, StateStore};
use crate::types::{lock, FsEvent, FsEventKind};
use crate::watch::ignore::IgnoreFilter;
use crate::watch::settle::SettleDetector;

/// Everything the event loop needs, shared with in-flight settle tasks.
#[derive(Debug)]
pub struct WatchContext {
    fs: Arc<dyn FileSystem>,
    ignore: IgnoreFilter,
    settle: SettleDetector,
    store: Arc<StateStore>,
    saver: SaveScheduler,
    events: EventBus,
    settling: Mutex<HashSet<PathBuf>>,
}

impl WatchContext {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        ignore: IgnoreFilter,
        settle: SettleDetector,
        store: Arc<StateStore>,
        saver: SaveScheduler,
        events: EventBus,
    ) -> Self {
        Self {
            fs,
            ignore,
            settle,
            store,
            saver,
            events,
            settling: Mutex::new(HashSet::new()),
        }
    }

    /// Paths currently being polled for write completion.
    pub fn settling(&self) -> Vec<PathBuf> {
        lock(&self.settling).iter().cloned().collect()
    }
}

pub(crate) async fn run_event_loop(ctx: Arc<WatchContext>, mut rx: mpsc::UnboundedReceiver<FsEvent>) {
    while let Some(event) = rx.recv().await {
        trace!(?event, "received watch event");
        handle_event(&ctx, event);
    }
    debug!("watch event loop finished");
}

pub(crate) fn handle_event(ctx: &Arc<WatchContext>, event: FsEvent) {
    let FsEvent { kind, path } = event;
    match kind {
        FsEventKind::Remove => handle_remove(ctx, &path),
        FsEventKind::Add | FsEventKind::Change => {
            if ctx.fs.is_dir(&path) {
                trace!(?path, "ignoring directory event");
                return;
            }
            if !ctx.fs.exists(&path) {
                // Renamed away or deleted before we got to it.
                handle_remove(ctx, &path);
                return;
            }
            if let Some(reason) = ctx.ignore.check(&path) {
                let why = match reason {
                    IgnoreReason::Extension => "because of extension",
                    IgnoreReason::Unchanged => "because it was not modified",
                    IgnoreReason::NoLongerWatched => "because it is no longer watched",
                };
                ctx.events
                    .log(format!("Ignoring {} {}", path.display(), why));
                ctx.events.ignore(path, reason);
                return;
            }
            if !lock(&ctx.settling).insert(path.clone()) {
                debug!(?path, "already settling; coalescing event");
                return;
            }

            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                ctx.settle.settle_and_enqueue(path.clone()).await;
                lock(&ctx.settling).remove(&path);
            });
        }
    }
}

fn handle_remove(ctx: &WatchContext, path: &Path) {
    if ctx.store.evict(path) {
        debug!(?path, "evicted cache entry for removed file");
    }
    ctx.saver.schedule();
}
