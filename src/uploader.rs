// src/uploader.rs

//! The `Uploader` instance: one explicit context owning the registry, the
//! state store, the upload queue and the watcher handle.
//!
//! Several uploaders can live in one process; they share nothing unless the
//! caller hands them the same capabilities.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{validate_options, UploaderOptions};
use crate::engine::{RetryBudget, ThrottleSlot, UploadPipeline, UploadQueue, UploadTask};
use crate::errors::{DropshipError, Result};
use crate::events::{EventBus, UploaderEvent};
use crate::exec::Transfer;
use crate::fs::{FileSystem, RealFileSystem};
use crate::store::{read_state, SaveScheduler, StateStore};
use crate::types::{lock, PauseTarget, RootConfig};
use crate::watch::{
    ActiveWatch, IgnoreFilter, ModifyInterval, NotifyBackend, PathRegistry, SettleDetector,
    WatchBackend, WatchContext, WatchRoot,
};

/// Collects capabilities before constructing an [`Uploader`].
///
/// Defaults: [`RealFileSystem`], [`NotifyBackend`] and no transfer step
/// (every settled file counts as delivered).
pub struct UploaderBuilder {
    options: UploaderOptions,
    fs: Arc<dyn FileSystem>,
    backend: Arc<dyn WatchBackend>,
    transfer: Option<Arc<dyn Transfer>>,
    events: EventBus,
}

impl UploaderBuilder {
    pub fn new(options: UploaderOptions) -> Self {
        Self {
            options,
            fs: Arc::new(RealFileSystem),
            backend: Arc::new(NotifyBackend),
            transfer: None,
            events: EventBus::new(),
        }
    }

    pub fn filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn watch_backend(mut self, backend: Arc<dyn WatchBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn transfer(mut self, transfer: Arc<dyn Transfer>) -> Self {
        self.transfer = Some(transfer);
        self
    }

    /// Subscribe before `build` to observe the events emitted while persisted
    /// roots are restored.
    pub fn subscribe(&self) -> broadcast::Receiver<UploaderEvent> {
        self.events.subscribe()
    }

    /// Load persisted state and assemble the uploader. The watcher is not
    /// started until [`Uploader::resume`].
    ///
    /// Must be called from within a tokio runtime. Fails on invalid options
    /// or a malformed state file.
    pub fn build(self) -> Result<Uploader> {
        let options = validate_options(self.options)?;
        let fs = self.fs;
        let events = self.events;

        let state_file = options.state_file_path();
        let state = read_state(fs.as_ref(), &state_file)?;
        debug!(file = ?state_file, cached = state.cache.len(), roots = state.paths.len(), "loaded state");

        let registry = Arc::new(PathRegistry::new());
        let store = Arc::new(StateStore::new(
            fs.clone(),
            state_file,
            registry.clone(),
            events.clone(),
            state.cache,
            state.custom_config,
        ));
        let saver = SaveScheduler::spawn(
            store.clone(),
            options.save_interval(),
            options.save_interval(),
        );

        let throttle = Arc::new(ThrottleSlot::default());
        if options.throttle > 0 {
            events.log(format!("Throttling to {} bytes/sec", options.throttle));
            throttle.set(options.throttle);
        }
        let retries = Arc::new(RetryBudget::new(options.retries));

        let pipeline = UploadPipeline::new(
            fs.clone(),
            registry.clone(),
            store.clone(),
            saver.clone(),
            throttle.clone(),
            retries.clone(),
            self.transfer,
            events.clone(),
        );
        let queue = UploadQueue::new(options.concurrency, Arc::new(pipeline), events.clone());

        let modify_interval = Arc::new(ModifyInterval::new(options.modify_interval()));
        let settle = SettleDetector::new(
            fs.clone(),
            registry.clone(),
            queue.clone(),
            events.clone(),
            modify_interval.clone(),
        );
        let ignore = IgnoreFilter::new(options.extensions.clone(), fs.clone(), store.clone());
        let watch_ctx = Arc::new(WatchContext::new(
            fs.clone(),
            ignore,
            settle,
            store.clone(),
            saver.clone(),
            events.clone(),
        ));

        let uploader = Uploader {
            fs,
            registry,
            store,
            saver,
            queue,
            throttle,
            retries,
            modify_interval,
            backend: self.backend,
            watch_ctx,
            active: Mutex::new(None),
            events,
        };

        for (path, config) in state.paths {
            if let Err(err) = uploader.watch(&path, config) {
                uploader.events.error(
                    Some(PathBuf::from(&path)),
                    format!("dropping persisted root: {err}"),
                );
            }
        }

        for path in &options.paths {
            let canonical = uploader.fs.canonicalize(path)?;
            if !uploader.registry.contains(&canonical) {
                uploader.watch(&canonical, RootConfig::Object(Default::default()))?;
            }
        }

        Ok(uploader)
    }
}

/// A running uploader instance.
///
/// Dropping it stops the watcher; a pending debounced save is flushed once
/// the in-flight work holding the state store has finished.
#[derive(Debug)]
pub struct Uploader {
    fs: Arc<dyn FileSystem>,
    registry: Arc<PathRegistry>,
    store: Arc<StateStore>,
    saver: SaveScheduler,
    queue: UploadQueue,
    throttle: Arc<ThrottleSlot>,
    retries: Arc<RetryBudget>,
    modify_interval: Arc<ModifyInterval>,
    backend: Arc<dyn WatchBackend>,
    watch_ctx: Arc<WatchContext>,
    active: Mutex<Option<ActiveWatch>>,
    events: EventBus,
}

impl Uploader {
    pub fn builder(options: UploaderOptions) -> UploaderBuilder {
        UploaderBuilder::new(options)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploaderEvent> {
        self.events.subscribe()
    }

    /// Register `path` (or overwrite its config). If the watcher is running
    /// the root is added to it immediately.
    pub fn watch(&self, path: impl AsRef<Path>, config: RootConfig) -> Result<()> {
        let canonical = self.fs.canonicalize(path.as_ref())?;
        self.events
            .log(format!("Watching {}", canonical.display()));
        // The session must accept a new root before it is registered.
        if !self.registry.contains(&canonical) {
            if let Some(active) = lock(&self.active).as_mut() {
                active.add_root(&canonical)?;
            }
        }
        self.registry.insert(canonical.clone(), config.clone());

        self.events.emit(UploaderEvent::Watch {
            path: canonical,
            config,
        });
        self.saver.schedule();
        Ok(())
    }

    /// Remove one root, or every root when `path` is `None`.
    ///
    /// Removing a path that is not registered is an error. A root whose
    /// directory no longer exists can still be removed by its stored path.
    pub fn unwatch(&self, path: Option<&Path>) -> Result<()> {
        let removed = match path {
            Some(path) => {
                let key = self.fs.canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
                self.events.log(format!("Unwatching {}", key.display()));
                if self.registry.remove(&key).is_none() {
                    return Err(DropshipError::RootNotRegistered(key));
                }
                vec![key]
            }
            None => {
                self.events.log("Unwatching all paths");
                self.registry.clear()
            }
        };

        if let Some(active) = lock(&self.active).as_mut() {
            for root in &removed {
                if let Err(err) = active.remove_root(root) {
                    debug!(?root, error = %err, "removing root from watcher");
                }
            }
        }

        self.events.emit(UploaderEvent::Unwatch { paths: removed });
        self.saver.schedule();
        Ok(())
    }

    /// Config of the root registered at `path` (after canonicalization).
    pub fn get(&self, path: impl AsRef<Path>) -> Option<RootConfig> {
        let path = path.as_ref();
        let key = self.fs.canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.registry.get(&key)
    }

    /// Every registered root in registration order.
    pub fn roots(&self) -> Vec<WatchRoot> {
        self.registry.snapshot()
    }

    /// A persisted custom setting.
    pub fn config(&self, name: &str) -> Option<serde_json::Value> {
        self.store.custom(name)
    }

    pub fn set_config(&self, name: &str, value: serde_json::Value) {
        self.store.set_custom(name, value);
        self.saver.schedule();
    }

    /// Start the watcher if it is stopped and resume the queue.
    pub fn resume(&self) -> Result<()> {
        {
            let mut active = lock(&self.active);
            if active.is_none() {
                let roots = self.registry.paths();
                info!(roots = roots.len(), "creating watcher");
                self.events.emit(UploaderEvent::Resume);
                *active = Some(ActiveWatch::start(
                    self.backend.as_ref(),
                    self.watch_ctx.clone(),
                    &roots,
                )?);
            }
        }
        if self.queue.is_paused() {
            self.queue.resume();
        }
        Ok(())
    }

    /// Stop dispatching queued tasks. In-flight transfers run to completion
    /// and the watcher keeps settling new files into the queue.
    pub fn pause(&self) {
        self.events.emit(UploaderEvent::Pause(PauseTarget::Queue));
        self.queue.pause();
    }

    /// Stop and discard the native watcher. Roots registered while it is
    /// stopped are picked up by the next [`resume`](Self::resume).
    pub fn pause_watcher(&self) {
        if lock(&self.active).take().is_some() {
            self.events.emit(UploaderEvent::Pause(PauseTarget::Watcher));
        }
    }

    pub fn is_watching(&self) -> bool {
        lock(&self.active).is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.queue.is_paused()
    }

    /// Persist state. `immediate` writes before returning and discards any
    /// pending debounced save; otherwise a debounced save is scheduled.
    pub fn save(&self, immediate: bool) -> Result<()> {
        if immediate {
            self.saver.cancel();
            self.store.flush()
        } else {
            self.saver.schedule();
            Ok(())
        }
    }

    pub fn concurrency(&self) -> usize {
        self.queue.concurrency()
    }

    pub fn set_concurrency(&self, concurrency: usize) {
        self.queue.set_concurrency(concurrency);
    }

    pub fn retries(&self) -> u32 {
        self.retries.retries()
    }

    pub fn set_retries(&self, retries: u32) {
        self.retries.set_retries(retries);
    }

    /// Bytes per second, 0 when unlimited.
    pub fn throttle(&self) -> u64 {
        self.throttle.rate()
    }

    pub fn set_throttle(&self, bytes_per_sec: u64) {
        if bytes_per_sec > 0 {
            self.events
                .log(format!("Throttling to {} bytes/sec", bytes_per_sec));
        } else {
            debug!("throttling disabled");
        }
        self.throttle.set(bytes_per_sec);
    }

    pub fn modify_interval(&self) -> Duration {
        self.modify_interval.get()
    }

    pub fn set_modify_interval(&self, interval: Duration) {
        if interval.is_zero() {
            warn!("ignoring zero modify interval");
            return;
        }
        self.modify_interval.set(interval);
    }

    /// Tasks waiting for a free slot, in dispatch order.
    pub fn tasks(&self) -> Vec<UploadTask> {
        self.queue.pending()
    }

    /// Number of tasks currently being processed.
    pub fn running(&self) -> usize {
        self.queue.running()
    }

    /// Files still being polled for write completion.
    pub fn settling(&self) -> Vec<PathBuf> {
        self.watch_ctx.settling()
    }
}
