// src/events.rs

//! Lifecycle and diagnostic notifications delivered to the host.
//!
//! Every component holds a clone of the [`EventBus`]; the host calls
//! [`EventBus::subscribe`] (usually through `Uploader::subscribe`) and
//! receives [`UploaderEvent`]s over a broadcast channel. Emitting with no
//! subscriber attached is not an error.

use std::path::PathBuf;

use tokio::sync::broadcast;
use tracing::info;

use crate::types::{PauseTarget, RootConfig};

/// Capacity of the broadcast buffer. Slow subscribers that fall further
/// behind than this observe `RecvError::Lagged`.
const EVENT_CAPACITY: usize = 1024;

/// Why a path was dropped before reaching the transfer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// An extension allowlist is configured and the file's suffix is not on it.
    Extension,
    /// The cache already holds this modification time (or a newer one).
    Unchanged,
    /// No registered root owns the path any more.
    NoLongerWatched,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploaderEvent {
    Watch {
        path: PathBuf,
        config: RootConfig,
    },
    Unwatch {
        paths: Vec<PathBuf>,
    },
    Resume,
    Pause(PauseTarget),
    Log(String),
    Ignore {
        path: PathBuf,
        reason: IgnoreReason,
    },
    Queue {
        path: PathBuf,
        root: PathBuf,
    },
    /// A transfer attempt is about to start.
    Upload {
        path: PathBuf,
        root: PathBuf,
        attempt: u32,
    },
    Processed {
        path: PathBuf,
        success: bool,
    },
    Error {
        path: Option<PathBuf>,
        message: String,
    },
    /// The queue ran out of work: nothing pending and nothing in flight.
    Drain,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UploaderEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploaderEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: UploaderEvent) {
        // Err only means nobody is listening right now.
        let _ = self.tx.send(event);
    }

    /// Emit a `Log` notification and mirror it into `tracing`.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.emit(UploaderEvent::Log(message));
    }

    pub fn ignore(&self, path: PathBuf, reason: IgnoreReason) {
        self.emit(UploaderEvent::Ignore { path, reason });
    }

    pub fn error(&self, path: Option<PathBuf>, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(?path, error = %message, "uploader error");
        self.emit(UploaderEvent::Error { path, message });
    }
}
