// src/watch/mod.rs

//! File watching and change detection.
//!
//! This module is responsible for:
//! - Keeping the registry of watched roots and resolving which root owns a
//!   changed path.
//! - Wiring up a cross-platform filesystem watcher (`notify`) behind the
//!   `WatchBackend` seam.
//! - Filtering uninteresting changes (extension allowlist, unchanged mtime).
//! - Waiting for writes to finish before handing files to the upload queue.

pub mod event_handler;
pub mod ignore;
pub mod path_utils;
pub mod registry;
pub mod settle;
pub mod watcher;

pub use event_handler::WatchContext;
pub use ignore::IgnoreFilter;
pub use registry::{PathRegistry, WatchRoot};
pub use settle::{wait_for_settle, ModifyInterval, SettleDetector};
pub use watcher::{translate_event, ActiveWatch, NotifyBackend, WatchBackend, WatchSession};
