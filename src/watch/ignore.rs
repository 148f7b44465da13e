// src/watch/ignore.rs

//! Pre-delivery filter for change events.
//!
//! A path is ignored when an extension allowlist is configured and the path
//! is a regular file whose lower-cased suffix is not on it, or when the cache
//! already holds a modification time at least as new as the file's current
//! one.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::events::IgnoreReason;
use crate::fs::FileSystem;
use crate::store::StateStore;

#[derive(Debug)]
pub struct IgnoreFilter {
    extensions: Option<HashSet<String>>,
    fs: Arc<dyn FileSystem>,
    store: Arc<StateStore>,
}

impl IgnoreFilter {
    /// `extensions` must already be lower case without leading dots.
    pub fn new(
        extensions: Option<Vec<String>>,
        fs: Arc<dyn FileSystem>,
        store: Arc<StateStore>,
    ) -> Self {
        Self {
            extensions: extensions.map(|exts| exts.into_iter().collect()),
            fs,
            store,
        }
    }

    /// Returns `Some(reason)` when the change at `path` is uninteresting.
    ///
    /// Stat failures never cause an ignore; the settle step reports them.
    pub fn check(&self, path: &Path) -> Option<IgnoreReason> {
        let stat = self.fs.metadata(path).ok();

        if let (Some(allowed), Some(stat)) = (&self.extensions, &stat) {
            if stat.is_file && !allowed.contains(&extension_of(path)) {
                trace!(?path, "extension not in allowlist");
                return Some(IgnoreReason::Extension);
            }
        }

        let cached = self.store.cached(path)?;
        let stat = stat?;
        let current: DateTime<Utc> = stat.modified.into();
        if current > cached.mtime {
            return None;
        }
        trace!(?path, "not modified since cached");
        Some(IgnoreReason::Unchanged)
    }
}

/// Lower-cased suffix after the last dot of the file name; empty if none.
/// A leading dot counts, so `.jpg` has the extension `jpg`.
fn extension_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy())
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()))
        .unwrap_or_default()
}
