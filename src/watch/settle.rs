// src/watch/settle.rs

//! Write-completion detection.
//!
//! A file is considered settled once two consecutive size samples taken one
//! `modify_interval` apart agree. After settling, the owning root is
//! resolved and the file is handed to the upload queue.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::engine::{UploadQueue, UploadTask};
use crate::errors::Result;
use crate::events::{EventBus, IgnoreReason, UploaderEvent};
use crate::fs::FileSystem;
use crate::watch::registry::PathRegistry;

/// Live-mutable settle poll period, stored in milliseconds.
#[derive(Debug)]
pub struct ModifyInterval(AtomicU64);

impl ModifyInterval {
    pub fn new(interval: Duration) -> Self {
        Self(AtomicU64::new(to_millis(interval)))
    }

    pub fn get(&self) -> Duration {
        Duration::from_millis(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, interval: Duration) {
        self.0.store(to_millis(interval), Ordering::Relaxed);
    }
}

fn to_millis(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Poll `path` until its size stops changing and return the settled size.
///
/// Every sample is followed by one interval of waiting, so a file whose
/// sizes read `[0, 10, 10]` settles after three samples and three waits. The
/// interval is re-read on each iteration. Never returns for a file that keeps
/// changing size.
pub async fn wait_for_settle(
    fs: &dyn FileSystem,
    path: &Path,
    interval: &ModifyInterval,
) -> Result<u64> {
    let mut previous: Option<u64> = None;
    loop {
        let size = fs.metadata(path)?.len;
        trace!(?path, size, ?previous, "size sample");
        let settled = previous == Some(size);
        previous = Some(size);
        tokio::time::sleep(interval.get()).await;
        if settled {
            return Ok(size);
        }
    }
}

/// Settles changed files and submits them to the queue.
#[derive(Debug)]
pub struct SettleDetector {
    fs: Arc<dyn FileSystem>,
    registry: Arc<PathRegistry>,
    queue: UploadQueue,
    events: EventBus,
    interval: Arc<ModifyInterval>,
}

impl SettleDetector {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        registry: Arc<PathRegistry>,
        queue: UploadQueue,
        events: EventBus,
        interval: Arc<ModifyInterval>,
    ) -> Self {
        Self {
            fs,
            registry,
            queue,
            events,
            interval,
        }
    }

    /// Wait for `path` to settle, then enqueue it under its owning root.
    pub async fn settle_and_enqueue(&self, path: PathBuf) {
        self.events
            .log(format!("Waiting for {} to finish writing", path.display()));

        let size = match wait_for_settle(self.fs.as_ref(), &path, &self.interval).await {
            Ok(size) => size,
            Err(err) => {
                self.events
                    .error(Some(path), format!("stat failed while settling: {err}"));
                return;
            }
        };
        debug!(?path, size, "file settled");

        let Some(root) = self.registry.resolve(&path) else {
            self.events.log(format!(
                "Ignoring {}, no watched root owns it",
                path.display()
            ));
            self.events.ignore(path, IgnoreReason::NoLongerWatched);
            return;
        };

        self.events.emit(UploaderEvent::Queue {
            path: path.clone(),
            root: root.clone(),
        });
        self.queue.push(UploadTask { path, root });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use tokio::time::Instant;

    const T: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn settles_after_two_equal_samples() {
        let fs = MockFileSystem::new();
        fs.add_file("/w/a.txt", vec![0u8; 10]);
        fs.script_sizes("/w/a.txt", [0, 10, 10]);

        let started = Instant::now();
        let size = wait_for_settle(&fs, Path::new("/w/a.txt"), &ModifyInterval::new(T))
            .await
            .unwrap();

        assert_eq!(size, 10);
        assert_eq!(fs.stat_count("/w/a.txt"), 3);
        assert_eq!(started.elapsed(), T * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn a_one_byte_file_still_needs_two_samples() {
        let fs = MockFileSystem::new();
        fs.add_file("/w/one", vec![1u8]);

        wait_for_settle(&fs, Path::new("/w/one"), &ModifyInterval::new(T))
            .await
            .unwrap();
        assert_eq!(fs.stat_count("/w/one"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn growing_file_never_settles() {
        let fs = MockFileSystem::new();
        fs.add_file("/w/grow", vec![]);
        fs.script_sizes("/w/grow", 1..=1_000);

        let result = tokio::time::timeout(
            Duration::from_secs(300),
            wait_for_settle(&fs, Path::new("/w/grow"), &ModifyInterval::new(T)),
        )
        .await;
        assert!(result.is_err(), "growing file must not settle");
    }

    #[tokio::test(start_paused = true)]
    async fn stat_failure_aborts() {
        let fs = MockFileSystem::new();
        let result = wait_for_settle(&fs, Path::new("/w/missing"), &ModifyInterval::new(T)).await;
        assert!(result.is_err());
    }

    #[test]
    fn interval_is_live_mutable() {
        let interval = ModifyInterval::new(Duration::from_millis(5000));
        interval.set(Duration::from_millis(250));
        assert_eq!(interval.get(), Duration::from_millis(250));
    }
}
