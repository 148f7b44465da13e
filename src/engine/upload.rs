// src/engine/upload.rs

//! Per-task upload pipeline.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::Result;
use crate::events::{EventBus, IgnoreReason, UploaderEvent};
use crate::exec::{Transfer, TransferRequest};
use crate::fs::{ByteStream, FileSystem};
use crate::store::{SaveScheduler, StateStore};
use crate::types::RootConfig;
use crate::watch::registry::PathRegistry;

use super::queue::{TaskProcessor, UploadTask};
use super::throttle::ThrottleSlot;

/// Live-mutable count of extra attempts after the first.
#[derive(Debug, Default)]
pub struct RetryBudget(AtomicU32);

impl RetryBudget {
    pub fn new(retries: u32) -> Self {
        Self(AtomicU32::new(retries))
    }

    pub fn retries(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set_retries(&self, retries: u32) {
        self.0.store(retries, Ordering::Relaxed);
    }

    fn tries(&self) -> u32 {
        self.retries().saturating_add(1)
    }
}

/// Processes one dispatched task:
///
/// 1. skip with `Ignore` if the root was unwatched since the task settled;
/// 2. open a (possibly throttled) stream;
/// 3. stat for the size, aborting with `Error` on failure;
/// 4. record the mtime in the cache and schedule a save;
/// 5. run the transfer step until it succeeds or the retry budget is spent;
/// 6. emit `Processed`.
pub struct UploadPipeline {
    fs: Arc<dyn FileSystem>,
    registry: Arc<PathRegistry>,
    store: Arc<StateStore>,
    saver: SaveScheduler,
    throttle: Arc<ThrottleSlot>,
    retries: Arc<RetryBudget>,
    transfer: Option<Arc<dyn Transfer>>,
    events: EventBus,
}

impl std::fmt::Debug for UploadPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadPipeline")
            .field("throttle", &self.throttle)
            .field("retries", &self.retries)
            .field("has_transfer", &self.transfer.is_some())
            .finish_non_exhaustive()
    }
}

impl UploadPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fs: Arc<dyn FileSystem>,
        registry: Arc<PathRegistry>,
        store: Arc<StateStore>,
        saver: SaveScheduler,
        throttle: Arc<ThrottleSlot>,
        retries: Arc<RetryBudget>,
        transfer: Option<Arc<dyn Transfer>>,
        events: EventBus,
    ) -> Self {
        Self {
            fs,
            registry,
            store,
            saver,
            throttle,
            retries,
            transfer,
            events,
        }
    }

    async fn run(&self, task: UploadTask) {
        let UploadTask { path, root } = task;

        let Some(config) = self.registry.get(&root) else {
            self.events.log(format!(
                "Skipping {}, {} is no longer watched",
                path.display(),
                root.display()
            ));
            self.events.ignore(path, IgnoreReason::NoLongerWatched);
            return;
        };

        let stream = match self.open_stream(&path) {
            Ok(stream) => stream,
            Err(err) => {
                self.events
                    .error(Some(path), format!("cannot open file: {err}"));
                return;
            }
        };

        let stat = match self.fs.metadata(&path) {
            Ok(stat) => stat,
            Err(err) => {
                self.events.error(Some(path), format!("stat failed: {err}"));
                return;
            }
        };

        self.store.record(&path, stat.modified);
        self.saver.schedule();

        self.events.log(format!(
            "Going to upload {} ({} bytes)",
            path.display(),
            stat.len
        ));

        let success = self
            .deliver(&path, &root, config, stat.len, stream)
            .await;
        self.events.emit(UploaderEvent::Processed { path, success });
    }

    fn open_stream(&self, path: &Path) -> Result<ByteStream> {
        let stream = self.fs.open_read(path)?;
        Ok(self.throttle.wrap(stream))
    }

    /// Run the transfer step up to `retries + 1` times. The budget is re-read
    /// before each retry decision.
    async fn deliver(
        &self,
        path: &Path,
        root: &Path,
        config: RootConfig,
        size: u64,
        first: ByteStream,
    ) -> bool {
        let mut stream = Some(first);
        let mut attempt: u32 = 1;

        loop {
            self.events.emit(UploaderEvent::Upload {
                path: path.to_path_buf(),
                root: root.to_path_buf(),
                attempt,
            });

            let Some(transfer) = &self.transfer else {
                debug!(?path, "no transfer step attached; treating as delivered");
                return true;
            };

            let outcome = match stream.take().map(Ok).unwrap_or_else(|| self.open_stream(path)) {
                Ok(stream) => {
                    let request = TransferRequest {
                        path: path.to_path_buf(),
                        root: root.to_path_buf(),
                        config: config.clone(),
                        size,
                        attempt,
                        stream,
                    };
                    transfer.transfer(request).await
                }
                Err(err) => Err(err),
            };

            match outcome {
                Ok(()) => {
                    debug!(?path, attempt, "transfer succeeded");
                    return true;
                }
                Err(err) => {
                    warn!(?path, attempt, error = %err, "transfer attempt failed");
                }
            }

            if attempt >= self.retries.tries() {
                self.events.log(format!(
                    "Giving up on {} after {} attempt(s)",
                    path.display(),
                    attempt
                ));
                return false;
            }
            attempt += 1;
        }
    }
}

impl TaskProcessor for UploadPipeline {
    fn process(&self, task: UploadTask) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.run(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DropshipError;
    use crate::fs::mock::MockFileSystem;
    use crate::types::lock;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    /// Fails the first `failures` attempts, recording each attempt's bytes.
    #[derive(Default)]
    struct Flaky {
        failures: Mutex<u32>,
        seen: Mutex<Vec<(u32, Vec<u8>)>>,
    }

    impl Transfer for Flaky {
        fn transfer(
            &self,
            mut request: TransferRequest,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                let mut bytes = Vec::new();
                request.stream.read_to_end(&mut bytes).await?;
                lock(&self.seen).push((request.attempt, bytes));
                let mut failures = lock(&self.failures);
                if *failures > 0 {
                    *failures -= 1;
                    return Err(DropshipError::TransferFailed("flaky".into()));
                }
                Ok(())
            })
        }
    }

    struct Fixture {
        fs: MockFileSystem,
        registry: Arc<PathRegistry>,
        store: Arc<StateStore>,
        events: EventBus,
    }

    fn fixture() -> Fixture {
        let fs = MockFileSystem::new();
        fs.add_file("/w/a.txt", b"hello".to_vec());
        let registry = Arc::new(PathRegistry::new());
        registry.insert("/w".into(), json!({"bucket": "b"}));
        let events = EventBus::new();
        let store = Arc::new(StateStore::new(
            Arc::new(fs.clone()),
            PathBuf::from("/cfg/.dropship.json"),
            registry.clone(),
            events.clone(),
            BTreeMap::new(),
            BTreeMap::new(),
        ));
        Fixture {
            fs,
            registry,
            store,
            events,
        }
    }

    fn pipeline(fx: &Fixture, retries: u32, transfer: Option<Arc<dyn Transfer>>) -> UploadPipeline {
        let saver = SaveScheduler::spawn(fx.store.clone(), Duration::from_secs(10), Duration::from_secs(10));
        UploadPipeline::new(
            Arc::new(fx.fs.clone()),
            fx.registry.clone(),
            fx.store.clone(),
            saver,
            Arc::new(ThrottleSlot::default()),
            Arc::new(RetryBudget::new(retries)),
            transfer,
            fx.events.clone(),
        )
    }

    fn task() -> UploadTask {
        UploadTask {
            path: PathBuf::from("/w/a.txt"),
            root: PathBuf::from("/w"),
        }
    }

    fn processed(rx: &mut tokio::sync::broadcast::Receiver<UploaderEvent>) -> Option<bool> {
        while let Ok(event) = rx.try_recv() {
            if let UploaderEvent::Processed { success, .. } = event {
                return Some(success);
            }
        }
        None
    }

    #[tokio::test]
    async fn retries_reopen_the_stream_each_attempt() {
        let fx = fixture();
        let flaky = Arc::new(Flaky {
            failures: Mutex::new(2),
            ..Default::default()
        });
        let mut rx = fx.events.subscribe();
        pipeline(&fx, 2, Some(flaky.clone())).run(task()).await;

        let seen = lock(&flaky.seen).clone();
        assert_eq!(
            seen,
            vec![
                (1, b"hello".to_vec()),
                (2, b"hello".to_vec()),
                (3, b"hello".to_vec())
            ]
        );
        assert_eq!(processed(&mut rx), Some(true));
    }

    #[tokio::test]
    async fn exhausted_budget_reports_failure() {
        let fx = fixture();
        let flaky = Arc::new(Flaky {
            failures: Mutex::new(1),
            ..Default::default()
        });
        let mut rx = fx.events.subscribe();
        pipeline(&fx, 0, Some(flaky.clone())).run(task()).await;

        assert_eq!(lock(&flaky.seen).len(), 1);
        assert_eq!(processed(&mut rx), Some(false));
    }

    #[tokio::test]
    async fn cache_is_written_before_transfer() {
        let fx = fixture();
        let flaky = Arc::new(Flaky {
            failures: Mutex::new(1),
            ..Default::default()
        });
        pipeline(&fx, 0, Some(flaky)).run(task()).await;
        assert!(fx.store.cached(Path::new("/w/a.txt")).is_some());
    }

    #[tokio::test]
    async fn unwatched_root_is_ignored() {
        let fx = fixture();
        fx.registry.remove(Path::new("/w"));
        let mut rx = fx.events.subscribe();
        pipeline(&fx, 0, None).run(task()).await;

        let mut ignored = false;
        while let Ok(event) = rx.try_recv() {
            if let UploaderEvent::Ignore { reason, .. } = event {
                assert_eq!(reason, IgnoreReason::NoLongerWatched);
                ignored = true;
            }
            assert!(!matches!(event, UploaderEvent::Processed { .. }));
        }
        assert!(ignored);
        assert!(fx.store.cached(Path::new("/w/a.txt")).is_none());
    }

    #[tokio::test]
    async fn missing_file_reports_error_without_processed() {
        let fx = fixture();
        fx.fs.remove("/w/a.txt");
        let mut rx = fx.events.subscribe();
        pipeline(&fx, 3, None).run(task()).await;

        let mut errored = false;
        while let Ok(event) = rx.try_recv() {
            errored |= matches!(event, UploaderEvent::Error { .. });
            assert!(!matches!(event, UploaderEvent::Processed { .. }));
        }
        assert!(errored);
    }

    #[tokio::test]
    async fn no_transfer_step_is_trivial_success() {
        let fx = fixture();
        let mut rx = fx.events.subscribe();
        pipeline(&fx, 5, None).run(task()).await;
        assert_eq!(processed(&mut rx), Some(true));
    }
}
