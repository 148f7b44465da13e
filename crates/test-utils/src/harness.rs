use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};

use dropship::config::UploaderOptions;
use dropship::errors::Result;
use dropship::fs::mock::MockFileSystem;
use dropship::{Uploader, UploaderEvent};

use crate::fake_transfer::FakeTransfer;
use crate::manual_watch::ManualWatchBackend;

/// An uploader wired to a mock filesystem, a manual watch backend and a fake
/// transfer step, plus a receiver subscribed before construction.
pub struct Harness {
    pub uploader: Uploader,
    pub fs: MockFileSystem,
    pub watcher: ManualWatchBackend,
    pub transfer: FakeTransfer,
    pub events: broadcast::Receiver<UploaderEvent>,
}

impl Harness {
    /// Build the uploader. Does not call `resume`.
    pub fn build(options: UploaderOptions, fs: MockFileSystem, transfer: FakeTransfer) -> Result<Self> {
        let watcher = ManualWatchBackend::new();
        let builder = Uploader::builder(options)
            .filesystem(Arc::new(fs.clone()))
            .watch_backend(Arc::new(watcher.clone()))
            .transfer(Arc::new(transfer.clone()));
        let events = builder.subscribe();
        let uploader = builder.build()?;
        Ok(Self {
            uploader,
            fs,
            watcher,
            transfer,
            events,
        })
    }

    /// Build and start watching.
    pub fn running(options: UploaderOptions, fs: MockFileSystem, transfer: FakeTransfer) -> Result<Self> {
        let harness = Self::build(options, fs, transfer)?;
        harness.uploader.resume()?;
        Ok(harness)
    }

    pub async fn next_event<F>(&mut self, pred: F) -> UploaderEvent
    where
        F: FnMut(&UploaderEvent) -> bool,
    {
        next_event(&mut self.events, pred).await
    }
}

/// Receive until an event matches `pred`. Lagged gaps are skipped.
pub async fn next_event<F>(rx: &mut broadcast::Receiver<UploaderEvent>, mut pred: F) -> UploaderEvent
where
    F: FnMut(&UploaderEvent) -> bool,
{
    loop {
        match rx.recv().await {
            Ok(event) if pred(&event) => return event,
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => panic!("event bus closed while waiting for an event"),
        }
    }
}
