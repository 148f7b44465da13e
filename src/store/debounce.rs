// src/store/debounce.rs

//! Trailing-edge debounced persistence.
//!
//! A single background task owns the pending flag and at most one deadline.
//! The first request arms the timer; later requests push the trailing
//! deadline out, but never beyond `max_wait` after the first request. When
//! the scheduler is dropped, a pending save is flushed before the task exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::store::StateStore;

#[derive(Debug, Clone, Copy)]
enum SaveRequest {
    Schedule,
    /// Forget the pending save (the state was just written directly).
    Cancel,
}

/// Handle to the debounced save task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SaveScheduler {
    tx: mpsc::UnboundedSender<SaveRequest>,
}

impl SaveScheduler {
    /// Spawn the save task. Must be called from within a tokio runtime.
    pub fn spawn(store: Arc<StateStore>, wait: Duration, max_wait: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_saver(store, wait, max_wait.max(wait), rx));
        Self { tx }
    }

    /// Request a save after the quiet period.
    pub fn schedule(&self) {
        let _ = self.tx.send(SaveRequest::Schedule);
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(SaveRequest::Cancel);
    }
}

async fn run_saver(
    store: Arc<StateStore>,
    wait: Duration,
    max_wait: Duration,
    mut rx: mpsc::UnboundedReceiver<SaveRequest>,
) {
    loop {
        match rx.recv().await {
            Some(SaveRequest::Schedule) => {}
            Some(SaveRequest::Cancel) => continue,
            None => break,
        }

        let first = Instant::now();
        let cap = first + max_wait;
        let mut deadline = first + wait;
        let mut closed = false;

        let flush = loop {
            tokio::select! {
                _ = sleep_until(deadline.min(cap)) => break true,
                req = rx.recv() => match req {
                    Some(SaveRequest::Schedule) => deadline = Instant::now() + wait,
                    Some(SaveRequest::Cancel) => break false,
                    None => {
                        closed = true;
                        break true;
                    }
                },
            }
        };

        if flush {
            debug!(file = ?store.file(), "debounced save firing");
            if let Err(err) = store.flush() {
                tracing::error!(error = %err, "failed to write state file");
            }
        }
        if closed {
            break;
        }
    }
    debug!("save scheduler stopped");
}
