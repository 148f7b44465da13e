// src/engine/queue.rs

use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::events::{EventBus, UploaderEvent};
use crate::types::lock;

/// A settled file waiting for (or undergoing) transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub path: PathBuf,
    /// The registered root that owned `path` when it settled.
    pub root: PathBuf,
}

/// Work performed for each dispatched task.
///
/// Implementations report their own outcome through the event bus; the queue
/// only tracks slot usage.
pub trait TaskProcessor: Send + Sync + 'static {
    fn process(&self, task: UploadTask) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<UploadTask>,
    running: usize,
    concurrency: usize,
    paused: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    processor: Arc<dyn TaskProcessor>,
    events: EventBus,
}

impl std::fmt::Debug for QueueInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueInner")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Bounded-concurrency FIFO pool of upload tasks.
///
/// Dispatch happens on `push`, on `resume`, on a concurrency increase and
/// whenever a running task finishes. Changing the concurrency never affects
/// tasks already running. Pausing only withholds new dispatches.
#[derive(Debug, Clone)]
pub struct UploadQueue {
    inner: Arc<QueueInner>,
}

impl UploadQueue {
    pub fn new(concurrency: usize, processor: Arc<dyn TaskProcessor>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    running: 0,
                    concurrency: concurrency.max(1),
                    paused: false,
                }),
                processor,
                events,
            }),
        }
    }

    pub fn push(&self, task: UploadTask) {
        trace!(path = ?task.path, "task submitted");
        lock(&self.inner.state).pending.push_back(task);
        self.inner.dispatch();
    }

    pub fn pause(&self) {
        lock(&self.inner.state).paused = true;
    }

    pub fn resume(&self) {
        lock(&self.inner.state).paused = false;
        self.inner.dispatch();
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.inner.state).paused
    }

    pub fn concurrency(&self) -> usize {
        lock(&self.inner.state).concurrency
    }

    /// Clamped to at least one.
    pub fn set_concurrency(&self, concurrency: usize) {
        lock(&self.inner.state).concurrency = concurrency.max(1);
        self.inner.dispatch();
    }

    /// Tasks waiting for a slot, in dispatch order.
    pub fn pending(&self) -> Vec<UploadTask> {
        lock(&self.inner.state).pending.iter().cloned().collect()
    }

    pub fn running(&self) -> usize {
        lock(&self.inner.state).running
    }
}

impl QueueInner {
    fn dispatch(self: &Arc<Self>) {
        let ready: Vec<UploadTask> = {
            let mut state = lock(&self.state);
            let mut ready = Vec::new();
            while !state.paused && state.running < state.concurrency {
                let Some(task) = state.pending.pop_front() else {
                    break;
                };
                state.running += 1;
                ready.push(task);
            }
            ready
        };

        for task in ready {
            debug!(path = ?task.path, "dispatching upload task");
            let slot = Slot(Arc::clone(self));
            tokio::spawn(async move {
                slot.0.processor.process(task).await;
                drop(slot);
            });
        }
    }

    fn release(self: &Arc<Self>) {
        let drained = {
            let mut state = lock(&self.state);
            state.running = state.running.saturating_sub(1);
            state.running == 0 && state.pending.is_empty()
        };
        if drained {
            debug!("upload queue drained");
            self.events.emit(UploaderEvent::Drain);
        }
        self.dispatch();
    }
}

/// Holds one concurrency slot; released on drop, including when the
/// processor panics.
struct Slot(Arc<QueueInner>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.release();
    }
}
