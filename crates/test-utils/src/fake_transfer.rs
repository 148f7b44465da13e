use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;

use dropship::errors::{DropshipError, Result};
use dropship::exec::{Transfer, TransferRequest};

/// One recorded invocation of the transfer step.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferCall {
    pub path: PathBuf,
    pub root: PathBuf,
    pub config: serde_json::Value,
    pub size: u64,
    pub attempt: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<TransferCall>,
    failures_left: usize,
}

/// A fake transfer step that:
/// - reads the whole stream and records the call
/// - optionally holds each attempt for a fixed (tokio) delay
/// - fails the first N attempts, then succeeds
/// - tracks how many attempts overlapped in time
#[derive(Debug, Clone, Default)]
pub struct FakeTransfer {
    state: Arc<Mutex<FakeState>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay: Duration,
}

impl FakeTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `times` attempts (across all files).
    pub fn failing(times: usize) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().failures_left = times;
        fake
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<TransferCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    /// Highest number of attempts observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Transfer for FakeTransfer {
    fn transfer(
        &self,
        mut request: TransferRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let mut bytes = Vec::new();
            let read = request.stream.read_to_end(&mut bytes).await;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            read?;

            let fail = {
                let mut state = self.state.lock().unwrap();
                state.calls.push(TransferCall {
                    path: request.path.clone(),
                    root: request.root.clone(),
                    config: request.config.clone(),
                    size: request.size,
                    attempt: request.attempt,
                    bytes,
                });
                if state.failures_left > 0 {
                    state.failures_left -= 1;
                    true
                } else {
                    false
                }
            };

            if fail {
                Err(DropshipError::TransferFailed(format!(
                    "scripted failure for {}",
                    request.path.display()
                )))
            } else {
                Ok(())
            }
        })
    }
}
