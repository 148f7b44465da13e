// src/engine/throttle.rs

//! Shared byte-per-second budget for concurrent upload streams.
//!
//! A [`ThrottleGroup`] is a debt-based token bucket. Every
//! [`ThrottledReader`] created from the same group draws from the same
//! bucket, so the budget is split across all concurrently streaming tasks
//! rather than applied per task.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::task::{ready, Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{Instant, Sleep};

use crate::fs::ByteStream;
use crate::types::{lock, read, write};

/// Largest single read passed through a throttled stream.
const MAX_CHUNK: usize = 64 * 1024;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

#[derive(Debug)]
pub struct ThrottleGroup {
    rate: u64,
    bucket: Mutex<Bucket>,
}

impl ThrottleGroup {
    /// `rate` is in bytes per second and must be non-zero.
    pub fn new(rate: u64) -> Self {
        let rate = rate.max(1);
        Self {
            rate,
            bucket: Mutex::new(Bucket {
                tokens: rate as f64,
                last: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Charge `bytes` against the budget and return how long the caller must
    /// wait before reading again.
    pub fn charge(&self, bytes: usize) -> Duration {
        let rate = self.rate as f64;
        let mut bucket = lock(&self.bucket);
        let now = Instant::now();
        let refill = now.duration_since(bucket.last).as_secs_f64() * rate;
        bucket.last = now;
        bucket.tokens = (bucket.tokens + refill).min(rate) - bytes as f64;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / rate)
        }
    }

    fn chunk_size(&self) -> usize {
        usize::try_from(self.rate).unwrap_or(MAX_CHUNK).clamp(1, MAX_CHUNK)
    }

    /// Wrap `inner` so that its reads draw from this group's budget.
    pub fn throttle<R>(self: &Arc<Self>, inner: R) -> ThrottledReader<R> {
        ThrottledReader {
            inner,
            group: Arc::clone(self),
            delay: None,
            scratch: Vec::new(),
        }
    }
}

/// `AsyncRead` adapter that sleeps off the group's debt between reads.
#[derive(Debug)]
pub struct ThrottledReader<R> {
    inner: R,
    group: Arc<ThrottleGroup>,
    delay: Option<Pin<Box<Sleep>>>,
    scratch: Vec<u8>,
}

impl<R: AsyncRead + Unpin> AsyncRead for ThrottledReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        if let Some(delay) = this.delay.as_mut() {
            ready!(delay.as_mut().poll(cx));
            this.delay = None;
        }

        let limit = buf.remaining().min(this.group.chunk_size());
        if limit == 0 {
            return Poll::Ready(Ok(()));
        }
        this.scratch.resize(limit, 0);
        let mut chunk = ReadBuf::new(&mut this.scratch);
        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut chunk))?;

        let n = chunk.filled().len();
        buf.put_slice(chunk.filled());
        if n > 0 {
            let wait = this.group.charge(n);
            if !wait.is_zero() {
                this.delay = Some(Box::pin(tokio::time::sleep(wait)));
            }
        }
        Poll::Ready(Ok(()))
    }
}

/// The currently configured group, replaced wholesale on reconfiguration.
#[derive(Debug, Default)]
pub struct ThrottleSlot {
    current: RwLock<Option<Arc<ThrottleGroup>>>,
}

impl ThrottleSlot {
    pub fn current(&self) -> Option<Arc<ThrottleGroup>> {
        read(&self.current).clone()
    }

    /// Bytes per second, 0 when unlimited.
    pub fn rate(&self) -> u64 {
        read(&self.current).as_ref().map(|g| g.rate()).unwrap_or(0)
    }

    pub fn set(&self, bytes_per_sec: u64) {
        *write(&self.current) = if bytes_per_sec > 0 {
            Some(Arc::new(ThrottleGroup::new(bytes_per_sec)))
        } else {
            None
        };
    }

    /// Route `stream` through the current group, if any.
    pub fn wrap(&self, stream: ByteStream) -> ByteStream {
        match self.current() {
            Some(group) => Box::new(group.throttle(stream)),
            None => stream,
        }
    }
}
