// src/engine/mod.rs

//! Upload engine.
//!
//! - [`queue`] is the bounded-concurrency FIFO pool with live-mutable
//!   concurrency and queue-only pause.
//! - [`upload`] is the per-task pipeline: root re-check, stream, stat,
//!   cache update, transfer with retries.
//! - [`throttle`] is the shared byte-per-second budget applied to every
//!   streaming task.

pub mod queue;
pub mod throttle;
pub mod upload;

pub use queue::{TaskProcessor, UploadQueue, UploadTask};
pub use throttle::{ThrottleGroup, ThrottleSlot, ThrottledReader};
pub use upload::{RetryBudget, UploadPipeline};
