// src/exec/backend.rs

//! Pluggable transfer step.
//!
//! The upload pipeline hands each settled file to a `Transfer`
//! implementation and awaits its outcome. Production uses
//! [`CommandTransfer`](super::CommandTransfer), which pipes the file into a
//! shell command; tests substitute a fake that records invocations.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::errors::Result;
use crate::fs::ByteStream;
use crate::types::RootConfig;

/// Everything the transfer step needs for one attempt.
///
/// A fresh `stream` is opened for every attempt, already routed through the
/// shared throttle when one is configured.
pub struct TransferRequest {
    pub path: PathBuf,
    pub root: PathBuf,
    pub config: RootConfig,
    pub size: u64,
    /// 1-based attempt number.
    pub attempt: u32,
    pub stream: ByteStream,
}

impl fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferRequest")
            .field("path", &self.path)
            .field("root", &self.root)
            .field("config", &self.config)
            .field("size", &self.size)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Trait abstracting how a settled file is delivered.
///
/// An `Err` counts as a failed attempt and is retried while the retry budget
/// allows; it is never fatal to the uploader.
pub trait Transfer: Send + Sync {
    fn transfer(
        &self,
        request: TransferRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
