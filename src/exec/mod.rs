// src/exec/mod.rs

//! Transfer execution layer.
//!
//! - [`backend`] defines the `Transfer` trait and the per-attempt request.
//! - [`command`] provides `CommandTransfer`, which runs a configured shell
//!   command with the file streamed to its stdin.

pub mod backend;
pub mod command;

pub use backend::{Transfer, TransferRequest};
pub use command::CommandTransfer;
