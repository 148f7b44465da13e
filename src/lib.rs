// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod store;
pub mod types;
pub mod uploader;
pub mod watch;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{default_config_path, load_and_validate, ConfigFile, RawConfigFile};

pub use crate::events::{IgnoreReason, UploaderEvent};
pub use crate::exec::{CommandTransfer, Transfer, TransferRequest};
pub use crate::uploader::{Uploader, UploaderBuilder};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading (plus `--watch` roots)
/// - the uploader with the real filesystem, `notify` and the configured
///   transfer command
/// - a host task that reports notifications
/// - Ctrl-C handling, which stops the watcher and writes state before exit
pub async fn run(args: CliArgs) -> Result<()> {
    let mut cfg = load_config(args.config.as_deref())?;
    cfg.uploader.paths.extend(args.watch);

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let mut builder = Uploader::builder(cfg.uploader.clone());
    match &cfg.transfer {
        Some(transfer) => {
            builder = builder.transfer(Arc::new(CommandTransfer::new(&transfer.cmd)));
        }
        None => warn!("no [transfer] command configured; settled files are only recorded"),
    }

    let reporter = tokio::spawn(report_events(builder.subscribe()));
    let uploader = builder.build()?;
    uploader.resume()?;
    info!(roots = uploader.roots().len(), "dropship running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl-C")?;

    info!("shutting down");
    uploader.pause_watcher();
    uploader.save(true)?;
    reporter.abort();
    Ok(())
}

/// An explicit `--config` must exist; a missing default file falls back to
/// built-in defaults.
fn load_config(explicit: Option<&Path>) -> Result<ConfigFile> {
    if let Some(path) = explicit {
        return Ok(load_and_validate(path)?);
    }
    let path = default_config_path();
    if path.exists() {
        Ok(load_and_validate(&path)?)
    } else {
        debug!(?path, "no config file; using defaults");
        Ok(ConfigFile::try_from(RawConfigFile::default())?)
    }
}

async fn report_events(mut rx: broadcast::Receiver<UploaderEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => report(&event),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event reporter fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn report(event: &UploaderEvent) {
    match event {
        // Already mirrored into tracing by the event bus.
        UploaderEvent::Log(_) | UploaderEvent::Error { .. } => {}
        UploaderEvent::Processed { path, success: true } => info!(?path, "uploaded"),
        UploaderEvent::Processed { path, success: false } => warn!(?path, "upload failed"),
        UploaderEvent::Upload { path, attempt, .. } => debug!(?path, attempt, "upload attempt"),
        UploaderEvent::Queue { path, root } => debug!(?path, ?root, "queued"),
        UploaderEvent::Ignore { path, reason } => debug!(?path, ?reason, "ignored"),
        UploaderEvent::Drain => info!("all queued uploads finished"),
        other => debug!(event = ?other, "uploader event"),
    }
}

/// Simple dry-run output: print the resolved options and transfer command.
fn print_dry_run(cfg: &ConfigFile) {
    let opts = &cfg.uploader;
    println!("dropship dry-run");
    println!("  state file = {}", opts.state_file_path().display());
    println!("  concurrency = {}", opts.concurrency);
    println!("  retries = {}", opts.retries);
    println!("  save_interval = {} ms", opts.save_interval);
    println!("  modify_interval = {} ms", opts.modify_interval);
    if opts.throttle > 0 {
        println!("  throttle = {} bytes/sec", opts.throttle);
    }
    if let Some(ref exts) = opts.extensions {
        println!("  extensions = {:?}", exts);
    }
    println!();

    println!("paths ({}):", opts.paths.len());
    for path in &opts.paths {
        println!("  - {}", path.display());
    }

    match &cfg.transfer {
        Some(transfer) => println!("transfer: {}", transfer.cmd),
        None => println!("transfer: (none)"),
    }

    debug!("dry-run complete (nothing watched)");
}
