// src/exec/command.rs

//! Shell-command transfer step.

use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::{DropshipError, Result};

use super::backend::{Transfer, TransferRequest};

/// Runs a shell command per attempt with the file's bytes on stdin.
///
/// The command sees the request through environment variables:
/// `DROPSHIP_PATH`, `DROPSHIP_ROOT`, `DROPSHIP_SIZE`, `DROPSHIP_ATTEMPT` and
/// `DROPSHIP_ROOT_CONFIG` (the root's config as JSON). Exit status 0 is
/// success.
#[derive(Debug, Clone)]
pub struct CommandTransfer {
    cmd: String,
}

impl CommandTransfer {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }
}

impl Transfer for CommandTransfer {
    fn transfer(
        &self,
        request: TransferRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(run_transfer_command(&self.cmd, request))
    }
}

async fn run_transfer_command(cmd_line: &str, request: TransferRequest) -> Result<()> {
    let TransferRequest {
        path,
        root,
        config,
        size,
        attempt,
        mut stream,
    } = request;

    info!(?path, attempt, cmd = %cmd_line, "starting transfer command");

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd_line);
        c
    };

    cmd.env("DROPSHIP_PATH", &path)
        .env("DROPSHIP_ROOT", &root)
        .env("DROPSHIP_SIZE", size.to_string())
        .env("DROPSHIP_ATTEMPT", attempt.to_string())
        .env("DROPSHIP_ROOT_CONFIG", config.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning transfer command for {:?}", path))?;

    if let Some(stdout) = child.stdout.take() {
        log_lines("stdout", stdout, path.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        log_lines("stderr", stderr, path.clone());
    }

    let stdin = child.stdin.take();
    let feed = async move {
        let Some(mut stdin) = stdin else {
            return Ok(());
        };
        match tokio::io::copy(&mut stream, &mut stdin).await {
            Ok(_) => stdin.shutdown().await,
            // The command is allowed to exit without consuming its input.
            Err(err) if err.kind() == ErrorKind::BrokenPipe => Ok(()),
            Err(err) => Err(err),
        }
    };

    let (fed, status) = tokio::join!(feed, child.wait());
    let status = status.with_context(|| format!("waiting for transfer command of {:?}", path))?;
    if let Err(err) = fed {
        if err.kind() != ErrorKind::BrokenPipe {
            return Err(DropshipError::TransferFailed(format!(
                "streaming {} to command: {err}",
                path.display()
            )));
        }
    }

    let code = status.code().unwrap_or(-1);
    info!(?path, attempt, exit_code = code, success = status.success(), "transfer command exited");

    if status.success() {
        Ok(())
    } else {
        Err(DropshipError::TransferFailed(format!(
            "command exited with status {code} for {}",
            path.display()
        )))
    }
}

/// Consume a child pipe so its buffer never fills; lines go to debug.
fn log_lines<R>(name: &'static str, pipe: R, path: PathBuf)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(?path, "{}: {}", name, line);
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn request(stream: &'static [u8]) -> TransferRequest {
        TransferRequest {
            path: PathBuf::from("/w/a.txt"),
            root: PathBuf::from("/w"),
            config: json!({"bucket": "b1"}),
            size: stream.len() as u64,
            attempt: 2,
            stream: Box::new(Cursor::new(stream)),
        }
    }

    #[tokio::test]
    async fn success_when_command_exits_zero() {
        let transfer = CommandTransfer::new(
            r#"test "$(cat)" = "hello" && test "$DROPSHIP_ATTEMPT" = 2 && test "$DROPSHIP_SIZE" = 5"#,
        );
        transfer.transfer(request(b"hello")).await.unwrap();
    }

    #[tokio::test]
    async fn root_config_is_passed_as_json() {
        let transfer =
            CommandTransfer::new(r#"test "$DROPSHIP_ROOT_CONFIG" = '{"bucket":"b1"}'"#);
        transfer.transfer(request(b"")).await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_transfer_failure() {
        let transfer = CommandTransfer::new("exit 3");
        match transfer.transfer(request(b"data")).await {
            Err(DropshipError::TransferFailed(msg)) => assert!(msg.contains("status 3")),
            other => panic!("expected TransferFailed, got {:?}", other),
        }
    }
}
