//! Child-process plumbing shared by both backends.

use gt_core::{Error, ExecOutput, Result};
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Resolves once the signal flips to `true`. Never resolves when there is no
/// signal or its sender is gone.
pub(crate) async fn cancelled(signal: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = signal else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Spawn `cmd`, feed it `stdin`, and collect its output. The child is killed
/// if the cancellation signal fires first.
pub(crate) async fn run(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    cancel: Option<watch::Receiver<bool>>,
    label: &str,
) -> Result<Output> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let mut child = cmd.spawn()?;

    if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(&data).await {
                debug!(error = %e, "stdin closed before all input was written");
            }
        });
    }

    tokio::select! {
        output = child.wait_with_output() => Ok(output?),
        _ = cancelled(cancel) => {
            warn!(command = %label, "Command cancelled, killing process");
            Err(Error::Cancelled(label.to_string()))
        }
    }
}

pub(crate) fn to_exec_output(output: Output) -> ExecOutput {
    ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    }
}
