//! Transport for the machine the coordinator runs on.

use crate::locks::PathLocks;
use crate::process::{run, to_exec_output};
use crate::tmux;
use async_trait::async_trait;
use gt_core::{Error, ExecOptions, ExecOutput, Result, Transport};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs commands through `sh -c`, touches files with `tokio::fs`, and drives
/// the local tmux server directly.
#[derive(Default)]
pub struct LocalTransport {
    appends: PathLocks,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn tmux(&self, args: Vec<String>) -> Result<ExecOutput> {
        let label = tmux::command_line("tmux", &args);
        let mut cmd = Command::new("tmux");
        cmd.args(&args);
        let output = run(cmd, None, None, &label).await?;
        Ok(to_exec_output(output))
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn execute(&self, command: &str, options: &ExecOptions) -> Result<ExecOutput> {
        info!(command = %command, cwd = ?options.cwd, "Executing local command");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        let output = run(cmd, options.stdin.clone(), options.cancel.clone(), command).await?;
        let output = to_exec_output(output);
        debug!(exit_code = output.exit_code, "Command completed");
        Ok(output)
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        Ok(tokio::fs::write(path, data).await?)
    }

    async fn append_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        let _guard = self.appends.lock(path).await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn file_exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn mkdir_all(&self, path: &Path) -> Result<()> {
        Ok(tokio::fs::create_dir_all(path).await?)
    }

    async fn tmux_send(&self, session: &str, text: &str) -> Result<()> {
        debug!(session = %session, "Sending keys to local tmux session");
        let args = tmux::send_literal(session, text);
        let label = tmux::command_line("tmux", &args);
        self.tmux(args).await?.check(&label)?;

        let args = tmux::send_enter(session);
        let label = tmux::command_line("tmux", &args);
        self.tmux(args).await?.check(&label)?;
        Ok(())
    }

    async fn tmux_capture(&self, session: &str, lines: usize) -> Result<Vec<String>> {
        let args = tmux::capture(session, lines);
        let label = tmux::command_line("tmux", &args);
        let output = self.tmux(args).await?.check(&label)?;
        Ok(tmux::parse_capture(&output.stdout, lines))
    }

    async fn tmux_has_session(&self, session: &str) -> Result<bool> {
        let output = match self.tmux(tmux::has_session(session)).await {
            Ok(output) => output,
            // No tmux installed means no sessions.
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        match output.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(Error::Command {
                command: format!("tmux has-session -t ={}", session),
                exit_code: code,
                stdout: output.stdout,
                stderr: output.stderr.trim_end().to_string(),
            }),
        }
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
