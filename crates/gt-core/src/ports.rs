//! Port traits.
//!
//! These traits define the interfaces between the dispatch core and the
//! outside world: machines reached through a transport, and the issue store.

use crate::issue::{Convoy, IssueFilter, TrackedIssue};
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// Options for a single command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory for the command.
    pub cwd: Option<PathBuf>,
    /// Bytes fed to the command's stdin.
    pub stdin: Option<Vec<u8>>,
    /// Flipping this to `true` aborts the command.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn cancel_on(mut self, signal: watch::Receiver<bool>) -> Self {
        self.cancel = Some(signal);
        self
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into `Error::Command`.
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::Command {
                command: command.to_string(),
                exit_code: self.exit_code,
                stdout: self.stdout,
                stderr: self.stderr.trim_end().to_string(),
            })
        }
    }
}

/// Command execution, file access and tmux control on one machine.
///
/// Implementations must be safe to share between concurrent dispatch flows.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a shell command.
    async fn execute(&self, command: &str, options: &ExecOptions) -> Result<ExecOutput>;

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Create or truncate `path` and write `data`.
    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Append `data` to `path`, creating it if needed. Appends from the same
    /// transport instance to the same path never interleave.
    async fn append_file(&self, path: &Path, data: &[u8]) -> Result<()>;

    async fn file_exists(&self, path: &Path) -> Result<bool>;

    /// Entry names in `path`, sorted.
    async fn list_dir(&self, path: &Path) -> Result<Vec<String>>;

    /// Create `path` and its parents. Succeeds if it already exists.
    async fn mkdir_all(&self, path: &Path) -> Result<()>;

    /// Type `text` literally into a tmux session, then press Enter.
    async fn tmux_send(&self, session: &str, text: &str) -> Result<()>;

    /// The last `lines` lines of the session's pane, oldest first.
    async fn tmux_capture(&self, session: &str, lines: usize) -> Result<Vec<String>>;

    async fn tmux_has_session(&self, session: &str) -> Result<bool>;

    /// Cheap liveness probe; never blocks.
    fn is_healthy(&self) -> bool;
}

/// The external issue tracker.
#[async_trait]
pub trait IssueStore: Send + Sync {
    async fn get_issue(&self, id: &str) -> Result<Option<TrackedIssue>>;

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<TrackedIssue>>;

    /// Open or closed convoys that track `issue_id`.
    async fn convoys_tracking(&self, issue_id: &str) -> Result<Vec<Convoy>>;

    /// Issues tracked by a convoy, in convoy order.
    async fn tracked_issues(&self, convoy_id: &str) -> Result<Vec<TrackedIssue>>;

    /// Whether a convoy-mate that `issue_id` depends on is still unresolved.
    async fn is_blocked(&self, issue_id: &str) -> Result<bool>;

    /// Set the assignee and move the issue from `open` to `in_progress`.
    async fn assign(&self, issue_id: &str, assignee: &str) -> Result<()>;

    async fn close_convoy(&self, convoy_id: &str, reason: &str) -> Result<()>;
}
