//! Transport for remote machines over OpenSSH.
//!
//! One persistent master connection (`ssh -M -N`) is opened per machine and
//! every operation runs as a short-lived session multiplexed over its control
//! socket, so authentication happens once.
//!
//! Appends are serialized per path within one `SshTransport`. Appends to the
//! same remote file from other processes rely on `O_APPEND` in the remote
//! shell's `>>` redirection and are best-effort.

use crate::locks::PathLocks;
use crate::process::{run, to_exec_output};
use crate::tmux::{self, shell_quote};
use async_trait::async_trait;
use gt_core::{Error, ExecOptions, ExecOutput, Machine, Result, SshParams, Transport};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const CHECK_INTERVAL: Duration = Duration::from_millis(100);
/// Exit status `ssh` uses for its own failures.
const SSH_ERROR_STATUS: i32 = 255;

static SOCKET_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub struct SshTransport {
    machine: String,
    params: SshParams,
    control_path: PathBuf,
    master: Mutex<Child>,
    appends: PathLocks,
}

impl SshTransport {
    /// Open the master connection and wait until its control socket answers.
    pub async fn connect(machine: &Machine) -> Result<Self> {
        let params = machine.ssh_params().ok_or_else(|| {
            Error::Config(format!("machine {} is not reachable over ssh", machine.name))
        })?;
        let control_path = control_socket_path(&machine.name);

        info!(machine = %machine.name, host = %params.host, "Opening SSH master connection");

        let mut master = Command::new("ssh")
            .args(master_args(&params, &control_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ConnectionFailed {
                machine: machine.name.clone(),
                reason: format!("failed to spawn ssh: {}", e),
            })?;

        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            if let Some(status) = master.try_wait()? {
                let mut stderr = String::new();
                if let Some(mut pipe) = master.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                warn!(machine = %machine.name, %status, "SSH master exited during setup");
                return Err(Error::ConnectionFailed {
                    machine: machine.name.clone(),
                    reason: non_empty(stderr.trim(), &format!("ssh exited with {}", status)),
                });
            }

            if control_check(&params, &control_path).await {
                break;
            }

            if Instant::now() >= deadline {
                let _ = master.kill().await;
                return Err(Error::ConnectionFailed {
                    machine: machine.name.clone(),
                    reason: format!("no answer within {:?}", CONNECT_TIMEOUT),
                });
            }
            sleep(CHECK_INTERVAL).await;
        }

        debug!(machine = %machine.name, socket = %control_path.display(), "SSH master ready");

        Ok(Self {
            machine: machine.name.clone(),
            params,
            control_path,
            master: Mutex::new(master),
            appends: PathLocks::default(),
        })
    }

    pub fn machine(&self) -> &str {
        &self.machine
    }

    fn lost(&self) -> Error {
        Error::ConnectionLost {
            machine: self.machine.clone(),
        }
    }

    /// Run `remote_command` in a session on the master connection.
    async fn remote(
        &self,
        remote_command: &str,
        stdin: Option<Vec<u8>>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Output> {
        if !self.is_healthy() {
            return Err(self.lost());
        }

        let mut cmd = Command::new("ssh");
        cmd.args(session_args(&self.params, &self.control_path))
            .arg("--")
            .arg(remote_command);

        let output = run(cmd, stdin, cancel, remote_command).await?;
        if output.status.code() == Some(SSH_ERROR_STATUS) && !self.is_healthy() {
            warn!(machine = %self.machine, "SSH master connection went away");
            return Err(self.lost());
        }
        Ok(output)
    }

    async fn remote_checked(&self, remote_command: &str, stdin: Option<Vec<u8>>) -> Result<Output> {
        let output = self.remote(remote_command, stdin, None).await?;
        if output.status.success() {
            return Ok(output);
        }
        let out = to_exec_output(output);
        Err(Error::Command {
            command: remote_command.to_string(),
            exit_code: out.exit_code,
            stdout: out.stdout,
            stderr: out.stderr.trim_end().to_string(),
        })
    }

    async fn tmux(&self, args: Vec<String>) -> Result<Output> {
        self.remote_checked(&tmux::command_line("tmux", &args), None)
            .await
    }
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.control_path);
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn execute(&self, command: &str, options: &ExecOptions) -> Result<ExecOutput> {
        info!(machine = %self.machine, command = %command, "Executing remote command");
        let remote_command = match &options.cwd {
            Some(cwd) => format!("cd {} && {}", quote_path(cwd), command),
            None => command.to_string(),
        };
        let output = self
            .remote(&remote_command, options.stdin.clone(), options.cancel.clone())
            .await?;
        let output = to_exec_output(output);
        debug!(machine = %self.machine, exit_code = output.exit_code, "Command completed");
        Ok(output)
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let output = self
            .remote_checked(&format!("cat -- {}", quote_path(path)), None)
            .await?;
        Ok(output.stdout)
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        self.remote_checked(&format!("cat > {}", quote_path(path)), Some(data.to_vec()))
            .await?;
        Ok(())
    }

    async fn append_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        let _guard = self.appends.lock(path).await;
        self.remote_checked(&format!("cat >> {}", quote_path(path)), Some(data.to_vec()))
            .await?;
        Ok(())
    }

    async fn file_exists(&self, path: &Path) -> Result<bool> {
        let command = format!("test -e {}", quote_path(path));
        let output = to_exec_output(self.remote(&command, None, None).await?);
        match output.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            _ => output.check(&command).map(|_| false),
        }
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let output = self
            .remote_checked(&format!("ls -1A -- {}", quote_path(path)), None)
            .await?;
        let mut names: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn mkdir_all(&self, path: &Path) -> Result<()> {
        self.remote_checked(&format!("mkdir -p -- {}", quote_path(path)), None)
            .await?;
        Ok(())
    }

    async fn tmux_send(&self, session: &str, text: &str) -> Result<()> {
        debug!(machine = %self.machine, session = %session, "Sending keys to remote tmux session");
        self.tmux(tmux::send_literal(session, text)).await?;
        self.tmux(tmux::send_enter(session)).await?;
        Ok(())
    }

    async fn tmux_capture(&self, session: &str, lines: usize) -> Result<Vec<String>> {
        let output = self.tmux(tmux::capture(session, lines)).await?;
        Ok(tmux::parse_capture(
            &String::from_utf8_lossy(&output.stdout),
            lines,
        ))
    }

    async fn tmux_has_session(&self, session: &str) -> Result<bool> {
        let command = tmux::command_line("tmux", &tmux::has_session(session));
        let output = to_exec_output(self.remote(&command, None, None).await?);
        match output.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            _ => output.check(&command).map(|_| false),
        }
    }

    fn is_healthy(&self) -> bool {
        let mut master = self.master.lock().unwrap_or_else(|e| e.into_inner());
        matches!(master.try_wait(), Ok(None))
    }
}

fn control_socket_path(machine: &str) -> PathBuf {
    let n = SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("gt-ssh-{}-{}-{}.sock", machine, std::process::id(), n))
}

fn target(params: &SshParams) -> String {
    match &params.user {
        Some(user) => format!("{}@{}", user, params.host),
        None => params.host.clone(),
    }
}

fn common_args(params: &SshParams, args: &mut Vec<String>) {
    args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
    if params.port != 22 {
        args.extend(["-p".to_string(), params.port.to_string()]);
    }
    if let Some(key) = &params.identity_file {
        args.extend(["-i".to_string(), key.display().to_string()]);
    }
}

/// Arguments for the long-lived master process.
fn master_args(params: &SshParams, control_path: &Path) -> Vec<String> {
    let mut args = vec![
        "-M".to_string(),
        "-S".to_string(),
        control_path.display().to_string(),
        "-N".to_string(),
        "-o".to_string(),
        "ConnectTimeout=10".to_string(),
        "-o".to_string(),
        "ServerAliveInterval=15".to_string(),
    ];
    common_args(params, &mut args);
    args.push(target(params));
    args
}

/// Arguments for one session riding on the master's control socket.
fn session_args(params: &SshParams, control_path: &Path) -> Vec<String> {
    let mut args = vec![
        "-S".to_string(),
        control_path.display().to_string(),
        "-o".to_string(),
        "ControlMaster=no".to_string(),
    ];
    common_args(params, &mut args);
    args.push(target(params));
    args
}

async fn control_check(params: &SshParams, control_path: &Path) -> bool {
    let status = Command::new("ssh")
        .arg("-S")
        .arg(control_path)
        .args(["-O", "check"])
        .arg(target(params))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    matches!(status, Ok(s) if s.success())
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

fn non_empty(s: &str, fallback: &str) -> String {
    if s.is_empty() {
        fallback.to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gt_core::MachineKind;

    fn params() -> SshParams {
        SshParams {
            host: "build-01.example.net".to_string(),
            user: Some("gt".to_string()),
            port: 2222,
            identity_file: Some(PathBuf::from("/keys/id_ed25519")),
        }
    }

    #[test]
    fn test_master_args() {
        let args = master_args(&params(), Path::new("/tmp/s.sock"));
        assert_eq!(&args[..4], ["-M", "-S", "/tmp/s.sock", "-N"]);
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/keys/id_ed25519"]));
        assert_eq!(args.last().unwrap(), "gt@build-01.example.net");
    }

    #[test]
    fn test_session_args_reuse_control_socket() {
        let mut p = params();
        p.port = 22;
        p.user = None;
        let args = session_args(&p, Path::new("/tmp/s.sock"));
        assert_eq!(&args[..2], ["-S", "/tmp/s.sock"]);
        assert!(args.contains(&"ControlMaster=no".to_string()));
        assert!(!args.contains(&"-p".to_string()));
        assert_eq!(args.last().unwrap(), "build-01.example.net");
    }

    #[test]
    fn test_control_paths_are_distinct() {
        assert_ne!(control_socket_path("a"), control_socket_path("a"));
    }

    #[test]
    fn test_quote_path() {
        assert_eq!(quote_path(Path::new("gt/rig/a b")), "'gt/rig/a b'");
    }

    #[tokio::test]
    async fn test_connect_rejects_local_machine() {
        let err = SshTransport::connect(&Machine::local("/tmp/gt"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "config");
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        let machine = Machine {
            name: "nowhere".to_string(),
            kind: MachineKind::Ssh(SshParams {
                host: "nowhere.invalid".to_string(),
                user: None,
                port: 22,
                identity_file: None,
            }),
            workspace_root: PathBuf::from("gt"),
        };
        let err = SshTransport::connect(&machine).await.err().unwrap();
        assert!(err.is_connection_error(), "unexpected error: {err}");
    }
}
