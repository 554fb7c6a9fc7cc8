//! Gas Town Sessions
//!
//! Turns a tmux session running an interactive agent into a synchronous
//! request/response channel: type a message, wait for the pane to stop
//! changing, and pull the reply out of the capture.

pub mod extract;

pub use extract::{clean_response_lines, extract_response, is_ui_artifact};

pub use gt_core::SessionConfig;

use gt_core::{Error, Result, Transport};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

/// Send `message` to `session` and wait for the reply, using the default
/// timings.
pub async fn send_and_capture_response(
    transport: &dyn Transport,
    session: &str,
    message: &str,
    timeout: Duration,
) -> Result<String> {
    send_and_capture_response_with(transport, session, message, timeout, &SessionConfig::default())
        .await
}

/// Send `message` to `session` and wait until the pane has been stable for
/// the configured window, or until `timeout` passes.
///
/// The caller checks that the session exists. Any capture failure ends the
/// exchange.
pub async fn send_and_capture_response_with(
    transport: &dyn Transport,
    session: &str,
    message: &str,
    timeout: Duration,
    config: &SessionConfig,
) -> Result<String> {
    let started = Instant::now();
    let deadline = started + timeout;

    let baseline = transport.tmux_capture(session, config.baseline_lines).await?;
    let baseline_len = baseline.len();

    transport.tmux_send(session, message).await?;
    info!(session = %session, timeout = ?timeout, "Message sent, waiting for response");

    let mut last_content: Option<String> = None;
    let mut last_change = started;

    while Instant::now() < deadline {
        let lines = transport.tmux_capture(session, config.capture_lines).await?;
        let content = lines.join("\n");

        if last_content.as_deref() != Some(content.as_str()) {
            last_content = Some(content);
            last_change = Instant::now();
        } else if last_change.elapsed() >= config.stability_window() {
            debug!(
                session = %session,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Output settled"
            );
            return Ok(extract_response(&lines, baseline_len, message));
        }

        sleep(config.poll_interval()).await;
    }

    Err(Error::Timeout {
        elapsed: started.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gt_core::{ExecOptions, ExecOutput};
    use std::path::Path;
    use std::sync::Mutex;

    /// Pane whose content follows a script keyed on elapsed virtual time.
    struct ScriptedPane {
        start: Instant,
        /// `(from, lines)`: the pane shows `lines` once `from` has elapsed.
        frames: Vec<(Duration, Vec<String>)>,
        sent: Mutex<Vec<String>>,
        captures: Mutex<usize>,
        fail_after: Option<usize>,
    }

    impl ScriptedPane {
        fn new(frames: Vec<(u64, Vec<&str>)>) -> Self {
            Self {
                start: Instant::now(),
                frames: frames
                    .into_iter()
                    .map(|(ms, lines)| {
                        (
                            Duration::from_millis(ms),
                            lines.into_iter().map(str::to_string).collect(),
                        )
                    })
                    .collect(),
                sent: Mutex::new(Vec::new()),
                captures: Mutex::new(0),
                fail_after: None,
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedPane {
        async fn execute(&self, _command: &str, _options: &ExecOptions) -> Result<ExecOutput> {
            unimplemented!()
        }
        async fn read_file(&self, _path: &Path) -> Result<Vec<u8>> {
            unimplemented!()
        }
        async fn write_file(&self, _path: &Path, _data: &[u8]) -> Result<()> {
            unimplemented!()
        }
        async fn append_file(&self, _path: &Path, _data: &[u8]) -> Result<()> {
            unimplemented!()
        }
        async fn file_exists(&self, _path: &Path) -> Result<bool> {
            unimplemented!()
        }
        async fn list_dir(&self, _path: &Path) -> Result<Vec<String>> {
            unimplemented!()
        }
        async fn mkdir_all(&self, _path: &Path) -> Result<()> {
            unimplemented!()
        }
        async fn tmux_send(&self, _session: &str, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
        async fn tmux_capture(&self, _session: &str, lines: usize) -> Result<Vec<String>> {
            let mut captures = self.captures.lock().unwrap();
            *captures += 1;
            if self.fail_after.is_some_and(|n| *captures > n) {
                return Err(Error::Command {
                    command: "tmux capture-pane".to_string(),
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: "can't find session".to_string(),
                });
            }
            let elapsed = self.start.elapsed();
            let frame = self
                .frames
                .iter()
                .rev()
                .find(|(from, _)| elapsed >= *from)
                .map(|(_, l)| l.clone())
                .unwrap_or_default();
            let start = frame.len().saturating_sub(lines);
            Ok(frame[start..].to_vec())
        }
        async fn tmux_has_session(&self, _session: &str) -> Result<bool> {
            Ok(true)
        }
        fn is_healthy(&self) -> bool {
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_once_output_is_stable() {
        let pane = ScriptedPane::new(vec![
            (0, vec!["welcome", "❯"]),
            (1000, vec!["welcome", "❯ status?", "✻ Thinking…"]),
            (3000, vec!["welcome", "❯ status?", "", "All quiet.", "", "❯"]),
        ]);

        let started = Instant::now();
        let reply = send_and_capture_response(&pane, "gt-mayor", "status?", Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(reply, "All quiet.");
        assert_eq!(*pane.sent.lock().unwrap(), vec!["status?"]);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(5), "settled too early: {waited:?}");
        assert!(waited < Duration::from_secs(6), "settled too late: {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_output_keeps_changing() {
        let frames = (0..100)
            .map(|i| (i * 400, vec!["working"; (i + 1) as usize]))
            .collect();
        let pane = ScriptedPane::new(frames);

        let started = Instant::now();
        let err = send_and_capture_response(&pane, "gt-mayor", "go", Duration::from_secs(5))
            .await
            .unwrap_err();

        match err {
            Error::Timeout { elapsed } => assert!(elapsed >= Duration::from_secs(5)),
            other => panic!("unexpected error: {other}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_is_fatal() {
        let mut pane = ScriptedPane::new(vec![(0, vec!["❯"])]);
        pane.fail_after = Some(2);

        let err = send_and_capture_response(&pane, "gt-mayor", "hi", Duration::from_secs(30))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "command");
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_timings() {
        let pane = ScriptedPane::new(vec![(0, vec!["❯ ping", "pong"])]);
        let config = SessionConfig {
            poll_interval_ms: 100,
            stability_ms: 300,
            ..SessionConfig::default()
        };

        let started = Instant::now();
        let reply =
            send_and_capture_response_with(&pane, "gt-mayor", "ping", Duration::from_secs(2), &config)
                .await
                .unwrap();
        assert_eq!(reply, "pong");
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
