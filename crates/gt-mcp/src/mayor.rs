//! Running `mayor_task` requests.
//!
//! A task goes to the running mayor session when there is one, and to a
//! one-shot `claude -p` run in the mayor directory otherwise.

use crate::state::AppState;
use crate::tasks::{ExecutionMode, TaskStatus};
use gt_core::{Error, ExecOptions, Result};
use gt_session::send_and_capture_response_with;
use gt_transport::command_line;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Arguments of the `mayor_task` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskRequest {
    pub task: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default = "default_wait")]
    pub wait: bool,
    /// Seconds; capped by the configured maximum.
    #[serde(default)]
    pub timeout: Option<u64>,
}

fn default_wait() -> bool {
    true
}

/// Tool result reported back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub success: bool,
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
}

/// Record and run a task. With `wait = false` the task runs in the
/// background and the outcome only carries its ID.
pub async fn mayor_task(state: Arc<AppState>, request: TaskRequest) -> TaskOutcome {
    let timeout_secs = request
        .timeout
        .unwrap_or(state.settings.default_task_timeout_secs)
        .min(state.settings.max_task_timeout_secs);
    let timeout = Duration::from_secs(timeout_secs);
    let task_id = state.tasks.start(&request.task);

    if !request.wait {
        info!(task = %task_id, "Starting mayor task in background");
        let background = state.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            run(&background, &id, &request, timeout).await;
        });
        return TaskOutcome {
            success: true,
            task_id,
            status: TaskStatus::Running,
            response: None,
            error: None,
            mode: None,
        };
    }

    run(&state, &task_id, &request, timeout).await
}

async fn run(state: &AppState, task_id: &str, request: &TaskRequest, timeout: Duration) -> TaskOutcome {
    let mode = if state.mayor_running().await {
        ExecutionMode::Interactive
    } else {
        ExecutionMode::Oneshot
    };
    state.tasks.set_mode(task_id, mode);

    let preview: String = request.task.chars().take(100).collect();
    info!(task = %task_id, ?mode, prompt = %preview, "Sending task to mayor");

    let result = match mode {
        ExecutionMode::Interactive => interactive(state, request, timeout).await,
        ExecutionMode::Oneshot => oneshot(state, request, timeout).await,
    };

    match result {
        Ok(response) => {
            info!(task = %task_id, "Mayor task completed");
            state.tasks.complete(task_id, response.clone());
            TaskOutcome {
                success: true,
                task_id: task_id.to_string(),
                status: TaskStatus::Completed,
                response: Some(response),
                error: None,
                mode: Some(mode),
            }
        }
        Err(e) => {
            let (status, message) = match &e {
                Error::Timeout { .. } => (
                    TaskStatus::Timeout,
                    format!("Task timed out after {} seconds", timeout.as_secs()),
                ),
                _ => (TaskStatus::Failed, e.to_string()),
            };
            if status == TaskStatus::Timeout {
                warn!(task = %task_id, "Mayor task timed out");
            } else {
                error!(task = %task_id, error = %e, "Mayor task failed");
            }
            state.tasks.fail(task_id, status, message.clone());
            TaskOutcome {
                success: false,
                task_id: task_id.to_string(),
                status,
                response: None,
                error: Some(message),
                mode: Some(mode),
            }
        }
    }
}

/// The prompt typed into the session, kept on one line so tmux does not
/// submit it early.
fn session_prompt(request: &TaskRequest) -> String {
    let prompt = match &request.context {
        Some(context) if !context.trim().is_empty() => {
            format!("{} (Context: {})", request.task, context)
        }
        _ => request.task.clone(),
    };
    prompt.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn oneshot_prompt(request: &TaskRequest) -> String {
    match &request.context {
        Some(context) if !context.trim().is_empty() => {
            format!("{}\n\nContext:\n{}", request.task, context)
        }
        _ => request.task.clone(),
    }
}

async fn interactive(state: &AppState, request: &TaskRequest, timeout: Duration) -> Result<String> {
    send_and_capture_response_with(
        state.transport.as_ref(),
        &state.mayor_session,
        &session_prompt(request),
        timeout,
        &state.session,
    )
    .await
}

async fn oneshot(state: &AppState, request: &TaskRequest, timeout: Duration) -> Result<String> {
    let args: Vec<String> = vec![
        "-p".to_string(),
        oneshot_prompt(request),
        "--model".to_string(),
        state.settings.claude_model.clone(),
        "--output-format".to_string(),
        "text".to_string(),
        "--dangerously-skip-permissions".to_string(),
    ];
    let command = command_line("claude", &args);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let timer = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let _ = cancel_tx.send(true);
    });

    let options = ExecOptions::new()
        .cwd(&state.mayor_dir)
        .cancel_on(cancel_rx);
    let result = state.transport.execute(&command, &options).await;
    timer.abort();

    match result {
        Ok(output) if output.success() => Ok(output.stdout.trim().to_string()),
        Ok(output) => Err(Error::Command {
            command: "claude -p".to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout.trim().to_string(),
            stderr: output.stderr.trim().to_string(),
        }),
        Err(Error::Cancelled(_)) => Err(Error::Timeout { elapsed: timeout }),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(task: &str, context: Option<&str>) -> TaskRequest {
        TaskRequest {
            task: task.to_string(),
            context: context.map(str::to_string),
            wait: true,
            timeout: None,
        }
    }

    #[test]
    fn test_session_prompt_is_single_line() {
        let req = request("fix the\ncheckout bug", Some("stack trace:\n  at cart.rs:10"));
        assert_eq!(
            session_prompt(&req),
            "fix the checkout bug (Context: stack trace: at cart.rs:10)"
        );
        assert_eq!(session_prompt(&request("status", Some("  "))), "status");
    }

    #[test]
    fn test_oneshot_prompt_keeps_context_block() {
        let req = request("add auth", Some("use sessions"));
        assert_eq!(oneshot_prompt(&req), "add auth\n\nContext:\nuse sessions");
    }

    #[test]
    fn test_request_defaults() {
        let req: TaskRequest = serde_json::from_str(r#"{"task":"list rigs"}"#).unwrap();
        assert!(req.wait);
        assert_eq!(req.timeout, None);
        assert_eq!(req.context, None);
    }
}
