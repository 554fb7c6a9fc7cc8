//! Application state shared across handlers.

use crate::tasks::TaskTable;
use gt_core::{GtConfig, McpSettings, SessionConfig, Transport};
use std::path::PathBuf;
use std::sync::Arc;

pub struct AppState {
    pub settings: McpSettings,
    pub town_root: PathBuf,
    /// Working directory for one-shot runs.
    pub mayor_dir: PathBuf,
    pub mayor_session: String,
    pub session: SessionConfig,
    /// Signature key; `None` disables verification.
    pub token: Option<String>,
    /// Transport for the machine the mayor runs on.
    pub transport: Arc<dyn Transport>,
    pub tasks: TaskTable,
}

impl AppState {
    pub fn new(config: &GtConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            settings: config.mcp.clone(),
            town_root: config.town_root.clone(),
            mayor_dir: config.mayor_dir(),
            mayor_session: config.mayor_session.clone(),
            session: config.session.clone(),
            token: config.mcp.resolve_token(),
            transport,
            tasks: TaskTable::default(),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Whether the mayor's tmux session is up. Probe failures count as down.
    pub async fn mayor_running(&self) -> bool {
        match self.transport.tmux_has_session(&self.mayor_session).await {
            Ok(running) => running,
            Err(e) => {
                tracing::debug!(error = %e, "Mayor status check failed");
                false
            }
        }
    }
}
