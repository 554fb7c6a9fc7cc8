//! Health check handler.

use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;
use crate::tasks::ExecutionMode;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub gt_root: String,
    pub active_tasks: usize,
    pub execution_mode: ExecutionMode,
    pub mayor_session: String,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let running = state.mayor_running().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "gastown-mcp".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        gt_root: state.town_root.display().to_string(),
        active_tasks: state.tasks.active(),
        execution_mode: if running {
            ExecutionMode::Interactive
        } else {
            ExecutionMode::Oneshot
        },
        mayor_session: if running { "running" } else { "stopped" }.to_string(),
    })
}
