//! MCP JSON-RPC handler.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::mayor::{TaskRequest, mayor_task};
use crate::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER, verify};
use crate::state::AppState;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "gastown-mcp";

const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const PARSE_ERROR: i64 = -32700;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: Value,
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() },
    })
}

/// The single tool this server exposes.
pub fn tool_definitions(state: &AppState) -> Value {
    json!([{
        "name": "mayor_task",
        "description": "Send a task to the Gas Town mayor, the agent that coordinates \
            work across rigs, convoys and workers. Runs inside the mayor's live session \
            when it is up, otherwise as a stateless one-shot run.",
        "inputSchema": {
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "What the mayor should do, e.g. 'fix the bug in checkout' or 'list all active work'"
                },
                "context": {
                    "type": "string",
                    "description": "Optional additional context such as error messages or requirements"
                },
                "wait": {
                    "type": "boolean",
                    "description": "Wait for completion (default true). When false the task ID is returned immediately"
                },
                "timeout": {
                    "type": "integer",
                    "description": format!(
                        "Timeout in seconds when wait=true (default: {}, max: {})",
                        state.settings.default_task_timeout_secs,
                        state.settings.max_task_timeout_secs
                    )
                }
            },
            "required": ["task"]
        }
    }])
}

fn signature_ok(state: &AppState, headers: &HeaderMap, body: &str) -> bool {
    let Some(token) = state.token.as_deref() else {
        return true;
    };
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    };
    verify(
        token,
        body,
        header(SIGNATURE_HEADER),
        header(TIMESTAMP_HEADER),
        chrono::Utc::now().timestamp(),
        state.settings.timestamp_freshness_secs,
    )
}

pub async fn mcp(State(state): State<Arc<AppState>>, headers: HeaderMap, body: String) -> Response {
    if !signature_ok(&state, &headers, &body) {
        warn!("Rejected request with invalid signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(rpc_error(Value::Null, INVALID_REQUEST, "Invalid signature")),
        )
            .into_response();
    }

    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(rpc_error(Value::Null, PARSE_ERROR, format!("Parse error: {e}"))),
            )
                .into_response();
        }
    };

    info!(method = %request.method, id = %request.id, "MCP request");

    let reply = match request.method.as_str() {
        "initialize" => rpc_result(
            request.id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": { "tools": {} },
            }),
        ),
        "tools/list" => rpc_result(request.id, json!({ "tools": tool_definitions(&state) })),
        "tools/call" => {
            let result = call_tool(state, request.params).await;
            rpc_result(request.id, result)
        }
        other => rpc_error(
            request.id,
            METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    };

    Json(reply).into_response()
}

fn tool_result(payload: &Value, is_error: bool) -> Value {
    let text = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    })
}

async fn call_tool(state: Arc<AppState>, params: Value) -> Value {
    let call: ToolCall = match serde_json::from_value(params) {
        Ok(call) => call,
        Err(e) => return tool_result(&json!({ "error": format!("Invalid params: {e}") }), true),
    };
    if call.name != "mayor_task" {
        return tool_result(&json!({ "error": format!("Unknown tool: {}", call.name) }), true);
    }

    let request: TaskRequest = match serde_json::from_value(call.arguments) {
        Ok(request) => request,
        Err(e) => {
            return tool_result(&json!({ "error": format!("Invalid arguments: {e}") }), true);
        }
    };
    if request.task.trim().is_empty() {
        return tool_result(&json!({ "error": "task must not be empty" }), true);
    }

    let outcome = mayor_task(state, request).await;
    let success = outcome.success;
    match serde_json::to_value(&outcome) {
        Ok(payload) => tool_result(&payload, !success),
        Err(e) => tool_result(&json!({ "error": e.to_string() }), true),
    }
}
