//! MCP (Model Context Protocol) Server
//!
//! Exposes the four database tools to an agent host over manual JSON-RPC 2.0.
//!
//! # Architecture
//!
//! - **Transport**: JSON-RPC 2.0, one request per line (stdio in production)
//! - **Dependencies**: Only `serde_json` and anyhow (no MCP-specific crates)
//! - **State**: one [`Toolbox`] and its connection pool, shared by every call
//!
//! Tool failures are not protocol errors: they come back as a normal `tools/call`
//! result with `isError: true` and the failure text, so the agent can read it and
//! revise its query. JSON-RPC errors are reserved for malformed requests.
//!
//! # Usage
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "text2sql": {
//!       "command": "text2sql",
//!       "args": ["--database-url", "sqlite://shop.db", "serve"]
//!     }
//!   }
//! }
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::engine::DatabaseEngine;
use crate::tools::{self, Toolbox};

const PROTOCOL_VERSION: &str = "2024-11-05";

// ============================================================================
// JSON-RPC 2.0 Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

// ============================================================================
// MCP Tool Result Structures
// ============================================================================

#[derive(Debug, Serialize)]
struct TextContent {
    #[serde(rename = "type")]
    content_type: String,
    text: String,
}

impl TextContent {
    fn new(text: String) -> Self {
        Self {
            content_type: "text".to_string(),
            text,
        }
    }
}

#[derive(Debug, Serialize)]
struct CallToolResult {
    content: Vec<TextContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

impl CallToolResult {
    fn text(text: String, is_error: bool) -> Result<Value> {
        Ok(serde_json::to_value(Self {
            content: vec![TextContent::new(text)],
            is_error,
        })?)
    }
}

// ============================================================================
// MCP Server
// ============================================================================

/// Run the server loop until `reader` reaches end of input.
///
/// Each non-empty line is one request; each request with an `id` gets exactly one
/// response line. Notifications (no `id`) are handled silently.
///
/// # Errors
///
/// Returns an error only when the transport itself fails.
pub async fn serve<E, R, W>(toolbox: &Toolbox<E>, reader: R, mut writer: W) -> Result<()>
where
    E: DatabaseEngine,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(request) => {
                let is_notification = request.id.is_none();
                let response = handle_request(toolbox, request).await;
                if is_notification {
                    continue;
                }
                response
            }
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request");
                JsonRpcResponse::error(None, -32700, format!("Parse error: {e}"))
            }
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
        writer.flush().await?;
    }

    tracing::info!("input closed, shutting down");
    Ok(())
}

async fn handle_request<E: DatabaseEngine>(
    toolbox: &Toolbox<E>,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    tracing::debug!(method = %request.method, "request");

    let result = match request.method.as_str() {
        "initialize" => Ok(handle_initialize()),
        "notifications/initialized" | "ping" => Ok(serde_json::json!({})),
        "tools/list" => handle_list_tools(),
        "tools/call" => handle_call_tool(toolbox, request.params).await,
        _ => Err(anyhow!("Unknown method: {}", request.method)),
    };

    match result {
        Ok(value) => JsonRpcResponse::result(request.id, value),
        Err(e) => JsonRpcResponse::error(request.id, -32603, e.to_string()),
    }
}

// ============================================================================
// MCP Protocol Handlers
// ============================================================================

fn handle_initialize() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": "text2sql",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn handle_list_tools() -> Result<Value> {
    Ok(serde_json::json!({ "tools": tools::definitions() }))
}

async fn handle_call_tool<E: DatabaseEngine>(
    toolbox: &Toolbox<E>,
    params: Option<Value>,
) -> Result<Value> {
    let params = params.ok_or_else(|| anyhow!("Missing params"))?;
    let name = params["name"].as_str().ok_or_else(|| anyhow!("Missing tool name"))?;

    match toolbox.call(name, &params["arguments"]).await {
        Ok(text) => CallToolResult::text(text, false),
        Err(e) => CallToolResult::text(e.to_string(), true),
    }
}
