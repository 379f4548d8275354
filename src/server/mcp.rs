//! MCP protocol implementation for JSON-RPC 2.0 communication.
//!
//! This module provides the core MCP server implementation including:
//! - JSON-RPC 2.0 request/response handling
//! - Tool definitions and schemas
//! - Line-delimited stdio communication
//! - Concurrent tool calls with `notifications/cancelled` support

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info};

use super::{handle_tool_call, SharedState};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier (null if notification, must always be present per spec).
    pub id: Value,
    /// The result on success (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code (negative for predefined errors).
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// MCP server information returned during initialization.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    /// The server name identifier.
    pub name: String,
    /// The server version string.
    pub version: String,
}

/// MCP server capabilities advertised to clients.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// Tool-related capabilities.
    pub tools: ToolCapabilities,
}

/// Tool-specific capabilities.
#[derive(Debug, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change dynamically.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Result of the MCP initialize handshake.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    /// The MCP protocol version supported.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities.
    pub capabilities: Capabilities,
    /// Server identification information.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// MCP tool definition with JSON Schema.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    /// Unique tool name (used in tool calls).
    pub name: String,
    /// Human-readable description of the tool.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Parameters for a tools/call request.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    /// The name of the tool to invoke.
    pub name: String,
    /// Optional arguments for the tool.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Content item within a tool result.
#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    /// The content type (e.g., "text").
    #[serde(rename = "type")]
    pub content_type: String,
    /// The text content of the result.
    pub text: String,
}

/// Result of a tool invocation.
#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    /// The result content items.
    pub content: Vec<ToolResultContent>,
    /// Whether the result represents an error.
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// MCP Server running over stdio.
///
/// Handles line-delimited JSON-RPC 2.0 messages. Stdout carries only
/// protocol frames; logs go to stderr.
pub struct McpServer {
    /// Shared application state.
    state: SharedState,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Run the server using async stdio
    pub async fn run(&self) -> std::io::Result<()> {
        info!("Source router MCP server starting...");
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.serve(stdin, stdout).await
    }

    /// Serve requests from `reader` until EOF, writing responses to `writer`.
    ///
    /// Each `tools/call` runs as its own task, so responses may come back in
    /// a different order than the requests. A `notifications/cancelled` for an
    /// in-flight call aborts its task and no response is sent for it. At EOF
    /// the remaining calls are allowed to finish.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let in_flight = InFlight::default();

        let read_loop = async move {
            let mut line = String::new();
            loop {
                line.clear();
                let bytes_read = reader.read_line(&mut line).await?;

                // EOF reached
                if bytes_read == 0 {
                    info!("EOF received, shutting down");
                    break;
                }

                self.accept(&line, &tx, &in_flight).await;
            }
            // Dropping `tx` here lets the writer finish once every task is done.
            Ok::<_, std::io::Error>(())
        };

        let write_loop = async {
            while let Some(response) = rx.recv().await {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "Sending response");

                writer.write_all(response_json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<_, std::io::Error>(())
        };

        tokio::try_join!(read_loop, write_loop)?;
        Ok(())
    }

    /// Route one input line: tool calls are spawned, cancellations abort,
    /// everything else is answered inline.
    async fn accept(&self, line: &str, tx: &Responder, in_flight: &InFlight) {
        let request = match parse_line(line) {
            None => return,
            Some(Ok(request)) => request,
            Some(Err(response)) => {
                let _ = tx.send(response);
                return;
            }
        };

        match request.method.as_str() {
            "tools/call" => self.spawn_tool_call(request, tx.clone(), in_flight),
            "notifications/cancelled" => cancel_request(request.params.as_ref(), in_flight),
            _ => {
                if let Some(response) = self.handle_request(request).await {
                    let _ = tx.send(response);
                }
            }
        }
    }

    fn spawn_tool_call(&self, request: JsonRpcRequest, tx: Responder, in_flight: &InFlight) {
        let state = Arc::clone(&self.state);
        let key = request.id.as_ref().map(request_key);
        let registry = Arc::clone(&in_flight.0);
        let task_key = key.clone();

        // Held across the spawn so the task cannot deregister before it is registered.
        let mut pending = in_flight.lock();
        let task = tokio::spawn(async move {
            let response = call_tool(&state, request.id, request.params).await;
            if let Some(key) = &task_key {
                lock_pending(&registry).remove(key);
            }
            let _ = tx.send(response);
        });
        if let Some(key) = key {
            pending.insert(key, task.abort_handle());
        }
    }

    /// Handle one raw input line. Returns None for blank lines and notifications.
    ///
    /// Requests handled here run to completion before returning; cancellation
    /// only applies to calls accepted by [`McpServer::serve`].
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        match parse_line(line)? {
            Ok(request) => self.handle_request(request).await,
            Err(response) => Some(response),
        }
    }

    /// Handle a single JSON-RPC request
    /// Returns None for notifications (requests without id) per JSON-RPC 2.0 spec
    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" | "notifications/initialized" => {
                debug!("Received initialized notification");
                None
            }
            "notifications/cancelled" => {
                debug!("Received cancelled notification");
                None
            }
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "tools/call" => Some(call_tool(&self.state, request.id, request.params).await),
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method => {
                // For unknown methods, only respond if it's a request (has id)
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        -32601,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        }
    }

    /// Handle initialize request
    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "source-router".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }

    /// Handle tools/list request
    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling tools/list request");

        JsonRpcResponse::success(
            id,
            serde_json::json!({
                "tools": all_tools()
            }),
        )
    }
}

/// Handle tools/call request
async fn call_tool(
    state: &SharedState,
    id: Option<Value>,
    params: Option<Value>,
) -> JsonRpcResponse {
    let params: ToolCallParams = match params {
        Some(p) => match serde_json::from_value(p) {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
            }
        },
        None => {
            return JsonRpcResponse::error(id, -32602, "Missing params");
        }
    };

    info!(tool = %params.name, "Handling tool call");

    let (content, is_error) = match handle_tool_call(state, &params.name, params.arguments).await {
        Ok(result) => {
            let text = serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
                error!(error = %e, "Failed to serialize tool result");
                format!("{{\"error\": \"Serialization failed: {}\"}}", e)
            });
            (
                ToolResultContent {
                    content_type: "text".to_string(),
                    text,
                },
                None,
            )
        }
        Err(e) => (
            ToolResultContent {
                content_type: "text".to_string(),
                text: format!("Error: {}", e),
            },
            Some(true),
        ),
    };

    let tool_result = ToolCallResult {
        content: vec![content],
        is_error,
    };

    match serde_json::to_value(tool_result) {
        Ok(val) => JsonRpcResponse::success(id, val),
        Err(e) => {
            error!(error = %e, "Failed to serialize tool call result");
            JsonRpcResponse::error(id.clone(), -32603, format!("Internal error: {}", e))
        }
    }
}

/// Sender half feeding the single writer of [`McpServer::serve`].
type Responder = mpsc::UnboundedSender<JsonRpcResponse>;

/// Abort handles of in-flight tool calls, keyed by JSON-RPC id.
#[derive(Default)]
struct InFlight(Arc<Mutex<HashMap<String, AbortHandle>>>);

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, AbortHandle>> {
        lock_pending(&self.0)
    }
}

fn lock_pending(
    pending: &Mutex<HashMap<String, AbortHandle>>,
) -> MutexGuard<'_, HashMap<String, AbortHandle>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ids compare by their JSON text, so `7` and `"7"` stay distinct.
fn request_key(id: &Value) -> String {
    id.to_string()
}

fn cancel_request(params: Option<&Value>, in_flight: &InFlight) {
    let Some(request_id) = params.and_then(|p| p.get("requestId")) else {
        debug!("Cancellation without requestId, ignoring");
        return;
    };

    match in_flight.lock().remove(&request_key(request_id)) {
        Some(handle) => {
            handle.abort();
            info!(request_id = %request_id, "Cancelled in-flight request");
        }
        None => debug!(request_id = %request_id, "Nothing in flight to cancel"),
    }
}

/// Parse one input line. None for blank lines; a ready error response when
/// the line is not a JSON-RPC request.
fn parse_line(line: &str) -> Option<Result<JsonRpcRequest, JsonRpcResponse>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    debug!(request = %trimmed, "Received request");

    Some(
        serde_json::from_str::<JsonRpcRequest>(trimmed).map_err(|e| {
            error!(error = %e, "Failed to parse request");
            JsonRpcResponse::error(None, -32700, format!("Parse error: {}", e))
        }),
    )
}

/// Every tool advertised by `tools/list`.
pub fn all_tools() -> Vec<Tool> {
    vec![
        get_search_tool(),
        get_session_create_tool(),
        get_session_append_tool(),
        get_session_history_tool(),
        get_session_end_tool(),
        get_routing_hints_tool(),
    ]
}

/// Get the search tool definition
fn get_search_tool() -> Tool {
    Tool {
        name: "search".to_string(),
        description: "Query external information sources. Sources are chosen by the routing strategy (auto, manual or multi) unless listed explicitly. Multi-source results are returned per source, with failed sources reported separately.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "minLength": 1,
                    "description": "The query text"
                },
                "sources": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Explicit source names; overrides the routing strategy"
                },
                "strategy": {
                    "type": "string",
                    "enum": ["auto", "manual", "multi"],
                    "description": "Routing strategy for this request (defaults to the configured strategy)"
                },
                "session_id": {
                    "type": "string",
                    "description": "Optional session; the query and result are appended to its history"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        }),
    }
}

/// Get the session_create tool definition
fn get_session_create_tool() -> Tool {
    Tool {
        name: "session_create".to_string(),
        description: "Create an isolated conversation session. A UUID is generated when no id is given.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session identifier; must not already exist"
                },
                "user_id": {
                    "type": "string",
                    "description": "Optional owning user"
                },
                "metadata": {
                    "type": "object",
                    "description": "Arbitrary caller metadata stored with the session"
                }
            },
            "additionalProperties": false
        }),
    }
}

/// Get the session_append tool definition
fn get_session_append_tool() -> Tool {
    Tool {
        name: "session_append".to_string(),
        description: "Append a message to a session. The oldest messages are evicted beyond the configured maximum.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Target session"
                },
                "role": {
                    "type": "string",
                    "description": "Message role, e.g. user or assistant"
                },
                "content": {
                    "type": "string",
                    "description": "Message text"
                }
            },
            "required": ["session_id", "role", "content"],
            "additionalProperties": false
        }),
    }
}

/// Get the session_history tool definition
fn get_session_history_tool() -> Tool {
    Tool {
        name: "session_history".to_string(),
        description: "Get the ordered message history of a session.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Target session"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Return only the most recent N messages"
                }
            },
            "required": ["session_id"],
            "additionalProperties": false
        }),
    }
}

/// Get the session_end tool definition
fn get_session_end_tool() -> Tool {
    Tool {
        name: "session_end".to_string(),
        description: "End a session immediately. Ending an unknown session is not an error.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session to end"
                }
            },
            "required": ["session_id"],
            "additionalProperties": false
        }),
    }
}

/// Get the routing_hints tool definition
fn get_routing_hints_tool() -> Tool {
    Tool {
        name: "routing_hints".to_string(),
        description: "List available sources, topic rules, strategies and fallbacks for manual source selection.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }),
    }
}
