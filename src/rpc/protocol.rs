//! JSON-RPC 2.0 message shapes used on the `/mcp` endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::constants::{PROTOCOL_VERSION, SERVER_NAME, TOOL_NAME};
use crate::types::CommandResult;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const SESSION_NOT_INITIALIZED: i64 = -32002;

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_PING: &str = "ping";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// A request (with `id`) or a notification (without).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        RpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::from(id)),
            method: method.to_string(),
            params: Some(params),
        }
    }

    pub fn notification(method: &str) -> Self {
        RpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.to_string(),
            params: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        RpcError {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        RpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        RpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServoArguments {
    pub commands: Vec<Value>,
}

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": { "name": "servo_client", "version": env!("CARGO_PKG_VERSION") },
    })
}

pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
    })
}

pub fn tool_descriptor() -> Value {
    json!({
        "name": TOOL_NAME,
        "description": "Execute a batch of servo moves in order. Each command holds its \
            position for duration_ms (default 500) before the pulses stop. Returns one \
            status record per command.",
        "inputSchema": {
            "type": "object",
            "properties": {
                "commands": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "pin": { "type": "integer", "description": "BCM GPIO pin" },
                            "angle": {
                                "type": "number",
                                "description": "Target angle in degrees"
                            },
                            "duration_ms": {
                                "type": "integer",
                                "minimum": 0,
                                "description": "Hold time in milliseconds"
                            }
                        },
                        "required": ["pin", "angle"]
                    }
                }
            },
            "required": ["commands"]
        }
    })
}

pub fn tool_result(results: &[CommandResult]) -> Value {
    let structured = serde_json::to_value(results).unwrap_or(Value::Array(Vec::new()));
    json!({
        "content": [{ "type": "text", "text": structured.to_string() }],
        "structuredContent": { "result": structured },
        "isError": false,
    })
}

/// Pulls the result list out of a `tools/call` result.
pub fn parse_tool_result(result: &Value) -> Result<Vec<CommandResult>, String> {
    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        let text = first_text(result).unwrap_or("tool reported an error");
        return Err(text.to_string());
    }

    if let Some(list) = result.pointer("/structuredContent/result") {
        return serde_json::from_value(list.clone()).map_err(|e| e.to_string());
    }

    let text = first_text(result).ok_or("tool result carries no text content")?;
    serde_json::from_str(text).map_err(|e| e.to_string())
}

fn first_text(result: &Value) -> Option<&str> {
    result
        .get("content")?
        .as_array()?
        .iter()
        .find(|item| item.get("type").and_then(Value::as_str) == Some("text"))?
        .get("text")?
        .as_str()
}
