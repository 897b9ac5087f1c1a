//! JSON-RPC method dispatch for the side channel. Requests are parsed at the
//! HTTP boundary, served against the registry on their own task, and the
//! response frame is routed onto the bound stream.

use crate::mcp::protocol::{
    InitializeResult, JsonRpcRequest, JsonRpcResponse, ServerInfo, ToolCallParams,
    ToolsListResult, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, PROTOCOL_VERSION,
};
use crate::server::channel::SessionChannel;
use crate::server::registry::{RegistryError, ToolRegistry};
use serde::Serialize;
use serde_json::{json, Value};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
pub enum DispatchError {
    MalformedRequest(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::MalformedRequest(detail) => {
                write!(f, "malformed request frame: {detail}")
            }
        }
    }
}

impl StdError for DispatchError {}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    identity: ServerInfo,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, identity: ServerInfo) -> Self {
        Self { registry, identity }
    }

    /// Parses one side-channel frame, distinct from schema-level validation
    /// of tool arguments.
    pub fn parse(raw: &[u8]) -> Result<JsonRpcRequest, DispatchError> {
        serde_json::from_slice(raw)
            .map_err(|err| DispatchError::MalformedRequest(err.to_string()))
    }

    /// Serves a parsed request and routes its response onto the bound
    /// stream. Notifications are acknowledged without a response. A response
    /// that cannot be routed (stream closed between submit and completion)
    /// is logged and dropped; the caller's own deadline surfaces the loss.
    pub async fn dispatch(&self, session: &SessionChannel, request: JsonRpcRequest) {
        if request.is_notification() {
            debug!(method = %request.method, "Notification acknowledged");
            return;
        }
        let frame = self.serve(request).await;
        if let Err(err) = session.route(frame) {
            warn!(error = %err, "Dropping response frame");
        }
    }

    async fn serve(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        debug!(method = %request.method, token = ?request.id, "Serving request");
        match request.method.as_str() {
            "initialize" => result_frame(
                id,
                &InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: json!({ "tools": {} }),
                    server_info: self.identity.clone(),
                },
            ),
            "ping" => JsonRpcResponse::result(id, json!({})),
            "tools/list" => result_frame(
                id,
                &ToolsListResult {
                    tools: self.registry.definitions(),
                },
            ),
            "tools/call" => self.call_tool(id, request.params).await,
            other => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("method '{other}' not found"),
            ),
        }
    }

    async fn call_tool(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(params)) => params,
            Ok(None) => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, "missing tool call params")
            }
            Err(err) => {
                return JsonRpcResponse::error(
                    id,
                    INVALID_PARAMS,
                    format!("invalid tool call params: {err}"),
                )
            }
        };
        match self.registry.invoke(&params.name, params.arguments).await {
            Ok(result) => result_frame(id, &result),
            Err(err) => {
                let code = match &err {
                    RegistryError::UnknownTool(_) | RegistryError::Validation { .. } => {
                        INVALID_PARAMS
                    }
                    RegistryError::Tool(tool_err) => tool_err.code,
                    _ => INTERNAL_ERROR,
                };
                JsonRpcResponse::error(id, code, err.to_string())
            }
        }
    }
}

fn result_frame(id: Option<Value>, payload: &impl Serialize) -> JsonRpcResponse {
    match serde_json::to_value(payload) {
        Ok(value) => JsonRpcResponse::result(id, value),
        Err(err) => {
            JsonRpcResponse::error(id, INTERNAL_ERROR, format!("unencodable result: {err}"))
        }
    }
}
