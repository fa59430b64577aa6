//! MCP (Model Context Protocol) client over streamable HTTP
//!
//! Only the slice the gateway needs: initialize, list tools, call a tool.
//! Servers are addressed by the `server_label` clients put on their `mcp`
//! tool declarations and resolved through a configured label -> URL table.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "Mcp-Session-Id";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("unknown MCP server: {0}")]
    UnknownServer(String),
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("MCP server returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid MCP response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolResult {
    #[serde(default)]
    pub content: Vec<McpContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

/// Lists and invokes tools on MCP servers addressed by label
#[async_trait]
pub trait McpToolProvider: Send + Sync {
    async fn list_tools(&self, server_label: &str) -> Result<Vec<McpToolInfo>, McpError>;

    async fn call_tool(
        &self,
        server_label: &str,
        name: &str,
        arguments: Value,
    ) -> Result<McpToolResult, McpError>;
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Extract the JSON-RPC payload from a plain JSON or SSE-framed body
fn decode_rpc_body(body: &str) -> Result<RpcResponse, McpError> {
    let trimmed = body.trim_start();
    let payload = if trimmed.starts_with('{') {
        trimmed
    } else {
        trimmed
            .lines()
            .find_map(|line| line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")))
            .map(str::trim)
            .ok_or_else(|| McpError::InvalidResponse("no data frame in SSE body".to_string()))?
    };
    serde_json::from_str(payload).map_err(|e| McpError::InvalidResponse(e.to_string()))
}

/// A short-lived session with one MCP server
struct McpSession<'a> {
    client: &'a reqwest::Client,
    url: &'a str,
    session_id: Option<String>,
    next_id: &'a AtomicU64,
}

impl<'a> McpSession<'a> {
    async fn post(&mut self, request: &RpcRequest<'_>) -> Result<Option<RpcResponse>, McpError> {
        let mut builder = self
            .client
            .post(self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(request);
        if let Some(session) = &self.session_id {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder.send().await?;
        let status = response.status();
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session.to_string());
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(McpError::Status {
                status: status.as_u16(),
                message,
            });
        }

        // Notifications carry no id and get no body back
        if request.id.is_none() {
            return Ok(None);
        }
        let body = response.text().await?;
        trace!("MCP {} response: {}", request.method, body);
        decode_rpc_body(&body).map(Some)
    }

    async fn call(&mut self, method: &str, params: Value) -> Result<Value, McpError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            id: Some(self.next_id.fetch_add(1, Ordering::Relaxed)),
            params: Some(params),
        };
        let response = self
            .post(&request)
            .await?
            .ok_or_else(|| McpError::InvalidResponse("empty response".to_string()))?;
        if let Some(err) = response.error {
            return Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        response
            .result
            .ok_or_else(|| McpError::InvalidResponse("missing result".to_string()))
    }

    async fn initialize(&mut self) -> Result<(), McpError> {
        self.call(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "openresponses-gateway", "version": env!("CARGO_PKG_VERSION")}
            }),
        )
        .await?;

        let notification = RpcRequest {
            jsonrpc: "2.0",
            method: "notifications/initialized",
            id: None,
            params: None,
        };
        if let Err(e) = self.post(&notification).await {
            // Some servers reject the notification; the session still works
            warn!("MCP initialized notification failed: {}", e);
        }
        Ok(())
    }
}

/// Label -> URL table of MCP servers the gateway may reach
pub struct McpRegistry {
    client: reqwest::Client,
    servers: HashMap<String, String>,
    next_id: AtomicU64,
}

impl McpRegistry {
    pub fn new(servers: HashMap<String, String>) -> Result<Self, McpError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            servers,
            next_id: AtomicU64::new(1),
        })
    }

    async fn session(&self, server_label: &str) -> Result<McpSession<'_>, McpError> {
        let url = self
            .servers
            .get(server_label)
            .ok_or_else(|| McpError::UnknownServer(server_label.to_string()))?;
        let mut session = McpSession {
            client: &self.client,
            url,
            session_id: None,
            next_id: &self.next_id,
        };
        session.initialize().await?;
        Ok(session)
    }
}

#[async_trait]
impl McpToolProvider for McpRegistry {
    async fn list_tools(&self, server_label: &str) -> Result<Vec<McpToolInfo>, McpError> {
        let mut session = self.session(server_label).await?;
        let result = session.call("tools/list", json!({})).await?;
        let tools: Vec<McpToolInfo> = serde_json::from_value(
            result.get("tools").cloned().unwrap_or_else(|| json!([])),
        )
        .map_err(|e| McpError::InvalidResponse(e.to_string()))?;
        debug!("MCP server {} lists {} tools", server_label, tools.len());
        Ok(tools)
    }

    async fn call_tool(
        &self,
        server_label: &str,
        name: &str,
        arguments: Value,
    ) -> Result<McpToolResult, McpError> {
        let mut session = self.session(server_label).await?;
        debug!("Calling MCP tool {} on {}", name, server_label);
        let result = session
            .call("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;
        serde_json::from_value(result).map_err(|e| McpError::InvalidResponse(e.to_string()))
    }
}
