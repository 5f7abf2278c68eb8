//! Remote tool-server executor.
//!
//! Speaks JSON-RPC 2.0 over HTTP to configured tool servers. The catalog
//! of tool-name → server mappings is discovered once at startup by listing
//! each server's operations and is read-only afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chat_core::{ToolCall, ToolDefinition, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ToolExecutor;

/// A configured tool server.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteServerConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
struct RpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl RpcRequest {
    fn list_tools(id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: "tools/list",
            params: None,
        }
    }

    fn call_tool(id: u64, name: &str, arguments: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: "tools/call",
            params: Some(serde_json::json!({
                "name": name,
                "arguments": arguments,
            })),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

impl RpcResponse {
    fn into_result(self) -> Result<Value, String> {
        if let Some(error) = self.error {
            Err(format!("server error {}: {}", error.code, error.message))
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ToolsListResult {
    tools: Vec<RemoteToolDef>,
}

#[derive(Debug, Deserialize)]
struct RemoteToolDef {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "inputSchema")]
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Vec<ContentItem>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

struct RemoteTool {
    server: String,
    endpoint: String,
    definition: ToolDefinition,
}

/// Executor routing calls to remote tool servers.
pub struct RemoteExecutor {
    http: reqwest::Client,
    catalog: HashMap<String, RemoteTool>,
    order: Vec<String>,
    request_id: AtomicU64,
    timeout: Duration,
}

impl RemoteExecutor {
    /// Enumerate operations on every configured server and build the
    /// catalog. Servers that fail discovery are skipped with a warning;
    /// on a tool-name collision the first server wins.
    pub async fn discover(servers: &[RemoteServerConfig], timeout: Duration) -> Self {
        let http = reqwest::Client::new();
        let request_id = AtomicU64::new(1);
        let mut catalog = HashMap::new();
        let mut order = Vec::new();

        for server in servers {
            let request = RpcRequest::list_tools(request_id.fetch_add(1, Ordering::Relaxed));
            let tools = match Self::post(&http, &server.url, &request, timeout).await {
                Ok(result) => match serde_json::from_value::<ToolsListResult>(result) {
                    Ok(listing) => listing.tools,
                    Err(e) => {
                        tracing::warn!(server = %server.name, error = %e, "bad tools/list response");
                        continue;
                    }
                },
                Err(e) => {
                    tracing::warn!(server = %server.name, error = %e, "tool server discovery failed");
                    continue;
                }
            };

            tracing::info!(server = %server.name, tools = tools.len(), "tool server discovered");
            for tool in tools {
                if catalog.contains_key(&tool.name) {
                    tracing::warn!(
                        server = %server.name,
                        tool = %tool.name,
                        "duplicate remote tool, keeping first"
                    );
                    continue;
                }
                order.push(tool.name.clone());
                catalog.insert(
                    tool.name.clone(),
                    RemoteTool {
                        server: server.name.clone(),
                        endpoint: server.url.clone(),
                        definition: ToolDefinition {
                            name: tool.name,
                            description: tool.description,
                            input_schema: tool.input_schema,
                            pause_after: false,
                        },
                    },
                );
            }
        }

        Self {
            http,
            catalog,
            order,
            request_id,
            timeout,
        }
    }

    async fn post(
        http: &reqwest::Client,
        url: &str,
        request: &RpcRequest,
        timeout: Duration,
    ) -> Result<Value, String> {
        let response = http
            .post(url)
            .json(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("server returned HTTP {status}"));
        }

        let rpc: RpcResponse = response.json().await.map_err(|e| e.to_string())?;
        rpc.into_result()
    }

    async fn call(&self, tool: &RemoteTool, call: &ToolCall) -> Result<String, String> {
        let request = RpcRequest::call_tool(
            self.request_id.fetch_add(1, Ordering::Relaxed),
            &call.name,
            call.arguments.clone(),
        );
        let result = Self::post(&self.http, &tool.endpoint, &request, self.timeout).await?;

        let parsed: CallToolResult =
            serde_json::from_value(result).map_err(|e| format!("bad tool result: {e}"))?;
        let text: Vec<&str> = parsed
            .content
            .iter()
            .filter(|item| item.kind == "text")
            .map(|item| item.text.as_str())
            .collect();
        let text = text.join("\n");

        if parsed.is_error {
            Err(if text.is_empty() {
                format!("tool {} reported an error", call.name)
            } else {
                text
            })
        } else {
            Ok(text)
        }
    }
}

#[async_trait]
impl ToolExecutor for RemoteExecutor {
    fn list_tools(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.catalog.get(name))
            .map(|tool| tool.definition.clone())
            .collect()
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.catalog.get(&call.name) else {
            return ToolResult::err(&call.id, format!("unknown remote tool: {}", call.name));
        };

        tracing::debug!(tool = %call.name, server = %tool.server, "dispatching remote tool");
        match self.call(tool, call).await {
            Ok(content) => ToolResult::ok(&call.id, content),
            Err(message) => {
                tracing::warn!(tool = %call.name, server = %tool.server, %message, "remote tool failed");
                ToolResult::err(&call.id, message)
            }
        }
    }
}
