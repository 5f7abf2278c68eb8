//! `OpenAI` provider adapter.
//!
//! Translates the Chat Completions SSE protocol into the normalized
//! [`ProviderEvent`] sequence. `OpenAI` streams tool-call deltas keyed by a
//! tool index; `ToolCallStart` is synthesized when the id and name first
//! appear and `ToolCallEnd` events are synthesized at the finish chunk.

use std::collections::BTreeMap;

use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, Result};
use crate::provider::{CompletionRequest, EventStream, LlmProvider, ProviderEvent};
use crate::types::{FinishReason, Message, Role, ToolDefinition};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// LLM provider for the `OpenAI` API and compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiProvider {
    /// Create a new provider instance.
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ProviderError::ApiKeyMissing);
        }

        Ok(Self {
            http: reqwest::Client::new(),
            api_key: Some(api_key),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Create a provider with optional API key and base URL, for
    /// OpenAI-compatible endpoints that may not require a key.
    #[must_use]
    pub fn with_config(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

// Request wire types

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCallRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCallRequest {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionCall {
    name: String,
    /// Arguments are replayed as a JSON string, per the wire format.
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response wire types (SSE)

#[derive(Debug, Deserialize)]
struct OpenAiChunk {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Convert the neutral transcript to the chat completions shape.
fn convert_messages(messages: &[Message], system: Option<&str>) -> Vec<OpenAiMessage> {
    let mut result = Vec::new();

    if let Some(sys) = system {
        result.push(OpenAiMessage {
            role: "system",
            content: Some(sys.to_string()),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for msg in messages {
        match msg.role {
            Role::System => result.push(OpenAiMessage {
                role: "system",
                content: Some(msg.content.clone()),
                tool_calls: None,
                tool_call_id: None,
            }),
            Role::User => result.push(OpenAiMessage {
                role: "user",
                content: Some(msg.content.clone()),
                tool_calls: None,
                tool_call_id: None,
            }),
            Role::Assistant => {
                let tool_calls = if msg.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        msg.tool_calls
                            .iter()
                            .map(|call| OpenAiToolCallRequest {
                                id: call.id.clone(),
                                call_type: "function",
                                function: OpenAiFunctionCall {
                                    name: call.name.clone(),
                                    arguments: serde_json::to_string(&call.arguments)
                                        .unwrap_or_default(),
                                },
                            })
                            .collect(),
                    )
                };
                result.push(OpenAiMessage {
                    role: "assistant",
                    content: if msg.content.is_empty() {
                        None
                    } else {
                        Some(msg.content.clone())
                    },
                    tool_calls,
                    tool_call_id: None,
                });
            }
            Role::Tool => result.push(OpenAiMessage {
                role: "tool",
                content: Some(msg.content.clone()),
                tool_calls: None,
                tool_call_id: msg.tool_call_id.clone(),
            }),
        }
    }

    result
}

/// Convert our tools to the function calling format.
fn convert_tools(tools: &[ToolDefinition]) -> Vec<OpenAiTool> {
    tools
        .iter()
        .map(|t| OpenAiTool {
            tool_type: "function",
            function: OpenAiFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

/// Parse a single SSE event from the buffer.
///
/// Returns the parsed chunk (if any) and the remaining buffer content.
fn parse_sse_event(buffer: &str) -> Option<(Option<OpenAiChunk>, String)> {
    let end = buffer.find("\n\n")?;
    let event_str = &buffer[..end];
    let remainder = buffer[end + 2..].to_string();

    let mut data = None;
    for line in event_str.lines() {
        if let Some(rest) = line.strip_prefix("data: ") {
            data = Some(rest.to_string());
        }
    }

    let Some(data) = data else {
        return Some((None, remainder));
    };

    if data.trim() == "[DONE]" {
        return Some((None, remainder));
    }

    match serde_json::from_str::<OpenAiChunk>(&data) {
        Ok(chunk) => Some((Some(chunk), remainder)),
        Err(e) => {
            tracing::debug!(data = %data, error = %e, "failed to parse OpenAI event");
            Some((None, remainder))
        }
    }
}

fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "tool_calls" => FinishReason::ToolUse,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::StopSequence,
        _ => FinishReason::EndTurn,
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<EventStream> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {api_key}"))
                    .map_err(|_| ProviderError::ApiKeyMissing)?,
            );
        }

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(convert_tools(&request.tools))
        };

        let body = OpenAiRequest {
            model: request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: convert_messages(&request.messages, request.system.as_deref()),
            tools,
            stream: true,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let byte_stream = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = String::new();
            // Tool calls being assembled: index -> (id, name).
            let mut pending: BTreeMap<usize, (String, String)> = BTreeMap::new();

            futures::pin_mut!(byte_stream);

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(error = %e, "openai stream transport failure");
                        yield Ok(ProviderEvent::MessageEnd { finish_reason: FinishReason::Error });
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some((chunk_opt, remainder)) = parse_sse_event(&buffer) {
                    buffer = remainder;

                    let Some(chunk) = chunk_opt else {
                        continue;
                    };

                    for choice in chunk.choices {
                        if let Some(text) = choice.delta.content {
                            if !text.is_empty() {
                                yield Ok(ProviderEvent::ContentDelta { text });
                            }
                        }

                        if let Some(tool_calls) = choice.delta.tool_calls {
                            for tc in tool_calls {
                                let entry = pending
                                    .entry(tc.index)
                                    .or_insert_with(|| (String::new(), String::new()));

                                if let Some(id) = tc.id {
                                    entry.0 = id;
                                }

                                if let Some(func) = tc.function {
                                    if let Some(name) = func.name {
                                        entry.1.clone_from(&name);
                                        yield Ok(ProviderEvent::ToolCallStart {
                                            index: tc.index,
                                            id: entry.0.clone(),
                                            name,
                                        });
                                    }
                                    if let Some(args) = func.arguments {
                                        yield Ok(ProviderEvent::ToolCallArgDelta {
                                            index: tc.index,
                                            json_fragment: args,
                                        });
                                    }
                                }
                            }
                        }

                        if let Some(reason) = choice.finish_reason {
                            for index in pending.keys().copied() {
                                yield Ok(ProviderEvent::ToolCallEnd { index });
                            }
                            yield Ok(ProviderEvent::MessageEnd {
                                finish_reason: convert_finish_reason(&reason),
                            });
                            return;
                        }
                    }
                }
            }

            // The server closed the stream without a finish chunk.
            yield Ok(ProviderEvent::MessageEnd { finish_reason: FinishReason::Error });
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;

    #[test]
    fn provider_requires_api_key() {
        assert!(OpenAiProvider::new("").is_err());
    }

    #[test]
    fn with_config_uses_default_base_url() {
        let provider = OpenAiProvider::with_config(Some("key".to_string()), None);
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn with_config_custom_base_url() {
        let provider = OpenAiProvider::with_config(
            Some("key".to_string()),
            Some("http://localhost:8080/v1".to_string()),
        );
        assert_eq!(provider.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn convert_tools_produces_function_type() {
        let tools = vec![ToolDefinition {
            name: "send_key".to_string(),
            description: "Press a remote key".to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
            pause_after: false,
        }];

        let converted = convert_tools(&tools);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].tool_type, "function");
        assert_eq!(converted[0].function.name, "send_key");
    }

    #[test]
    fn convert_messages_adds_system() {
        let messages = vec![Message::user("Hello")];
        let converted = convert_messages(&messages, Some("You control a TV"));
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[1].role, "user");
    }

    #[test]
    fn convert_messages_replays_tool_calls_as_json_strings() {
        let messages = vec![
            Message::assistant(
                "",
                vec![ToolCall {
                    id: "call_1".into(),
                    name: "send_key".into(),
                    arguments: serde_json::json!({"key": "Home"}),
                }],
            ),
            Message::tool("call_1", "{\"success\":true}"),
        ];
        let converted = convert_messages(&messages, None);
        assert_eq!(converted.len(), 2);
        let calls = converted[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, "{\"key\":\"Home\"}");
        assert_eq!(converted[1].role, "tool");
        assert_eq!(converted[1].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn convert_finish_reason_maps_vendor_names() {
        assert_eq!(convert_finish_reason("stop"), FinishReason::EndTurn);
        assert_eq!(convert_finish_reason("tool_calls"), FinishReason::ToolUse);
        assert_eq!(convert_finish_reason("length"), FinishReason::Length);
    }

    #[test]
    fn parse_sse_event_handles_done() {
        let (chunk, remainder) = parse_sse_event("data: [DONE]\n\n").unwrap();
        assert!(chunk.is_none());
        assert!(remainder.is_empty());
    }

    #[test]
    fn parse_sse_event_parses_tool_call_delta() {
        let data = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,",
            "\"id\":\"call_1\",\"function\":{\"name\":\"find_content\",",
            "\"arguments\":\"\"}}]},\"finish_reason\":null}]}\n\n"
        );
        let (chunk, _) = parse_sse_event(data).unwrap();
        let chunk = chunk.unwrap();
        let tc = &chunk.choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.id.as_deref(), Some("call_1"));
        assert_eq!(
            tc.function.as_ref().unwrap().name.as_deref(),
            Some("find_content")
        );
    }
}
