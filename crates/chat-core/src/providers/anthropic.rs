//! Anthropic (Claude) provider adapter.
//!
//! Translates the Messages API SSE protocol into the normalized
//! [`ProviderEvent`] sequence. Anthropic streams typed content blocks;
//! text blocks become `ContentDelta`s and tool-use blocks become
//! `ToolCallStart` / `ToolCallArgDelta` / `ToolCallEnd` at the block index.

use std::collections::HashSet;

use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, Result};
use crate::provider::{CompletionRequest, EventStream, LlmProvider, ProviderEvent};
use crate::types::{FinishReason, Message, Role, ToolDefinition};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Anthropic (Claude) LLM provider.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
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
            api_key,
            base_url: API_URL.to_string(),
        })
    }

    /// Override the API endpoint (proxies, test servers).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

// Request wire types

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<WireBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

/// Convert the neutral transcript to Anthropic's shape.
///
/// Tool-role messages become tool-result blocks on user messages;
/// consecutive tool messages collapse into a single user message so each
/// assistant tool turn is answered exactly once.
fn convert_messages(messages: &[Message]) -> Vec<WireMessage> {
    let mut converted: Vec<WireMessage> = Vec::new();

    for msg in messages {
        match msg.role {
            // System prompts travel in the top-level `system` field.
            Role::System => {}
            Role::User => converted.push(WireMessage {
                role: "user",
                content: vec![WireBlock::Text {
                    text: msg.content.clone(),
                }],
            }),
            Role::Assistant => {
                let mut content = Vec::new();
                if !msg.content.is_empty() {
                    content.push(WireBlock::Text {
                        text: msg.content.clone(),
                    });
                }
                for call in &msg.tool_calls {
                    content.push(WireBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    });
                }
                converted.push(WireMessage {
                    role: "assistant",
                    content,
                });
            }
            Role::Tool => {
                let block = WireBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: msg.content.clone(),
                };
                match converted.last_mut() {
                    Some(last)
                        if last.role == "user"
                            && matches!(last.content.last(), Some(WireBlock::ToolResult { .. })) =>
                    {
                        last.content.push(block);
                    }
                    _ => converted.push(WireMessage {
                        role: "user",
                        content: vec![block],
                    }),
                }
            }
        }
    }

    converted
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|t| WireTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.input_schema.clone(),
        })
        .collect()
}

// Response wire types (SSE)

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {},
    ContentBlockStart {
        index: usize,
        content_block: StartBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDelta,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiError,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StartBlock {
    Text {},
    ToolUse { id: String, name: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

fn convert_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("tool_use") => FinishReason::ToolUse,
        Some("max_tokens") => FinishReason::Length,
        Some("stop_sequence") => FinishReason::StopSequence,
        _ => FinishReason::EndTurn,
    }
}

/// Parse a single SSE event from the buffer.
///
/// Returns the parsed event (if any) and the remaining buffer content.
fn parse_sse_event(buffer: &str) -> Option<(Option<StreamEvent>, String)> {
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

    match serde_json::from_str::<StreamEvent>(&data) {
        Ok(event) => Some((Some(event), remainder)),
        Err(e) => {
            tracing::debug!(data = %data, error = %e, "failed to parse event");
            Some((None, remainder))
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<EventStream> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).map_err(|_| ProviderError::ApiKeyMissing)?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));

        let body = MessagesRequest {
            model: request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: convert_messages(&request.messages),
            system: request.system,
            tools: convert_tools(&request.tools),
            stream: true,
        };

        let response = self
            .http
            .post(&self.base_url)
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
            let mut tool_slots: HashSet<usize> = HashSet::new();

            futures::pin_mut!(byte_stream);

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(error = %e, "anthropic stream transport failure");
                        yield Ok(ProviderEvent::MessageEnd { finish_reason: FinishReason::Error });
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some((event_opt, remainder)) = parse_sse_event(&buffer) {
                    buffer = remainder;

                    let Some(event) = event_opt else {
                        continue;
                    };

                    match event {
                        StreamEvent::ContentBlockStart { index, content_block } => {
                            if let StartBlock::ToolUse { id, name } = content_block {
                                tool_slots.insert(index);
                                yield Ok(ProviderEvent::ToolCallStart { index, id, name });
                            }
                        }

                        StreamEvent::ContentBlockDelta { index, delta } => match delta {
                            Delta::TextDelta { text } => {
                                yield Ok(ProviderEvent::ContentDelta { text });
                            }
                            Delta::InputJsonDelta { partial_json } => {
                                yield Ok(ProviderEvent::ToolCallArgDelta {
                                    index,
                                    json_fragment: partial_json,
                                });
                            }
                        },

                        StreamEvent::ContentBlockStop { index } => {
                            if tool_slots.contains(&index) {
                                yield Ok(ProviderEvent::ToolCallEnd { index });
                            }
                        }

                        StreamEvent::MessageDelta { delta } => {
                            yield Ok(ProviderEvent::MessageEnd {
                                finish_reason: convert_stop_reason(delta.stop_reason.as_deref()),
                            });
                            return;
                        }

                        StreamEvent::Error { error } => {
                            tracing::warn!(message = %error.message, "anthropic stream error event");
                            yield Ok(ProviderEvent::MessageEnd { finish_reason: FinishReason::Error });
                            return;
                        }

                        StreamEvent::MessageStart {}
                        | StreamEvent::MessageStop
                        | StreamEvent::Ping => {}
                    }
                }
            }

            // The server closed the stream without a terminal message_delta.
            yield Ok(ProviderEvent::MessageEnd { finish_reason: FinishReason::Error });
        };

        Ok(Box::pin(stream))
    }
}
