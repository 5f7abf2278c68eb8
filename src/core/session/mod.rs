//! Conversation sessions and the LLM tool-calling driver.
//!
//! The driver owns the generate → dispatch → re-prompt loop: it streams one
//! assistant turn from the provider, assembles tool calls from token-level
//! fragments, executes them through the registry, feeds results back, and
//! re-enters generation until the model stops calling tools, the iteration
//! bound is hit, or a pause-after tool completes.

mod store;

use std::collections::BTreeMap;
use std::sync::Arc;

use chat_core::{
    CompletionRequest, FinishReason, LlmProvider, Message, ProviderEvent, ToolCall, ToolResult,
};
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};

use crate::core::tools::ToolRegistry;

pub use store::{SessionSlot, SessionStore};

/// Per-session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub system_prompt: Option<String>,
    /// Upper bound on assistant turns within one run.
    pub max_iterations: u32,
    /// Tool names offered to the model; empty means the full registry.
    pub tools: Vec<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_iterations: 10,
            tools: Vec::new(),
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// A conversation session: append-only transcript plus config.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub config: SessionConfig,
    messages: Vec<Message>,
    iteration_count: u32,
}

impl Session {
    pub fn new(id: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            id: id.into(),
            config,
            messages: Vec::new(),
            iteration_count: 0,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Assistant turns consumed by the most recent run.
    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    /// Clear history and iteration count, keeping id and config.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.iteration_count = 0;
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    #[cfg(test)]
    pub(crate) fn push_user(&mut self, content: &str) {
        self.push(Message::user(content));
    }
}

/// Events emitted by one driver run; the bridge translates these to wire
/// events. Every run ends with exactly one `Final`.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// Assistant text fragment.
    ContentDelta { text: String },
    /// Tool-call start (`input_fragment` is `None`) or argument fragment.
    ToolCallDelta {
        id: String,
        name: String,
        input_fragment: Option<String>,
    },
    /// An assistant turn finished streaming.
    MessageComplete {
        content: String,
        tool_calls: Vec<String>,
        finish_reason: FinishReason,
    },
    /// A tool execution completed. Emitted as results arrive, which may
    /// not match call order.
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: String,
        error: bool,
    },
    /// Terminal event of the run.
    Final {
        content: String,
        tool_calls: Vec<String>,
        session_id: String,
        iteration_count: u32,
        paused: bool,
    },
}

/// Model parameters used when the session config has no override.
#[derive(Debug, Clone)]
pub struct GenerationDefaults {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A tool call assembled from streamed fragments.
struct PartialCall {
    id: String,
    name: String,
    args: String,
    parsed: Option<Result<serde_json::Value, String>>,
}

fn parse_args(buffer: &str) -> Result<serde_json::Value, String> {
    if buffer.trim().is_empty() {
        // Tools without arguments stream no fragments at all.
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(buffer).map_err(|e| e.to_string())
}

/// Drives sessions through the tool-calling loop against one provider and
/// one tool registry. Shared across all sessions; holds no per-run state.
pub struct SessionDriver {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    defaults: GenerationDefaults,
}

impl SessionDriver {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        defaults: GenerationDefaults,
    ) -> Self {
        Self {
            provider,
            registry,
            defaults,
        }
    }

    fn request_for(&self, session: &Session) -> CompletionRequest {
        CompletionRequest {
            model: session
                .config
                .model
                .clone()
                .unwrap_or_else(|| self.defaults.model.clone()),
            max_tokens: session.config.max_tokens.unwrap_or(self.defaults.max_tokens),
            temperature: session
                .config
                .temperature
                .unwrap_or(self.defaults.temperature),
            system: session.config.system_prompt.clone(),
            messages: session.messages().to_vec(),
            tools: self.registry.definitions(&session.config.tools),
        }
    }

    /// Run one user turn to completion, yielding driver events.
    ///
    /// History is appended only at turn boundaries: if the returned stream
    /// is dropped mid-turn (client disconnect), the partially streamed
    /// assistant message never reaches the transcript.
    pub fn run<'a>(
        &'a self,
        session: &'a mut Session,
        user_message: String,
    ) -> impl Stream<Item = DriverEvent> + Send + 'a {
        async_stream::stream! {
            let session_id = session.id.clone();
            session.iteration_count = 0;
            session.push(Message::user(user_message));
            tracing::info!(
                session_id = %session_id,
                total_messages = session.messages.len(),
                "user message added"
            );

            let mut last_content = String::new();

            while session.iteration_count < session.config.max_iterations {
                session.iteration_count += 1;
                let iteration = session.iteration_count;

                let mut events = match self.provider.stream(self.request_for(session)).await {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "provider call failed");
                        yield DriverEvent::MessageComplete {
                            content: String::new(),
                            tool_calls: Vec::new(),
                            finish_reason: FinishReason::Error,
                        };
                        yield DriverEvent::Final {
                            content: String::new(),
                            tool_calls: Vec::new(),
                            session_id,
                            iteration_count: iteration,
                            paused: false,
                        };
                        return;
                    }
                };

                let mut content = String::new();
                let mut calls: BTreeMap<usize, PartialCall> = BTreeMap::new();
                // Defensive default: a stream that ends without a terminal
                // event counts as a failed turn.
                let mut finish_reason = FinishReason::Error;

                while let Some(event) = events.next().await {
                    match event {
                        Ok(ProviderEvent::ContentDelta { text }) => {
                            content.push_str(&text);
                            yield DriverEvent::ContentDelta { text };
                        }
                        Ok(ProviderEvent::ToolCallStart { index, id, name }) => {
                            yield DriverEvent::ToolCallDelta {
                                id: id.clone(),
                                name: name.clone(),
                                input_fragment: None,
                            };
                            calls.insert(index, PartialCall {
                                id,
                                name,
                                args: String::new(),
                                parsed: None,
                            });
                        }
                        Ok(ProviderEvent::ToolCallArgDelta { index, json_fragment }) => {
                            if let Some(partial) = calls.get_mut(&index) {
                                partial.args.push_str(&json_fragment);
                                yield DriverEvent::ToolCallDelta {
                                    id: partial.id.clone(),
                                    name: partial.name.clone(),
                                    input_fragment: Some(json_fragment),
                                };
                            } else {
                                tracing::debug!(index, "argument fragment for unknown tool slot");
                            }
                        }
                        Ok(ProviderEvent::ToolCallEnd { index }) => {
                            if let Some(partial) = calls.get_mut(&index) {
                                partial.parsed = Some(parse_args(&partial.args));
                            }
                        }
                        Ok(ProviderEvent::MessageEnd { finish_reason: reason }) => {
                            finish_reason = reason;
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(session_id = %session_id, error = %e, "provider stream failed");
                            finish_reason = FinishReason::Error;
                            break;
                        }
                    }
                }
                drop(events);

                // Finalize calls in slot order.
                let finalized: Vec<(ToolCall, Option<String>)> = calls
                    .into_values()
                    .map(|partial| {
                        let parsed = partial
                            .parsed
                            .unwrap_or_else(|| parse_args(&partial.args));
                        match parsed {
                            Ok(arguments) => (
                                ToolCall {
                                    id: partial.id,
                                    name: partial.name,
                                    arguments,
                                },
                                None,
                            ),
                            Err(reason) => (
                                ToolCall {
                                    id: partial.id,
                                    name: partial.name,
                                    arguments: serde_json::Value::Null,
                                },
                                Some(reason),
                            ),
                        }
                    })
                    .collect();
                let names: Vec<String> =
                    finalized.iter().map(|(call, _)| call.name.clone()).collect();

                if finish_reason == FinishReason::Error {
                    // Failed turn: surface what streamed, but keep it out of
                    // the transcript so the alternation invariant holds.
                    yield DriverEvent::MessageComplete {
                        content: content.clone(),
                        tool_calls: names,
                        finish_reason,
                    };
                    yield DriverEvent::Final {
                        content,
                        tool_calls: Vec::new(),
                        session_id,
                        iteration_count: iteration,
                        paused: false,
                    };
                    return;
                }

                session.push(Message::assistant(
                    content.clone(),
                    finalized.iter().map(|(call, _)| call.clone()).collect(),
                ));
                tracing::info!(
                    session_id = %session_id,
                    iteration,
                    tool_calls = names.len(),
                    "assistant message added"
                );
                yield DriverEvent::MessageComplete {
                    content: content.clone(),
                    tool_calls: names.clone(),
                    finish_reason,
                };

                if finalized.is_empty() {
                    yield DriverEvent::Final {
                        content,
                        tool_calls: Vec::new(),
                        session_id,
                        iteration_count: iteration,
                        paused: false,
                    };
                    return;
                }

                // Dispatch every call in this turn concurrently, as detached
                // tasks: if the run is cancelled, in-flight executions still
                // complete and their results are discarded. Results are
                // emitted as they arrive but appended to history in call
                // order once all are in.
                let mut pending = FuturesUnordered::new();
                for (position, (call, parse_error)) in finalized.iter().enumerate() {
                    let registry = Arc::clone(&self.registry);
                    let task_call = call.clone();
                    let parse_error = parse_error.clone();
                    let handle = tokio::spawn(async move {
                        match parse_error {
                            Some(reason) => ToolResult::err(
                                &task_call.id,
                                format!("invalid arguments for {}: {reason}", task_call.name),
                            ),
                            None => registry.execute(&task_call).await,
                        }
                    });
                    let name = call.name.clone();
                    let id = call.id.clone();
                    pending.push(async move {
                        let result = match handle.await {
                            Ok(result) => result,
                            Err(e) => {
                                tracing::error!(error = %e, "tool task failed");
                                ToolResult::err(&id, "tool execution aborted")
                            }
                        };
                        (position, name, result)
                    });
                }

                let mut results: Vec<Option<ToolResult>> =
                    (0..finalized.len()).map(|_| None).collect();
                while let Some((position, name, result)) = pending.next().await {
                    yield DriverEvent::ToolResult {
                        tool_call_id: result.tool_call_id.clone(),
                        tool_name: name,
                        result: result.content.clone(),
                        error: result.error,
                    };
                    results[position] = Some(result);
                }
                drop(pending);

                for result in results.into_iter().flatten() {
                    session.push(Message::tool(result.tool_call_id, result.content));
                }

                if names.iter().any(|name| self.registry.pauses_after(name)) {
                    tracing::info!(session_id = %session_id, iteration, "pausing after tool turn");
                    yield DriverEvent::Final {
                        content: String::new(),
                        tool_calls: names,
                        session_id,
                        iteration_count: iteration,
                        paused: true,
                    };
                    return;
                }

                last_content = content;
            }

            yield DriverEvent::Final {
                content: last_content,
                tool_calls: Vec::new(),
                session_id,
                iteration_count: session.iteration_count,
                paused: false,
            };
        }
    }
}
