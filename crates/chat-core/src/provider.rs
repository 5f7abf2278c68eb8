//! LLM provider abstraction.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::types::{FinishReason, Message, ToolDefinition};

/// Configuration for one completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// System prompt, passed out-of-band to vendors that want it separate.
    pub system: Option<String>,
    /// Conversation transcript (user/assistant/tool roles).
    pub messages: Vec<Message>,
    /// Tools offered for this call.
    pub tools: Vec<ToolDefinition>,
}

/// A normalized streaming event.
///
/// Adapters translate each vendor's native protocol into this shape. The
/// sequence for one call is finite and terminates with exactly one
/// `MessageEnd`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// A text fragment of the current assistant turn.
    ContentDelta { text: String },
    /// A new tool call at positional slot `index`; `id` is authoritative.
    ToolCallStart {
        index: usize,
        id: String,
        name: String,
    },
    /// Bytes appended to the JSON arguments of the call at `index`.
    /// Individual fragments need not be valid JSON; only the concatenation
    /// is, by the time `ToolCallEnd` arrives.
    ToolCallArgDelta { index: usize, json_fragment: String },
    /// The call at `index` is complete.
    ToolCallEnd { index: usize },
    /// Terminal event.
    MessageEnd { finish_reason: FinishReason },
}

/// Stream of provider events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent>> + Send>>;

/// Trait for LLM providers.
///
/// Implementations must be safe for concurrent use; they hold only an HTTP
/// client and configuration.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &'static str;

    /// Open a streaming completion.
    async fn stream(&self, request: CompletionRequest) -> Result<EventStream>;
}
