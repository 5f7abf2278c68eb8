//! Provider-agnostic chat primitives for Cueso.
//!
//! Defines the neutral message/tool data model, the normalized streaming
//! event contract, and adapters for the Anthropic and OpenAI APIs.

pub mod error;
pub mod provider;
pub mod providers;
pub mod types;

pub use error::{ProviderError, Result};
pub use provider::{CompletionRequest, EventStream, LlmProvider, ProviderEvent};
pub use providers::{AnthropicProvider, OpenAiProvider};
pub use types::{FinishReason, Message, Role, ToolCall, ToolDefinition, ToolResult};
