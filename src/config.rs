//! Configuration, loaded from a TOML file with serde defaults.
//!
//! API keys are never stored in the file; each section names an
//! environment variable instead.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chat_core::{AnthropicProvider, LlmProvider, OpenAiProvider};
use serde::Deserialize;

use crate::core::session::SessionConfig;
use crate::core::tools::remote::RemoteServerConfig;

/// Default system prompt for the Roku assistant.
const SYSTEM_PROMPT: &str = "You are a helpful assistant that controls Roku devices. \
Use the available tools to help users find and play content.\n\n\
When a user asks to play content:\n\
1. If you're unsure about the exact title, season, or episode, use web_search \
to research it first.\n\
2. Once you know the exact content, call find_content to search streaming services.\n\
3. After find_content returns, present the available streaming services to the user \
and let them choose where to play. Do NOT automatically call launch_content.\n\
4. When the user tells you which service to use, call launch_content with that \
service's channel_id, content_id, and media_type.\n\n\
For general questions or when you need information, use web_search.\n\
For direct Roku operations, use send_key, get_active_app, or get_device_info.";

/// Server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed to open the chat channel; empty allows all.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8483,
            allowed_origins: Vec::new(),
        }
    }
}

/// LLM provider settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "anthropic" or "openai".
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Base URL override for OpenAI-compatible endpoints.
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            max_tokens: 2048,
            temperature: 0.7,
            base_url: None,
        }
    }
}

/// Roku device settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RokuConfig {
    pub ip: String,
}

impl Default for RokuConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.1.100".to_string(),
        }
    }
}

/// Content search settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub api_key_env: String,
    /// Streaming services to search, in priority order.
    pub streaming: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: "BRAVE_API_KEY".to_string(),
            streaming: [
                "netflix",
                "hulu",
                "disney_plus",
                "max",
                "apple_tv_plus",
                "amazon_prime",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

/// Tool execution settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Tool names to expose, in order; empty exposes everything.
    pub expose: Vec<String>,
    /// Tools that pause the driver loop after completing.
    pub pause_after: Vec<String>,
    pub timeout_secs: u64,
    /// Remote tool servers to enumerate at startup.
    pub servers: Vec<RemoteServerConfig>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            expose: Vec::new(),
            pause_after: vec!["find_content".to_string()],
            timeout_secs: 30,
            servers: Vec::new(),
        }
    }
}

/// Chat and session settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub system_prompt: String,
    pub max_iterations: u32,
    pub max_sessions: usize,
    pub session_ttl_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: SYSTEM_PROMPT.to_string(),
            max_iterations: 10,
            max_sessions: 100,
            session_ttl_secs: 3600,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub roku: RokuConfig,
    pub search: SearchConfig,
    pub tools: ToolsConfig,
    pub chat: ChatConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        let config = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("cannot parse {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Build the configured LLM provider.
    pub fn create_provider(&self) -> anyhow::Result<Arc<dyn LlmProvider>> {
        let api_key = std::env::var(&self.llm.api_key_env).unwrap_or_default();
        match self.llm.provider.as_str() {
            "anthropic" => {
                let provider = AnthropicProvider::new(api_key)
                    .map_err(|e| anyhow::anyhow!("{e} (set {})", self.llm.api_key_env))?;
                Ok(Arc::new(provider))
            }
            "openai" => {
                let key = if api_key.is_empty() {
                    None
                } else {
                    Some(api_key)
                };
                Ok(Arc::new(OpenAiProvider::with_config(
                    key,
                    self.llm.base_url.clone(),
                )))
            }
            other => anyhow::bail!("unsupported LLM provider: {other}"),
        }
    }

    /// Resolve the Brave Search API key from the environment.
    pub fn search_api_key(&self) -> Option<String> {
        std::env::var(&self.search.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
    }

    /// Session config template for new sessions.
    pub fn session_defaults(&self) -> SessionConfig {
        SessionConfig {
            system_prompt: Some(self.chat.system_prompt.clone()),
            max_iterations: self.chat.max_iterations,
            tools: Vec::new(),
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Per-call tool timeout.
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tools.timeout_secs)
    }

    /// Session TTL for store eviction.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.chat.session_ttl_secs)
    }
}
