//! Direct tool executor: Roku ECP operations and content search.
//!
//! Arguments are validated by deserializing into typed structs; a
//! violation becomes an `error = true` result describing the problem.

use std::time::Duration;

use async_trait::async_trait;
use chat_core::{ToolCall, ToolDefinition, ToolResult};
use serde::Deserialize;

use crate::core::roku::{LaunchResult, RokuClient};
use crate::core::search::{self, BraveSearchClient, ContentQuery, StreamingService};

use super::ToolExecutor;

/// Remote keys accepted by the ECP keypress endpoint.
const ECP_KEYS: &[&str] = &[
    "Home",
    "Rev",
    "Fwd",
    "Play",
    "Select",
    "Left",
    "Right",
    "Down",
    "Up",
    "Back",
    "InstantReplay",
    "Info",
    "Backspace",
    "Search",
    "Enter",
];

#[derive(Debug, Deserialize)]
struct FindContentArgs {
    title: String,
    season: Option<u32>,
    episode: Option<u32>,
    episode_title: Option<String>,
    media_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LaunchContentArgs {
    channel_id: u32,
    content_id: String,
    #[serde(default = "default_media_type")]
    media_type: String,
}

fn default_media_type() -> String {
    "movie".to_string()
}

#[derive(Debug, Deserialize)]
struct SendKeyArgs {
    key: String,
}

#[derive(Debug, Deserialize)]
struct WebSearchArgs {
    query: String,
    count: Option<u8>,
}

/// Executor backed by the Roku device and Brave Search.
pub struct RokuExecutor {
    roku: RokuClient,
    search: Option<BraveSearchClient>,
    services: Vec<&'static StreamingService>,
    timeout: Duration,
}

impl RokuExecutor {
    pub fn new(
        roku: RokuClient,
        search: Option<BraveSearchClient>,
        service_priority: &[String],
        timeout: Duration,
    ) -> Self {
        Self {
            roku,
            search,
            services: search::active_services(service_priority),
            timeout,
        }
    }

    fn parse<'de, T: Deserialize<'de>>(call: &'de ToolCall) -> Result<T, String> {
        T::deserialize(&call.arguments).map_err(|e| format!("invalid arguments: {e}"))
    }

    async fn handle(&self, call: &ToolCall) -> Result<String, String> {
        match call.name.as_str() {
            "find_content" => self.find_content(Self::parse(call)?).await,
            "launch_content" => self.launch_content(Self::parse(call)?).await,
            "get_device_info" => self.roku.device_info().await.map_err(|e| e.to_string()),
            "get_active_app" => self.roku.active_app().await.map_err(|e| e.to_string()),
            "send_key" => self.send_key(Self::parse(call)?).await,
            "web_search" => self.web_search(Self::parse(call)?).await,
            other => Err(format!("unknown tool: {other}")),
        }
    }

    async fn find_content(&self, args: FindContentArgs) -> Result<String, String> {
        let Some(client) = &self.search else {
            return Err("content search is not configured (set the Brave API key)".to_string());
        };
        let query = ContentQuery {
            title: args.title,
            season: args.season,
            episode: args.episode,
            episode_title: args.episode_title,
            media_type: args.media_type,
        };
        let result = search::search_content(client, &self.services, &query).await;
        Ok(result.to_tool_result())
    }

    async fn launch_content(&self, args: LaunchContentArgs) -> Result<String, String> {
        let result = self
            .roku
            .launch(args.channel_id, &args.content_id, &args.media_type)
            .await
            .map_err(|e| e.to_string())?;
        serialize_launch(&result)
    }

    async fn send_key(&self, args: SendKeyArgs) -> Result<String, String> {
        if !ECP_KEYS.contains(&args.key.as_str()) {
            return Err(format!(
                "invalid arguments: key must be one of {}",
                ECP_KEYS.join(", ")
            ));
        }
        self.roku
            .keypress(&args.key)
            .await
            .map_err(|e| e.to_string())?;
        Ok(format!("{{\"success\":true,\"key\":\"{}\"}}", args.key))
    }

    async fn web_search(&self, args: WebSearchArgs) -> Result<String, String> {
        let Some(client) = &self.search else {
            return Err("web search is not configured (set the Brave API key)".to_string());
        };
        let results = client
            .search(&args.query, args.count.unwrap_or(5))
            .await
            .map_err(|e| e.to_string())?;
        if results.is_empty() {
            return Ok(format!("No results found for: {}", args.query));
        }
        let formatted: Vec<String> = results
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {}\n   URL: {}\n   {}", i + 1, r.title, r.url, r.description))
            .collect();
        Ok(formatted.join("\n\n"))
    }
}

fn serialize_launch(result: &LaunchResult) -> Result<String, String> {
    serde_json::to_string(result).map_err(|e| e.to_string())
}

#[async_trait]
impl ToolExecutor for RokuExecutor {
    fn list_tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "find_content".to_string(),
                description: concat!(
                    "Search streaming services (Netflix, Hulu, Disney+, Max, Apple TV+, ",
                    "Amazon Prime) for content and return all available matches with channel ",
                    "IDs and content IDs. Use this when you know the exact content to find. ",
                    "After calling this, use launch_content to play the best match (or ask ",
                    "the user which service they prefer)."
                )
                .to_string(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "title": {
                            "type": "string",
                            "description": "The show or movie title (e.g. 'Rick and Morty')"
                        },
                        "season": {
                            "type": "integer",
                            "description": "Season number (for TV episodes)"
                        },
                        "episode": {
                            "type": "integer",
                            "description": "Episode number (for TV episodes)"
                        },
                        "episode_title": {
                            "type": "string",
                            "description": "Episode title for better search accuracy"
                        },
                        "media_type": {
                            "type": "string",
                            "description": "The type of media",
                            "enum": ["movie", "series", "episode", "season"]
                        }
                    },
                    "required": ["title"]
                }),
                pause_after: false,
            },
            ToolDefinition {
                name: "launch_content".to_string(),
                description: concat!(
                    "Launch content on the Roku device. Call this after find_content with ",
                    "one of the returned matches. Provide the channel_id, content_id, and ",
                    "media_type from the find_content results."
                )
                .to_string(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "channel_id": {
                            "type": "integer",
                            "description": "Roku channel ID from find_content results"
                        },
                        "content_id": {
                            "type": "string",
                            "description": "Content ID from find_content results"
                        },
                        "media_type": {
                            "type": "string",
                            "description": "Media type from find_content results",
                            "enum": ["movie", "series", "episode", "season"]
                        }
                    },
                    "required": ["channel_id", "content_id"]
                }),
                pause_after: false,
            },
            ToolDefinition {
                name: "get_device_info".to_string(),
                description: "Get model, name, and state of the Roku device.".to_string(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {}
                }),
                pause_after: false,
            },
            ToolDefinition {
                name: "get_active_app".to_string(),
                description: "Get the app currently running on the Roku device.".to_string(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {}
                }),
                pause_after: false,
            },
            ToolDefinition {
                name: "send_key".to_string(),
                description: "Press a button on the Roku remote.".to_string(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "key": {
                            "type": "string",
                            "description": "The remote key to press",
                            "enum": ECP_KEYS
                        }
                    },
                    "required": ["key"]
                }),
                pause_after: false,
            },
            ToolDefinition {
                name: "web_search".to_string(),
                description: concat!(
                    "Search the web. Use this to find information about shows, movies, or ",
                    "episodes. You can search IMDB, TVDB, Wikipedia, or any other site to ",
                    "identify content, confirm titles, and look up season/episode numbers. ",
                    "Returns titles, URLs, and descriptions."
                )
                .to_string(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The search query"
                        },
                        "count": {
                            "type": "integer",
                            "description": "Number of results to return (1-10, default 5)"
                        }
                    },
                    "required": ["query"]
                }),
                pause_after: false,
            },
        ]
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        match tokio::time::timeout(self.timeout, self.handle(call)).await {
            Ok(Ok(content)) => ToolResult::ok(&call.id, content),
            Ok(Err(message)) => {
                tracing::warn!(tool = %call.name, %message, "tool failed");
                ToolResult::err(&call.id, message)
            }
            Err(_) => ToolResult::err(
                &call.id,
                format!(
                    "{} timed out after {}s",
                    call.name,
                    self.timeout.as_secs()
                ),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> RokuExecutor {
        RokuExecutor::new(
            RokuClient::new("127.0.0.1"),
            None,
            &[],
            Duration::from_secs(5),
        )
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "c1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn lists_the_full_tool_set() {
        let names: Vec<String> = executor()
            .list_tools()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "find_content",
                "launch_content",
                "get_device_info",
                "get_active_app",
                "send_key",
                "web_search"
            ]
        );
    }

    #[test]
    fn schemas_are_object_typed() {
        for definition in executor().list_tools() {
            assert_eq!(definition.input_schema["type"], "object");
        }
    }

    #[tokio::test]
    async fn missing_required_argument_is_an_error_result() {
        let result = executor()
            .execute(&call("launch_content", serde_json::json!({"content_id": "abc"})))
            .await;
        assert!(result.error);
        assert!(result.content.contains("channel_id"));
    }

    #[tokio::test]
    async fn wrong_argument_type_is_an_error_result() {
        let result = executor()
            .execute(&call(
                "launch_content",
                serde_json::json!({"channel_id": "twelve", "content_id": "abc"}),
            ))
            .await;
        assert!(result.error);
        assert!(result.content.contains("invalid arguments"));
    }

    #[tokio::test]
    async fn unsupported_key_is_rejected_before_any_request() {
        let result = executor()
            .execute(&call("send_key", serde_json::json!({"key": "SelfDestruct"})))
            .await;
        assert!(result.error);
        assert!(result.content.contains("key must be one of"));
    }

    #[tokio::test]
    async fn find_content_without_search_client_reports_configuration() {
        let result = executor()
            .execute(&call("find_content", serde_json::json!({"title": "Seinfeld"})))
            .await;
        assert!(result.error);
        assert!(result.content.contains("not configured"));
    }

    #[tokio::test]
    async fn web_search_without_search_client_reports_configuration() {
        let result = executor()
            .execute(&call("web_search", serde_json::json!({"query": "Seinfeld cast"})))
            .await;
        assert!(result.error);
        assert!(result.content.contains("not configured"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let result = executor().execute(&call("reboot", serde_json::json!({}))).await;
        assert!(result.error);
        assert!(result.content.contains("unknown tool"));
    }
}
