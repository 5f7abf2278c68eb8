//! Tool registry and execution.
//!
//! The registry is built once at startup from configuration: it decides
//! which tools the model sees, which executor serves each name, and which
//! tools pause the driver loop after completing.

pub mod direct;
pub mod remote;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chat_core::{ToolCall, ToolDefinition, ToolResult};

pub use direct::RokuExecutor;
pub use remote::RemoteExecutor;

/// Executes named tools with JSON arguments.
///
/// Failures never propagate as errors: every outcome is a [`ToolResult`],
/// with `error = true` carrying a human-readable message the model can
/// react to.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tool definitions this executor can serve.
    fn list_tools(&self) -> Vec<ToolDefinition>;

    /// Execute one tool call.
    async fn execute(&self, call: &ToolCall) -> ToolResult;
}

/// Registry of exposed tools, read-only after startup.
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
    routes: HashMap<String, Arc<dyn ToolExecutor>>,
}

impl ToolRegistry {
    /// Build a registry from executors, in order.
    ///
    /// `expose` limits and orders the offered tools (empty exposes
    /// everything in discovery order); `pause_after` flags the tools that
    /// end the driver loop when they complete. On a name collision the
    /// first executor wins.
    pub fn new(
        executors: Vec<Arc<dyn ToolExecutor>>,
        expose: &[String],
        pause_after: &HashSet<String>,
    ) -> Self {
        let mut available: Vec<(ToolDefinition, Arc<dyn ToolExecutor>)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for executor in &executors {
            for mut definition in executor.list_tools() {
                if !seen.insert(definition.name.clone()) {
                    tracing::warn!(tool = %definition.name, "duplicate tool name, keeping first");
                    continue;
                }
                definition.pause_after = pause_after.contains(&definition.name);
                available.push((definition, Arc::clone(executor)));
            }
        }

        for name in pause_after {
            if !seen.contains(name) {
                tracing::warn!(tool = %name, "pause_after names an unknown tool");
            }
        }

        let mut definitions = Vec::new();
        let mut routes = HashMap::new();

        if expose.is_empty() {
            for (definition, executor) in available {
                routes.insert(definition.name.clone(), executor);
                definitions.push(definition);
            }
        } else {
            let mut by_name: HashMap<String, (ToolDefinition, Arc<dyn ToolExecutor>)> = available
                .into_iter()
                .map(|(definition, executor)| (definition.name.clone(), (definition, executor)))
                .collect();
            for name in expose {
                match by_name.remove(name) {
                    Some((definition, executor)) => {
                        routes.insert(name.clone(), executor);
                        definitions.push(definition);
                    }
                    None => tracing::warn!(tool = %name, "exposed tool is not provided by any executor"),
                }
            }
        }

        tracing::info!(tools = definitions.len(), "tool registry built");
        Self {
            definitions,
            routes,
        }
    }

    /// Definitions offered to the model, optionally filtered to the given
    /// names (empty means all).
    pub fn definitions(&self, names: &[String]) -> Vec<ToolDefinition> {
        if names.is_empty() {
            self.definitions.clone()
        } else {
            self.definitions
                .iter()
                .filter(|d| names.contains(&d.name))
                .cloned()
                .collect()
        }
    }

    /// Whether completing this tool pauses the driver loop.
    pub fn pauses_after(&self, name: &str) -> bool {
        self.definitions
            .iter()
            .any(|d| d.name == name && d.pause_after)
    }

    /// Route a call to its executor.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        match self.routes.get(&call.name) {
            Some(executor) => executor.execute(call).await,
            None => ToolResult::err(&call.id, format!("unknown tool: {}", call.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubExecutor {
        tools: Vec<&'static str>,
    }

    #[async_trait]
    impl ToolExecutor for StubExecutor {
        fn list_tools(&self) -> Vec<ToolDefinition> {
            self.tools
                .iter()
                .map(|name| ToolDefinition {
                    name: (*name).to_string(),
                    description: String::new(),
                    input_schema: serde_json::json!({"type": "object"}),
                    pause_after: false,
                })
                .collect()
        }

        async fn execute(&self, call: &ToolCall) -> ToolResult {
            ToolResult::ok(&call.id, format!("ran {}", call.name))
        }
    }

    fn registry(expose: &[String], pause: &[&str]) -> ToolRegistry {
        let executor: Arc<dyn ToolExecutor> = Arc::new(StubExecutor {
            tools: vec!["find_content", "launch_content", "send_key"],
        });
        let pause: HashSet<String> = pause.iter().map(|s| (*s).to_string()).collect();
        ToolRegistry::new(vec![executor], expose, &pause)
    }

    #[test]
    fn exposes_all_tools_by_default() {
        let registry = registry(&[], &[]);
        let names: Vec<String> = registry
            .definitions(&[])
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["find_content", "launch_content", "send_key"]);
    }

    #[test]
    fn expose_list_orders_and_filters() {
        let expose = vec!["send_key".to_string(), "find_content".to_string()];
        let registry = registry(&expose, &[]);
        let names: Vec<String> = registry
            .definitions(&[])
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["send_key", "find_content"]);
    }

    #[test]
    fn pause_flags_are_applied() {
        let registry = registry(&[], &["find_content"]);
        assert!(registry.pauses_after("find_content"));
        assert!(!registry.pauses_after("send_key"));
        let defs = registry.definitions(&[]);
        assert!(defs.iter().find(|d| d.name == "find_content").unwrap().pause_after);
    }

    #[test]
    fn definitions_filter_by_session_tools() {
        let registry = registry(&[], &[]);
        let filtered = registry.definitions(&["send_key".to_string()]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "send_key");
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_result() {
        let registry = registry(&[], &[]);
        let call = ToolCall {
            id: "c1".to_string(),
            name: "reboot_tv".to_string(),
            arguments: serde_json::json!({}),
        };
        let result = registry.execute(&call).await;
        assert!(result.error);
        assert!(result.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn routes_to_executor() {
        let registry = registry(&[], &[]);
        let call = ToolCall {
            id: "c1".to_string(),
            name: "send_key".to_string(),
            arguments: serde_json::json!({"key": "Home"}),
        };
        let result = registry.execute(&call).await;
        assert!(!result.error);
        assert_eq!(result.content, "ran send_key");
    }
}
