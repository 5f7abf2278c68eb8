//! HTTP surface: the WebSocket chat endpoint and the session REST API.

pub mod ws;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::core::session::{SessionDriver, SessionStore};

/// Shared application state, built once by the composition root.
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub driver: Arc<SessionDriver>,
    /// Origins allowed on the chat channel; empty allows all.
    pub allowed_origins: Vec<String>,
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/chat", get(ws::ws_handler))
        .route("/chat/sessions", get(list_sessions))
        .route("/chat/sessions/:id", delete(delete_session))
        .route("/chat/sessions/:id/reset", post(reset_session))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until shutdown.
pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

/// Response body for the session list.
#[derive(Debug, Serialize)]
struct SessionList {
    sessions: Vec<String>,
    count: usize,
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionList> {
    let sessions = state.store.list();
    let count = sessions.len();
    Json(SessionList { sessions, count })
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if state.store.delete(&id) {
        Ok(Json(serde_json::json!({
            "message": format!("Session {id} deleted")
        })))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": format!("Session {id} not found")
            })),
        ))
    }
}

async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if state.store.reset(&id).await {
        Ok(Json(serde_json::json!({
            "message": format!("Session {id} reset")
        })))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": format!("Session {id} not found")
            })),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use chat_core::{CompletionRequest, EventStream, LlmProvider};
    use tower::ServiceExt;

    use super::*;
    use crate::core::session::{GenerationDefaults, SessionConfig};
    use crate::core::tools::ToolRegistry;

    /// Provider that immediately ends every turn.
    struct SilentProvider;

    #[async_trait::async_trait]
    impl LlmProvider for SilentProvider {
        fn name(&self) -> &'static str {
            "silent"
        }

        async fn stream(&self, _request: CompletionRequest) -> chat_core::Result<EventStream> {
            let events: Vec<chat_core::Result<chat_core::ProviderEvent>> =
                vec![Ok(chat_core::ProviderEvent::MessageEnd {
                    finish_reason: chat_core::FinishReason::EndTurn,
                })];
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    fn test_state() -> Arc<AppState> {
        let registry = Arc::new(ToolRegistry::new(Vec::new(), &[], &HashSet::new()));
        let driver = Arc::new(SessionDriver::new(
            Arc::new(SilentProvider),
            registry,
            GenerationDefaults {
                model: "test".to_string(),
                max_tokens: 64,
                temperature: 0.0,
            },
        ));
        let store = Arc::new(SessionStore::new(
            10,
            Duration::from_secs(60),
            SessionConfig::default(),
        ));
        Arc::new(AppState {
            store,
            driver,
            allowed_origins: Vec::new(),
        })
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn sessions_list_is_empty_initially() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/chat/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["count"], 0);
    }

    #[tokio::test]
    async fn sessions_list_reflects_store() {
        let state = test_state();
        let (id, _) = state.store.get_or_create(None);
        let app = router(Arc::clone(&state));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/chat/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["count"], 1);
        assert_eq!(parsed["sessions"][0], id);
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let state = test_state();
        let (id, _) = state.store.get_or_create(None);
        let app = router(Arc::clone(&state));

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/chat/sessions/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.store.get(&id).is_none());
    }

    #[tokio::test]
    async fn delete_unknown_session_is_404() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/chat/sessions/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reset_clears_history_and_keeps_session() {
        let state = test_state();
        let (id, slot) = state.store.get_or_create(None);
        slot.lock().await.push_user("hello");
        let app = router(Arc::clone(&state));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/chat/sessions/{id}/reset"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(slot.lock().await.messages().is_empty());
        assert!(state.store.get(&id).is_some());
    }

    #[tokio::test]
    async fn reset_unknown_session_is_404() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/chat/sessions/nope/reset")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
