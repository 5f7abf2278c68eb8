//! WebSocket chat bridge.
//!
//! Binds a client socket to the session driver: client turns come in as
//! JSON, driver events go out as typed wire events. One turn runs at a
//! time per connection; client disconnect cancels the in-flight turn at
//! its next suspension point and the partial assistant message is never
//! committed to history.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::http::header::ORIGIN;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::core::session::DriverEvent;

/// Close code for a rejected origin.
const CLOSE_ORIGIN_FORBIDDEN: u16 = 4003;

/// A client turn.
///
/// Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct ChatTurn {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

/// Server → client events.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    SessionCreated {
        session_id: String,
    },
    ContentDelta {
        content: String,
        role: &'static str,
    },
    ToolCallDelta {
        tool_call: WireToolCall,
    },
    MessageComplete {
        content: String,
        tool_calls: Vec<String>,
        finish_reason: chat_core::FinishReason,
    },
    ToolResult {
        tool_name: String,
        tool_call_id: String,
        result: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<bool>,
    },
    Final {
        content: String,
        session_id: String,
        iteration_count: u32,
        paused: bool,
        tool_calls: Vec<String>,
    },
    Error {
        message: String,
    },
}

/// Tool-call payload of a `tool_call_delta` event.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WireToolCall {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_json: Option<String>,
}

fn translate(event: DriverEvent) -> WireEvent {
    match event {
        DriverEvent::ContentDelta { text } => WireEvent::ContentDelta {
            content: text,
            role: "assistant",
        },
        DriverEvent::ToolCallDelta {
            id,
            name,
            input_fragment,
        } => WireEvent::ToolCallDelta {
            tool_call: WireToolCall {
                id,
                name,
                input_json: input_fragment,
            },
        },
        DriverEvent::MessageComplete {
            content,
            tool_calls,
            finish_reason,
        } => WireEvent::MessageComplete {
            content,
            tool_calls,
            finish_reason,
        },
        DriverEvent::ToolResult {
            tool_call_id,
            tool_name,
            result,
            error,
        } => WireEvent::ToolResult {
            tool_name,
            tool_call_id,
            result,
            error: error.then_some(true),
        },
        DriverEvent::Final {
            content,
            tool_calls,
            session_id,
            iteration_count,
            paused,
        } => WireEvent::Final {
            content,
            session_id,
            iteration_count,
            paused,
            tool_calls,
        },
    }
}

/// Check the Origin header against the allowed list. An empty list allows
/// everything; a missing header (non-browser client) is always allowed.
fn origin_allowed(allowed: &[String], headers: &HeaderMap) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match headers.get(ORIGIN).and_then(|value| value.to_str().ok()) {
        Some(origin) => allowed.iter().any(|a| a == origin),
        None => true,
    }
}

/// WebSocket upgrade handler for `/ws/chat`.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !origin_allowed(&state.allowed_origins, &headers) {
        tracing::warn!("rejecting WebSocket connection: origin not allowed");
        return ws.on_upgrade(|mut socket| async move {
            let _ = socket
                .send(WsMessage::Close(Some(CloseFrame {
                    code: CLOSE_ORIGIN_FORBIDDEN,
                    reason: "origin not allowed".into(),
                })))
                .await;
        });
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WireEvent>();

    // Sender task: serialize wire events onto the socket.
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize wire event");
                    continue;
                }
            };
            if sender.send(WsMessage::Text(json)).await.is_err() {
                break;
            }
        }
    });

    'connection: while let Some(Ok(frame)) = receiver.next().await {
        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        let turn: ChatTurn = match serde_json::from_str(&text) {
            Ok(turn) => turn,
            Err(e) => {
                let _ = tx.send(WireEvent::Error {
                    message: format!("invalid message: {e}"),
                });
                continue;
            }
        };
        if turn.message.trim().is_empty() {
            let _ = tx.send(WireEvent::Error {
                message: "message must not be empty".to_string(),
            });
            continue;
        }

        let token = CancellationToken::new();
        let mut task = tokio::spawn(run_turn(
            Arc::clone(&state),
            turn.session_id,
            turn.message,
            tx.clone(),
            token.clone(),
        ));

        // Keep reading frames while the turn runs so a disconnect cancels
        // it promptly. Further turns are rejected until this one finishes.
        loop {
            tokio::select! {
                result = &mut task => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "turn task failed");
                        let _ = tx.send(WireEvent::Error {
                            message: "internal error".to_string(),
                        });
                        break 'connection;
                    }
                    break;
                }
                frame = receiver.next() => match frame {
                    Some(Ok(WsMessage::Text(_))) => {
                        let _ = tx.send(WireEvent::Error {
                            message: "a turn is already in progress".to_string(),
                        });
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {
                        token.cancel();
                        let _ = (&mut task).await;
                        break 'connection;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    drop(tx);
    let _ = send_task.await;
    tracing::debug!("WebSocket connection closed");
}

/// Run one user turn: resolve the session, take its lock, drive, translate.
///
/// Cancellation is observed between driver events; dropping the driver
/// stream tears down the provider stream and releases the session lock
/// without committing the partial turn.
async fn run_turn(
    state: Arc<AppState>,
    requested_id: Option<String>,
    message: String,
    tx: mpsc::UnboundedSender<WireEvent>,
    token: CancellationToken,
) {
    let (session_id, slot) = state.store.get_or_create(requested_id.as_deref());
    if tx
        .send(WireEvent::SessionCreated {
            session_id: session_id.clone(),
        })
        .is_err()
    {
        return;
    }

    let mut session = tokio::select! {
        guard = slot.lock() => guard,
        _ = token.cancelled() => return,
    };

    let events = state.driver.run(&mut session, message);
    futures::pin_mut!(events);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::info!(session_id = %session_id, "turn cancelled by disconnect");
                return;
            }
            event = events.next() => match event {
                Some(event) => {
                    if tx.send(translate(event)).is_err() {
                        return;
                    }
                }
                None => return,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_origin(origin: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, origin.parse().unwrap());
        headers
    }

    #[test]
    fn empty_allowlist_accepts_any_origin() {
        assert!(origin_allowed(&[], &headers_with_origin("http://evil.example")));
    }

    #[test]
    fn allowlist_accepts_listed_origin() {
        let allowed = vec!["http://localhost:3000".to_string()];
        assert!(origin_allowed(
            &allowed,
            &headers_with_origin("http://localhost:3000")
        ));
    }

    #[test]
    fn allowlist_rejects_unlisted_origin() {
        let allowed = vec!["http://localhost:3000".to_string()];
        assert!(!origin_allowed(
            &allowed,
            &headers_with_origin("http://evil.example")
        ));
    }

    #[test]
    fn missing_origin_header_is_allowed() {
        let allowed = vec!["http://localhost:3000".to_string()];
        assert!(origin_allowed(&allowed, &HeaderMap::new()));
    }

    #[test]
    fn chat_turn_ignores_unknown_fields() {
        let turn: ChatTurn =
            serde_json::from_str(r#"{"message":"hi","session_id":null,"extra":42}"#).unwrap();
        assert_eq!(turn.message, "hi");
        assert!(turn.session_id.is_none());
    }

    #[test]
    fn session_created_serializes() {
        let json = serde_json::to_string(&WireEvent::SessionCreated {
            session_id: "abc".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"session_created\""));
        assert!(json.contains("\"session_id\":\"abc\""));
    }

    #[test]
    fn content_delta_carries_assistant_role() {
        let event = translate(DriverEvent::ContentDelta {
            text: "hello".to_string(),
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"content_delta\""));
        assert!(json.contains("\"content\":\"hello\""));
        assert!(json.contains("\"role\":\"assistant\""));
    }

    #[test]
    fn tool_call_start_omits_input_json() {
        let event = translate(DriverEvent::ToolCallDelta {
            id: "call_1".to_string(),
            name: "find_content".to_string(),
            input_fragment: None,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"tool_call_delta\""));
        assert!(!json.contains("input_json"));
    }

    #[test]
    fn tool_call_fragment_carries_input_json() {
        let event = translate(DriverEvent::ToolCallDelta {
            id: "call_1".to_string(),
            name: "find_content".to_string(),
            input_fragment: Some("{\"title\"".to_string()),
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"input_json\":\"{\\\"title\\\"\""));
    }

    #[test]
    fn tool_result_error_flag_only_when_set() {
        let ok = translate(DriverEvent::ToolResult {
            tool_call_id: "c1".to_string(),
            tool_name: "send_key".to_string(),
            result: "{}".to_string(),
            error: false,
        });
        assert!(!serde_json::to_string(&ok).unwrap().contains("error"));

        let failed = translate(DriverEvent::ToolResult {
            tool_call_id: "c1".to_string(),
            tool_name: "send_key".to_string(),
            result: "boom".to_string(),
            error: true,
        });
        assert!(serde_json::to_string(&failed)
            .unwrap()
            .contains("\"error\":true"));
    }

    #[test]
    fn final_event_carries_session_and_pause_state() {
        let event = translate(DriverEvent::Final {
            content: String::new(),
            tool_calls: vec!["find_content".to_string()],
            session_id: "abc".to_string(),
            iteration_count: 1,
            paused: true,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"final\""));
        assert!(json.contains("\"paused\":true"));
        assert!(json.contains("\"iteration_count\":1"));
        assert!(json.contains("\"session_id\":\"abc\""));
    }

    #[test]
    fn message_complete_serializes_finish_reason() {
        let event = translate(DriverEvent::MessageComplete {
            content: "hi".to_string(),
            tool_calls: vec![],
            finish_reason: chat_core::FinishReason::EndTurn,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"finish_reason\":\"end_turn\""));
    }
}
