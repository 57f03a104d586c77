// src/api/ws/mod.rs
// WebSocket chat channel: bearer auth (cookie or query param), message
// history on connect, one in-flight turn per session, frame writer with
// back-pressure, cancellation on disconnect.

pub mod frames;

use axum::extract::ws::{CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chat::ChatOrchestrator;
use frames::{ClientFrame, FrameQueue, MessageSnapshot, ServerFrame};

/// Policy-violation close code for failed auth
const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Pause between outgoing frames (back-pressure yield)
const SEND_YIELD: Duration = Duration::from_millis(1);
/// History window sent on connect
const HISTORY_ON_CONNECT: i64 = 50;

/// Shared state behind the chat routes
#[derive(Clone)]
pub struct ChatState {
    pub orchestrator: Arc<ChatOrchestrator>,
    /// Expected bearer token; None disables auth (dev mode)
    pub auth_token: Option<String>,
}

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Extract the bearer token from the access_token cookie or query param.
fn extract_token(headers: &HeaderMap, query: &WsQuery) -> Option<String> {
    if let Some(cookie_header) = headers.get("cookie").and_then(|v| v.to_str().ok()) {
        for pair in cookie_header.split(';') {
            let pair = pair.trim();
            if let Some(value) = pair.strip_prefix("access_token=") {
                return Some(value.to_string());
            }
        }
    }
    query.token.clone()
}

pub async fn ws_chat_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<i64>,
    State(state): State<ChatState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let presented = extract_token(&headers, &query);
    let authorized = match &state.auth_token {
        Some(expected) => presented.as_deref() == Some(expected.as_str()),
        None => true,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id, authorized))
}

async fn handle_socket(socket: WebSocket, state: ChatState, session_id: i64, authorized: bool) {
    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));

    if !authorized {
        warn!(session_id, "Rejecting unauthenticated chat connection");
        let _ = sender
            .lock()
            .await
            .send(WsMessage::Close(Some(CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: Utf8Bytes::from_static("invalid token"),
            })))
            .await;
        return;
    }

    info!(session_id, "Chat client connected");
    let queue = FrameQueue::new();

    // Writer task: drains the bounded queue onto the socket
    let writer = {
        let queue = queue.clone();
        let sender = sender.clone();
        tokio::spawn(async move {
            while let Some(frame) = queue.pop().await {
                let Ok(json) = serde_json::to_string(&frame) else {
                    continue;
                };
                let mut guard = sender.lock().await;
                if guard.send(WsMessage::Text(Utf8Bytes::from(json))).await.is_err() {
                    break;
                }
                if guard.flush().await.is_err() {
                    break;
                }
                drop(guard);
                tokio::time::sleep(SEND_YIELD).await;
            }
        })
    };

    queue.push(ServerFrame::Connected);
    send_history(&state, session_id, &queue).await;

    // Receive loop; turns run serialized per session
    while let Some(result) = receiver.next().await {
        let message = match result {
            Ok(m) => m,
            Err(e) => {
                debug!(session_id, "WebSocket error: {}", e);
                break;
            }
        };

        match message {
            WsMessage::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Message { content, .. }) => {
                    state
                        .orchestrator
                        .handle_turn(session_id, content, &queue)
                        .await;
                }
                Err(e) => {
                    warn!(session_id, "Unparseable client frame: {}", e);
                    queue.push(ServerFrame::Error {
                        error: "unrecognized frame".into(),
                        code: Some("bad_frame".into()),
                    });
                }
            },
            WsMessage::Ping(data) => {
                let _ = sender.lock().await.send(WsMessage::Pong(data)).await;
            }
            WsMessage::Close(_) => {
                debug!(session_id, "Client initiated close");
                break;
            }
            _ => {}
        }
    }

    // Disconnect: cancel in-flight work, stop the writer
    state.orchestrator.registry.cancel(session_id);
    state.orchestrator.registry.remove(session_id);
    queue.close();
    let _ = writer.await;
    info!(session_id, "Chat client disconnected");
}

async fn send_history(state: &ChatState, session_id: i64, queue: &FrameQueue) {
    match state
        .orchestrator
        .message_store()
        .recent(session_id, HISTORY_ON_CONNECT)
        .await
    {
        Ok(messages) => {
            let snapshots = messages
                .into_iter()
                .map(|m| MessageSnapshot {
                    id: m.id,
                    content: m.content,
                    role: m.role,
                    created_at: m.created_at,
                })
                .collect();
            queue.push(ServerFrame::MessageHistory { messages: snapshots });
        }
        Err(e) => {
            warn!(session_id, "Failed to load history: {}", e);
            queue.push(ServerFrame::MessageHistory { messages: Vec::new() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", value.parse().unwrap());
        headers
    }

    #[test]
    fn test_token_from_cookie() {
        let headers = headers_with_cookie("theme=dark; access_token=secret123; lang=en");
        let query = WsQuery { token: None };
        assert_eq!(extract_token(&headers, &query).as_deref(), Some("secret123"));
    }

    #[test]
    fn test_token_from_query_fallback() {
        let headers = HeaderMap::new();
        let query = WsQuery {
            token: Some("qtoken".into()),
        };
        assert_eq!(extract_token(&headers, &query).as_deref(), Some("qtoken"));
    }

    #[test]
    fn test_cookie_wins_over_query() {
        let headers = headers_with_cookie("access_token=fromcookie");
        let query = WsQuery {
            token: Some("fromquery".into()),
        };
        assert_eq!(extract_token(&headers, &query).as_deref(), Some("fromcookie"));
    }

    #[test]
    fn test_no_token() {
        let headers = HeaderMap::new();
        let query = WsQuery { token: None };
        assert!(extract_token(&headers, &query).is_none());
    }
}
