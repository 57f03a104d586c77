// src/api/ws/frames.rs
// Chat channel frame vocabulary and the bounded send queue. When the queue
// fills, the oldest text delta is dropped; tool-call frames never are.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Maximum user message length accepted on the channel
pub const MAX_CONTENT_CHARS: usize = 10_000;
/// Bounded send queue capacity per connection
const QUEUE_CAPACITY: usize = 256;

/// Client → server frames
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Message {
        content: String,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },
}

/// Persisted message snapshot carried on the final stream frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSnapshot {
    pub id: i64,
    pub content: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

/// Server → client frames
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected,
    MessageHistory {
        messages: Vec<MessageSnapshot>,
    },
    AiStream {
        message_id: i64,
        content: String,
        done: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        has_tool_calls: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<MessageSnapshot>,
    },
    AiToolCall {
        message_id: i64,
        tool_name: String,
        status: String,
    },
    AiToolsExecuting {
        message_id: i64,
        tool_count: usize,
        tools: Vec<ToolName>,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolName {
    pub name: String,
}

impl ServerFrame {
    /// Frames that may be shed under back-pressure
    fn is_droppable(&self) -> bool {
        matches!(
            self,
            ServerFrame::AiStream { done: false, .. }
        )
    }

    pub fn stream_delta(message_id: i64, content: impl Into<String>) -> Self {
        ServerFrame::AiStream {
            message_id,
            content: content.into(),
            done: false,
            has_tool_calls: None,
            message: None,
        }
    }

    pub fn stream_done(message_id: i64, has_tool_calls: bool, message: Option<MessageSnapshot>) -> Self {
        ServerFrame::AiStream {
            message_id,
            content: String::new(),
            done: true,
            has_tool_calls: Some(has_tool_calls),
            message,
        }
    }
}

/// Bounded frame queue feeding one connection's writer task.
#[derive(Clone)]
pub struct FrameQueue {
    inner: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

struct QueueState {
    frames: VecDeque<ServerFrame>,
    closed: bool,
    dropped: u64,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueState {
                frames: VecDeque::new(),
                closed: false,
                dropped: 0,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Enqueue a frame. A full queue sheds its oldest droppable frame; when
    /// nothing is droppable the new frame waits its turn (queue grows).
    pub fn push(&self, frame: ServerFrame) {
        let mut state = match self.inner.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.closed {
            return;
        }
        if state.frames.len() >= QUEUE_CAPACITY {
            if let Some(idx) = state.frames.iter().position(|f| f.is_droppable()) {
                state.frames.remove(idx);
                state.dropped += 1;
            }
        }
        state.frames.push_back(frame);
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for and take the next frame. None once closed and drained.
    pub async fn pop(&self) -> Option<ServerFrame> {
        loop {
            {
                let mut state = match self.inner.lock() {
                    Ok(s) => s,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        let mut state = match self.inner.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.closed = true;
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn dropped(&self) -> u64 {
        match self.inner.lock() {
            Ok(s) => s.dropped,
            Err(poisoned) => poisoned.into_inner().dropped,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(s) => s.frames.len(),
            Err(poisoned) => poisoned.into_inner().frames.len(),
        }
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_serialization_shapes() {
        let frame = ServerFrame::stream_delta(7, "hello");
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "ai_stream");
        assert_eq!(json["message_id"], 7);
        assert_eq!(json["done"], false);
        assert!(json.get("has_tool_calls").is_none());

        let frame = ServerFrame::AiToolCall {
            message_id: 7,
            tool_name: "file_search".into(),
            status: "started".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "ai_tool_call");
        assert_eq!(json["status"], "started");

        let frame = ServerFrame::AiToolsExecuting {
            message_id: 7,
            tool_count: 2,
            tools: vec![
                ToolName { name: "a".into() },
                ToolName { name: "b".into() },
            ],
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "ai_tools_executing");
        assert_eq!(json["tools"][0]["name"], "a");

        let json = serde_json::to_value(ServerFrame::Connected).unwrap();
        assert_eq!(json["type"], "connected");
    }

    #[test]
    fn test_client_frame_parse_and_limit() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"message","content":"hi"}"#).unwrap();
        let ClientFrame::Message { content, metadata } = frame;
        assert_eq!(content, "hi");
        assert!(metadata.is_none());
        assert_eq!(MAX_CONTENT_CHARS, 10_000);
    }

    #[tokio::test]
    async fn test_queue_roundtrip_and_close() {
        let queue = FrameQueue::new();
        queue.push(ServerFrame::Connected);
        assert!(matches!(queue.pop().await, Some(ServerFrame::Connected)));
        queue.close();
        assert!(queue.pop().await.is_none());
    }

    #[test]
    fn test_backpressure_drops_oldest_text_delta_only() {
        let queue = FrameQueue::new();
        // Fill with one tool frame then text deltas
        queue.push(ServerFrame::AiToolCall {
            message_id: 1,
            tool_name: "file_search".into(),
            status: "started".into(),
        });
        for i in 0..(QUEUE_CAPACITY - 1) {
            queue.push(ServerFrame::stream_delta(1, format!("d{}", i)));
        }
        assert_eq!(queue.len(), QUEUE_CAPACITY);

        // Overflow: oldest delta d0 goes, the tool frame stays
        queue.push(ServerFrame::stream_delta(1, "overflow"));
        assert_eq!(queue.len(), QUEUE_CAPACITY);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_done_frames_never_dropped() {
        let done = ServerFrame::stream_done(1, false, None);
        assert!(!done.is_droppable());
        assert!(ServerFrame::stream_delta(1, "x").is_droppable());
        assert!(!ServerFrame::Connected.is_droppable());
    }
}
