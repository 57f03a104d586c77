// src/chat/registry.rs
// Per-session task registry. Client disconnect cancels the session's token;
// everything spawned for the turn observes it cooperatively.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Default)]
pub struct TaskRegistry {
    sessions: Mutex<HashMap<i64, CancellationToken>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a session, created on first use. A fresh token replaces one
    /// that was already cancelled.
    pub fn token_for(&self, session_id: i64) -> CancellationToken {
        let mut sessions = match self.sessions.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let token = sessions
            .entry(session_id)
            .or_insert_with(CancellationToken::new);
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    /// Cancel all work for a session (client disconnect).
    pub fn cancel(&self, session_id: i64) {
        let sessions = match self.sessions.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(token) = sessions.get(&session_id) {
            debug!(session_id, "Cancelling session tasks");
            token.cancel();
        }
    }

    /// Drop a session's registry entry after its connection closes.
    pub fn remove(&self, session_id: i64) {
        let mut sessions = match self.sessions.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_marks_token() {
        let registry = TaskRegistry::new();
        let token = registry.token_for(1);
        assert!(!token.is_cancelled());
        registry.cancel(1);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_new_token_after_cancel() {
        let registry = TaskRegistry::new();
        let old = registry.token_for(1);
        registry.cancel(1);
        let fresh = registry.token_for(1);
        assert!(old.is_cancelled());
        assert!(!fresh.is_cancelled());
    }

    #[test]
    fn test_sessions_isolated() {
        let registry = TaskRegistry::new();
        let a = registry.token_for(1);
        let b = registry.token_for(2);
        registry.cancel(1);
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
    }
}
