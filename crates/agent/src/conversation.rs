//! Conversation Store (§4.4): an ordered-sequence container per session,
//! holding both the model-facing `Conversation` and the parallel
//! `DisplayConversation`, updated together on tool events and on
//! final-result capture. Beyond append, the only operations are
//! `trim_to(max)` (drops oldest) and `clear()` (drops everything and
//! returns a fresh session id).

use std::collections::HashMap;
use std::sync::Arc;

use ca_domain::turn::{Conversation, DisplayConversation, DisplayRole, DisplayTurn, Turn};
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

struct SessionConversation {
    conversation: Conversation,
    display: DisplayConversation,
}

/// Process-wide, cloneable handle over every session's conversation state.
#[derive(Clone, Default)]
pub struct ConversationStore {
    inner: Arc<Mutex<HashMap<String, SessionConversation>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_session<R>(&self, session_id: &str, f: impl FnOnce(&mut SessionConversation) -> R) -> R {
        let mut inner = self.inner.lock();
        let entry = inner.entry(session_id.to_string()).or_insert_with(|| SessionConversation {
            conversation: Conversation::new(),
            display: DisplayConversation::new(),
        });
        f(entry)
    }

    pub fn is_empty(&self, session_id: &str) -> bool {
        self.with_session(session_id, |s| s.conversation.is_empty())
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.with_session(session_id, |s| s.conversation.len())
    }

    pub fn push(&self, session_id: &str, turn: Turn) {
        self.with_session(session_id, |s| s.conversation.push(turn));
    }

    pub fn push_display(&self, session_id: &str, role: DisplayRole, text: impl Into<String>) {
        self.with_session(session_id, |s| {
            s.display.push(DisplayTurn {
                role,
                text: text.into(),
                created_at: Utc::now(),
            });
        });
    }

    pub fn trim_to(&self, session_id: &str, max: usize) {
        self.with_session(session_id, |s| s.conversation.trim_to(max));
    }

    /// Snapshot the model-facing turns, for building the next LLM request.
    pub fn snapshot(&self, session_id: &str) -> Vec<Turn> {
        self.with_session(session_id, |s| s.conversation.turns.clone())
    }

    /// Snapshot the external-observer conversation (never sent to the model).
    pub fn display_snapshot(&self, session_id: &str) -> Vec<DisplayTurn> {
        self.with_session(session_id, |s| s.display.turns.clone())
    }

    /// Drop everything held for `session_id` and return a fresh session id
    /// for the caller to use going forward.
    pub fn clear(&self, session_id: &str) -> String {
        self.inner.lock().remove(session_id);
        let new_id = Uuid::new_v4().to_string();
        self.with_session(&new_id, |_| {});
        new_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_starts_empty() {
        let store = ConversationStore::new();
        assert!(store.is_empty("s1"));
        assert_eq!(store.len("s1"), 0);
    }

    #[test]
    fn push_then_snapshot_returns_turn() {
        let store = ConversationStore::new();
        store.push("s1", Turn::user("hello", Utc::now()));
        let snap = store.snapshot("s1");
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].text(), "hello");
    }

    #[test]
    fn trim_to_enforces_history_cap() {
        let store = ConversationStore::new();
        for i in 0..10 {
            store.push("s1", Turn::user(format!("turn {i}"), Utc::now()));
        }
        store.trim_to("s1", 3);
        assert_eq!(store.len("s1"), 3);
    }

    #[test]
    fn clear_returns_fresh_session_with_empty_conversation() {
        let store = ConversationStore::new();
        store.push("s1", Turn::user("hello", Utc::now()));
        let new_id = store.clear("s1");
        assert_ne!(new_id, "s1");
        assert!(store.is_empty(&new_id));
        assert!(store.is_empty("s1"));
    }

    #[test]
    fn two_successive_clears_leave_equivalent_state() {
        let store = ConversationStore::new();
        store.push("s1", Turn::user("hello", Utc::now()));
        let first = store.clear("s1");
        let second = store.clear(&first);
        assert!(store.is_empty(&second));
        assert_eq!(store.len(&second), 0);
    }
}
