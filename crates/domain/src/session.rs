use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stream::Usage;

/// Where a session's first request arrived from — recorded so the Session
/// Store can distinguish CLI, HTTP, and sub-agent-delegated sessions without
/// inspecting conversation contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOrigin {
    Cli,
    Http,
    SubAgent,
}

/// Persisted session record. Holds only metadata — never conversation text,
/// which stays in the process-lifetime Conversation Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub turn_count: u32,
    pub token_usage: Usage,
    pub origin: SessionOrigin,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, origin: SessionOrigin, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: now,
            last_active_at: now,
            turn_count: 0,
            token_usage: Usage::default(),
            origin,
        }
    }

    pub fn record_usage(&mut self, delta: &Usage, now: DateTime<Utc>) {
        self.token_usage.add(delta);
        self.turn_count += 1;
        self.last_active_at = now;
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active_at = now;
    }
}
