use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::{ContentPart, MessageContent};

/// Role of a Turn as seen by the model. Tool results are modeled as
/// user-role turns wrapping the output in a framing marker — there is no
/// distinct `tool_result` role on the model-facing side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// Role set for the parallel Display Conversation, which external observers
/// see but which is never sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayRole {
    User,
    Assistant,
    ToolCall,
}

pub const TASK_FRAME_OPEN: &str = "<task>";
pub const TASK_FRAME_CLOSE: &str = "</task>";
pub const TOOL_RESULT_OPEN: &str = "<tool_result>";
pub const TOOL_RESULT_CLOSE: &str = "</tool_result>";

/// One entry in the model-facing Conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            role: TurnRole::User,
            content: MessageContent::Text(content.into()),
            created_at: now,
        }
    }

    pub fn user_with_parts(parts: Vec<ContentPart>, now: DateTime<Utc>) -> Self {
        Self {
            role: TurnRole::User,
            content: MessageContent::Parts(parts),
            created_at: now,
        }
    }

    pub fn assistant(content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: MessageContent::Text(content.into()),
            created_at: now,
        }
    }

    /// Wrap user-supplied text with the task-framing marker, applied only to
    /// the first user turn of a fresh conversation.
    pub fn task_framed(content: impl AsRef<str>, now: DateTime<Utc>) -> Self {
        Self::user(
            format!(
                "{TASK_FRAME_OPEN}{}{TASK_FRAME_CLOSE}",
                content.as_ref()
            ),
            now,
        )
    }

    /// Tool-result turn: always user-role, wraps the output in the
    /// tool-result framing marker.
    pub fn tool_result_framed(output: impl AsRef<str>, now: DateTime<Utc>) -> Self {
        Self::user(
            format!(
                "{TOOL_RESULT_OPEN}{}{TOOL_RESULT_CLOSE}",
                output.as_ref()
            ),
            now,
        )
    }

    pub fn text(&self) -> String {
        self.content.extract_all_text()
    }
}

/// One entry in the Display Conversation — same role set as `Turn` plus
/// `tool_call`, used only by external observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayTurn {
    pub role: DisplayRole,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Ordered sequence of Turns, model-facing. Maintains the conversation
/// invariants: history cap, task-framing on the first user turn, adjacency
/// of tool-result turns to the assistant turn that requested them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Drop the oldest turns in bulk so `len() <= max`.
    pub fn trim_to(&mut self, max: usize) {
        if self.turns.len() > max {
            let drop_count = self.turns.len() - max;
            self.turns.drain(0..drop_count);
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }
}

/// Parallel conversation seen by external observers (CLI/HTTP/SSE), never
/// sent to the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayConversation {
    pub turns: Vec<DisplayTurn>,
}

impl DisplayConversation {
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    pub fn push(&mut self, turn: DisplayTurn) {
        self.turns.push(turn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn trim_to_drops_oldest_first() {
        let mut conv = Conversation::new();
        for i in 0..5 {
            conv.push(Turn::user(format!("turn {i}"), now()));
        }
        conv.trim_to(2);
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.turns[0].text(), "turn 3");
        assert_eq!(conv.turns[1].text(), "turn 4");
    }

    #[test]
    fn trim_to_noop_when_under_cap() {
        let mut conv = Conversation::new();
        conv.push(Turn::user("only one", now()));
        conv.trim_to(100);
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn task_framed_wraps_marker() {
        let t = Turn::task_framed("do the thing", now());
        assert_eq!(t.text(), "<task>do the thing</task>");
    }

    #[test]
    fn tool_result_framed_wraps_marker() {
        let t = Turn::tool_result_framed("output here", now());
        assert_eq!(t.text(), "<tool_result>output here</tool_result>");
    }
}
