use serde::Serialize;

/// Structured trace events emitted across every codeagent crate for
/// process/request lifecycle. Distinct from the Tool-Event Subscriber
/// stream (`tool.rs` + the per-session event bus), which carries
/// started/completed/error triples for individual tool invocations.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionResolved {
        session_id: String,
        is_new: bool,
    },
    SessionReset {
        old_session_id: String,
        new_session_id: String,
        reason: String,
    },
    TurnStarted {
        session_id: String,
        iteration: u32,
    },
    TurnFinished {
        session_id: String,
        iterations: u32,
        duration_ms: u64,
    },
    ToolStarted {
        session_id: String,
        tool_name: String,
    },
    ToolCompleted {
        session_id: String,
        tool_name: String,
        duration_ms: u64,
    },
    ToolError {
        session_id: String,
        tool_name: String,
        message: String,
    },
    LlmRequest {
        provider: String,
        model: String,
        role: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmFallback {
        from_provider: String,
        from_model: String,
        to_provider: String,
        to_model: String,
        reason: String,
    },
    BackendSelected {
        session_id: String,
        backend_name: String,
        strategy: String,
    },
    BackendFallback {
        session_id: String,
        from_backend: String,
        to_backend: String,
        reason: String,
    },
    Cancelled {
        session_id: String,
    },
    CriticalError {
        session_id: String,
        category: String,
        message: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ca_event");
    }
}
