use std::collections::HashMap;

use async_trait::async_trait;
use ca_domain::error::{Error, Result};
use ca_domain::tool::{ParamSchema, ParamType, ToolDescriptor};

use crate::registry::ToolExecutor;

pub fn attempt_completion_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "attempt_completion".to_string(),
        parameters: vec![ParamSchema {
            name: "result".to_string(),
            required: true,
            kind: ParamType::String,
        }],
        human_definition: r#"## attempt_completion
Signal that the task is finished. The entire content of this element is
shown to the user verbatim as the final answer — emit it as the very last
thing you write, with no other tool call in the same turn.

Usage:
<attempt_completion>
Your final answer, in full, goes here.
</attempt_completion>"#
            .to_string(),
    }
}

/// The terminal sentinel tool. The agent loop intercepts `attempt_completion`
/// before dispatch ever reaches this executor (§4.3 step 6f) — this
/// implementation exists so the tool is still a well-formed registry entry
/// and can be executed directly in tests.
pub struct AttemptCompletion;

#[async_trait]
impl ToolExecutor for AttemptCompletion {
    async fn execute(&self, params: &HashMap<String, String>) -> Result<String> {
        params
            .get("result")
            .cloned()
            .ok_or_else(|| Error::Validation("attempt_completion requires 'result'".to_string()))
    }
}
