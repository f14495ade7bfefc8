//! Sub-agent delegation (`agent.run`): an additive ambient extension that
//! spins up a nested Agent Loop with its own Conversation Store entry and
//! session id, registered into the parent's cancellation group so that
//! cancelling the parent cascades to every child it spawned.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ca_backend::CancellationHub;
use ca_domain::config::AgentConfig;
use ca_domain::error::{Error, Result};
use ca_domain::tool::{ParamSchema, ParamType, ToolDescriptor};
use ca_providers::router::LlmRouter;
use ca_tools::registry::{ToolExecutor, ToolRegistry};
use uuid::Uuid;

use crate::agent_loop::AgentLoop;
use crate::conversation::ConversationStore;
use crate::wrapper::ToolWrapper;

/// One entry in the fixed set of sub-agent personas a caller may delegate
/// to via `agent.run`.
#[derive(Debug, Clone)]
pub struct SubAgentDefinition {
    pub name: String,
    pub persona: String,
    pub edit_allowed: bool,
    pub max_iterations: u32,
}

pub fn agent_run_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "agent.run".to_string(),
        parameters: vec![
            ParamSchema {
                name: "task".to_string(),
                required: true,
                kind: ParamType::String,
            },
            ParamSchema {
                name: "agent".to_string(),
                required: false,
                kind: ParamType::String,
            },
        ],
        human_definition: r#"## agent.run
Delegate a sub-task to a named nested agent and wait for its final
response. Useful for scoping a narrow piece of work to a focused persona.

Usage:
<agent.run>
<task>find every caller of parseConfig</task>
<agent>optional sub-agent name, defaults to "default"</agent>
</agent.run>"#
            .to_string(),
    }
}

pub struct SubAgentRunner {
    definitions: HashMap<String, SubAgentDefinition>,
    // Two fixed tool/wrapper pairs, not one shared pair: a sub-agent whose
    // definition says `edit_allowed: false` must never be handed `implement`,
    // regardless of whether the *parent* session has edits allowed.
    registry_no_edit: ToolRegistry,
    wrapper_no_edit: ToolWrapper,
    registry_with_edit: ToolRegistry,
    wrapper_with_edit: ToolWrapper,
    conversation_store: ConversationStore,
    llm_router: Arc<LlmRouter>,
    cancellation: CancellationHub,
    workspace_root: std::path::PathBuf,
    file_sample_cap: usize,
    temperature: f32,
    max_history: usize,
}

impl SubAgentRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        definitions: Vec<SubAgentDefinition>,
        registry_no_edit: ToolRegistry,
        wrapper_no_edit: ToolWrapper,
        registry_with_edit: ToolRegistry,
        wrapper_with_edit: ToolWrapper,
        conversation_store: ConversationStore,
        llm_router: Arc<LlmRouter>,
        cancellation: CancellationHub,
        workspace_root: std::path::PathBuf,
        file_sample_cap: usize,
        temperature: f32,
        max_history: usize,
    ) -> Self {
        Self {
            definitions: definitions.into_iter().map(|d| (d.name.clone(), d)).collect(),
            registry_no_edit,
            wrapper_no_edit,
            registry_with_edit,
            wrapper_with_edit,
            conversation_store,
            llm_router,
            cancellation,
            workspace_root,
            file_sample_cap,
            temperature,
            max_history,
        }
    }

    fn registry_and_wrapper_for(&self, definition: &SubAgentDefinition) -> (ToolRegistry, ToolWrapper) {
        if definition.edit_allowed {
            (self.registry_with_edit.clone(), self.wrapper_with_edit.clone())
        } else {
            (self.registry_no_edit.clone(), self.wrapper_no_edit.clone())
        }
    }
}

#[async_trait]
impl ToolExecutor for SubAgentRunner {
    async fn execute(&self, params: &HashMap<String, String>) -> Result<String> {
        let task = params
            .get("task")
            .ok_or_else(|| Error::Validation("agent.run requires 'task'".to_string()))?
            .clone();
        let agent_name = params.get("agent").cloned().unwrap_or_else(|| "default".to_string());
        let parent_session_id = params
            .get("session_id")
            .ok_or_else(|| Error::Internal("agent.run called without a parent session id".to_string()))?
            .clone();

        let definition = self
            .definitions
            .get(&agent_name)
            .ok_or_else(|| Error::Validation(format!("unknown sub-agent '{agent_name}'")))?;

        let (tool_registry, wrapper) = self.registry_and_wrapper_for(definition);

        let child_session_id = Uuid::new_v4().to_string();
        self.cancellation.register(&child_session_id);
        self.cancellation.add_to_group(&parent_session_id, &child_session_id);

        let config = AgentConfig {
            max_iterations: definition.max_iterations,
            max_history: self.max_history,
            persona: definition.persona.clone(),
            edit_allowed: definition.edit_allowed,
            file_sample_cap: self.file_sample_cap,
            temperature: self.temperature,
        };

        let child_loop = AgentLoop::new(
            tool_registry,
            wrapper,
            self.conversation_store.clone(),
            self.llm_router.clone(),
            self.cancellation.clone(),
            config,
            self.workspace_root.clone(),
        );

        let result = child_loop.chat(&task, &child_session_id).await;

        self.cancellation.remove_from_group(&parent_session_id, &child_session_id);
        self.cancellation.clear(&child_session_id);

        result.map(|r| r.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_run_descriptor_requires_task_only() {
        let descriptor = agent_run_descriptor();
        let required: Vec<_> = descriptor.required_params().map(|p| p.name.as_str()).collect();
        assert_eq!(required, vec!["task"]);
    }
}
