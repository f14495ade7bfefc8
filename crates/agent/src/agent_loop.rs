//! Agent Loop (§4.3): the bounded, cancellable state machine that
//! alternates LLM generation and tool execution until `attempt_completion`,
//! an unparseable-but-terminal response, cancellation, a terminal LLM-layer
//! error, or the iteration cap.

use std::path::PathBuf;
use std::sync::Arc;

use ca_backend::CancellationHub;
use ca_domain::config::AgentConfig;
use ca_domain::error::{Error, Result};
use ca_domain::stream::{StreamEvent, Usage};
use ca_domain::tool::{ContentPart, Message, MessageContent, Role};
use ca_domain::turn::{DisplayRole, Turn, TurnRole, TASK_FRAME_CLOSE, TASK_FRAME_OPEN};
use ca_providers::router::{LlmRouter, EXECUTOR_ROLE};
use ca_providers::traits::ChatRequest;
use ca_tools::parser::{self, ParsedToolCall};
use ca_tools::registry::ToolRegistry;
use chrono::Utc;
use futures_util::StreamExt;

use crate::conversation::ConversationStore;
use crate::system_prompt;
use crate::wrapper::ToolWrapper;

const ATTEMPT_COMPLETION: &str = "attempt_completion";

const REMEDIATION_MESSAGE: &str =
    "No tool call was found in your last response. Emit exactly one tool call, \
     or an <attempt_completion> element if the task is done.";

/// Outcome of a single `chat()` call.
#[derive(Debug, Clone)]
pub struct ChatResult {
    pub response: String,
    pub token_usage: Usage,
}

pub struct AgentLoop {
    tool_registry: ToolRegistry,
    wrapper: ToolWrapper,
    conversation_store: ConversationStore,
    llm_router: Arc<LlmRouter>,
    cancellation: CancellationHub,
    config: AgentConfig,
    workspace_root: PathBuf,
    persona_override: Option<String>,
}

impl AgentLoop {
    pub fn new(
        tool_registry: ToolRegistry,
        wrapper: ToolWrapper,
        conversation_store: ConversationStore,
        llm_router: Arc<LlmRouter>,
        cancellation: CancellationHub,
        config: AgentConfig,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            tool_registry,
            wrapper,
            conversation_store,
            llm_router,
            cancellation,
            config,
            workspace_root,
            persona_override: None,
        }
    }

    pub fn with_persona_override(mut self, text: impl Into<String>) -> Self {
        self.persona_override = Some(text.into());
        self
    }

    /// Run one user turn through the loop to completion. Raises for
    /// cancellation, a terminal (post-fallback) LLM-layer error, or an
    /// empty LLM response; tool-layer errors are captured into a
    /// tool-result turn and never raised out of here.
    pub async fn chat(&self, message: &str, session_id: &str) -> Result<ChatResult> {
        self.cancellation.register(session_id);
        self.conversation_store.trim_to(session_id, self.config.max_history);

        let is_first_turn = self.conversation_store.is_empty(session_id);
        let image_parts = crate::image_refs::extract_and_validate(message).await;

        let now = Utc::now();
        let user_turn = if image_parts.is_empty() {
            if is_first_turn {
                Turn::user(format!("{TASK_FRAME_OPEN}{message}{TASK_FRAME_CLOSE}"), now)
            } else {
                Turn::user(message, now)
            }
        } else {
            let mut parts = Vec::with_capacity(1 + image_parts.len());
            let text = if is_first_turn {
                format!("{TASK_FRAME_OPEN}{message}{TASK_FRAME_CLOSE}")
            } else {
                message.to_string()
            };
            parts.push(ContentPart::Text { text });
            parts.extend(image_parts);
            Turn::user_with_parts(parts, now)
        };

        self.conversation_store.push(session_id, user_turn);
        self.conversation_store.push_display(session_id, DisplayRole::User, message);

        let system_prompt = system_prompt::build(
            &self.config.persona,
            self.persona_override.as_deref(),
            &self.tool_registry,
            &self.workspace_root,
            self.config.file_sample_cap,
        );

        let mut total_usage = Usage::default();
        let mut final_result: Option<String> = None;

        for _iteration in 0..self.config.max_iterations {
            if self.cancellation.is_cancelled(session_id) {
                return Err(Error::Cancellation);
            }

            let turns = self.conversation_store.snapshot(session_id);
            let mut messages = vec![Message::system(system_prompt.as_str())];
            messages.extend(turns.iter().map(turn_to_message));

            let request = ChatRequest {
                messages,
                temperature: Some(self.config.temperature),
                max_tokens: None,
                model: None,
            };

            let mut stream = self.llm_router.chat_stream_for_role(EXECUTOR_ROLE, request).await?;

            let mut assistant_text = String::new();
            while let Some(event) = stream.next().await {
                if self.cancellation.is_cancelled(session_id) {
                    return Err(Error::Cancellation);
                }
                match event? {
                    StreamEvent::Token { text } => assistant_text.push_str(&text),
                    StreamEvent::Done { usage, .. } => {
                        if let Some(u) = usage {
                            total_usage.add(&u);
                        }
                    }
                    StreamEvent::Error { message } => {
                        return Err(Error::Provider {
                            provider: "router".to_string(),
                            message,
                        });
                    }
                }
            }

            if assistant_text.is_empty() {
                return Err(Error::Internal("LLM returned empty content".to_string()));
            }

            let assistant_now = Utc::now();
            self.conversation_store
                .push(session_id, Turn::assistant(assistant_text.clone(), assistant_now));
            self.conversation_store
                .push_display(session_id, DisplayRole::Assistant, assistant_text.clone());

            match parser::parse(&assistant_text, &self.tool_registry) {
                Some(ParsedToolCall::Invocation(invocation)) if invocation.tool_name == ATTEMPT_COMPLETION => {
                    final_result = invocation.params.get("result").cloned();
                    break;
                }
                Some(ParsedToolCall::InvalidCompletion(message)) => {
                    final_result = Some(message);
                    break;
                }
                Some(ParsedToolCall::Invocation(invocation)) => {
                    self.conversation_store.push_display(
                        session_id,
                        DisplayRole::ToolCall,
                        invocation.tool_name.clone(),
                    );
                    match self
                        .wrapper
                        .call(&invocation.tool_name, invocation.params, session_id)
                        .await
                    {
                        Ok(output) => {
                            self.conversation_store
                                .push(session_id, Turn::tool_result_framed(output, Utc::now()));
                        }
                        Err(Error::Cancellation) => return Err(Error::Cancellation),
                        Err(e) => {
                            self.conversation_store.push(
                                session_id,
                                Turn::tool_result_framed(
                                    format!("Error executing {}: {e}", invocation.tool_name),
                                    Utc::now(),
                                ),
                            );
                        }
                    }
                }
                None => {
                    self.conversation_store
                        .push(session_id, Turn::user(REMEDIATION_MESSAGE, Utc::now()));
                }
            }

            self.conversation_store
                .trim_to(session_id, self.config.max_history + 3);
        }

        self.conversation_store.trim_to(session_id, self.config.max_history);

        let response = final_result.unwrap_or_else(|| "Error: Max tool iterations reached".to_string());
        Ok(ChatResult {
            response,
            token_usage: total_usage,
        })
    }
}

fn turn_to_message(turn: &Turn) -> Message {
    let role = match turn.role {
        TurnRole::User => Role::User,
        TurnRole::Assistant => Role::Assistant,
    };
    Message {
        role,
        content: match &turn.content {
            MessageContent::Text(t) => MessageContent::Text(t.clone()),
            MessageContent::Parts(parts) => MessageContent::Parts(parts.clone()),
        },
    }
}
