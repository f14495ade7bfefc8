//! Agent Loop + Tool Wrapper + Conversation Store: the bounded, cancellable
//! state machine that alternates LLM generation and tool execution until
//! completion or the iteration cap (SPEC_FULL §4.1-§4.4), plus the ambient
//! extensions that make it runnable as a real agent (system-prompt
//! building, persona selection, image-reference handling, the `implement`
//! and `agent.run` tools, and the MCP pass-through stub).

pub mod agent_loop;
pub mod conversation;
pub mod event_bus;
pub mod image_refs;
pub mod implement_tool;
pub mod mcp;
pub mod persona;
pub mod sub_agent;
pub mod system_prompt;
pub mod wrapper;

pub use agent_loop::{AgentLoop, ChatResult};
pub use conversation::ConversationStore;
pub use event_bus::EventBus;
pub use implement_tool::{implement_descriptor, ImplementTool};
pub use mcp::McpAdapter;
pub use sub_agent::{agent_run_descriptor, SubAgentDefinition, SubAgentRunner};
pub use wrapper::ToolWrapper;
