//! Wires every collaborator the CLI and HTTP front-ends share: the Tool
//! Registry, the Implementation Backend Manager (plus its Configuration
//! Resolver), the LLM Provider Router, the Agent Loop, and the ambient
//! Session Store / Event Bus / Cancellation Hub.
//!
//! Three tool registries are built, never one shared registry, to avoid a
//! circular dependency between `agent.run` and the registry it delegates
//! into while still honoring each sub-agent's own edit permission:
//! `registry_no_edit` and `registry_with_edit` are the always-on tool set
//! with and without `implement`, handed to `SubAgentRunner` so each
//! delegated child loop gets exactly the tools its own
//! `SubAgentDefinition.edit_allowed` calls for, independent of the
//! *parent* session's setting. Neither includes `agent.run`, so delegation
//! is exactly one level deep and never recurses into itself. The *full*
//! registry used by the top-level loop is the always-on set plus
//! `agent.run`, plus `implement` if the top-level session itself has
//! edits allowed.

use std::path::PathBuf;
use std::sync::Arc;

use ca_agent::{
    agent_run_descriptor, implement_descriptor, AgentLoop, ConversationStore, EventBus,
    ImplementTool, McpAdapter, SubAgentDefinition, SubAgentRunner, ToolWrapper,
};
use ca_backend::{
    Backend, BackendManager, CancellationHub, ConfigResolver, ProcessBackendSettings,
    ProcessSpawningBackend,
};
use ca_domain::config::Config;
use ca_providers::router::LlmRouter;
use ca_sessions::SessionStore;
use ca_tools::builtin::{
    attempt_completion_descriptor, extract_descriptor, list_files_descriptor, query_descriptor,
    search_descriptor, search_files_descriptor, AttemptCompletion, Extract, ListFiles, Query,
    Search, SearchFiles,
};
use ca_tools::registry::ToolRegistryBuilder;

/// Everything a single CLI invocation or the HTTP server needs to run
/// agent turns. Cheap to hand around as an `Arc`.
pub struct Runtime {
    pub config: Config,
    pub agent_loop: Arc<AgentLoop>,
    pub sessions: Arc<SessionStore>,
    pub events: EventBus,
    pub cancellation: CancellationHub,
    pub backend_manager: Arc<BackendManager>,
    pub mcp: McpAdapter,
    workspace_root: PathBuf,
    // Kept alive for the process lifetime so the config-file watcher it
    // owns keeps running; never read after construction.
    _config_resolver: ConfigResolver,
}

impl Runtime {
    /// Build every collaborator from an already-resolved `Config` (the
    /// caller has applied CLI flags and the enumerated env-var overrides
    /// on top of the file/defaults layer). `config_path`, if given, is
    /// still passed to the Configuration Resolver so the Backend Manager
    /// keeps hot-reloading from the same file.
    pub async fn build(config: Config, config_path: Option<PathBuf>, workspace_root: PathBuf) -> anyhow::Result<Self> {
        for issue in config.validate() {
            tracing::warn!(%issue, "configuration issue");
        }

        let cancellation = CancellationHub::new();
        let events = EventBus::new();
        let conversation_store = ConversationStore::new();

        let backend_manager = Arc::new(BackendManager::new(config.backend.clone()));
        let process_backend = Arc::new(ProcessSpawningBackend::new(ProcessBackendSettings::default()));
        process_backend.initialize(&config.backend).await?;
        backend_manager.register(process_backend);

        let (config_resolver, _resolved_backend_config) =
            ConfigResolver::start(config_path.clone(), backend_manager.clone())
                .map_err(|e| anyhow::anyhow!("failed to start configuration resolver: {e}"))?;

        let llm_router = Arc::new(LlmRouter::from_config(&config.llm)?);

        // Two always-on tool sets, independent of the parent session's own
        // `edit_allowed`: a sub-agent's tools are gated solely by its own
        // `SubAgentDefinition.edit_allowed`, never by the caller's setting.
        let registry_no_edit = always_on_builder(&workspace_root).build();
        let wrapper_no_edit = ToolWrapper::new(registry_no_edit.clone(), cancellation.clone(), events.clone());
        let registry_with_edit = always_on_builder(&workspace_root)
            .register(implement_descriptor(), Arc::new(ImplementTool::new(backend_manager.clone())))
            .build();
        let wrapper_with_edit = ToolWrapper::new(registry_with_edit.clone(), cancellation.clone(), events.clone());

        let sub_agent_runner = SubAgentRunner::new(
            default_sub_agent_definitions(),
            registry_no_edit,
            wrapper_no_edit,
            registry_with_edit,
            wrapper_with_edit,
            conversation_store.clone(),
            llm_router.clone(),
            cancellation.clone(),
            workspace_root.clone(),
            config.agent.file_sample_cap,
            config.agent.temperature,
            config.agent.max_history,
        );

        let full_registry = always_on_builder(&workspace_root)
            .register(agent_run_descriptor(), Arc::new(sub_agent_runner));
        let full_registry = register_implement_if_allowed(full_registry, &config, backend_manager.clone()).build();

        let full_wrapper = ToolWrapper::new(full_registry.clone(), cancellation.clone(), events.clone());

        let sessions = Arc::new(SessionStore::new(sessions_dir()).await?);

        let agent_loop = Arc::new(AgentLoop::new(
            full_registry,
            full_wrapper,
            conversation_store,
            llm_router,
            cancellation.clone(),
            config.agent.clone(),
            workspace_root.clone(),
        ));

        Ok(Self {
            config,
            agent_loop,
            sessions,
            events,
            cancellation,
            backend_manager,
            mcp: McpAdapter::new(),
            workspace_root,
            _config_resolver: config_resolver,
        })
    }

    pub fn workspace_root(&self) -> &std::path::Path {
        &self.workspace_root
    }
}

fn sessions_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("codeagent")
        .join("sessions")
}

/// Every tool available regardless of edit permission: `search`/`query`/
/// `extract`/`list_files`/`search_files`/`attempt_completion`. Never
/// includes `implement` or `agent.run` — callers add those as needed.
fn always_on_builder(workspace_root: &std::path::Path) -> ToolRegistryBuilder {
    ToolRegistryBuilder::new()
        .register(search_descriptor(), Arc::new(Search))
        .register(query_descriptor(), Arc::new(Query))
        .register(extract_descriptor(), Arc::new(Extract))
        .register(list_files_descriptor(), Arc::new(ListFiles::new(workspace_root)))
        .register(search_files_descriptor(), Arc::new(SearchFiles::new(workspace_root)))
        .register(attempt_completion_descriptor(), Arc::new(AttemptCompletion))
}

fn register_implement_if_allowed(
    builder: ToolRegistryBuilder,
    config: &Config,
    backend_manager: Arc<BackendManager>,
) -> ToolRegistryBuilder {
    if config.agent.edit_allowed {
        builder.register(implement_descriptor(), Arc::new(ImplementTool::new(backend_manager)))
    } else {
        builder
    }
}

/// Fixed set of sub-agent personas `agent.run` may delegate to, mirroring
/// `ca_agent::persona`'s built-in names.
fn default_sub_agent_definitions() -> Vec<SubAgentDefinition> {
    vec![
        SubAgentDefinition {
            name: "default".to_string(),
            persona: "default".to_string(),
            edit_allowed: false,
            max_iterations: 15,
        },
        SubAgentDefinition {
            name: "reviewer".to_string(),
            persona: "reviewer".to_string(),
            edit_allowed: false,
            max_iterations: 15,
        },
        SubAgentDefinition {
            name: "architect".to_string(),
            persona: "architect".to_string(),
            edit_allowed: false,
            max_iterations: 15,
        },
    ]
}
