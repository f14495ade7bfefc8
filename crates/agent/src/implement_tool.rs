//! `implement` tool adapter: bridges the markup tool-call contract onto
//! the Implementation Backend Manager. Every other builtin tool is a pure
//! function of its parameters; this one owns an `Arc<BackendManager>`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ca_backend::BackendManager;
use ca_domain::backend::{ImplementContext, ImplementRequest};
use ca_domain::error::{Error, Result};
use ca_domain::tool::{ParamSchema, ParamType, ToolDescriptor};
use ca_tools::registry::ToolExecutor;

pub fn implement_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "implement".to_string(),
        parameters: vec![
            ParamSchema {
                name: "task".to_string(),
                required: true,
                kind: ParamType::String,
            },
            ParamSchema {
                name: "backend".to_string(),
                required: false,
                kind: ParamType::String,
            },
            ParamSchema {
                name: "working_dir".to_string(),
                required: false,
                kind: ParamType::String,
            },
            ParamSchema {
                name: "allowed_files".to_string(),
                required: false,
                kind: ParamType::String,
            },
            ParamSchema {
                name: "language".to_string(),
                required: false,
                kind: ParamType::String,
            },
            ParamSchema {
                name: "additional_context".to_string(),
                required: false,
                kind: ParamType::String,
            },
            ParamSchema {
                name: "generate_tests".to_string(),
                required: false,
                kind: ParamType::Boolean,
            },
            ParamSchema {
                name: "dry_run".to_string(),
                required: false,
                kind: ParamType::Boolean,
            },
        ],
        human_definition: r#"## implement
Hand a concrete coding task off to an implementation backend, which may
edit files directly. Only available when editing is allowed for this
session.

Usage:
<implement>
<task>add input validation to the signup handler</task>
<backend>optional backend name</backend>
<working_dir>optional absolute path</working_dir>
<allowed_files>optional comma-separated file list</allowed_files>
<language>optional source language hint</language>
<additional_context>optional extra context for the backend</additional_context>
<generate_tests>optional true/false</generate_tests>
<dry_run>optional true/false</dry_run>
</implement>"#
            .to_string(),
    }
}

/// Builds `ImplementContext` from the tool-call params, or `None` if the
/// caller supplied none of its fields.
fn build_context(params: &HashMap<String, String>) -> Option<ImplementContext> {
    let working_dir = params.get("working_dir").cloned();
    let allowed_files: Vec<String> = params
        .get("allowed_files")
        .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();
    let language = params.get("language").cloned();
    let additional_context = params.get("additional_context").cloned();

    if working_dir.is_none() && allowed_files.is_empty() && language.is_none() && additional_context.is_none() {
        return None;
    }

    Some(ImplementContext {
        working_dir,
        allowed_files,
        language,
        additional_context,
    })
}

pub struct ImplementTool {
    manager: Arc<BackendManager>,
}

impl ImplementTool {
    pub fn new(manager: Arc<BackendManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ToolExecutor for ImplementTool {
    async fn execute(&self, params: &HashMap<String, String>) -> Result<String> {
        let task = params
            .get("task")
            .ok_or_else(|| Error::Validation("implement requires 'task'".to_string()))?
            .clone();
        let session_id = params
            .get("session_id")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        let context = build_context(params);

        let request = ImplementRequest {
            session_id,
            task,
            context,
            options: ca_domain::backend::ImplementOptions {
                backend: params.get("backend").cloned(),
                generate_tests: params.get("generate_tests").is_some_and(|v| v == "true"),
                dry_run: params.get("dry_run").is_some_and(|v| v == "true"),
                ..Default::default()
            },
        };

        let result = self.manager.execute(&request, None).await?;
        serde_json::to_string_pretty(&result)
            .map_err(|e| Error::Internal(format!("failed to serialize backend result: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ca_backend::{Backend, ProgressCallback};
    use ca_domain::backend::{
        BackendCapabilities, BackendConfig, BackendResult, BackendSessionStatus, DiffStats,
    };

    struct Stub {
        caps: BackendCapabilities,
    }

    impl Stub {
        fn new() -> Self {
            Self {
                caps: BackendCapabilities {
                    languages: vec!["rust".to_string()],
                    streaming: false,
                    direct_file_edit: true,
                    test_generation: false,
                    concurrent_session_ceiling: 1,
                },
            }
        }
    }

    #[async_trait]
    impl Backend for Stub {
        fn name(&self) -> &str {
            "stub"
        }

        async fn initialize(&self, _config: &BackendConfig) -> Result<()> {
            Ok(())
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn capabilities(&self) -> &BackendCapabilities {
            &self.caps
        }

        fn required_dependencies(&self) -> &[String] {
            &[]
        }

        async fn execute(
            &self,
            request: &ImplementRequest,
            _progress: Option<ProgressCallback>,
        ) -> Result<BackendResult> {
            Ok(BackendResult {
                success: true,
                session_id: request.session_id.clone(),
                backend: "stub".to_string(),
                output: "done".to_string(),
                changes: vec![],
                metrics: DiffStats::default(),
                fallback: false,
            })
        }

        async fn cancel(&self, _session_id: &str) -> Result<()> {
            Ok(())
        }

        async fn status(&self, _session_id: &str) -> Option<BackendSessionStatus> {
            None
        }

        async fn cleanup(&self) -> Result<()> {
            Ok(())
        }
    }

    fn manager() -> Arc<BackendManager> {
        let config = BackendConfig {
            default_backend: "stub".to_string(),
            fallbacks: vec![],
            strategy: ca_domain::backend::SelectionStrategy::Explicit,
            concurrency_cap: 4,
            max_retries: 1,
            timeout_secs: 30,
        };
        let manager = BackendManager::new(config);
        manager.register(Arc::new(Stub::new()));
        Arc::new(manager)
    }

    #[tokio::test]
    async fn execute_builds_request_from_params_and_returns_json() {
        let tool = ImplementTool::new(manager());
        let mut params = HashMap::new();
        params.insert("task".to_string(), "add a test".to_string());
        params.insert("session_id".to_string(), "s1".to_string());
        let out = tool.execute(&params).await.unwrap();
        assert!(out.contains("\"success\": true"));
        assert!(out.contains("\"session_id\": \"s1\""));
    }

    #[tokio::test]
    async fn execute_requires_task_param() {
        let tool = ImplementTool::new(manager());
        let err = tool.execute(&HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
