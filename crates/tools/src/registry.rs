use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ca_domain::error::{Error, Result};
use ca_domain::tool::{ParamSchema, ParamType, ToolDescriptor};

/// A tool's executor, registered once at construction and immutable
/// thereafter. Pure function of its parameters — the wrapper (in the agent
/// crate) is the only thing that touches cancellation and the event bus.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, params: &HashMap<String, String>) -> Result<String>;
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    executor: Arc<dyn ToolExecutor>,
}

/// Name-keyed mapping of Tool Descriptors populated at agent construction.
/// Read-only after setup.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<HashMap<String, RegisteredTool>>,
}

pub struct ToolRegistryBuilder {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(
        mut self,
        descriptor: ToolDescriptor,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        self.tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                executor,
            },
        );
        self
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            tools: Arc::new(self.tools),
        }
    }
}

impl Default for ToolRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn is_registered(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name).map(|t| &t.descriptor)
    }

    /// Concatenated human-definitions of every registered tool, in the
    /// order they were registered, for inclusion in the system prompt.
    pub fn human_definitions(&self) -> String {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| self.tools[name].descriptor.human_definition.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Validate params against the tool's schema: required fields present,
    /// primitive types compatible.
    pub fn validate_params(&self, name: &str, params: &HashMap<String, String>) -> Result<()> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| Error::Validation(format!("unknown tool '{name}'")))?;

        for p in tool.descriptor.required_params() {
            if !params.contains_key(&p.name) {
                return Err(Error::Validation(format!(
                    "missing required parameter '{}' for tool '{name}'",
                    p.name
                )));
            }
        }

        for p in &tool.descriptor.parameters {
            if let Some(v) = params.get(&p.name) {
                if !type_compatible(p, v) {
                    return Err(Error::Validation(format!(
                        "parameter '{}' for tool '{name}' is not a valid {:?}",
                        p.name, p.kind
                    )));
                }
            }
        }

        Ok(())
    }

    /// Execute a registered tool's raw executor. Callers needing
    /// cancellation checks and event emission should go through the agent
    /// crate's Tool Wrapper instead of calling this directly.
    pub async fn execute(&self, name: &str, params: &HashMap<String, String>) -> Result<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| Error::Validation(format!("unknown tool '{name}'")))?;
        tool.executor.execute(params).await.map_err(|e| match e {
            Error::Validation(m) | Error::ParameterParseFailure(m) => Error::ToolExecution {
                tool: name.to_string(),
                message: m,
            },
            other => other,
        })
    }
}

fn type_compatible(schema: &ParamSchema, value: &str) -> bool {
    match schema.kind {
        ParamType::String => true,
        ParamType::Integer => value.trim().parse::<i64>().is_ok(),
        ParamType::Boolean => matches!(value.trim(), "true" | "false"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ToolExecutor for Echo {
        async fn execute(&self, params: &HashMap<String, String>) -> Result<String> {
            Ok(params.get("query").cloned().unwrap_or_default())
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistryBuilder::new()
            .register(
                ToolDescriptor {
                    name: "search".into(),
                    parameters: vec![ParamSchema {
                        name: "query".into(),
                        required: true,
                        kind: ParamType::String,
                    }],
                    human_definition: "<search><query>...</query></search>".into(),
                },
                Arc::new(Echo),
            )
            .build()
    }

    #[test]
    fn validate_params_rejects_missing_required() {
        let reg = registry();
        let err = reg.validate_params("search", &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn execute_runs_registered_tool() {
        let reg = registry();
        let mut params = HashMap::new();
        params.insert("query".to_string(), "router".to_string());
        let out = reg.execute("search", &params).await.unwrap();
        assert_eq!(out, "router");
    }

    #[tokio::test]
    async fn execute_unknown_tool_errors() {
        let reg = registry();
        let err = reg.execute("nope", &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
