use std::collections::HashMap;

use async_trait::async_trait;
use ca_domain::error::{Error, Result};
use ca_domain::tool::{ParamSchema, ParamType, ToolDescriptor};

use crate::builtin::opaque_binary;
use crate::registry::ToolExecutor;

pub fn query_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "query".to_string(),
        parameters: vec![
            ParamSchema {
                name: "pattern".to_string(),
                required: true,
                kind: ParamType::String,
            },
            ParamSchema {
                name: "path".to_string(),
                required: false,
                kind: ParamType::String,
            },
            ParamSchema {
                name: "language".to_string(),
                required: false,
                kind: ParamType::String,
            },
        ],
        human_definition: r#"## query
Run a structural (AST-aware) query over the codebase, matching syntax shapes
rather than plain text.

Usage:
<query>
<pattern>fn $NAME($$$PARAMS) { $$$BODY }</pattern>
<path>optional/subdirectory</path>
<language>optional language hint</language>
</query>"#
            .to_string(),
    }
}

/// Structural code query, delegated to the opaque search binary's query mode.
pub struct Query;

#[async_trait]
impl ToolExecutor for Query {
    async fn execute(&self, params: &HashMap<String, String>) -> Result<String> {
        let pattern = params
            .get("pattern")
            .ok_or_else(|| Error::Validation("query requires 'pattern'".to_string()))?;
        let path = params.get("path").map(|s| s.as_str()).unwrap_or(".");

        let mut args = vec!["query".to_string(), pattern.clone(), path.to_string()];
        if let Some(lang) = params.get("language") {
            args.push("--language".to_string());
            args.push(lang.clone());
        }
        opaque_binary::run(&args).await
    }
}
