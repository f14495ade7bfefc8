use std::collections::HashMap;

use async_trait::async_trait;
use ca_domain::error::{Error, Result};
use ca_domain::tool::{ParamSchema, ParamType, ToolDescriptor};

use crate::builtin::opaque_binary;
use crate::registry::ToolExecutor;

pub fn search_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "search".to_string(),
        parameters: vec![
            ParamSchema {
                name: "query".to_string(),
                required: true,
                kind: ParamType::String,
            },
            ParamSchema {
                name: "path".to_string(),
                required: false,
                kind: ParamType::String,
            },
        ],
        human_definition: r#"## search
Search the codebase for code matching a natural-language or keyword query.

Usage:
<search>
<query>your search terms</query>
<path>optional/subdirectory</path>
</search>"#
            .to_string(),
    }
}

/// Full-text/semantic code search, delegated to the opaque search binary.
pub struct Search;

#[async_trait]
impl ToolExecutor for Search {
    async fn execute(&self, params: &HashMap<String, String>) -> Result<String> {
        let query = params
            .get("query")
            .ok_or_else(|| Error::Validation("search requires 'query'".to_string()))?;
        let path = params.get("path").map(|s| s.as_str()).unwrap_or(".");

        let args = vec!["search".to_string(), query.clone(), path.to_string()];
        opaque_binary::run(&args).await
    }
}
