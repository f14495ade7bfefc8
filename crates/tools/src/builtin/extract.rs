use std::collections::HashMap;

use async_trait::async_trait;
use ca_domain::error::{Error, Result};
use ca_domain::tool::{ParamSchema, ParamType, ToolDescriptor};

use crate::builtin::opaque_binary;
use crate::registry::ToolExecutor;

pub fn extract_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "extract".to_string(),
        parameters: vec![
            ParamSchema {
                name: "file".to_string(),
                required: true,
                kind: ParamType::String,
            },
            ParamSchema {
                name: "symbol".to_string(),
                required: false,
                kind: ParamType::String,
            },
            ParamSchema {
                name: "lines".to_string(),
                required: false,
                kind: ParamType::String,
            },
        ],
        human_definition: r#"## extract
Extract a whole function/type/block from a file, either by symbol name or by
a line range, instead of reading the entire file.

Usage:
<extract>
<file>path/to/file.rs</file>
<symbol>optional_function_name</symbol>
<lines>optional 10-42</lines>
</extract>"#
            .to_string(),
    }
}

/// Code extraction by symbol or line range, delegated to the opaque search
/// binary's extract mode.
pub struct Extract;

#[async_trait]
impl ToolExecutor for Extract {
    async fn execute(&self, params: &HashMap<String, String>) -> Result<String> {
        let file = params
            .get("file")
            .ok_or_else(|| Error::Validation("extract requires 'file'".to_string()))?;

        let mut args = vec!["extract".to_string(), file.clone()];
        if let Some(symbol) = params.get("symbol") {
            args.push("--symbol".to_string());
            args.push(symbol.clone());
        }
        if let Some(lines) = params.get("lines") {
            args.push("--lines".to_string());
            args.push(lines.clone());
        }
        opaque_binary::run(&args).await
    }
}
