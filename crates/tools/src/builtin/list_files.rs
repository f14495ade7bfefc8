use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use ca_domain::error::{Error, Result};
use ca_domain::tool::{ParamSchema, ParamType, ToolDescriptor};

use crate::file_ops::{self, FileListRequest};
use crate::registry::ToolExecutor;

pub fn list_files_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "listFiles".to_string(),
        parameters: vec![ParamSchema {
            name: "path".to_string(),
            required: false,
            kind: ParamType::String,
        }],
        human_definition: r#"## listFiles
List the immediate contents (files and directories) of a directory relative
to the project root.

Usage:
<listFiles>
<path>optional/subdirectory</path>
</listFiles>"#
            .to_string(),
    }
}

/// Directory listing, scoped to the agent's workspace root.
pub struct ListFiles {
    pub workspace_root: std::path::PathBuf,
}

impl ListFiles {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            workspace_root: workspace_root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ToolExecutor for ListFiles {
    async fn execute(&self, params: &HashMap<String, String>) -> Result<String> {
        let path = params.get("path").cloned().unwrap_or_else(|| ".".to_string());
        let result = file_ops::file_list(&self.workspace_root, FileListRequest { path })
            .await
            .map_err(Error::Validation)?;
        Ok(serde_json::to_string_pretty(&result).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_immediate_directory_contents() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.rs"), "fn main() {}")
            .await
            .unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();

        let tool = ListFiles::new(dir.path());
        let out = tool.execute(&HashMap::new()).await.unwrap();
        assert!(out.contains("a.rs"));
        assert!(out.contains("sub"));
    }

    #[tokio::test]
    async fn rejects_path_escaping_workspace_root() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ListFiles::new(dir.path());
        let mut params = HashMap::new();
        params.insert("path".to_string(), "../../etc".to_string());
        assert!(tool.execute(&params).await.is_err());
    }
}
