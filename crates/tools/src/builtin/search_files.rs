use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ca_domain::error::{Error, Result};
use ca_domain::tool::{ParamSchema, ParamType, ToolDescriptor};
use ignore::WalkBuilder;

use crate::file_ops::validate_path;
use crate::registry::ToolExecutor;

pub fn search_files_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "searchFiles".to_string(),
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
        ],
        human_definition: r#"## searchFiles
Glob for file paths by name pattern (e.g. "*.rs", "**/test_*.py"),
respecting .gitignore.

Usage:
<searchFiles>
<pattern>*.rs</pattern>
<path>optional/subdirectory</path>
</searchFiles>"#
            .to_string(),
    }
}

/// Gitignore-respecting filename globbing, scoped to the workspace root.
pub struct SearchFiles {
    pub workspace_root: PathBuf,
}

impl SearchFiles {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            workspace_root: workspace_root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ToolExecutor for SearchFiles {
    async fn execute(&self, params: &HashMap<String, String>) -> Result<String> {
        let pattern = params
            .get("pattern")
            .ok_or_else(|| Error::Validation("searchFiles requires 'pattern'".to_string()))?;

        let subpath = params.get("path").cloned().unwrap_or_else(|| ".".to_string());
        let root = validate_path(&self.workspace_root, &subpath).map_err(Error::Validation)?;
        let glob = build_glob(pattern, &root)?;

        let mut matches = Vec::new();
        for entry in WalkBuilder::new(&root).hidden(false).build() {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                if let Ok(rel) = entry.path().strip_prefix(&self.workspace_root) {
                    if glob.matched(entry.path(), false).is_whitelist() {
                        matches.push(rel.to_string_lossy().into_owned());
                    }
                }
            }
        }

        matches.sort();
        Ok(matches.join("\n"))
    }
}

fn build_glob(pattern: &str, base: &Path) -> Result<ignore::overrides::Override> {
    let mut builder = ignore::overrides::OverrideBuilder::new(base);
    builder
        .add(pattern)
        .map_err(|e| Error::Validation(format!("invalid glob pattern '{pattern}': {e}")))?;
    builder
        .build()
        .map_err(|e| Error::Validation(format!("invalid glob pattern '{pattern}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn globs_match_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("main.rs"), "").await.unwrap();
        tokio::fs::write(dir.path().join("readme.md"), "").await.unwrap();

        let tool = SearchFiles::new(dir.path());
        let mut params = HashMap::new();
        params.insert("pattern".to_string(), "*.rs".to_string());
        let out = tool.execute(&params).await.unwrap();
        assert!(out.contains("main.rs"));
        assert!(!out.contains("readme.md"));
    }

    #[tokio::test]
    async fn respects_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(".gitignore"), "ignored.rs\n")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("ignored.rs"), "").await.unwrap();
        tokio::fs::write(dir.path().join("kept.rs"), "").await.unwrap();

        let tool = SearchFiles::new(dir.path());
        let mut params = HashMap::new();
        params.insert("pattern".to_string(), "*.rs".to_string());
        let out = tool.execute(&params).await.unwrap();
        assert!(out.contains("kept.rs"));
        assert!(!out.contains("ignored.rs"));
    }
}
