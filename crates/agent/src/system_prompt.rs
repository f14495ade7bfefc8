//! System prompt composition (§4.3 step 5): persona + markup formatting
//! rules + every registered tool's human definition + a capped,
//! gitignore-respecting sample of workspace file paths.

use std::path::Path;

use ca_tools::registry::ToolRegistry;
use ignore::WalkBuilder;

use crate::persona::resolve_persona;

const FORMATTING_RULES: &str = r#"## Response format
Emit at most one tool call per turn, as a top-level XML-like element whose
tag is the tool's name and whose children are its parameters, e.g.
<search_files><pattern>*.rs</pattern></search_files>. You may precede it
with a <thinking>...</thinking> scratchpad; its contents are never shown
to anyone and are stripped before your response is parsed. When the task
is done, respond with exactly one <attempt_completion>...</attempt_completion>
element containing the final result instead of a tool call."#;

/// Build the full system prompt for a fresh Agent Loop iteration.
pub fn build(
    persona_name: &str,
    persona_override: Option<&str>,
    registry: &ToolRegistry,
    workspace_root: &Path,
    file_sample_cap: usize,
) -> String {
    let persona = resolve_persona(persona_name, persona_override);
    let tools = registry.human_definitions();
    let sample = sample_file_paths(workspace_root, file_sample_cap);

    let mut sections = vec![persona, FORMATTING_RULES.to_string(), tools];
    if !sample.is_empty() {
        sections.push(format!(
            "## Workspace file sample (truncated at {file_sample_cap})\n{}",
            sample.join("\n")
        ));
    }
    sections.join("\n\n")
}

/// A capped, gitignore-respecting sample of relative file paths under
/// `root`, in directory-walk order. Not exhaustive — meant to orient the
/// model, not to substitute for the `search_files`/`list_files` tools.
fn sample_file_paths(root: &Path, cap: usize) -> Vec<String> {
    let mut paths = Vec::new();
    for entry in WalkBuilder::new(root).hidden(false).build() {
        if paths.len() >= cap {
            break;
        }
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            if let Ok(rel) = entry.path().strip_prefix(root) {
                paths.push(rel.to_string_lossy().into_owned());
            }
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use ca_tools::registry::ToolRegistryBuilder;

    #[test]
    fn build_includes_persona_rules_and_tools() {
        let registry = ToolRegistryBuilder::new().build();
        let dir = tempfile::tempdir().unwrap();
        let prompt = build("default", None, &registry, dir.path(), 10);
        assert!(prompt.contains("careful, methodical"));
        assert!(prompt.contains("attempt_completion"));
    }

    #[test]
    fn sample_file_paths_respects_cap() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..20 {
            std::fs::write(dir.path().join(format!("file{i}.rs")), "").unwrap();
        }
        let sample = sample_file_paths(dir.path(), 5);
        assert_eq!(sample.len(), 5);
    }

    #[test]
    fn sample_file_paths_respects_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "skip.rs\n").unwrap();
        std::fs::write(dir.path().join("skip.rs"), "").unwrap();
        std::fs::write(dir.path().join("keep.rs"), "").unwrap();
        let sample = sample_file_paths(dir.path(), 10);
        assert!(sample.iter().any(|p| p == "keep.rs"));
        assert!(!sample.iter().any(|p| p == "skip.rs"));
    }
}
