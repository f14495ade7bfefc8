//! Markup Tool-Call Parser.
//!
//! Extracts at most one tool invocation from an assistant response string.
//! The wire format is `<tool_name><param>value</param>…</tool_name>`,
//! optionally preceded by a `<thinking>…</thinking>` scratchpad region that
//! is stripped (and logged) before the scan begins.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::registry::ToolRegistry;
use ca_domain::tool::ToolInvocation;

const ATTEMPT_COMPLETION: &str = "attempt_completion";

fn scratchpad_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<thinking>.*?</thinking>").expect("static scratchpad regex"))
}

fn child_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<([A-Za-z_][A-Za-z0-9_]*)>(.*?)</\1>").expect("static child regex")
    })
}

/// Outcome of one parse attempt.
#[derive(Debug, Clone)]
pub enum ParsedToolCall {
    /// A tool call whose parameters validated against the registered schema.
    Invocation(ToolInvocation),
    /// `attempt_completion` was emitted but its parameters did not validate.
    /// Per the parser contract this still terminates the loop, carrying the
    /// validation failure as the final result rather than being discarded.
    InvalidCompletion(String),
}

/// Remove scratchpad regions, returning the stripped text and the removed
/// scratchpad contents (for debug logging — never re-sent to the model).
pub fn strip_scratchpad(text: &str) -> (String, Vec<String>) {
    let re = scratchpad_re();
    let mut removed = Vec::new();
    for m in re.find_iter(text) {
        removed.push(m.as_str().to_string());
    }
    let stripped = re.replace_all(text, "").into_owned();
    (stripped, removed)
}

/// Parse the first top-level element whose tag matches a registered tool
/// name out of `text`. Returns `None` if no registered tool element is
/// found, malformed/unclosed markup is encountered, or (for a non-terminal
/// tool) parameter validation fails.
pub fn parse(text: &str, registry: &ToolRegistry) -> Option<ParsedToolCall> {
    let (stripped, _scratchpad) = strip_scratchpad(text);

    let (tool_name, inner) = find_first_tool_element(&stripped, registry)?;

    let params = if tool_name == ATTEMPT_COMPLETION {
        let mut p = HashMap::new();
        p.insert("result".to_string(), inner.trim().to_string());
        p
    } else {
        extract_children(&inner)
    };

    match registry.validate_params(&tool_name, &params) {
        Ok(()) => Some(ParsedToolCall::Invocation(ToolInvocation {
            tool_name,
            params,
        })),
        Err(e) if tool_name == ATTEMPT_COMPLETION => {
            Some(ParsedToolCall::InvalidCompletion(e.to_string()))
        }
        Err(_) => None,
    }
}

/// Scan for the earliest-occurring `<name>…</name>` pair whose `name` is a
/// registered tool. Multiple candidate tools in one response → the first
/// (by opening-tag position) wins.
fn find_first_tool_element(text: &str, registry: &ToolRegistry) -> Option<(String, String)> {
    let mut best: Option<(usize, String, String)> = None;

    for name in registry.names() {
        let open = format!("<{name}>");
        let close = format!("</{name}>");
        if let Some(open_pos) = text.find(&open) {
            let content_start = open_pos + open.len();
            if let Some(close_rel) = text[content_start..].find(&close) {
                let content_end = content_start + close_rel;
                let replace = match &best {
                    Some((pos, _, _)) => open_pos < *pos,
                    None => true,
                };
                if replace {
                    best = Some((
                        open_pos,
                        name.to_string(),
                        text[content_start..content_end].to_string(),
                    ));
                }
            }
        }
    }

    best.map(|(_, name, inner)| (name, inner))
}

/// Treat each direct child element of `inner` as a named parameter; the
/// child's text content is the parameter value.
fn extract_children(inner: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for cap in child_re().captures_iter(inner) {
        let name = cap[1].to_string();
        let value = cap[2].trim().to_string();
        params.insert(name, value);
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolRegistryBuilder;
    use async_trait::async_trait;
    use ca_domain::error::Result;
    use ca_domain::tool::{ParamSchema, ParamType, ToolDescriptor};
    use std::sync::Arc;

    struct Noop;

    #[async_trait]
    impl crate::registry::ToolExecutor for Noop {
        async fn execute(&self, _params: &HashMap<String, String>) -> Result<String> {
            Ok(String::new())
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
                    human_definition: String::new(),
                },
                Arc::new(Noop),
            )
            .register(
                ToolDescriptor {
                    name: "attempt_completion".into(),
                    parameters: vec![ParamSchema {
                        name: "result".into(),
                        required: true,
                        kind: ParamType::String,
                    }],
                    human_definition: String::new(),
                },
                Arc::new(Noop),
            )
            .build()
    }

    #[test]
    fn strips_scratchpad_before_scanning() {
        let reg = registry();
        let text = "<thinking>let me look around</thinking><search><query>foo</query></search>";
        let (stripped, removed) = strip_scratchpad(text);
        assert_eq!(removed.len(), 1);
        assert!(!stripped.contains("thinking"));
        match parse(text, &reg) {
            Some(ParsedToolCall::Invocation(inv)) => {
                assert_eq!(inv.tool_name, "search");
                assert_eq!(inv.params.get("query").unwrap(), "foo");
            }
            other => panic!("expected invocation, got {other:?}"),
        }
    }

    #[test]
    fn takes_first_of_multiple_tool_elements() {
        let reg = registry();
        let text = "<search><query>a</query></search><search><query>b</query></search>";
        match parse(text, &reg) {
            Some(ParsedToolCall::Invocation(inv)) => {
                assert_eq!(inv.params.get("query").unwrap(), "a");
            }
            other => panic!("expected invocation, got {other:?}"),
        }
    }

    #[test]
    fn unknown_tool_name_returns_none() {
        let reg = registry();
        let text = "<frobnicate><x>1</x></frobnicate>";
        assert!(parse(text, &reg).is_none());
    }

    #[test]
    fn unclosed_markup_returns_none() {
        let reg = registry();
        let text = "<search><query>foo</query>";
        assert!(parse(text, &reg).is_none());
    }

    #[test]
    fn attempt_completion_preserves_inner_markup_verbatim() {
        let reg = registry();
        let text = "<attempt_completion>here is a <code>snippet</code> for you</attempt_completion>";
        match parse(text, &reg) {
            Some(ParsedToolCall::Invocation(inv)) => {
                assert_eq!(inv.tool_name, "attempt_completion");
                assert_eq!(
                    inv.params.get("result").unwrap(),
                    "here is a <code>snippet</code> for you"
                );
            }
            other => panic!("expected invocation, got {other:?}"),
        }
    }

    #[test]
    fn missing_required_param_on_non_terminal_tool_returns_none() {
        let reg = registry();
        let text = "<search></search>";
        assert!(parse(text, &reg).is_none());
    }

    #[test]
    fn invalid_attempt_completion_yields_invalid_completion() {
        let reg = registry();
        let text = "<attempt_completion></attempt_completion>";
        match parse(text, &reg) {
            Some(ParsedToolCall::InvalidCompletion(_)) => {}
            other => panic!("expected invalid completion, got {other:?}"),
        }
    }

    #[test]
    fn no_tool_element_returns_none() {
        let reg = registry();
        assert!(parse("just plain prose, no markup here", &reg).is_none());
    }
}
