//! Persona selection (§4.3 step 5): a small fixed set of named personas
//! baked into the binary, overridable per-call with literal text from the
//! caller.

/// Built-in persona text, by name. New personas are added here, not
/// discovered from config or disk.
fn named_persona(name: &str) -> Option<&'static str> {
    match name {
        "default" => Some(
            "You are a careful, methodical software engineering assistant. \
             Explore before you edit, and prefer the smallest change that \
             satisfies the task.",
        ),
        "reviewer" => Some(
            "You are a code reviewer. Read before judging, point out \
             concrete defects with file and line references, and say \
             nothing about style unless it affects correctness.",
        ),
        "architect" => Some(
            "You are a systems architect. Favor understanding the existing \
             design before proposing changes, and call out tradeoffs \
             explicitly rather than picking silently.",
        ),
        _ => None,
    }
}

/// Resolve the persona block for the system prompt. An explicit override
/// always wins; otherwise the configured name is looked up in the built-in
/// set, falling back to the `default` persona for an unrecognized name.
pub fn resolve_persona(configured_name: &str, override_text: Option<&str>) -> String {
    if let Some(text) = override_text {
        return text.to_string();
    }
    named_persona(configured_name)
        .or_else(|| named_persona("default"))
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_text_always_wins() {
        let resolved = resolve_persona("reviewer", Some("be terse"));
        assert_eq!(resolved, "be terse");
    }

    #[test]
    fn known_name_resolves_to_its_block() {
        let resolved = resolve_persona("architect", None);
        assert!(resolved.contains("systems architect"));
    }

    #[test]
    fn unknown_name_falls_back_to_default() {
        let resolved = resolve_persona("nonexistent", None);
        assert_eq!(resolved, named_persona("default").unwrap());
    }
}
