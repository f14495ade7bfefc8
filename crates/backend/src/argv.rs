//! Argument and environment hardening for the process-spawning backend.
//!
//! No child of this backend is ever spawned through a shell. Every token
//! that reaches the child's argv is checked against this whitelist first;
//! the task text itself never touches argv at all (it goes into a temp
//! file, see `process_backend.rs`).

/// Characters that may never appear in a spawned argument (outside the
/// task file's own contents, which this module never sees).
const FORBIDDEN_CHARS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '<', '>', '*', '?', '\'', '"', '\\',
];

const MAX_ARG_LEN: usize = 4096;

/// Flags the process-spawning backend recognizes verbatim. Anything else
/// supplied through `additional_args` must be a `flag=value` pair or a
/// plain positional path; both are still run through `has_forbidden_chars`.
const WHITELISTED_FLAGS: &[&str] = &[
    "--yes",
    "--no-color",
    "--quiet",
    "--verbose",
    "--dry-run",
    "--auto-commit",
    "--no-auto-commit",
    "--generate-tests",
    "--stream",
    "--no-stream",
    "--json",
];

fn has_forbidden_chars(s: &str) -> bool {
    s.chars().any(|c| FORBIDDEN_CHARS.contains(&c))
}

/// One caller-supplied argument was dropped and why. Surfaced as a
/// `tracing::warn!` at the call site, per the shell-metacharacter-rejection
/// behavior: the backend logs and continues with the remaining args.
pub struct DroppedArg {
    pub arg: String,
    pub reason: &'static str,
}

/// Filter `additional_args` down to the subset safe to pass to the child.
/// Each surviving argument is one of: a whitelisted flag literal, a
/// `flag=value` pair whose value is metacharacter-free and length-capped,
/// or a positional token that is itself metacharacter-free and
/// length-capped.
pub fn sanitize_additional_args(args: &[String]) -> (Vec<String>, Vec<DroppedArg>) {
    let mut kept = Vec::new();
    let mut dropped = Vec::new();

    for arg in args {
        if arg.len() > MAX_ARG_LEN {
            dropped.push(DroppedArg {
                arg: arg.clone(),
                reason: "exceeds max argument length",
            });
            continue;
        }

        if WHITELISTED_FLAGS.contains(&arg.as_str()) {
            kept.push(arg.clone());
            continue;
        }

        if let Some((flag, value)) = arg.split_once('=') {
            if flag.starts_with("--") && !has_forbidden_chars(flag) && !has_forbidden_chars(value)
            {
                kept.push(arg.clone());
                continue;
            }
            dropped.push(DroppedArg {
                arg: arg.clone(),
                reason: "flag=value pair contains a shell metacharacter",
            });
            continue;
        }

        if !arg.starts_with('-') && !has_forbidden_chars(arg) {
            kept.push(arg.clone());
            continue;
        }

        dropped.push(DroppedArg {
            arg: arg.clone(),
            reason: "not a whitelisted flag, flag=value pair, or clean positional path",
        });
    }

    (kept, dropped)
}

/// Validate a model identifier destined for a `--model=` argv token.
/// Every token that reaches argv goes through this whitelist, including
/// ones built from request fields rather than `additional_args`.
pub fn sanitize_model(model: &str) -> Result<(), &'static str> {
    if model.len() > MAX_ARG_LEN {
        return Err("model identifier exceeds max argument length");
    }
    if has_forbidden_chars(model) {
        return Err("model identifier contains a shell metacharacter");
    }
    Ok(())
}

/// Reject a working directory path that isn't absolute or carries a
/// shell metacharacter.
pub fn validate_working_dir(path: &str) -> Result<(), &'static str> {
    if !std::path::Path::new(path).is_absolute() {
        return Err("working directory must be an absolute path");
    }
    if has_forbidden_chars(path) {
        return Err("working directory contains a shell metacharacter");
    }
    Ok(())
}

const MAX_ENV_VALUE_LEN: usize = 8192;

fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn is_valid_env_value(value: &str) -> bool {
    value.len() <= MAX_ENV_VALUE_LEN && !value.chars().any(|c| c.is_control())
}

/// Keep only environment entries whose key matches `[A-Z_][A-Z0-9_]*` and
/// whose value is length-capped and free of control characters.
pub fn sanitize_env(
    env: &std::collections::HashMap<String, String>,
) -> std::collections::HashMap<String, String> {
    env.iter()
        .filter(|(k, v)| is_valid_env_key(k) && is_valid_env_value(v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelisted_flag_survives() {
        let (kept, dropped) = sanitize_additional_args(&["--yes".to_string()]);
        assert_eq!(kept, vec!["--yes".to_string()]);
        assert!(dropped.is_empty());
    }

    #[test]
    fn shell_injection_attempt_is_dropped() {
        let (kept, dropped) = sanitize_additional_args(&["; rm -rf /".to_string()]);
        assert!(kept.is_empty());
        assert_eq!(dropped.len(), 1);
    }

    #[test]
    fn flag_value_pair_with_clean_value_survives() {
        let (kept, _) = sanitize_additional_args(&["--model=gpt-4o".to_string()]);
        assert_eq!(kept, vec!["--model=gpt-4o".to_string()]);
    }

    #[test]
    fn flag_value_pair_with_dirty_value_is_dropped() {
        let (kept, dropped) = sanitize_additional_args(&["--model=$(whoami)".to_string()]);
        assert!(kept.is_empty());
        assert_eq!(dropped.len(), 1);
    }

    #[test]
    fn positional_path_survives() {
        let (kept, _) = sanitize_additional_args(&["src/main.rs".to_string()]);
        assert_eq!(kept, vec!["src/main.rs".to_string()]);
    }

    #[test]
    fn positional_path_with_backtick_is_dropped() {
        let (kept, dropped) = sanitize_additional_args(&["`id`".to_string()]);
        assert!(kept.is_empty());
        assert_eq!(dropped.len(), 1);
    }

    #[test]
    fn sanitize_model_accepts_clean_identifier() {
        assert!(sanitize_model("gpt-4o").is_ok());
    }

    #[test]
    fn sanitize_model_rejects_metacharacters() {
        assert!(sanitize_model("$(whoami)").is_err());
        assert!(sanitize_model("gpt-4o; rm -rf /").is_err());
    }

    #[test]
    fn working_dir_must_be_absolute() {
        assert!(validate_working_dir("relative/path").is_err());
        assert!(validate_working_dir("/tmp/workdir").is_ok());
    }

    #[test]
    fn working_dir_rejects_metacharacters() {
        assert!(validate_working_dir("/tmp/$(whoami)").is_err());
    }

    #[test]
    fn env_sanitization_drops_invalid_keys_and_control_chars() {
        let mut env = std::collections::HashMap::new();
        env.insert("GOOD_KEY".to_string(), "value".to_string());
        env.insert("bad-key".to_string(), "value".to_string());
        env.insert("CONTROL".to_string(), "line1\nline2\0".to_string());

        let sanitized = sanitize_env(&env);
        assert_eq!(sanitized.len(), 1);
        assert!(sanitized.contains_key("GOOD_KEY"));
    }
}
