//! Parses a process-spawning backend child's combined stdout/stderr into
//! file changes, diff statistics, and known error patterns.
//!
//! The child is an arbitrary external code-editing tool; its output
//! format isn't ours to define, so this is necessarily a best-effort
//! fixed family of regexes rather than a real parser.

use ca_domain::backend::{ChangeKind, DiffStats, FileChange};
use regex::Regex;
use std::sync::OnceLock;

fn created_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(?:Created|Creating|New file):\s+(?P<path>\S.*)$").unwrap()
    })
}

fn modified_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(?:Modified|Editing|Updated):\s+(?P<path>\S.*)$").unwrap()
    })
}

fn deleted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(?:Deleted|Removing|Removed):\s+(?P<path>\S.*)$").unwrap()
    })
}

/// `git status --short`-style single-letter prefixes: `A path`, `M path`,
/// `D path`.
fn vcs_status_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*([AMD])\s+(?P<path>\S.*)$").unwrap())
}

fn diff_summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^\s*(?P<files>\d+) files? changed(?:, (?P<ins>\d+) insertions?\(\+\))?(?:, (?P<del>\d+) deletions?\(-\))?\s*$",
        )
        .unwrap()
    })
}

const AUTH_ERROR_PATTERNS: &[&str] = &[
    "invalid api key",
    "unauthorized",
    "authentication failed",
    "401 ",
    "please set your api key",
    "api key not found",
    "no api key provided",
];

const OTHER_ERROR_PATTERNS: &[&str] = &[
    "error:",
    "fatal:",
    "traceback (most recent call last)",
    "panicked at",
    "command not found",
];

pub fn looks_like_auth_error(output: &str) -> bool {
    let lower = output.to_lowercase();
    AUTH_ERROR_PATTERNS.iter().any(|p| lower.contains(p))
}

pub fn looks_like_other_error(output: &str) -> bool {
    let lower = output.to_lowercase();
    OTHER_ERROR_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Extract file changes from combined child output. Dedupes by path,
/// keeping the first kind observed for a given path.
pub fn parse_file_changes(output: &str) -> Vec<FileChange> {
    let mut seen = std::collections::HashSet::new();
    let mut changes = Vec::new();

    let mut push = |path: &str, kind: ChangeKind| {
        let path = path.trim().to_string();
        if path.is_empty() || !seen.insert(path.clone()) {
            return;
        }
        changes.push(FileChange { path, kind });
    };

    for caps in created_re().captures_iter(output) {
        push(&caps["path"], ChangeKind::Created);
    }
    for caps in modified_re().captures_iter(output) {
        push(&caps["path"], ChangeKind::Modified);
    }
    for caps in deleted_re().captures_iter(output) {
        push(&caps["path"], ChangeKind::Deleted);
    }
    for caps in vcs_status_re().captures_iter(output) {
        let kind = match &caps[1] {
            "A" => ChangeKind::Created,
            "M" => ChangeKind::Modified,
            "D" => ChangeKind::Deleted,
            _ => continue,
        };
        push(&caps["path"], kind);
    }

    changes
}

/// Extract `{files_changed, insertions, deletions}` from a `git diff
/// --stat`-style summary line, if one is present.
pub fn parse_diff_stats(output: &str) -> DiffStats {
    match diff_summary_re().captures(output) {
        Some(caps) => DiffStats {
            files_changed: caps
                .name("files")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0),
            insertions: caps
                .name("ins")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0),
            deletions: caps
                .name("del")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0),
        },
        None => DiffStats::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labeled_change_lines() {
        let output = "Created: src/new.rs\nModified: src/lib.rs\nDeleted: src/old.rs\n";
        let changes = parse_file_changes(output);
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].kind, ChangeKind::Created);
        assert_eq!(changes[1].kind, ChangeKind::Modified);
        assert_eq!(changes[2].kind, ChangeKind::Deleted);
    }

    #[test]
    fn parses_vcs_status_prefixes() {
        let output = " M src/lib.rs\n A src/new.rs\n";
        let changes = parse_file_changes(output);
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn dedupes_by_path_keeping_first_kind() {
        let output = "Modified: src/lib.rs\n M src/lib.rs\n";
        let changes = parse_file_changes(output);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn parses_diff_summary_line() {
        let output = "3 files changed, 42 insertions(+), 7 deletions(-)";
        let stats = parse_diff_stats(output);
        assert_eq!(stats.files_changed, 3);
        assert_eq!(stats.insertions, 42);
        assert_eq!(stats.deletions, 7);
    }

    #[test]
    fn missing_summary_line_yields_zeroed_stats() {
        let stats = parse_diff_stats("no stats here");
        assert_eq!(stats.files_changed, 0);
    }

    #[test]
    fn detects_auth_error_patterns_case_insensitively() {
        assert!(looks_like_auth_error("Error: Invalid API Key provided"));
        assert!(!looks_like_auth_error("everything worked fine"));
    }

    #[test]
    fn detects_other_error_patterns() {
        assert!(looks_like_other_error("Traceback (most recent call last):"));
        assert!(!looks_like_other_error("all good"));
    }
}
