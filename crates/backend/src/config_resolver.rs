//! Configuration Resolver (§4.7): layers bundled defaults, an on-disk TOML
//! file, and a fixed, enumerated set of environment overrides into the
//! `BackendConfig` the manager runs against, then watches the file for
//! changes and drives `BackendManager::reload`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ca_domain::backend::{BackendConfig, SelectionStrategy};
use ca_domain::config::Config;
use ca_domain::error::{Error, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::manager::BackendManager;

/// Fixed environment variables the resolver consults, applied after the
/// file layer. There is no generic "any env shadows any key" mechanism.
pub const ENV_DEFAULT_BACKEND: &str = "CODEAGENT_BACKEND_DEFAULT";
pub const ENV_FALLBACKS: &str = "CODEAGENT_BACKEND_FALLBACKS";
pub const ENV_STRATEGY: &str = "CODEAGENT_BACKEND_STRATEGY";
pub const ENV_TIMEOUT_SECS: &str = "CODEAGENT_BACKEND_TIMEOUT_SECS";

const DEBOUNCE: Duration = Duration::from_millis(300);

/// Parses the raw on-disk/defaults layer, then the enumerated environment
/// overrides, into a `BackendConfig`. Each call starts from the compiled-in
/// defaults merged with whatever the file currently contains — a reload
/// never layers on top of a previous reload's values (§9 Scenario S9).
pub fn resolve(config_path: Option<&Path>) -> Result<BackendConfig> {
    let base = match config_path {
        Some(path) if path.exists() => Config::load(path.to_string_lossy().as_ref())?,
        _ => Config::default(),
    };
    let mut backend = base.backend;
    apply_env_overrides(&mut backend);
    validate(&backend)?;
    Ok(backend)
}

fn apply_env_overrides(backend: &mut BackendConfig) {
    if let Ok(value) = std::env::var(ENV_DEFAULT_BACKEND) {
        if !value.is_empty() {
            backend.default_backend = value;
        }
    }
    if let Ok(value) = std::env::var(ENV_FALLBACKS) {
        backend.fallbacks = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Ok(value) = std::env::var(ENV_STRATEGY) {
        if let Some(strategy) = parse_strategy(&value) {
            backend.strategy = strategy;
        }
    }
    if let Ok(value) = std::env::var(ENV_TIMEOUT_SECS) {
        if let Ok(secs) = value.parse::<u64>() {
            backend.timeout_secs = secs;
        }
    }
}

fn parse_strategy(value: &str) -> Option<SelectionStrategy> {
    match value.to_ascii_lowercase().as_str() {
        "explicit" => Some(SelectionStrategy::Explicit),
        "auto" => Some(SelectionStrategy::Auto),
        "capability" => Some(SelectionStrategy::Capability),
        _ => None,
    }
}

/// Rejects unknown selection strategies (already caught at deserialization
/// since `SelectionStrategy` is a closed enum) and warns (via `tracing`) on
/// a fallback list naming a backend absent from the default/fallback set
/// itself — a common typo source.
fn validate(backend: &BackendConfig) -> Result<()> {
    if backend.default_backend.is_empty() {
        return Err(Error::Config(
            "backend.default_backend must not be empty".into(),
        ));
    }
    for fallback in &backend.fallbacks {
        if fallback == &backend.default_backend {
            tracing::warn!(
                backend = %fallback,
                "fallback list names the default backend; it will be skipped on fallback"
            );
        }
    }
    Ok(())
}

/// Owns the file watcher and holds it alive for the process lifetime.
pub struct ConfigResolver {
    _watcher: Option<RecommendedWatcher>,
}

impl ConfigResolver {
    /// Resolve once and, if `config_path` is given, spawn a debounced
    /// watcher that calls `manager.reload(..)` on every subsequent change.
    pub fn start(config_path: Option<PathBuf>, manager: Arc<BackendManager>) -> Result<(Self, BackendConfig)> {
        let initial = resolve(config_path.as_deref())?;

        let watcher = match config_path {
            Some(path) => Some(spawn_watcher(path, manager)?),
            None => None,
        };

        Ok((Self { _watcher: watcher }, initial))
    }
}

fn spawn_watcher(path: PathBuf, manager: Arc<BackendManager>) -> Result<RecommendedWatcher> {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            if event.kind.is_modify() || event.kind.is_create() {
                let _ = tx.send(());
            }
        }
    })
    .map_err(|e| Error::Config(format!("failed to start config watcher: {e}")))?;

    watcher
        .watch(&path, RecursiveMode::NonRecursive)
        .map_err(|e| Error::Config(format!("failed to watch {}: {e}", path.display())))?;

    tokio::spawn(async move {
        let mut last: Option<BackendConfig> = None;
        loop {
            if rx.recv().await.is_none() {
                return;
            }
            // Debounce: collapse an editor save-burst into a single reload.
            tokio::time::sleep(DEBOUNCE).await;
            while rx.try_recv().is_ok() {}

            match resolve(Some(&path)) {
                Ok(new_config) => {
                    let changed = match &last {
                        Some(prev) => !backend_config_eq(prev, &new_config),
                        None => true,
                    };
                    if changed {
                        if let Err(e) = manager.reload(new_config.clone()).await {
                            tracing::warn!(error = %e, "backend manager reload failed");
                        }
                        last = Some(new_config);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "config reload: failed to parse, keeping prior config");
                }
            }
        }
    });

    Ok(watcher)
}

fn backend_config_eq(a: &BackendConfig, b: &BackendConfig) -> bool {
    a.default_backend == b.default_backend
        && a.fallbacks == b.fallbacks
        && a.strategy == b.strategy
        && a.concurrency_cap == b.concurrency_cap
        && a.max_retries == b.max_retries
        && a.timeout_secs == b.timeout_secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = resolve(Some(Path::new("/nonexistent/codeagent.toml"))).unwrap();
        assert_eq!(config.default_backend, "process");
    }

    #[test]
    fn file_overrides_default_backend() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[backend]\ndefault_backend = \"claude_code\"\n").unwrap();
        let config = resolve(Some(file.path())).unwrap();
        assert_eq!(config.default_backend, "claude_code");
    }

    #[test]
    fn env_override_wins_over_file() {
        std::env::set_var(ENV_DEFAULT_BACKEND, "from_env");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[backend]\ndefault_backend = \"from_file\"\n").unwrap();
        let config = resolve(Some(file.path())).unwrap();
        std::env::remove_var(ENV_DEFAULT_BACKEND);
        assert_eq!(config.default_backend, "from_env");
    }

    #[test]
    fn reload_starts_from_defaults_not_previous_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[backend]\nconcurrency_cap = 9\n").unwrap();
        let first = resolve(Some(file.path())).unwrap();
        assert_eq!(first.concurrency_cap, 9);

        let mut file2 = tempfile::NamedTempFile::new().unwrap();
        writeln!(file2, "[backend]\ndefault_backend = \"process\"\n").unwrap();
        let second = resolve(Some(file2.path())).unwrap();
        assert_eq!(second.concurrency_cap, 3, "a field absent from the new file must come from defaults, not the prior file");
    }

    #[test]
    fn unknown_strategy_in_env_is_ignored() {
        std::env::set_var(ENV_STRATEGY, "bogus");
        let config = resolve(None).unwrap();
        std::env::remove_var(ENV_STRATEGY);
        assert_eq!(config.strategy, SelectionStrategy::Auto);
    }
}
