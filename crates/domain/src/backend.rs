use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `{ name, version, capabilities, dependencies, config }`. Created at
/// registry setup, initialized lazily, cleaned up at process exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub name: String,
    pub version: String,
    pub capabilities: BackendCapabilities,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCapabilities {
    pub languages: Vec<String>,
    pub streaming: bool,
    pub direct_file_edit: bool,
    pub test_generation: bool,
    pub concurrent_session_ceiling: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendSessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// `{ session_id, backend_name, child_process_handle?, status,
/// cancel_callback, temp_artifacts[] }`. The `child_process_handle` and
/// `cancel_callback` are held by the concrete backend implementation, not
/// serialized here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSession {
    pub session_id: String,
    pub backend_name: String,
    pub status: BackendSessionStatus,
    pub temp_artifacts: Vec<String>,
}

/// `{ session_id, task, context?, options?, callbacks? }`. `callbacks` is
/// represented by the caller holding a progress-channel sender rather than
/// serialized data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementRequest {
    pub session_id: String,
    pub task: String,
    #[serde(default)]
    pub context: Option<ImplementContext>,
    #[serde(default)]
    pub options: ImplementOptions,
}

/// `{ working_dir?, allowed_files[], language?, additional_context? }`. Every
/// field is optional; a backend that doesn't understand one of them is free
/// to ignore it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImplementContext {
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub allowed_files: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub additional_context: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImplementOptions {
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub auto_commit: bool,
    #[serde(default)]
    pub generate_tests: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub additional_args: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffStats {
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
}

/// `{ success, session_id, output, changes[], metrics, metadata }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendResult {
    pub success: bool,
    pub session_id: String,
    pub backend: String,
    pub output: String,
    pub changes: Vec<FileChange>,
    pub metrics: DiffStats,
    #[serde(default)]
    pub fallback: bool,
}

/// Bundled backend-manager + per-backend configuration, as resolved by the
/// Configuration Resolver (defaults -> file -> env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub default_backend: String,
    pub fallbacks: Vec<String>,
    pub strategy: SelectionStrategy,
    pub concurrency_cap: u32,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    Explicit,
    Auto,
    Capability,
}

impl Default for SelectionStrategy {
    fn default() -> Self {
        SelectionStrategy::Auto
    }
}

/// Timestamped marker useful for temp-artifact naming (`<session_id>-<ts>`).
pub fn artifact_timestamp(now: DateTime<Utc>) -> i64 {
    now.timestamp_millis()
}
