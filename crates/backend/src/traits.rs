//! The eight-method contract every implementation backend satisfies.

use async_trait::async_trait;
use ca_domain::backend::{BackendCapabilities, BackendDescriptor, BackendResult, BackendSessionStatus, ImplementRequest};
use ca_domain::error::Result;

/// Progress callback invoked at most once per second with accumulated
/// output from the backend's child process.
pub type ProgressCallback = std::sync::Arc<dyn Fn(&str) + Send + Sync>;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable name, matched against `default_backend`/fallback
    /// entries in `BackendConfig` and against `options.backend` on a
    /// request.
    fn name(&self) -> &str;

    /// Re-read configuration. Called by the manager after a config
    /// hot-reload; backends that hold no mutable config may no-op.
    async fn initialize(&self, config: &ca_domain::backend::BackendConfig) -> Result<()>;

    async fn is_available(&self) -> bool;

    fn capabilities(&self) -> &BackendCapabilities;

    fn required_dependencies(&self) -> &[String];

    async fn execute(
        &self,
        request: &ImplementRequest,
        progress: Option<ProgressCallback>,
    ) -> Result<BackendResult>;

    async fn cancel(&self, session_id: &str) -> Result<()>;

    async fn status(&self, session_id: &str) -> Option<BackendSessionStatus>;

    /// Release any held resources (temp files, process handles) for
    /// sessions that are no longer tracked elsewhere.
    async fn cleanup(&self) -> Result<()>;
}

pub fn descriptor_of(backend: &dyn Backend, version: impl Into<String>) -> BackendDescriptor {
    BackendDescriptor {
        name: backend.name().to_string(),
        version: version.into(),
        capabilities: backend.capabilities().clone(),
        dependencies: backend.required_dependencies().to_vec(),
    }
}
