//! Implementation Backend Manager: selects, retries, and falls back across
//! pluggable external code-editing engines on behalf of the `implement`
//! tool. Also hosts the Cancellation Hub (shared by the agent loop and the
//! tool wrapper) and the Configuration Resolver for backend settings.

pub mod argv;
pub mod cancellation;
pub mod changes;
pub mod config_resolver;
pub mod manager;
pub mod process_backend;
pub mod traits;

pub use cancellation::CancellationHub;
pub use config_resolver::ConfigResolver;
pub use manager::BackendManager;
pub use process_backend::{ProcessBackendSettings, ProcessSpawningBackend};
pub use traits::{Backend, ProgressCallback};
