//! Concrete executors for the always-registered tools.
//!
//! `search`, `query`, and `extract` shell out to an external code-search
//! binary (`probe` by default, overridable via `CODEAGENT_SEARCH_BIN`) whose
//! internal semantics are opaque to this crate — we only depend on its CLI
//! surface. `list_files`/`search_files` are grounded on `file_ops`/`ignore`.
//! `attempt_completion` is the terminal sentinel; it has no side effects.

mod attempt_completion;
mod extract;
mod list_files;
mod opaque_binary;
mod query;
mod search;
mod search_files;

pub use attempt_completion::{attempt_completion_descriptor, AttemptCompletion};
pub use extract::{extract_descriptor, Extract};
pub use list_files::{list_files_descriptor, ListFiles};
pub use query::{query_descriptor, Query};
pub use search::{search_descriptor, Search};
pub use search_files::{search_files_descriptor, SearchFiles};
