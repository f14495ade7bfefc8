//! Tool Registry and built-in tools for the agent loop.
//!
//! `registry`/`parser` implement the Tool Registry, Tool Wrapper contract's
//! executor surface, and the markup tool-call parser. `builtin` holds the
//! concrete tool executors (search/query/extract/listFiles/searchFiles/
//! attempt_completion). `file_ops` holds the workspace-constrained path
//! validation and directory listing those built-ins share.

pub mod builtin;
pub mod file_ops;
pub mod parser;
pub mod registry;

pub use registry::{ToolExecutor, ToolRegistry};
