//! `codeagent`: an agentic code-exploration and code-modification loop.
//! This crate is the thin ambient shell (CLI parsing, HTTP/SSE server,
//! tracing setup, per-session HTTP run locks) around the core in
//! `ca-agent`/`ca-backend`/`ca-providers`/`ca-tools`/`ca-sessions`.

pub mod cli;
pub mod error;
pub mod http;
pub mod locks;
pub mod runtime;
pub mod tracing_setup;
