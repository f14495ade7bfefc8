//! CLI surface (§4.10): flags matching the external interface table in
//! §6 plus the `serve`/`config` subcommands. Parsing only — dispatch logic
//! lives in `main.rs` so it can own the async runtime and signal handling.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "codeagent", version, about = "Agentic code-exploration and code-modification loop")]
pub struct Cli {
    /// The task to hand to the agent loop. Read from stdin if omitted and
    /// no subcommand is given.
    pub task: Option<String>,

    /// Override the primary model for the `executor` role.
    #[arg(long)]
    pub model: Option<String>,

    /// Force a specific LLM provider id, bypassing the router's configured
    /// primary/fallback order.
    #[arg(long)]
    pub provider: Option<String>,

    /// Cap on agent-loop iterations for this invocation.
    #[arg(long = "max-iterations")]
    pub max_iterations: Option<u32>,

    /// Named persona, or literal override text if it doesn't match a
    /// built-in name.
    #[arg(long)]
    pub persona: Option<String>,

    /// Allow the `implement` tool to edit files for this invocation.
    #[arg(long)]
    pub edit: bool,

    /// Force a specific implementation backend by name.
    #[arg(long)]
    pub backend: Option<String>,

    /// Per-request timeout in seconds, applied to backend execution.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Path to the TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Tracing exporter: plain stdout, JSON stdout, or OTLP.
    #[arg(long = "trace-exporter", value_enum)]
    pub trace_exporter: Option<TraceExporterArg>,

    /// Emit `{ response, session_id, token_usage }` to stdout instead of
    /// human-readable output to stderr.
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP/SSE server.
    Serve,
    /// Print the fully resolved configuration (defaults + file + env).
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum TraceExporterArg {
    StdoutPlain,
    StdoutJson,
    Otlp,
}

impl From<TraceExporterArg> for ca_domain::config::TraceExporter {
    fn from(value: TraceExporterArg) -> Self {
        match value {
            TraceExporterArg::StdoutPlain => ca_domain::config::TraceExporter::StdoutPlain,
            TraceExporterArg::StdoutJson => ca_domain::config::TraceExporter::StdoutJson,
            TraceExporterArg::Otlp => ca_domain::config::TraceExporter::Otlp,
        }
    }
}
