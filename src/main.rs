use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use codeagent::cli::{Cli, Command};
use codeagent::http::{self, AppState};
use codeagent::locks::SessionLocks;
use codeagent::runtime::Runtime;

/// Enumerated environment overrides the CLI layer applies on top of the
/// file/defaults config, matching the naming convention the Backend
/// Manager's own resolver already uses (`config_resolver.rs`).
const ENV_MODEL: &str = "CODEAGENT_MODEL";
const ENV_PROVIDER: &str = "CODEAGENT_PROVIDER";
const ENV_EDIT_ALLOWED: &str = "CODEAGENT_EDIT_ALLOWED";
const ENV_MAX_ITERATIONS: &str = "CODEAGENT_MAX_ITERATIONS";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = run(cli).await;
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> i32 {
    let config_path = cli.config.clone();
    let mut config = match &config_path {
        Some(path) if path.exists() => match ca_domain::config::Config::load(&path.to_string_lossy()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("failed to load config from {}: {e}", path.display());
                return 1;
            }
        },
        _ => ca_domain::config::Config::default(),
    };

    apply_overrides(&mut config, &cli);

    if let Some(exporter) = cli.trace_exporter {
        config.tracing.exporter = exporter.into();
    }
    let _tracing_guard = match codeagent::tracing_setup::init(&config.tracing) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize tracing: {e}");
            return 1;
        }
    };

    let workspace_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    match &cli.command {
        Some(Command::Config) => {
            match serde_json::to_string_pretty(&config) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("failed to serialize configuration: {e}");
                    return 1;
                }
            }
            return 0;
        }
        Some(Command::Serve) => {
            return run_serve(config, config_path, workspace_root).await;
        }
        None => {}
    }

    let task = match cli.task.clone() {
        Some(t) => t,
        None => {
            use std::io::Read;
            let mut buf = String::new();
            if std::io::stdin().read_to_string(&mut buf).is_err() || buf.trim().is_empty() {
                eprintln!("no task given: pass it as an argument or pipe it on stdin");
                return 1;
            }
            buf
        }
    };

    run_ask(config, config_path, workspace_root, task, cli.json).await
}

fn apply_overrides(config: &mut ca_domain::config::Config, cli: &Cli) {
    if let Some(max_iterations) = cli.max_iterations {
        config.agent.max_iterations = max_iterations;
    } else if let Ok(value) = std::env::var(ENV_MAX_ITERATIONS) {
        if let Ok(parsed) = value.parse() {
            config.agent.max_iterations = parsed;
        }
    }

    if cli.edit {
        config.agent.edit_allowed = true;
    } else if let Ok(value) = std::env::var(ENV_EDIT_ALLOWED) {
        config.agent.edit_allowed = value == "1" || value.eq_ignore_ascii_case("true");
    }

    if let Some(persona) = &cli.persona {
        config.agent.persona = persona.clone();
    }

    if let Some(backend) = &cli.backend {
        config.backend.default_backend = backend.clone();
    }

    if let Some(timeout) = cli.timeout {
        config.backend.timeout_secs = timeout;
    }

    let model_override = cli.model.clone().or_else(|| std::env::var(ENV_MODEL).ok());
    let provider_override = cli.provider.clone().or_else(|| std::env::var(ENV_PROVIDER).ok());

    if model_override.is_some() || provider_override.is_some() {
        for role in config.llm.roles.values_mut() {
            let (current_provider, current_model) = role
                .primary
                .split_once('/')
                .map(|(p, m)| (p.to_string(), m.to_string()))
                .unwrap_or_else(|| (role.primary.clone(), String::new()));
            let provider = provider_override.clone().unwrap_or(current_provider);
            let model = model_override.clone().unwrap_or(current_model);
            role.primary = format!("{provider}/{model}");
        }
    }
}

async fn run_serve(config: ca_domain::config::Config, config_path: Option<PathBuf>, workspace_root: PathBuf) -> i32 {
    let host = config.server.host.clone();
    let port = config.server.port;

    let runtime = match Runtime::build(config, config_path, workspace_root).await {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("failed to start: {e}");
            return 1;
        }
    };

    let state = AppState {
        runtime,
        locks: SessionLocks::new(),
    };
    let app = http::router(state);

    let addr = format!("{host}:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to bind {addr}: {e}");
            return 1;
        }
    };

    tracing::info!(%addr, "codeagent server listening");

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("server error: {e}");
        return 1;
    }
    0
}

async fn run_ask(
    config: ca_domain::config::Config,
    config_path: Option<PathBuf>,
    workspace_root: PathBuf,
    task: String,
    json_output: bool,
) -> i32 {
    let runtime = match Runtime::build(config, config_path, workspace_root).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("failed to start: {e}");
            return 1;
        }
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = runtime
        .sessions
        .get_or_create(&session_id, ca_domain::session::SessionOrigin::Cli)
        .await
    {
        eprintln!("failed to create session: {e}");
        return 1;
    }

    let cancellation = runtime.cancellation.clone();
    let session_for_signal = session_id.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancellation.cancel(&session_for_signal);
        }
    });

    let result = runtime.agent_loop.chat(&task, &session_id).await;

    match result {
        Ok(chat_result) => {
            let _ = runtime.sessions.record_usage(&session_id, &chat_result.token_usage).await;
            if json_output {
                let body = serde_json::json!({
                    "response": chat_result.response,
                    "session_id": session_id,
                    "token_usage": chat_result.token_usage,
                });
                println!("{body}");
            } else {
                eprintln!(
                    "[tokens: {} prompt / {} completion]",
                    chat_result.token_usage.prompt_tokens, chat_result.token_usage.completion_tokens
                );
                println!("{}", chat_result.response);
            }
            0
        }
        Err(ca_domain::error::Error::Cancellation) => {
            eprintln!("cancelled");
            499
        }
        Err(e) if e.is_critical() => {
            eprintln!("critical error: {e}");
            1
        }
        Err(e) => {
            if json_output {
                let body = serde_json::json!({
                    "response": format!("Error: {e}"),
                    "session_id": session_id,
                    "token_usage": ca_domain::stream::Usage::default(),
                });
                println!("{body}");
            } else {
                eprintln!("Error: {e}");
            }
            0
        }
    }
}
