//! Process-spawning backend: launches an external code-editing executable
//! and turns its exit/output into a `BackendResult`.
//!
//! Grounded in the old teacher exec tool's spawn/monitor split, but never
//! shells out: the child is spawned directly from a validated argv, and
//! the task text crosses the process boundary through a temp file rather
//! than command-line interpolation.

use crate::argv::{sanitize_additional_args, sanitize_env, sanitize_model, validate_working_dir};
use crate::changes::{looks_like_auth_error, looks_like_other_error, parse_diff_stats, parse_file_changes};
use crate::traits::{Backend, ProgressCallback};
use async_trait::async_trait;
use ca_domain::backend::{
    BackendCapabilities, BackendConfig, BackendResult, BackendSessionStatus, ChangeKind, DiffStats,
    FileChange, ImplementRequest,
};
use ca_domain::error::{Error, Result};
use parking_lot::RwLock as PLRwLock;
use std::collections::HashMap;
use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

/// Per-backend settings the Configuration Resolver loads separately from
/// the manager-wide `BackendConfig`. These describe *this* concrete
/// backend's executable and limits, not backend selection policy.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProcessBackendSettings {
    #[serde(default = "d_command_name")]
    pub command_name: String,
    #[serde(default)]
    pub well_known_paths: Vec<String>,
    #[serde(default = "d_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "d_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "d_concurrent_session_ceiling")]
    pub concurrent_session_ceiling: u32,
}

fn d_command_name() -> String {
    "aider".into()
}
fn d_max_output_bytes() -> usize {
    10 * 1024 * 1024
}
fn d_timeout_secs() -> u64 {
    20 * 60
}
fn d_grace_period_secs() -> u64 {
    5
}
fn d_concurrent_session_ceiling() -> u32 {
    3
}

impl Default for ProcessBackendSettings {
    fn default() -> Self {
        Self {
            command_name: d_command_name(),
            well_known_paths: Vec::new(),
            max_output_bytes: d_max_output_bytes(),
            timeout_secs: d_timeout_secs(),
            grace_period_secs: d_grace_period_secs(),
            concurrent_session_ceiling: d_concurrent_session_ceiling(),
        }
    }
}

/// Clamp a requested timeout into `[1 min, 1 h]`.
fn clamp_timeout_secs(secs: u64) -> u64 {
    secs.clamp(60, 3600)
}

struct TrackedSession {
    status: BackendSessionStatus,
    kill_tx: Option<mpsc::Sender<()>>,
}

pub struct ProcessSpawningBackend {
    settings: PLRwLock<ProcessBackendSettings>,
    capabilities: BackendCapabilities,
    sessions: AsyncMutex<HashMap<String, TrackedSession>>,
}

impl ProcessSpawningBackend {
    pub fn new(settings: ProcessBackendSettings) -> Self {
        let capabilities = BackendCapabilities {
            languages: vec!["*".to_string()],
            streaming: true,
            direct_file_edit: true,
            test_generation: true,
            concurrent_session_ceiling: settings.concurrent_session_ceiling,
        };
        Self {
            settings: PLRwLock::new(settings),
            capabilities,
            sessions: AsyncMutex::new(HashMap::new()),
        }
    }

    fn settings_snapshot(&self) -> ProcessBackendSettings {
        self.settings.read().clone()
    }

    /// Try a command name (and a fixed set of well-known install paths) in
    /// order, probing each with a short `--version` call. The first
    /// candidate that responds wins.
    async fn locate_executable(&self, settings: &ProcessBackendSettings) -> Result<String> {
        let mut candidates = vec![settings.command_name.clone()];
        candidates.extend(settings.well_known_paths.iter().cloned());

        for candidate in &candidates {
            if probe_executable(candidate).await {
                return Ok(candidate.clone());
            }
        }

        Err(Error::BackendUnavailable(format!(
            "no working '{}' executable found on PATH or in well-known install paths",
            settings.command_name
        )))
    }
}

async fn probe_executable(candidate: &str) -> bool {
    let spawned = tokio::process::Command::new(candidate)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .spawn();

    match spawned {
        Ok(mut child) => matches!(
            tokio::time::timeout(Duration::from_secs(3), child.wait()).await,
            Ok(Ok(_))
        ),
        Err(_) => false,
    }
}

/// Output accumulator with a hard cap: pushing past it is an error rather
/// than the sliding-window truncation the generic exec tool uses, since
/// exceeding the cap here must terminate the child.
struct CappedOutput {
    buf: String,
    cap: usize,
}

impl CappedOutput {
    fn new(cap: usize) -> Self {
        Self {
            buf: String::new(),
            cap,
        }
    }

    fn push(&mut self, text: &str) -> std::result::Result<(), ()> {
        self.buf.push_str(text);
        if self.buf.len() > self.cap {
            Err(())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Backend for ProcessSpawningBackend {
    fn name(&self) -> &str {
        "process"
    }

    async fn initialize(&self, _config: &BackendConfig) -> Result<()> {
        Ok(())
    }

    async fn is_available(&self) -> bool {
        let settings = self.settings_snapshot();
        self.locate_executable(&settings).await.is_ok()
    }

    fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    fn required_dependencies(&self) -> &[String] {
        &[]
    }

    async fn execute(
        &self,
        request: &ImplementRequest,
        progress: Option<ProgressCallback>,
    ) -> Result<BackendResult> {
        // 1. Validate.
        if request.task.trim().is_empty() {
            return Err(Error::Validation("task must not be empty".into()));
        }

        let settings = self.settings_snapshot();

        {
            let sessions = self.sessions.lock().await;
            let in_flight = sessions
                .values()
                .filter(|s| s.status == BackendSessionStatus::Running)
                .count() as u32;
            if in_flight >= settings.concurrent_session_ceiling {
                return Err(Error::QuotaExceeded(format!(
                    "process backend concurrency ceiling ({}) reached",
                    settings.concurrent_session_ceiling
                )));
            }
        }

        // 2. Resolve and validate working dir / model before touching disk
        // or the process table, so a dry run exercises the same checks a
        // real run would.
        let working_dir = request
            .context
            .as_ref()
            .and_then(|c| c.working_dir.clone())
            .unwrap_or_else(|| std::env::current_dir().map(|p| p.display().to_string()).unwrap_or_else(|_| "/".into()));
        validate_working_dir(&working_dir)
            .map_err(|e| Error::Validation(format!("working directory rejected: {e}")))?;

        if let Some(model) = &request.options.model {
            sanitize_model(model)
                .map_err(|reason| Error::Validation(format!("model identifier rejected: {reason}")))?;
        }

        if request.options.dry_run {
            return Ok(BackendResult {
                success: true,
                session_id: request.session_id.clone(),
                backend: self.name().to_string(),
                output: "dry run: no changes applied".to_string(),
                changes: Vec::new(),
                metrics: DiffStats::default(),
                fallback: false,
            });
        }

        // 3. Prepare: task text (plus any structured context) to a temp
        // file, argv built from the whitelist.
        let mut task_text = request.task.clone();
        if let Some(context) = &request.context {
            if let Some(language) = &context.language {
                task_text = format!("Language: {language}\n{task_text}");
            }
            if let Some(additional) = &context.additional_context {
                task_text = format!("{task_text}\n\nAdditional context:\n{additional}");
            }
        }

        let mut task_file = tempfile::Builder::new()
            .prefix("codeagent-task-")
            .suffix(".txt")
            .tempfile()
            .map_err(|e| Error::Internal(format!("failed to create task file: {e}")))?;
        task_file
            .write_all(task_text.as_bytes())
            .map_err(|e| Error::Internal(format!("failed to write task file: {e}")))?;
        let task_path = task_file.path().to_string_lossy().to_string();

        let (kept_args, dropped_args) = sanitize_additional_args(&request.options.additional_args);
        for dropped in &dropped_args {
            tracing::warn!(arg = %dropped.arg, reason = dropped.reason, "dropping unsafe backend argument");
        }

        let allowed_files = request
            .context
            .as_ref()
            .map(|c| c.allowed_files.clone())
            .unwrap_or_default();
        let (kept_allowed, dropped_allowed) = sanitize_additional_args(&allowed_files);
        for dropped in &dropped_allowed {
            tracing::warn!(arg = %dropped.arg, reason = dropped.reason, "dropping unsafe allowed-file entry");
        }

        let mut argv = vec!["--task-file".to_string(), task_path.clone()];
        if request.options.auto_commit {
            argv.push("--auto-commit".to_string());
        }
        if request.options.generate_tests {
            argv.push("--generate-tests".to_string());
        }
        if let Some(model) = &request.options.model {
            argv.push(format!("--model={model}"));
        }
        argv.extend(kept_args);
        argv.extend(kept_allowed);

        let mut env_map = HashMap::new();
        if let Ok(path) = std::env::var("PATH") {
            env_map.insert("PATH".to_string(), path);
        }
        let sanitized_env = sanitize_env(&env_map);

        // 3. Locate executable.
        let executable = self.locate_executable(&settings).await?;

        // 4. Spawn.
        let mut cmd = tokio::process::Command::new(&executable);
        cmd.args(&argv);
        cmd.current_dir(&working_dir);
        cmd.env_clear();
        for (k, v) in &sanitized_env {
            cmd.env(k, v);
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::BackendUnavailable(format!("failed to spawn '{executable}': {e}")))?;
        let child_pid = child.id();

        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
        self.sessions.lock().await.insert(
            request.session_id.clone(),
            TrackedSession {
                status: BackendSessionStatus::Running,
                kill_tx: Some(kill_tx),
            },
        );

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let output = Arc::new(AsyncMutex::new(CappedOutput::new(settings.max_output_bytes)));
        let overflow = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let (flush_tx, mut flush_rx) = mpsc::unbounded_channel::<()>();

        let out_for_stdout = output.clone();
        let overflow_stdout = overflow.clone();
        let flush_stdout = flush_tx.clone();
        let stdout_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    let mut buf = out_for_stdout.lock().await;
                    if buf.push(&line).is_err() || buf.push("\n").is_err() {
                        overflow_stdout.store(true, std::sync::atomic::Ordering::SeqCst);
                    }
                    let _ = flush_stdout.send(());
                }
            }
        });

        let out_for_stderr = output.clone();
        let overflow_stderr = overflow.clone();
        let flush_stderr = flush_tx.clone();
        let stderr_task = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    let mut buf = out_for_stderr.lock().await;
                    if buf.push(&line).is_err() || buf.push("\n").is_err() {
                        overflow_stderr.store(true, std::sync::atomic::Ordering::SeqCst);
                    }
                    let _ = flush_stderr.send(());
                }
            }
        });
        drop(flush_tx);

        // Progress forwarding: at most once per second.
        let progress_output = output.clone();
        let progress_task = progress.map(|cb| {
            tokio::spawn(async move {
                let mut last_flush = Instant::now() - Duration::from_secs(1);
                while flush_rx.recv().await.is_some() {
                    if last_flush.elapsed() >= Duration::from_secs(1) {
                        let snapshot = progress_output.lock().await.buf.clone();
                        cb(&snapshot);
                        last_flush = Instant::now();
                    }
                }
            })
        });

        let timeout_secs = clamp_timeout_secs(
            request
                .options
                .timeout_secs
                .unwrap_or(settings.timeout_secs),
        );
        let grace = Duration::from_secs(settings.grace_period_secs);

        #[derive(Clone, Copy)]
        enum Outcome {
            Exited(std::process::ExitStatus),
            TimedOut,
            Cancelled,
            OutputTooLarge,
        }

        let outcome = loop {
            if overflow.load(std::sync::atomic::Ordering::SeqCst) {
                break Outcome::OutputTooLarge;
            }
            tokio::select! {
                biased;
                result = child.wait() => {
                    match result {
                        Ok(status) => break Outcome::Exited(status),
                        Err(e) => {
                            tracing::warn!(error = %e, "error waiting on backend child");
                            break Outcome::Exited(std::process::ExitStatus::default());
                        }
                    }
                }
                _ = kill_rx.recv() => break Outcome::Cancelled,
                _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => break Outcome::TimedOut,
                _ = tokio::time::sleep(Duration::from_millis(200)) => continue,
            }
        };

        let terminal_status = match outcome {
            Outcome::Exited(_) => {}
            Outcome::TimedOut | Outcome::Cancelled | Outcome::OutputTooLarge => {
                graceful_then_forceful_kill(&mut child, child_pid, grace).await;
            }
        };
        let _ = terminal_status;

        let _ = stdout_task.await;
        let _ = stderr_task.await;
        if let Some(task) = progress_task {
            task.abort();
        }

        {
            let mut sessions = self.sessions.lock().await;
            if let Some(tracked) = sessions.get_mut(&request.session_id) {
                tracked.kill_tx = None;
                tracked.status = match outcome {
                    Outcome::Exited(ref s) if s.success() => BackendSessionStatus::Completed,
                    Outcome::Cancelled => BackendSessionStatus::Cancelled,
                    _ => BackendSessionStatus::Failed,
                };
            }
        }

        // 9. Always delete the temp task file, on every exit path.
        drop(task_file);

        let combined_output = output.lock().await.buf.clone();

        match outcome {
            Outcome::Cancelled => Err(Error::Cancellation),
            Outcome::OutputTooLarge => Err(Error::OutputTooLarge(format!(
                "backend child output exceeded {} bytes",
                settings.max_output_bytes
            ))),
            Outcome::TimedOut => Err(Error::Timeout(format!(
                "backend child exceeded {timeout_secs}s timeout"
            ))),
            Outcome::Exited(status) => {
                if !status.success() {
                    return Err(Error::ToolExecution {
                        tool: "implement".into(),
                        message: format!(
                            "backend process exited with {:?}: {}",
                            status.code(),
                            truncate(&combined_output, 4000)
                        ),
                    });
                }

                if looks_like_auth_error(&combined_output) {
                    return Err(Error::Auth(format!(
                        "backend reported an authentication failure: {}",
                        truncate(&combined_output, 2000)
                    )));
                }

                let changes: Vec<FileChange> = parse_file_changes(&combined_output);
                if changes.is_empty() && looks_like_other_error(&combined_output) {
                    return Err(Error::ToolExecution {
                        tool: "implement".into(),
                        message: format!(
                            "backend reported an error and made no changes: {}",
                            truncate(&combined_output, 2000)
                        ),
                    });
                }

                let metrics = parse_diff_stats(&combined_output);
                Ok(BackendResult {
                    success: true,
                    session_id: request.session_id.clone(),
                    backend: self.name().to_string(),
                    output: combined_output,
                    changes,
                    metrics,
                    fallback: false,
                })
            }
        }
    }

    async fn cancel(&self, session_id: &str) -> Result<()> {
        let tx = {
            let sessions = self.sessions.lock().await;
            sessions.get(session_id).and_then(|s| s.kill_tx.clone())
        };
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
        Ok(())
    }

    async fn status(&self, session_id: &str) -> Option<BackendSessionStatus> {
        self.sessions.lock().await.get(session_id).map(|s| s.status)
    }

    async fn cleanup(&self) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, s| s.status == BackendSessionStatus::Running);
        Ok(())
    }
}

#[cfg(unix)]
async fn graceful_then_forceful_kill(
    child: &mut tokio::process::Child,
    pid: Option<u32>,
    grace: Duration,
) {
    if let Some(pid) = pid {
        // SAFETY: `kill(-pid, SIGTERM)` targets the whole process group
        // created by `process_group(0)` above, matching the POSIX
        // negative-pid convention for group signals.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
    }
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        if let Some(pid) = pid {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        } else {
            let _ = child.start_kill();
        }
        let _ = child.wait().await;
    }
}

#[cfg(not(unix))]
async fn graceful_then_forceful_kill(
    child: &mut tokio::process::Child,
    _pid: Option<u32>,
    grace: Duration,
) {
    let _ = child.start_kill();
    let _ = tokio::time::timeout(grace, child.wait()).await;
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}... [truncated]", &s[..max])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_timeout_enforces_bounds() {
        assert_eq!(clamp_timeout_secs(10), 60);
        assert_eq!(clamp_timeout_secs(10_000), 3600);
        assert_eq!(clamp_timeout_secs(300), 300);
    }

    #[test]
    fn capped_output_errors_past_cap() {
        let mut out = CappedOutput::new(8);
        assert!(out.push("1234").is_ok());
        assert!(out.push("56789").is_err());
    }

    #[tokio::test]
    async fn execute_rejects_empty_task() {
        let backend = ProcessSpawningBackend::new(ProcessBackendSettings::default());
        let req = ImplementRequest {
            session_id: "s1".into(),
            task: "   ".into(),
            context: None,
            options: Default::default(),
        };
        let err = backend.execute(&req, None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn status_is_none_for_unknown_session() {
        let backend = ProcessSpawningBackend::new(ProcessBackendSettings::default());
        assert!(backend.status("nope").await.is_none());
    }

    #[tokio::test]
    async fn execute_rejects_model_with_shell_metacharacters() {
        let backend = ProcessSpawningBackend::new(ProcessBackendSettings::default());
        let req = ImplementRequest {
            session_id: "s2".into(),
            task: "add a test".into(),
            context: None,
            options: ca_domain::backend::ImplementOptions {
                model: Some("gpt-4o; rm -rf /".into()),
                ..Default::default()
            },
        };
        let err = backend.execute(&req, None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn execute_short_circuits_on_dry_run() {
        let backend = ProcessSpawningBackend::new(ProcessBackendSettings::default());
        let req = ImplementRequest {
            session_id: "s3".into(),
            task: "add a test".into(),
            context: None,
            options: ca_domain::backend::ImplementOptions {
                dry_run: true,
                ..Default::default()
            },
        };
        let result = backend.execute(&req, None).await.unwrap();
        assert!(result.success);
        assert!(result.changes.is_empty());
        assert!(backend.status("s3").await.is_none());
    }

    #[tokio::test]
    async fn execute_rejects_unwritable_working_dir_from_context() {
        let backend = ProcessSpawningBackend::new(ProcessBackendSettings::default());
        let req = ImplementRequest {
            session_id: "s4".into(),
            task: "add a test".into(),
            context: Some(ca_domain::backend::ImplementContext {
                working_dir: Some("relative/path".into()),
                ..Default::default()
            }),
            options: Default::default(),
        };
        let err = backend.execute(&req, None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
