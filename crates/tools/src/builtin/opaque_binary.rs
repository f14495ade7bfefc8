//! Shared plumbing for the three tools that shell out to an external,
//! semantically-opaque code-search binary.

use std::process::Stdio;

use ca_domain::error::{Error, Result};
use tokio::process::Command;

/// Resolve the binary name: an env override, falling back to `probe`.
pub fn binary_name() -> String {
    std::env::var("CODEAGENT_SEARCH_BIN").unwrap_or_else(|_| "probe".to_string())
}

/// Run the search binary with `args`, capturing combined stdout. The binary
/// is invoked directly (no shell), so none of its arguments are ever
/// interpreted as shell syntax.
pub async fn run(args: &[String]) -> Result<String> {
    let bin = binary_name();
    let output = Command::new(&bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| Error::ToolExecution {
            tool: bin.clone(),
            message: format!("failed to spawn '{bin}': {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::ToolExecution {
            tool: bin.clone(),
            message: format!(
                "'{bin}' exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            ),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
