//! MCP bridge: a pass-through stub. Wiring a real MCP client is out of
//! scope for this system (Open Question #1); this adapter exists so the
//! rest of the loop has a stable seam to call through when that lands.

use ca_domain::error::{Error, Result};

#[derive(Clone, Default)]
pub struct McpAdapter;

impl McpAdapter {
    pub fn new() -> Self {
        Self
    }

    pub async fn dispatch(&self, tool_name: &str, _params_json: &str) -> Result<String> {
        Err(Error::BackendUnavailable(format!(
            "MCP bridge is not wired up; cannot dispatch '{tool_name}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_always_reports_unavailable() {
        let adapter = McpAdapter::new();
        let err = adapter.dispatch("anything", "{}").await.unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }
}
