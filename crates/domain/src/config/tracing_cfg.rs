use serde::{Deserialize, Serialize};

/// Tracing / OTel exporter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceExporter {
    StdoutPlain,
    StdoutJson,
    Otlp,
}

impl Default for TraceExporter {
    fn default() -> Self {
        TraceExporter::StdoutJson
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    pub exporter: TraceExporter,
    /// Overridable by the standard log-level environment variable.
    #[serde(default = "d_level")]
    pub level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            exporter: TraceExporter::default(),
            level: d_level(),
            otlp_endpoint: None,
        }
    }
}

fn d_level() -> String {
    "info".into()
}
