use serde::{Deserialize, Serialize};

/// Agent Loop configuration: iteration/history caps, persona, and the
/// edit-allowed gate on the `implement` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "d_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "d_max_history")]
    pub max_history: usize,
    #[serde(default = "d_persona")]
    pub persona: String,
    #[serde(default)]
    pub edit_allowed: bool,
    #[serde(default = "d_file_sample_cap")]
    pub file_sample_cap: usize,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: d_max_iterations(),
            max_history: d_max_history(),
            persona: d_persona(),
            edit_allowed: false,
            file_sample_cap: d_file_sample_cap(),
            temperature: d_temperature(),
        }
    }
}

fn d_max_iterations() -> u32 {
    30
}
fn d_max_history() -> usize {
    100
}
fn d_persona() -> String {
    "default".into()
}
fn d_file_sample_cap() -> usize {
    100
}
fn d_temperature() -> f32 {
    0.3
}
