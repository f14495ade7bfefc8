use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One configured LLM provider endpoint. Credentials are resolved from the
/// named environment variable only — there is no on-disk credential store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Environment variable holding the bearer token for this provider.
    pub api_key_env: String,
    pub default_model: String,
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,
}

/// Routing policy for one model role: a primary `provider_id/model`, an
/// ordered fallback list in the same form, and a retry cap applied to the
/// primary before the router walks the fallback list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    pub primary: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmStartupPolicy {
    /// Boot even if no provider initializes; LLM calls fail until fixed.
    AllowNone,
    /// Abort startup unless at least one provider initializes.
    RequireOne,
}

impl Default for LlmStartupPolicy {
    fn default() -> Self {
        LlmStartupPolicy::AllowNone
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default = "d_roles")]
    pub roles: HashMap<String, RoleConfig>,
    #[serde(default)]
    pub startup_policy: LlmStartupPolicy,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            roles: d_roles(),
            startup_policy: LlmStartupPolicy::default(),
        }
    }
}

fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_timeout_secs() -> u64 {
    60
}
fn d_max_retries() -> u32 {
    2
}
fn d_roles() -> HashMap<String, RoleConfig> {
    HashMap::new()
}
