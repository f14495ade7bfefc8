//! LLM router: resolves a role to a primary model, retries it up to the
//! configured cap, then walks the ordered fallback list.
//!
//! Single-adapter scope means there is nothing left to capability-gate on
//! per fallback entry — every provider in the registry is an
//! `OpenAiCompatProvider`, so fallback selection is a plain ordered walk.

use crate::registry::ProviderRegistry;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use ca_domain::config::RoleConfig;
use ca_domain::error::{Error, Result};
use ca_domain::trace::TraceEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// The only role this loop ever routes for. Kept as a string constant
/// rather than an enum variant — role names come from config, not code.
pub const EXECUTOR_ROLE: &str = "executor";

pub struct LlmRouter {
    registry: ProviderRegistry,
    role_configs: HashMap<String, RoleConfig>,
    default_timeout_ms: u64,
}

impl LlmRouter {
    pub fn from_config(llm_config: &ca_domain::config::LlmConfig) -> Result<Self> {
        let registry = ProviderRegistry::from_config(llm_config)?;
        let role_configs = llm_config.roles.clone();
        let default_timeout_ms = llm_config
            .providers
            .first()
            .map(|p| p.timeout_secs * 1000)
            .unwrap_or(60_000);

        Ok(Self {
            registry,
            role_configs,
            default_timeout_ms,
        })
    }

    pub fn new(
        registry: ProviderRegistry,
        role_configs: HashMap<String, RoleConfig>,
        default_timeout_ms: u64,
    ) -> Self {
        Self {
            registry,
            role_configs,
            default_timeout_ms,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Send a chat request for a named role. Tries the primary model up to
    /// `max_retries` times, then walks the fallback list in order, stopping
    /// at the first success.
    pub async fn chat_for_role(&self, role: &str, mut req: ChatRequest) -> Result<ChatResponse> {
        let role_cfg = self
            .role_configs
            .get(role)
            .ok_or_else(|| Error::Config(format!("no role config for '{role}'")))?;

        let candidates = std::iter::once(role_cfg.primary.as_str())
            .chain(role_cfg.fallbacks.iter().map(String::as_str));

        let mut last_err = None;

        for (idx, model_str) in candidates.enumerate() {
            let (provider_id, model_name) = resolve_model(model_str);
            let provider = match self.registry.get(provider_id) {
                Some(p) => p,
                None => {
                    tracing::warn!(provider = %provider_id, "provider not found in registry, trying next");
                    continue;
                }
            };

            if idx > 0 {
                TraceEvent::LlmFallback {
                    from_provider: role_cfg.primary.clone(),
                    from_model: model_name.to_string(),
                    to_provider: provider_id.to_string(),
                    to_model: model_name.to_string(),
                    reason: "primary model failed or unavailable".to_string(),
                }
                .emit();
            }

            req.model = if model_name.is_empty() {
                None
            } else {
                Some(model_name.to_string())
            };

            let attempts = if idx == 0 { role_cfg.max_retries.max(1) } else { 1 };
            let mut attempt_err = None;

            for attempt in 0..attempts {
                let start = Instant::now();
                let result = self.try_chat(&provider, &req).await;
                let duration_ms = start.elapsed().as_millis() as u64;

                match result {
                    Ok(resp) => {
                        TraceEvent::LlmRequest {
                            provider: provider_id.to_string(),
                            model: model_name.to_string(),
                            role: role.to_string(),
                            streaming: false,
                            duration_ms,
                            prompt_tokens: resp.usage.as_ref().map(|u| u.prompt_tokens),
                            completion_tokens: resp.usage.as_ref().map(|u| u.completion_tokens),
                        }
                        .emit();
                        return Ok(resp);
                    }
                    Err(e) if Self::is_retriable(&e) && attempt + 1 < attempts => {
                        tracing::warn!(
                            provider = %provider_id,
                            model = %model_name,
                            attempt,
                            error = %e,
                            "retriable error, retrying"
                        );
                        attempt_err = Some(e);
                    }
                    Err(e) => {
                        TraceEvent::LlmRequest {
                            provider: provider_id.to_string(),
                            model: model_name.to_string(),
                            role: role.to_string(),
                            streaming: false,
                            duration_ms,
                            prompt_tokens: None,
                            completion_tokens: None,
                        }
                        .emit();
                        attempt_err = Some(e);
                        break;
                    }
                }
            }

            last_err = attempt_err;
        }

        Err(last_err.unwrap_or_else(|| Error::Provider {
            provider: "router".into(),
            message: format!("all models for role '{role}' failed or were unavailable"),
        }))
    }

    async fn try_chat(
        &self,
        provider: &Arc<dyn LlmProvider>,
        req: &ChatRequest,
    ) -> Result<ChatResponse> {
        let timeout = std::time::Duration::from_millis(self.default_timeout_ms);
        match tokio::time::timeout(timeout, provider.chat(req.clone())).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "provider '{}' timed out after {}ms",
                provider.provider_id(),
                self.default_timeout_ms
            ))),
        }
    }

    /// Streaming counterpart of `chat_for_role`. Retries/falls over on
    /// failure to *open* the stream (connection refused, auth error, 5xx on
    /// the initial response); once a stream is handed back, errors that
    /// surface mid-stream arrive as `StreamEvent::Error` items for the
    /// caller to handle, since re-opening a partially-consumed stream would
    /// duplicate already-emitted tokens.
    pub async fn chat_stream_for_role(
        &self,
        role: &str,
        mut req: ChatRequest,
    ) -> Result<ca_domain::stream::BoxStream<'static, Result<ca_domain::stream::StreamEvent>>> {
        let role_cfg = self
            .role_configs
            .get(role)
            .ok_or_else(|| Error::Config(format!("no role config for '{role}'")))?;

        let candidates = std::iter::once(role_cfg.primary.as_str())
            .chain(role_cfg.fallbacks.iter().map(String::as_str));

        let mut last_err = None;

        for (idx, model_str) in candidates.enumerate() {
            let (provider_id, model_name) = resolve_model(model_str);
            let provider = match self.registry.get(provider_id) {
                Some(p) => p,
                None => {
                    tracing::warn!(provider = %provider_id, "provider not found in registry, trying next");
                    continue;
                }
            };

            if idx > 0 {
                TraceEvent::LlmFallback {
                    from_provider: role_cfg.primary.clone(),
                    from_model: model_name.to_string(),
                    to_provider: provider_id.to_string(),
                    to_model: model_name.to_string(),
                    reason: "primary stream failed to open".to_string(),
                }
                .emit();
            }

            req.model = if model_name.is_empty() {
                None
            } else {
                Some(model_name.to_string())
            };

            let attempts = if idx == 0 { role_cfg.max_retries.max(1) } else { 1 };
            let mut attempt_err = None;

            for attempt in 0..attempts {
                let start = Instant::now();
                let timeout = std::time::Duration::from_millis(self.default_timeout_ms);
                let result = tokio::time::timeout(timeout, provider.chat_stream(req.clone())).await;
                let duration_ms = start.elapsed().as_millis() as u64;

                match result {
                    Ok(Ok(stream)) => {
                        TraceEvent::LlmRequest {
                            provider: provider_id.to_string(),
                            model: model_name.to_string(),
                            role: role.to_string(),
                            streaming: true,
                            duration_ms,
                            prompt_tokens: None,
                            completion_tokens: None,
                        }
                        .emit();
                        return Ok(stream);
                    }
                    Ok(Err(e)) if Self::is_retriable(&e) && attempt + 1 < attempts => {
                        tracing::warn!(provider = %provider_id, model = %model_name, attempt, error = %e, "retriable stream-open error, retrying");
                        attempt_err = Some(e);
                    }
                    Ok(Err(e)) => {
                        attempt_err = Some(e);
                        break;
                    }
                    Err(_) => {
                        let e = Error::Timeout(format!(
                            "provider '{}' timed out opening stream after {}ms",
                            provider.provider_id(),
                            self.default_timeout_ms
                        ));
                        let retry = attempt + 1 < attempts;
                        attempt_err = Some(e);
                        if !retry {
                            break;
                        }
                    }
                }
            }

            last_err = attempt_err;
        }

        Err(last_err.unwrap_or_else(|| Error::Provider {
            provider: "router".into(),
            message: format!("all models for role '{role}' failed to open a stream"),
        }))
    }

    fn is_retriable(err: &Error) -> bool {
        match err {
            Error::Timeout(_) => true,
            Error::Http(_) => true,
            Error::Provider { message, .. } => {
                message.contains("HTTP 5") || message.contains("HTTP 429")
            }
            _ => false,
        }
    }
}

/// Split a `"provider_id/model_name"` string into its two components. With
/// no `/`, the whole string is the provider id and the provider's default
/// model is used.
pub fn resolve_model(model_str: &str) -> (&str, &str) {
    match model_str.split_once('/') {
        Some((provider, model)) => (provider, model),
        None => (model_str, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::resolve_model;

    #[test]
    fn resolve_model_splits_provider_and_model() {
        assert_eq!(resolve_model("openai/gpt-4o"), ("openai", "gpt-4o"));
    }

    #[test]
    fn resolve_model_without_slash_has_empty_model() {
        assert_eq!(resolve_model("openai"), ("openai", ""));
    }
}
