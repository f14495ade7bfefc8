//! Integration tests for the provider registry and router, exercised
//! without any network access.

use ca_domain::config::{LlmConfig, ProviderConfig, RoleConfig};
use ca_providers::{ChatRequest, LlmRouter, EXECUTOR_ROLE};
use std::collections::HashMap;

fn config_with_missing_key() -> LlmConfig {
    let mut roles = HashMap::new();
    roles.insert(
        EXECUTOR_ROLE.to_string(),
        RoleConfig {
            primary: "local/gpt-4o".into(),
            fallbacks: vec![],
            max_retries: 1,
        },
    );

    LlmConfig {
        providers: vec![ProviderConfig {
            id: "local".into(),
            base_url: "http://127.0.0.1:1/v1".into(),
            api_key_env: "CA_ROUTER_TEST_MISSING_KEY_VAR".into(),
            default_model: "gpt-4o".into(),
            timeout_secs: 1,
        }],
        roles,
        startup_policy: ca_domain::config::LlmStartupPolicy::AllowNone,
    }
}

#[test]
fn registry_records_init_error_for_unset_api_key_env() {
    std::env::remove_var("CA_ROUTER_TEST_MISSING_KEY_VAR");
    let config = config_with_missing_key();
    let router = LlmRouter::from_config(&config).unwrap();

    assert!(router.registry().is_empty());
    assert_eq!(router.registry().init_errors().len(), 1);
    assert_eq!(router.registry().init_errors()[0].provider_id, "local");
}

#[test]
fn registry_initializes_provider_once_api_key_env_is_set() {
    std::env::set_var("CA_ROUTER_TEST_PRESENT_KEY_VAR", "sk-test-value");
    let mut roles = HashMap::new();
    roles.insert(
        EXECUTOR_ROLE.to_string(),
        RoleConfig {
            primary: "local/gpt-4o".into(),
            fallbacks: vec![],
            max_retries: 1,
        },
    );
    let config = LlmConfig {
        providers: vec![ProviderConfig {
            id: "local".into(),
            base_url: "http://127.0.0.1:1/v1".into(),
            api_key_env: "CA_ROUTER_TEST_PRESENT_KEY_VAR".into(),
            default_model: "gpt-4o".into(),
            timeout_secs: 1,
        }],
        roles,
        startup_policy: ca_domain::config::LlmStartupPolicy::AllowNone,
    };

    let router = LlmRouter::from_config(&config).unwrap();
    assert_eq!(router.registry().len(), 1);
    assert!(router.registry().get("local").is_some());
    std::env::remove_var("CA_ROUTER_TEST_PRESENT_KEY_VAR");
}

#[tokio::test]
async fn chat_for_role_errors_when_role_unconfigured() {
    std::env::set_var("CA_ROUTER_TEST_PRESENT_KEY_VAR_2", "sk-test-value");
    let config = LlmConfig {
        providers: vec![ProviderConfig {
            id: "local".into(),
            base_url: "http://127.0.0.1:1/v1".into(),
            api_key_env: "CA_ROUTER_TEST_PRESENT_KEY_VAR_2".into(),
            default_model: "gpt-4o".into(),
            timeout_secs: 1,
        }],
        roles: HashMap::new(),
        startup_policy: ca_domain::config::LlmStartupPolicy::AllowNone,
    };
    let router = LlmRouter::from_config(&config).unwrap();

    let err = router
        .chat_for_role(EXECUTOR_ROLE, ChatRequest::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no role config"));
    std::env::remove_var("CA_ROUTER_TEST_PRESENT_KEY_VAR_2");
}

#[tokio::test]
async fn chat_for_role_fails_over_unreachable_provider_to_missing_fallback() {
    std::env::set_var("CA_ROUTER_TEST_PRESENT_KEY_VAR_3", "sk-test-value");
    let mut roles = HashMap::new();
    roles.insert(
        EXECUTOR_ROLE.to_string(),
        RoleConfig {
            primary: "local/gpt-4o".into(),
            fallbacks: vec!["nonexistent/model".into()],
            max_retries: 1,
        },
    );
    let config = LlmConfig {
        providers: vec![ProviderConfig {
            id: "local".into(),
            base_url: "http://127.0.0.1:1/v1".into(),
            api_key_env: "CA_ROUTER_TEST_PRESENT_KEY_VAR_3".into(),
            default_model: "gpt-4o".into(),
            timeout_secs: 1,
        }],
        roles,
        startup_policy: ca_domain::config::LlmStartupPolicy::AllowNone,
    };
    let router = LlmRouter::from_config(&config).unwrap();

    // Primary provider has no server listening at :1, so chat fails (and
    // the unconfigured fallback provider is skipped), leaving an error.
    let err = router
        .chat_for_role(EXECUTOR_ROLE, ChatRequest::default())
        .await
        .unwrap_err();
    assert!(!err.to_string().is_empty());
    std::env::remove_var("CA_ROUTER_TEST_PRESENT_KEY_VAR_3");
}
