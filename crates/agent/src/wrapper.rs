//! Tool Wrapper (§4.1): the only caller of `ToolRegistry::execute` that
//! touches cancellation and the event bus. Six steps — resolve session,
//! register, emit `started`, poll-interleave cancellation during execution,
//! emit a terminal event on completion or failure, suppress terminal events
//! entirely if cancellation won the race.

use std::collections::HashMap;
use std::time::Duration;

use ca_backend::CancellationHub;
use ca_domain::error::{Error, Result};
use ca_domain::tool::{bounded_preview, ToolEvent, ToolEventStatus};
use ca_tools::registry::ToolRegistry;
use chrono::Utc;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct ToolWrapper {
    registry: ToolRegistry,
    cancellation: CancellationHub,
    events: crate::event_bus::EventBus,
}

impl ToolWrapper {
    pub fn new(registry: ToolRegistry, cancellation: CancellationHub, events: crate::event_bus::EventBus) -> Self {
        Self {
            registry,
            cancellation,
            events,
        }
    }

    /// Run `tool_name` with `params`, injecting `session_id` if the caller
    /// didn't set one. Returns `Err(Error::Cancellation)` if the session was
    /// cancelled before, during, or immediately after execution, without
    /// emitting any terminal event for this invocation.
    pub async fn call(
        &self,
        tool_name: &str,
        mut params: HashMap<String, String>,
        default_session_id: &str,
    ) -> Result<String> {
        let session_id = params
            .get("session_id")
            .cloned()
            .unwrap_or_else(|| default_session_id.to_string());
        params
            .entry("session_id".to_string())
            .or_insert_with(|| session_id.clone());

        if self.cancellation.is_cancelled(&session_id) {
            return Err(Error::Cancellation);
        }

        self.events.publish(
            &session_id,
            ToolEvent {
                timestamp: Utc::now(),
                name: tool_name.to_string(),
                args: params.clone(),
                status: ToolEventStatus::Started,
                result_preview: None,
                error: None,
            },
        );

        let exec = self.registry.execute(tool_name, &params);
        tokio::pin!(exec);

        let outcome = loop {
            tokio::select! {
                biased;
                result = &mut exec => break result,
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    if self.cancellation.is_cancelled(&session_id) {
                        break Err(Error::Cancellation);
                    }
                }
            }
        };

        if self.cancellation.is_cancelled(&session_id) {
            return Err(Error::Cancellation);
        }

        match outcome {
            Ok(output) => {
                self.events.publish(
                    &session_id,
                    ToolEvent {
                        timestamp: Utc::now(),
                        name: tool_name.to_string(),
                        args: params.clone(),
                        status: ToolEventStatus::Completed,
                        result_preview: Some(bounded_preview(&output)),
                        error: None,
                    },
                );
                Ok(output)
            }
            Err(e) => {
                self.events.publish(
                    &session_id,
                    ToolEvent {
                        timestamp: Utc::now(),
                        name: tool_name.to_string(),
                        args: params.clone(),
                        status: ToolEventStatus::Error,
                        result_preview: None,
                        error: Some(e.to_string()),
                    },
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ca_domain::tool::{ParamSchema, ParamType, ToolDescriptor};
    use ca_tools::registry::{ToolExecutor, ToolRegistryBuilder};
    use std::sync::Arc;

    struct Echo;

    #[async_trait]
    impl ToolExecutor for Echo {
        async fn execute(&self, params: &HashMap<String, String>) -> Result<String> {
            Ok(params.get("query").cloned().unwrap_or_default())
        }
    }

    struct Slow;

    #[async_trait]
    impl ToolExecutor for Slow {
        async fn execute(&self, _params: &HashMap<String, String>) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("done".to_string())
        }
    }

    struct Fails;

    #[async_trait]
    impl ToolExecutor for Fails {
        async fn execute(&self, _params: &HashMap<String, String>) -> Result<String> {
            Err(Error::BackendUnavailable("boom".to_string()))
        }
    }

    fn wrapper_with(registry: ToolRegistry) -> (ToolWrapper, CancellationHub, crate::event_bus::EventBus) {
        let hub = CancellationHub::new();
        let events = crate::event_bus::EventBus::new();
        (
            ToolWrapper::new(registry, hub.clone(), events.clone()),
            hub,
            events,
        )
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            parameters: vec![ParamSchema {
                name: "query".into(),
                required: false,
                kind: ParamType::String,
            }],
            human_definition: String::new(),
        }
    }

    #[tokio::test]
    async fn successful_call_emits_started_and_completed() {
        let registry = ToolRegistryBuilder::new()
            .register(descriptor("echo"), Arc::new(Echo))
            .build();
        let (wrapper, hub, events) = wrapper_with(registry);
        hub.register("s1");
        let mut rx = events.subscribe("s1");

        let mut params = HashMap::new();
        params.insert("query".to_string(), "hi".to_string());
        let out = wrapper.call("echo", params, "s1").await.unwrap();
        assert_eq!(out, "hi");

        let started = rx.recv().await.unwrap();
        assert_eq!(started.status, ToolEventStatus::Started);
        let completed = rx.recv().await.unwrap();
        assert_eq!(completed.status, ToolEventStatus::Completed);
        assert_eq!(completed.result_preview.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn failing_call_emits_error_event_and_propagates() {
        let registry = ToolRegistryBuilder::new()
            .register(descriptor("fails"), Arc::new(Fails))
            .build();
        let (wrapper, hub, events) = wrapper_with(registry);
        hub.register("s1");
        let mut rx = events.subscribe("s1");

        let err = wrapper.call("fails", HashMap::new(), "s1").await.unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));

        let _started = rx.recv().await.unwrap();
        let errored = rx.recv().await.unwrap();
        assert_eq!(errored.status, ToolEventStatus::Error);
    }

    #[tokio::test]
    async fn cancellation_during_execution_suppresses_terminal_event() {
        let registry = ToolRegistryBuilder::new()
            .register(descriptor("slow"), Arc::new(Slow))
            .build();
        let (wrapper, hub, events) = wrapper_with(registry);
        hub.register("s1");
        let mut rx = events.subscribe("s1");

        let hub2 = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            hub2.cancel("s1");
        });

        let err = wrapper.call("slow", HashMap::new(), "s1").await.unwrap_err();
        assert!(matches!(err, Error::Cancellation));

        let started = rx.recv().await.unwrap();
        assert_eq!(started.status, ToolEventStatus::Started);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn pre_cancelled_session_short_circuits() {
        let registry = ToolRegistryBuilder::new()
            .register(descriptor("echo"), Arc::new(Echo))
            .build();
        let (wrapper, hub, _events) = wrapper_with(registry);
        hub.register("s1");
        hub.cancel("s1");

        let err = wrapper.call("echo", HashMap::new(), "s1").await.unwrap_err();
        assert!(matches!(err, Error::Cancellation));
    }

    #[tokio::test]
    async fn session_id_is_injected_when_absent() {
        struct CapturesSessionId(std::sync::Mutex<Option<String>>);

        #[async_trait]
        impl ToolExecutor for CapturesSessionId {
            async fn execute(&self, params: &HashMap<String, String>) -> Result<String> {
                *self.0.lock().unwrap() = params.get("session_id").cloned();
                Ok(String::new())
            }
        }

        let capture = Arc::new(CapturesSessionId(std::sync::Mutex::new(None)));
        let registry = ToolRegistryBuilder::new()
            .register(descriptor("cap"), capture.clone())
            .build();
        let (wrapper, hub, _events) = wrapper_with(registry);
        hub.register("default-session");

        wrapper.call("cap", HashMap::new(), "default-session").await.unwrap();
        assert_eq!(
            capture.0.lock().unwrap().as_deref(),
            Some("default-session")
        );
    }
}
