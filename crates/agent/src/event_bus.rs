//! Per-session Tool-Event subscriber set (§4.12): a bounded MPSC channel
//! per session that the HTTP/SSE layer (ambient, outside this crate) drains
//! for live streaming. Fanout is best-effort — a full or closed receiver
//! never blocks or fails the tool call that published the event.

use std::collections::HashMap;
use std::sync::Arc;

use ca_domain::tool::ToolEvent;
use parking_lot::Mutex;
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 64;

/// Process-wide, cloneable handle over every session's subscriber set.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<ToolEvent>>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to tool events for `session_id`. Multiple subscribers per
    /// session are supported; each gets its own bounded channel.
    pub fn subscribe(&self, session_id: &str) -> mpsc::Receiver<ToolEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.inner
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Publish an event to every live subscriber of `session_id`, dropping
    /// closed senders. Every `started` is published before its matching
    /// `completed`/`error` for the same invocation, preserving the ordering
    /// guarantee of §5.
    pub fn publish(&self, session_id: &str, event: ToolEvent) {
        let mut inner = self.inner.lock();
        if let Some(senders) = inner.get_mut(session_id) {
            senders.retain(|tx| tx.try_send(event.clone()).is_ok() || !tx.is_closed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;

    fn event(name: &str) -> ToolEvent {
        ToolEvent {
            timestamp: Utc::now(),
            name: name.to_string(),
            args: StdHashMap::new(),
            status: ca_domain::tool::ToolEventStatus::Started,
            result_preview: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("s1");
        bus.publish("s1", event("search"));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.name, "search");
    }

    #[tokio::test]
    async fn publish_to_unknown_session_is_a_noop() {
        let bus = EventBus::new();
        bus.publish("nope", event("search"));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_the_event() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe("s1");
        let mut rx2 = bus.subscribe("s1");
        bus.publish("s1", event("query"));
        assert_eq!(rx1.recv().await.unwrap().name, "query");
        assert_eq!(rx2.recv().await.unwrap().name, "query");
    }
}
