//! Process-wide cancellation hub: `session_id -> { cancelled, abort }`.
//!
//! Registered once per session at the start of an agent run; read by the
//! agent loop between iterations and by backend children between output
//! chunks. A session with no group entries behaves exactly like a plain
//! flag; `add_to_group`/`remove_from_group` exist only for sub-agent
//! delegation, where cancelling a parent must cascade to every child it
//! spawned.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type AbortFn = Arc<dyn Fn() + Send + Sync>;

struct Entry {
    cancelled: bool,
    abort: Option<AbortFn>,
}

/// A process-singleton, cloneable handle. Cloning shares the same
/// underlying map (`Arc<Mutex<_>>` inside), so every caller sees the same
/// cancellation state.
#[derive(Clone, Default)]
pub struct CancellationHub {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    groups: HashMap<String, HashSet<String>>,
}

impl CancellationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh entry for `session_id`, resetting `cancelled` to
    /// false if one already existed.
    pub fn register(&self, session_id: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.entries.insert(
            session_id.into(),
            Entry {
                cancelled: false,
                abort: None,
            },
        );
    }

    /// Register with an abort callback invoked synchronously by `cancel`.
    pub fn register_with_abort(&self, session_id: impl Into<String>, abort: AbortFn) {
        let mut inner = self.inner.lock();
        inner.entries.insert(
            session_id.into(),
            Entry {
                cancelled: false,
                abort: Some(abort),
            },
        );
    }

    pub fn is_cancelled(&self, session_id: &str) -> bool {
        self.inner
            .lock()
            .entries
            .get(session_id)
            .map(|e| e.cancelled)
            .unwrap_or(false)
    }

    /// Mark `session_id` cancelled, invoke its abort callback if any, and
    /// cascade to every child registered under it via `add_to_group`.
    /// Returns whether an entry existed for `session_id` itself.
    pub fn cancel(&self, session_id: &str) -> bool {
        let (existed, abort, children) = {
            let mut inner = self.inner.lock();
            let existed = if let Some(entry) = inner.entries.get_mut(session_id) {
                entry.cancelled = true;
                true
            } else {
                false
            };
            let abort = inner
                .entries
                .get(session_id)
                .and_then(|e| e.abort.clone());
            let children = inner
                .groups
                .get(session_id)
                .cloned()
                .unwrap_or_default();
            (existed, abort, children)
        };

        if let Some(abort) = abort {
            abort();
        }

        for child in children {
            self.cancel(&child);
        }

        existed
    }

    pub fn clear(&self, session_id: &str) {
        let mut inner = self.inner.lock();
        inner.entries.remove(session_id);
        inner.groups.remove(session_id);
        for set in inner.groups.values_mut() {
            set.remove(session_id);
        }
    }

    pub fn add_to_group(&self, parent_id: &str, child_id: &str) {
        let mut inner = self.inner.lock();
        inner
            .groups
            .entry(parent_id.to_string())
            .or_default()
            .insert(child_id.to_string());
    }

    pub fn remove_from_group(&self, parent_id: &str, child_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(set) = inner.groups.get_mut(parent_id) {
            set.remove(child_id);
        }
    }
}
