//! Per-session run lock (§5): a `Semaphore(1)` keyed by session id, so a
//! second HTTP request for a session already running a turn is rejected
//! immediately rather than queued.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to acquire the run lock for `session_id`. Returns `None` if a
    /// turn for this session is already in flight.
    pub fn try_acquire(&self, session_id: &str) -> Option<OwnedSemaphorePermit> {
        let semaphore = {
            let mut inner = self.inner.lock();
            inner
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        semaphore.try_acquire_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_for_same_session_is_rejected() {
        let locks = SessionLocks::new();
        let first = locks.try_acquire("s1");
        assert!(first.is_some());
        assert!(locks.try_acquire("s1").is_none());
    }

    #[test]
    fn releasing_permit_allows_next_acquire() {
        let locks = SessionLocks::new();
        let first = locks.try_acquire("s1").unwrap();
        drop(first);
        assert!(locks.try_acquire("s1").is_some());
    }

    #[test]
    fn different_sessions_do_not_contend() {
        let locks = SessionLocks::new();
        let _a = locks.try_acquire("s1").unwrap();
        assert!(locks.try_acquire("s2").is_some());
    }
}
