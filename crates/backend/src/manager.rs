//! Backend Manager (§4.5): selects a backend per `implement` request,
//! enforces the global concurrency cap, drives retry/fallback, and routes
//! cancel/status calls to whichever backend currently owns a session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ca_domain::backend::{BackendConfig, BackendResult, BackendSessionStatus, ImplementRequest, SelectionStrategy};
use ca_domain::error::{Error, Result};
use ca_domain::trace::TraceEvent;
use parking_lot::RwLock;

use crate::traits::{Backend, ProgressCallback};

struct BackoffPolicy {
    initial: Duration,
    factor: u32,
    cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial.as_millis() as u64 * self.factor.pow(attempt) as u64;
        Duration::from_millis(scaled).min(self.cap)
    }
}

pub struct BackendManager {
    backends: RwLock<HashMap<String, Arc<dyn Backend>>>,
    config: RwLock<BackendConfig>,
    backoff: BackoffPolicy,
    in_flight: AtomicU32,
    /// Per-backend in-flight counts, checked before the manager-wide cap.
    backend_in_flight: RwLock<HashMap<String, u32>>,
    /// `session_id -> backend_name`, for cancel/status routing.
    owners: RwLock<HashMap<String, String>>,
}

impl BackendManager {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
            config: RwLock::new(config),
            backoff: BackoffPolicy::default(),
            in_flight: AtomicU32::new(0),
            backend_in_flight: RwLock::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, backend: Arc<dyn Backend>) {
        self.backends.write().insert(backend.name().to_string(), backend);
    }

    pub fn config(&self) -> BackendConfig {
        self.config.read().clone()
    }

    /// Re-read configuration (called by the Configuration Resolver on a
    /// hot-reload) and re-initialize every registered backend against it.
    pub async fn reload(&self, new_config: BackendConfig) -> Result<()> {
        *self.config.write() = new_config.clone();
        let backends: Vec<Arc<dyn Backend>> = self.backends.read().values().cloned().collect();
        for backend in backends {
            backend.initialize(&new_config).await?;
        }
        Ok(())
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.read().get(name).cloned()
    }

    /// Select a backend for `request` per the configured strategy. Does not
    /// consult backend availability for `explicit`/`auto` beyond the
    /// presence check; `capability` scores only backends that report
    /// available.
    async fn select(&self, request: &ImplementRequest) -> Result<Arc<dyn Backend>> {
        let config = self.config();
        match config.strategy {
            SelectionStrategy::Explicit => {
                let name = request.options.backend.as_deref().ok_or_else(|| {
                    Error::BackendNotFound("explicit strategy requires options.backend".into())
                })?;
                let backend = self
                    .get(name)
                    .ok_or_else(|| Error::BackendNotFound(name.to_string()))?;
                if !backend.is_available().await {
                    return Err(Error::BackendUnavailable(name.to_string()));
                }
                Ok(backend)
            }
            SelectionStrategy::Auto => {
                let name = request
                    .options
                    .backend
                    .clone()
                    .unwrap_or_else(|| config.default_backend.clone());
                self.get(&name)
                    .ok_or_else(|| Error::BackendNotFound(name.clone()))
            }
            SelectionStrategy::Capability => {
                let backends = self.backends.read().clone();
                let mut best: Option<(i32, Arc<dyn Backend>)> = None;
                for backend in backends.values() {
                    if !backend.is_available().await {
                        continue;
                    }
                    let caps = backend.capabilities();
                    let mut score = 0i32;
                    if caps.languages.iter().any(|l| l == "*") {
                        score += 10;
                    }
                    if caps.test_generation {
                        score += 5;
                    }
                    if caps.streaming {
                        score += 3;
                    }
                    score += caps.concurrent_session_ceiling.min(5) as i32;
                    let better = match &best {
                        Some((best_score, _)) => score > *best_score,
                        None => true,
                    };
                    if better {
                        best = Some((score, backend.clone()));
                    }
                }
                best.map(|(_, b)| b).ok_or_else(|| {
                    Error::BackendUnavailable("no backend scored for this request".into())
                })
            }
        }
    }

    /// Run `request` against the selected backend, retrying retryable
    /// errors per the configured backoff, then walking the fallback list on
    /// final failure. Enforces the manager-wide concurrency cap before
    /// spawning anything.
    pub async fn execute(
        &self,
        request: &ImplementRequest,
        progress: Option<ProgressCallback>,
    ) -> Result<BackendResult> {
        let config = self.config();

        let primary = self.select(request).await?;
        TraceEvent::BackendSelected {
            session_id: request.session_id.clone(),
            backend_name: primary.name().to_string(),
            strategy: format!("{:?}", config.strategy),
        }
        .emit();

        self.owners
            .write()
            .insert(request.session_id.clone(), primary.name().to_string());

        let primary_name = primary.name().to_string();
        let guard = self.acquire_slot(&primary_name, primary.capabilities().concurrent_session_ceiling, config.concurrency_cap)?;
        let primary_result = self
            .run_with_retry(&primary, request, progress.clone(), config.max_retries)
            .await;
        drop(guard);

        match primary_result {
            Ok(r) => Ok(r),
            Err(e) if matches!(e, Error::Cancellation | Error::Validation(_)) => Err(e),
            Err(primary_err) => {
                let mut last_err = primary_err;
                for fallback_name in &config.fallbacks {
                    if fallback_name == &primary_name {
                        continue;
                    }
                    let Some(fallback) = self.get(fallback_name) else {
                        continue;
                    };
                    if !fallback.is_available().await {
                        continue;
                    }

                    TraceEvent::BackendFallback {
                        session_id: request.session_id.clone(),
                        from_backend: primary_name.clone(),
                        to_backend: fallback_name.clone(),
                        reason: last_err.to_string(),
                    }
                    .emit();

                    self.owners
                        .write()
                        .insert(request.session_id.clone(), fallback_name.clone());

                    let fallback_guard = match self.acquire_slot(
                        fallback_name,
                        fallback.capabilities().concurrent_session_ceiling,
                        config.concurrency_cap,
                    ) {
                        Ok(g) => g,
                        Err(e) => {
                            last_err = e;
                            continue;
                        }
                    };

                    let fallback_result = self
                        .run_with_retry(&fallback, request, progress.clone(), config.max_retries)
                        .await;
                    drop(fallback_guard);

                    match fallback_result {
                        Ok(mut r) => {
                            r.fallback = true;
                            return Ok(r);
                        }
                        Err(e) => last_err = e,
                    }
                }
                Err(last_err)
            }
        }
    }

    async fn run_with_retry(
        &self,
        backend: &Arc<dyn Backend>,
        request: &ImplementRequest,
        progress: Option<ProgressCallback>,
        configured_retries: u32,
    ) -> Result<BackendResult> {
        let attempts = 1 + configured_retries;
        let mut last_err = Error::Internal("backend never attempted".into());

        for attempt in 0..attempts {
            match backend.execute(request, progress.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    let retry = e.retryable() && attempt + 1 < attempts;
                    last_err = e;
                    if !retry {
                        break;
                    }
                    tokio::time::sleep(self.backoff.delay_for(attempt)).await;
                }
            }
        }
        Err(last_err)
    }

    /// Checks the backend-specific ceiling first, then the manager-wide
    /// cap, per the Open Question decision in DESIGN.md: the backend is the
    /// concrete resource owner, so its own cap is consulted first, though
    /// both are checked before anything is spawned.
    fn acquire_slot(&self, backend_name: &str, backend_ceiling: u32, global_cap: u32) -> Result<SlotGuard<'_>> {
        {
            let mut per_backend = self.backend_in_flight.write();
            let current = *per_backend.get(backend_name).unwrap_or(&0);
            if current >= backend_ceiling {
                return Err(Error::QuotaExceeded(format!(
                    "backend '{backend_name}' concurrent-session ceiling ({backend_ceiling}) reached"
                )));
            }
            per_backend.insert(backend_name.to_string(), current + 1);
        }

        loop {
            let current = self.in_flight.load(Ordering::SeqCst);
            if current >= global_cap {
                let mut per_backend = self.backend_in_flight.write();
                if let Some(count) = per_backend.get_mut(backend_name) {
                    *count = count.saturating_sub(1);
                }
                return Err(Error::QuotaExceeded(format!(
                    "backend manager concurrency cap ({global_cap}) reached"
                )));
            }
            if self
                .in_flight
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(SlotGuard {
                    manager: self,
                    backend_name: backend_name.to_string(),
                });
            }
        }
    }

    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        let backend_name = self.owners.read().get(session_id).cloned();
        match backend_name {
            Some(name) => match self.get(&name) {
                Some(backend) => backend.cancel(session_id).await,
                None => Err(Error::BackendNotFound(name)),
            },
            None => Ok(()),
        }
    }

    pub async fn status(&self, session_id: &str) -> Option<BackendSessionStatus> {
        let backend_name = self.owners.read().get(session_id).cloned()?;
        self.get(&backend_name)?.status(session_id).await
    }

    pub async fn cleanup(&self) -> Result<()> {
        let backends: Vec<Arc<dyn Backend>> = self.backends.read().values().cloned().collect();
        for backend in backends {
            backend.cleanup().await?;
        }
        Ok(())
    }
}

struct SlotGuard<'a> {
    manager: &'a BackendManager,
    backend_name: String,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.manager.in_flight.fetch_sub(1, Ordering::SeqCst);
        let mut per_backend = self.manager.backend_in_flight.write();
        if let Some(count) = per_backend.get_mut(&self.backend_name) {
            *count = count.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ca_domain::backend::{BackendCapabilities, ChangeKind, DiffStats, FileChange};
    use std::sync::atomic::AtomicU32 as StdAtomicU32;

    fn test_config() -> BackendConfig {
        BackendConfig {
            default_backend: "a".into(),
            fallbacks: vec!["b".into()],
            strategy: SelectionStrategy::Auto,
            concurrency_cap: 2,
            max_retries: 1,
            timeout_secs: 60,
        }
    }

    fn caps() -> BackendCapabilities {
        BackendCapabilities {
            languages: vec!["*".into()],
            streaming: false,
            direct_file_edit: true,
            test_generation: false,
            concurrent_session_ceiling: 3,
        }
    }

    struct FlakyBackend {
        name: String,
        fail_times: StdAtomicU32,
        deps: Vec<String>,
        caps: BackendCapabilities,
    }

    #[async_trait]
    impl Backend for FlakyBackend {
        fn name(&self) -> &str {
            &self.name
        }
        async fn initialize(&self, _config: &BackendConfig) -> Result<()> {
            Ok(())
        }
        async fn is_available(&self) -> bool {
            true
        }
        fn capabilities(&self) -> &BackendCapabilities {
            &self.caps
        }
        fn required_dependencies(&self) -> &[String] {
            &self.deps
        }
        async fn execute(
            &self,
            request: &ImplementRequest,
            _progress: Option<ProgressCallback>,
        ) -> Result<BackendResult> {
            let remaining = self.fail_times.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Timeout("flaky backend timed out".into()));
            }
            Ok(BackendResult {
                success: true,
                session_id: request.session_id.clone(),
                backend: self.name.clone(),
                output: "ok".into(),
                changes: vec![FileChange {
                    path: "x.rs".into(),
                    kind: ChangeKind::Modified,
                }],
                metrics: DiffStats::default(),
                fallback: false,
            })
        }
        async fn cancel(&self, _session_id: &str) -> Result<()> {
            Ok(())
        }
        async fn status(&self, _session_id: &str) -> Option<BackendSessionStatus> {
            Some(BackendSessionStatus::Completed)
        }
        async fn cleanup(&self) -> Result<()> {
            Ok(())
        }
    }

    fn req(session_id: &str) -> ImplementRequest {
        ImplementRequest {
            session_id: session_id.to_string(),
            task: "do the thing".into(),
            context: None,
            options: Default::default(),
        }
    }

    #[tokio::test]
    async fn auto_strategy_prefers_explicit_request_over_default() {
        let manager = BackendManager::new(test_config());
        manager.register(Arc::new(FlakyBackend {
            name: "a".into(),
            fail_times: StdAtomicU32::new(0),
            deps: vec![],
            caps: caps(),
        }));
        manager.register(Arc::new(FlakyBackend {
            name: "b".into(),
            fail_times: StdAtomicU32::new(0),
            deps: vec![],
            caps: caps(),
        }));

        let mut request = req("s1");
        request.options.backend = Some("b".into());
        let result = manager.execute(&request, None).await.unwrap();
        assert_eq!(result.backend, "b");
    }

    #[tokio::test]
    async fn retries_then_succeeds_without_fallback() {
        let manager = BackendManager::new(test_config());
        manager.register(Arc::new(FlakyBackend {
            name: "a".into(),
            fail_times: StdAtomicU32::new(1),
            deps: vec![],
            caps: caps(),
        }));
        let result = manager.execute(&req("s2"), None).await.unwrap();
        assert_eq!(result.backend, "a");
        assert!(!result.fallback);
    }

    #[tokio::test]
    async fn falls_back_after_retries_exhausted() {
        let manager = BackendManager::new(test_config());
        manager.register(Arc::new(FlakyBackend {
            name: "a".into(),
            fail_times: StdAtomicU32::new(100),
            deps: vec![],
            caps: caps(),
        }));
        manager.register(Arc::new(FlakyBackend {
            name: "b".into(),
            fail_times: StdAtomicU32::new(0),
            deps: vec![],
            caps: caps(),
        }));
        let result = manager.execute(&req("s3"), None).await.unwrap();
        assert_eq!(result.backend, "b");
        assert!(result.fallback);
    }

    #[tokio::test]
    async fn concurrency_cap_restored_after_call() {
        let manager = BackendManager::new(test_config());
        manager.register(Arc::new(FlakyBackend {
            name: "a".into(),
            fail_times: StdAtomicU32::new(0),
            deps: vec![],
            caps: caps(),
        }));
        manager.execute(&req("s4"), None).await.unwrap();
        assert_eq!(manager.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrency_cap_rejects_once_exhausted() {
        let manager = BackendManager::new(test_config());
        manager.in_flight.store(2, Ordering::SeqCst);
        let err = manager.execute(&req("s5"), None).await.unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn explicit_strategy_fails_when_backend_missing() {
        let mut config = test_config();
        config.strategy = SelectionStrategy::Explicit;
        let manager = BackendManager::new(config);
        let mut request = req("s6");
        request.options.backend = Some("missing".into());
        let err = manager.execute(&request, None).await.unwrap_err();
        assert!(matches!(err, Error::BackendNotFound(_)));
    }

    #[tokio::test]
    async fn cancel_routes_to_owning_backend() {
        let manager = BackendManager::new(test_config());
        manager.register(Arc::new(FlakyBackend {
            name: "a".into(),
            fail_times: StdAtomicU32::new(0),
            deps: vec![],
            caps: caps(),
        }));
        manager.execute(&req("s7"), None).await.unwrap();
        assert!(manager.cancel("s7").await.is_ok());
    }
}
