//! HTTP/SSE front-end (§4.9, §5): a `chat` endpoint (JSON and
//! SSE-streamed), a `cancel` endpoint, and a tool-event subscription
//! stream, all backed by a per-session run lock so a session already
//! running a turn rejects a second concurrent request outright.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use ca_domain::session::SessionOrigin;
use ca_domain::trace::TraceEvent;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::locks::SessionLocks;
use crate::runtime::Runtime;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub locks: SessionLocks,
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.runtime.config.server.cors.allowed_origins);

    Router::new()
        .route("/v1/chat", post(chat))
        .route("/v1/chat/stream", post(chat_stream))
        .route("/v1/cancel", post(cancel))
        .route("/v1/sessions", get(list_sessions))
        .route("/v1/sessions/:id/events", get(subscribe_events))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    // The default config ships wildcard host patterns ("http://localhost:*")
    // for local development; `tower_http`'s exact-match `AllowOrigin::list`
    // can't express those, so treat any entry containing `*` as permissive.
    if allowed_origins.iter().any(|o| o.contains('*')) {
        return CorsLayer::permissive();
    }
    let origins: Vec<axum::http::HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new().allow_origin(AllowOrigin::list(origins))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub persona_override: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub token_usage: ca_domain::stream::Usage,
}

async fn resolve_session(runtime: &Runtime, requested: Option<String>) -> Result<(String, bool), ApiError> {
    let session_id = requested.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let record = runtime
        .sessions
        .get_or_create(&session_id, SessionOrigin::Http)
        .await
        .map_err(ApiError)?;
    let is_new = record.turn_count == 0;
    TraceEvent::SessionResolved {
        session_id: session_id.clone(),
        is_new,
    }
    .emit();
    Ok((session_id, is_new))
}

async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let (session_id, _) = resolve_session(&state.runtime, body.session_id).await?;

    let _permit = state
        .locks
        .try_acquire(&session_id)
        .ok_or_else(|| ApiError(ca_domain::error::Error::QuotaExceeded(format!(
            "session '{session_id}' is already running a turn"
        ))))?;

    let result = state.runtime.agent_loop.chat(&body.message, &session_id).await;

    match result {
        Ok(chat_result) => {
            let _ = state.runtime.sessions.record_usage(&session_id, &chat_result.token_usage).await;
            Ok(Json(ChatResponse {
                response: chat_result.response,
                session_id,
                token_usage: chat_result.token_usage,
            }))
        }
        Err(e) => Err(ApiError(e)),
    }
}

/// SSE variant: fans out tool events for the session while the turn runs,
/// then emits a single terminal `result` event and closes the stream.
async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (session_id, _) = resolve_session(&state.runtime, body.session_id).await?;

    let _permit = state
        .locks
        .try_acquire(&session_id)
        .ok_or_else(|| ApiError(ca_domain::error::Error::QuotaExceeded(format!(
            "session '{session_id}' is already running a turn"
        ))))?;

    let mut events_rx = state.runtime.events.subscribe(&session_id);
    let runtime = state.runtime.clone();
    let message = body.message.clone();
    let session_for_task = session_id.clone();

    let stream = async_stream::stream! {
        let _permit = _permit;
        let mut driver = tokio::spawn(async move {
            runtime.agent_loop.chat(&message, &session_for_task).await
        });

        let outcome = loop {
            tokio::select! {
                biased;
                Some(event) = events_rx.recv() => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok::<_, std::convert::Infallible>(Event::default().event("tool").data(json));
                    }
                }
                result = &mut driver => {
                    break result;
                }
            }
        };

        let payload = match outcome {
            Ok(Ok(chat_result)) => serde_json::json!({
                "response": chat_result.response,
                "token_usage": chat_result.token_usage,
            }),
            Ok(Err(e)) => serde_json::json!({ "error": e.to_string() }),
            Err(e) => serde_json::json!({ "error": format!("agent task panicked: {e}") }),
        };
        if let Ok(json) = serde_json::to_string(&payload) {
            yield Ok::<_, std::convert::Infallible>(Event::default().event("result").data(json));
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

async fn cancel(State(state): State<AppState>, Json(body): Json<CancelRequest>) -> Json<CancelResponse> {
    let cancelled = state.runtime.cancellation.cancel(&body.session_id);
    if cancelled {
        TraceEvent::Cancelled {
            session_id: body.session_id.clone(),
        }
        .emit();
    }
    Json(CancelResponse { cancelled })
}

async fn list_sessions(State(state): State<AppState>) -> Result<Json<Vec<ca_domain::session::SessionRecord>>, ApiError> {
    let sessions = state.runtime.sessions.list().await.map_err(ApiError)?;
    Ok(Json(sessions))
}

/// Drains the per-session tool-event subscriber set for live streaming.
/// Idle (no in-flight turn) means no events arrive, not an error.
async fn subscribe_events(State(state): State<AppState>, Path(session_id): Path<String>) -> impl IntoResponse {
    let mut rx = state.runtime.events.subscribe(&session_id);

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                yield Ok::<_, std::convert::Infallible>(Event::default().data(json));
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
