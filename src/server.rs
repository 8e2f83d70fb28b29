//! HTTP front-end
//!
//! - `GET /health`
//! - `POST /convert`: run a conversion and answer with its result
//! - `POST /conversions`: start a conversion, answer `202` with the session id
//! - `GET /conversions/:id`: the result once the run is done, `202` before
//! - `GET /conversions/:id/events`: progress frames as server-sent events,
//!   ending with a `done` event
//! - `DELETE /conversions/:id`: cancel the run
//!
//! Dropping an event stream never cancels the run; `DELETE` does.

use crate::decompose::SourceDialect;
use crate::pipeline::{ConversionRequest, ConversionResult, Coordinator};
use crate::progress::{ProgressFrame, SessionId, Subscription};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use dashmap::DashSet;
use futures::stream::{self, Stream};
use moka::future::Cache;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

/// Body of `POST /convert` and `POST /conversions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertBody {
    pub input_text: String,
    #[serde(default)]
    pub dialect: Option<SourceDialect>,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl ConvertBody {
    fn into_request(self) -> ConversionRequest {
        let dialect = self.dialect.unwrap_or_else(|| {
            self.file_name
                .as_deref()
                .map(|name| SourceDialect::from_path(std::path::Path::new(name)))
                .unwrap_or_default()
        });
        let request = ConversionRequest::new(self.input_text).with_dialect(dialect);
        match self.file_name {
            Some(name) => request.with_file_name(name),
            None => request,
        }
    }
}

#[derive(Clone)]
struct AppState {
    coordinator: Coordinator,
    /// Finished runs, kept until idle for the progress idle timeout
    results: Cache<SessionId, Arc<ConversionResult>>,
    /// Started runs whose result is not stored yet
    pending: Arc<DashSet<SessionId>>,
}

pub fn router(coordinator: Coordinator) -> Router {
    let keep = coordinator.config().progress.idle_timeout();
    let state = AppState {
        coordinator,
        results: Cache::builder().time_to_idle(keep).build(),
        pending: Arc::new(DashSet::new()),
    };

    Router::new()
        .route("/health", get(health))
        .route("/convert", post(convert))
        .route("/conversions", post(start_conversion))
        .route("/conversions/:id", get(conversion_result).delete(cancel_conversion))
        .route("/conversions/:id/events", get(conversion_events))
        .with_state(state)
}

/// Serve until the listener fails. Idle sessions are reaped while serving.
pub async fn serve(coordinator: Coordinator, addr: SocketAddr) -> std::io::Result<()> {
    let reaper = coordinator
        .hub()
        .spawn_reaper(coordinator.config().progress.idle_timeout());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let served = axum::serve(listener, router(coordinator)).await;
    reaper.abort();
    served
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "sessions": state.coordinator.hub().session_count(),
    }))
}

async fn convert(State(state): State<AppState>, Json(body): Json<ConvertBody>) -> Json<ConversionResult> {
    Json(state.coordinator.convert(body.into_request()).await)
}

async fn start_conversion(State(state): State<AppState>, Json(body): Json<ConvertBody>) -> Response {
    let handle = match state.coordinator.start(body.into_request()) {
        Ok(handle) => handle,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let session_id = handle.session_id;
    state.pending.insert(session_id);

    let results = state.results.clone();
    let pending = state.pending.clone();
    tokio::spawn(async move {
        match handle.wait().await {
            Ok(result) => results.insert(session_id, Arc::new(result)).await,
            Err(e) => tracing::error!(session = %session_id, error = %e, "conversion task lost"),
        }
        pending.remove(&session_id);
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({ "sessionId": session_id, "status": "running" })),
    )
        .into_response()
}

async fn conversion_result(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match SessionId::parse(&id) {
        Ok(id) => id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    if let Some(result) = state.results.get(&id).await {
        return Json(result.as_ref().clone()).into_response();
    }
    if state.pending.contains(&id) {
        return (
            StatusCode::ACCEPTED,
            Json(json!({ "sessionId": id, "status": "running" })),
        )
            .into_response();
    }
    error_response(StatusCode::NOT_FOUND, format!("unknown session: {}", id))
}

async fn cancel_conversion(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match SessionId::parse(&id) {
        Ok(id) => id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    match state.coordinator.hub().close(&id) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({ "sessionId": id, "status": "cancelling" })),
        )
            .into_response(),
        Err(e) => error_response(StatusCode::NOT_FOUND, e.to_string()),
    }
}

async fn conversion_events(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match SessionId::parse(&id) {
        Ok(id) => id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    match state.coordinator.hub().subscribe(&id) {
        Ok(subscription) => Sse::new(frame_stream(subscription)).into_response(),
        Err(e) => error_response(StatusCode::NOT_FOUND, e.to_string()),
    }
}

fn frame_stream(subscription: Subscription) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(subscription, |mut subscription| async move {
        let frame = subscription.next().await?;
        Some((Ok(frame_event(&frame)), subscription))
    })
}

/// One SSE event per frame, named after the frame type. Heartbeats become
/// comments so clients that only listen for named events ignore them.
fn frame_event(frame: &ProgressFrame) -> Event {
    let name = match frame {
        ProgressFrame::Event(_) => "event",
        ProgressFrame::Heartbeat { .. } => return Event::default().comment("heartbeat"),
        ProgressFrame::Lagged { .. } => "lagged",
        ProgressFrame::Done { .. } => "done",
    };
    let event = match frame.as_event() {
        Some(e) => Event::default().id(e.seq.to_string()),
        None => Event::default(),
    }
    .event(name);
    match event.clone().json_data(frame) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "progress frame not serializable");
            event
        }
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
