use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use frame_relay_common::multipart;
use futures_util::stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::capture::{CaptureState, CaptureSupervisor};
use crate::hub::registry::ClientId;
use crate::hub::FrameHub;
use crate::ingest::Ingest;

const INDEX_HTML: &str = include_str!("../static/index.html");

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub hub: Arc<FrameHub>,
    pub ingest: Ingest,
    pub supervisor: Arc<CaptureSupervisor>,
    /// Chunks buffered per viewer before frames are dropped for it.
    pub client_queue: usize,
}

#[derive(Debug, Serialize)]
struct Status {
    capture: CaptureState,
    launches: u64,
    clients: usize,
    frames_accepted: u64,
    frames_delivered: u64,
    last_frame_ms: Option<i64>,
    live: bool,
    frame_available: bool,
}

/// Unregisters a viewer when its response body is dropped.
struct ViewerGuard {
    hub: Arc<FrameHub>,
    id: ClientId,
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        debug!(client = %self.id, "viewer stream dropped");
        self.hub.unregister(self.id);
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /: viewer page
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /still: current frame (or fallback); empty body when there is none
async fn still(State(state): State<Arc<AppState>>) -> Response {
    let body = state.hub.current().map(|f| f.bytes()).unwrap_or_default();
    (
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// GET /mjpeg: endless multipart stream of frames
async fn stream_frames(State(state): State<Arc<AppState>>) -> Response {
    let (tx, rx) = mpsc::channel::<Bytes>(state.client_queue.max(1));
    let id = state.hub.connect(Box::new(tx));
    let guard = ViewerGuard {
        hub: Arc::clone(&state.hub),
        id,
    };

    let chunks = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let chunk = rx.recv().await?;
        Some((Ok::<_, Infallible>(chunk), (rx, guard)))
    });

    (
        [
            (header::CONTENT_TYPE, multipart::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(chunks),
    )
        .into_response()
}

/// POST /mjpeg: one complete JPEG from the capture process
async fn upload_frame(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match state.ingest.accept(body) {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, format!("malformed frame: {e}")).into_response(),
    }
}

/// GET /status: relay health at a glance
async fn status(State(state): State<Arc<AppState>>) -> Json<Status> {
    let stats = state.hub.stats();
    Json(Status {
        capture: state.supervisor.state(),
        launches: state.supervisor.launches(),
        clients: stats.clients,
        frames_accepted: stats.frames_accepted,
        frames_delivered: stats.frames_delivered,
        last_frame_ms: stats.last_frame_ms,
        live: stats.has_live_frame,
        frame_available: stats.has_live_frame || stats.has_fallback,
    })
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

pub fn router(state: Arc<AppState>, max_frame_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/still", get(still))
        .route("/mjpeg", get(stream_frames).post(upload_frame))
        .route("/status", get(status))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(max_frame_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
