use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use frame_relay_common::frame::FrameBuffer;
use frame_relay_common::settings::LiveSettings;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::multipart;
use crate::pages;
use crate::stream::StreamSession;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub(crate) struct AppState {
    pub(crate) frames: Arc<FrameBuffer>,
    pub(crate) settings: Arc<LiveSettings>,
    /// Cancelled on server stop; every stream holds a child token.
    pub(crate) cancel: CancellationToken,
    /// `None` = unlimited.
    pub(crate) stream_limit: Option<Arc<Semaphore>>,
    pub(crate) active_streams: Arc<AtomicUsize>,
    pub(crate) next_conn_id: AtomicU64,
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/stream", get(stream))
        .route("/ping", get(ping))
        .route("/obs", get(obs_page))
        .fallback(landing_page)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /stream: endless multipart/x-mixed-replace body, one part per frame
async fn stream(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let permit = match &state.stream_limit {
        Some(limit) => match Arc::clone(limit).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                warn!(peer = %peer, "stream rejected: limit reached");
                return (StatusCode::SERVICE_UNAVAILABLE, "stream limit reached").into_response();
            }
        },
        None => None,
    };

    let conn_id = state.next_conn_id.fetch_add(1, Ordering::Relaxed);
    let session = StreamSession::open(&state, conn_id, peer, permit);

    (
        [
            (header::CONTENT_TYPE, multipart::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
        ],
        Body::from_stream(session.into_stream()),
    )
        .into_response()
}

/// GET /ping: liveness probe, never touches the frame buffer
async fn ping() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], "pong")
}

/// GET /obs
async fn obs_page() -> Html<&'static str> {
    Html(pages::OBS_HTML)
}

/// Everything else
async fn landing_page() -> Html<&'static str> {
    Html(pages::LANDING_HTML)
}
