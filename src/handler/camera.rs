use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use mjpeg_bus::{Engine, EngineState};
use serde::Serialize;

use crate::{
    handler::{ApiJsonResult, ApiResult, AppState, not_configured},
    multipart,
    session::StreamSession,
};

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

pub fn camera_router() -> Router<AppState> {
    Router::new()
        .route("/stream", get(stream))
        .route("/snapshot", get(snapshot))
        .route("/status", get(status))
}

#[derive(Serialize)]
struct StatusResponse {
    configured: bool,
    source: Option<String>,
    state: Option<EngineState>,
    has_frame: bool,
    latest_seq: Option<u64>,
    /// Milliseconds since the latest frame was published.
    frame_age_ms: Option<u64>,
    subscribers: usize,
}

/// The engine, started if it was not yet.
async fn active_engine(state: &AppState) -> ApiResult<Option<Arc<Engine>>> {
    let Some(engine) = state.manager.current().await else {
        return Ok(None);
    };
    engine.start()?;
    Ok(Some(engine))
}

async fn stream(State(state): State<AppState>) -> ApiResult<Response> {
    let Some(engine) = active_engine(&state).await? else {
        return Ok(not_configured());
    };

    let body = Body::from_stream(StreamSession::new(engine).into_stream());
    let response = Response::builder()
        .header(header::CONTENT_TYPE, multipart::content_type())
        .header(header::CACHE_CONTROL, NO_CACHE)
        .header(header::PRAGMA, "no-cache")
        .body(body)?;
    Ok(response)
}

async fn snapshot(State(state): State<AppState>) -> ApiResult<Response> {
    let Some(engine) = active_engine(&state).await? else {
        return Ok(not_configured());
    };

    match engine.snapshot() {
        Some(frame) => Ok((
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, NO_CACHE),
            ],
            frame.into_data(),
        )
            .into_response()),
        None => Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, "1")],
            "no frame available yet",
        )
            .into_response()),
    }
}

async fn status(State(state): State<AppState>) -> ApiJsonResult<StatusResponse> {
    let response = match state.manager.current().await {
        Some(engine) => {
            let latest = engine.snapshot();
            StatusResponse {
                configured: true,
                source: Some(engine.describe()),
                state: Some(engine.state()),
                has_frame: latest.is_some(),
                latest_seq: latest.as_ref().map(|f| f.seq()),
                frame_age_ms: latest.as_ref().map(|f| f.age().as_millis() as u64),
                subscribers: engine.subscriber_count(),
            }
        }
        None => StatusResponse {
            configured: false,
            source: None,
            state: None,
            has_frame: false,
            latest_seq: None,
            frame_age_ms: None,
            subscribers: 0,
        },
    };
    Ok(Json(response))
}
