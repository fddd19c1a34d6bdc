use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};

use crate::handler::{ApiResult, AppState};

const PTZ_TIMEOUT: Duration = Duration::from_secs(5);

pub fn ptz_router() -> Router<AppState> {
    Router::new().route("/control/{direction}", post(control))
}

/// Relay one PTZ command to the camera. Fire once, no retries.
async fn control(
    State(state): State<AppState>,
    Path(direction): Path<String>,
) -> ApiResult<Response> {
    if !state.ptz.enabled || state.ptz.url.is_empty() {
        return Ok((StatusCode::NOT_FOUND, "PTZ relay is disabled").into_response());
    }
    if !is_valid_direction(&direction) {
        return Ok((StatusCode::BAD_REQUEST, "invalid direction").into_response());
    }

    let url = state.ptz.url_for(&direction);
    let result = state
        .http
        .get(&url)
        .timeout(PTZ_TIMEOUT)
        .send()
        .await
        .and_then(|r| r.error_for_status());

    match result {
        Ok(_) => {
            log::info!("ptz: sent {}", direction);
            Ok(Json("success".to_string()).into_response())
        }
        Err(e) => {
            log::warn!("ptz: {} failed: {}", direction, e.without_url());
            Ok((StatusCode::BAD_GATEWAY, "camera rejected PTZ command").into_response())
        }
    }
}

fn is_valid_direction(direction: &str) -> bool {
    !direction.is_empty()
        && direction.len() <= 32
        && direction
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
