use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{config::PtzConfig, manager::EngineManager};

pub mod camera;
pub mod ptz;
pub mod settings;

pub type ApiResult<T> = Result<T, ApiError>;
pub type ApiJsonResult<T> = ApiResult<Json<T>>;

/// Everything a request handler needs, injected through axum state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<EngineManager>,
    pub ptz: Arc<PtzConfig>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(manager: Arc<EngineManager>, ptz: PtzConfig) -> Self {
        Self {
            manager,
            ptz: Arc::new(ptz),
            http: reqwest::Client::new(),
        }
    }
}

pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log::error!("api: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "camera service internal error".to_string(),
        )
            .into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub(crate) fn not_configured() -> Response {
    (StatusCode::NOT_FOUND, "no camera source configured").into_response()
}
