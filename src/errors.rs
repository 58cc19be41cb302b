use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, MapError>;

#[derive(Error, Debug)]
pub enum MapError {
    #[error("telemetry unavailable: {0}")]
    TelemetryUnavailable(String),

    #[error("flight plan of {0} has no valid waypoints")]
    FlightPlanIncomplete(String),

    #[error("airport data unavailable: {0}")]
    AirportDataUnavailable(String),

    #[error("unknown session {0}")]
    UnknownSession(String),

    #[error("unknown theme {0}")]
    UnknownTheme(String),

    #[error("reconciler is no longer running")]
    ReconcilerGone,

    #[error("state store error: {0}")]
    Store(String),

    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error {0}")]
    Json(#[from] serde_json::Error),

    #[error("render error: {0}")]
    Render(String),
}

impl From<reqwest::Error> for MapError {
    fn from(e: reqwest::Error) -> Self {
        // the url carries the api key
        MapError::TelemetryUnavailable(e.without_url().to_string())
    }
}

impl IntoResponse for MapError {
    fn into_response(self) -> Response {
        let status = match &self {
            MapError::UnknownSession(_) | MapError::UnknownTheme(_) => StatusCode::BAD_REQUEST,
            MapError::ReconcilerGone => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("request failed: {}", self);
        }
        (status, format!("Error: {}", self)).into_response()
    }
}
