use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::kafka::EventBusError;

/// Errors surfaced by the HTTP API. Steady-state consumption failures never
/// appear here; they are handled inside the pipeline.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Publish(#[from] EventBusError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
            AppError::Publish(_) => (StatusCode::BAD_GATEWAY, "failed to publish message"),
        };
        (status, message.to_owned()).into_response()
    }
}
