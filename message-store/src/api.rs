use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;

use crate::error::AppError;
use crate::kafka::producer::Publisher;

#[derive(Clone)]
pub struct ApiState {
    pub publisher: Publisher,
}

pub async fn index() -> &'static str {
    "message store service"
}

/// Synchronous publish: the caller gets the broker's verdict, and owns any
/// retry decision.
pub async fn publish_message(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidRequest("empty message body".to_string()));
    }
    state.publisher.publish(&body).await?;
    Ok(StatusCode::ACCEPTED)
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/v1/messages", post(publish_message))
        .with_state(state)
}
