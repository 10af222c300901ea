//! Liveness endpoints.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use ml_common::MessageResponse;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(root))
        .route("/ping", get(ping))
}

/// GET / - Service banner.
async fn root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "vector-ml".to_string(),
    })
}

/// GET /ping
async fn ping() -> &'static str {
    "pong"
}
