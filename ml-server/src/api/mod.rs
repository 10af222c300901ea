//! HTTP API.

pub mod health;
pub mod index;
pub mod predict;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Build the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(health::router())
        .merge(predict::router())
        .merge(index::router())
}
