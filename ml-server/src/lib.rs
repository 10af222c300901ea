//! vector-ml - serves embedding models and named vector indices over HTTP.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod index;
pub mod logging;
pub mod model;
pub mod state;
pub mod test_util;
pub mod validation;

pub use config::Config;
pub use error::{Error, Result};
pub use state::AppState;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;

/// Build the application router with CORS, body limit and request logging.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.server.max_upload_bytes;
    api::router()
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(logging::request_logger))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
