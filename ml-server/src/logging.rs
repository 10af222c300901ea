//! Per-request access logging.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Paths polled by health checks; logged at DEBUG to keep INFO readable.
const HEALTH_CHECK_PATHS: [&str; 2] = ["/", "/ping"];

/// Name of the index addressed by `/index/{name}/...`, if any.
fn index_name(path: &str) -> Option<&str> {
    let mut segments = path.trim_start_matches('/').split('/');
    match (segments.next(), segments.next()) {
        (Some("index"), Some(name)) if !name.is_empty() => Some(name),
        _ => None,
    }
}

/// Middleware logging one event per request: INFO normally, DEBUG for
/// health checks, WARN for server errors.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis();
    let index = index_name(&path).unwrap_or("-");

    if response.status().is_server_error() {
        tracing::warn!(%method, %path, %status, %duration_ms, index, "HTTP request failed");
    } else if HEALTH_CHECK_PATHS.contains(&path.as_str()) {
        tracing::debug!(%method, %path, %status, %duration_ms, "HTTP request");
    } else {
        tracing::info!(%method, %path, %status, %duration_ms, index, "HTTP request");
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_name() {
        assert_eq!(index_name("/index/faces/search"), Some("faces"));
        assert_eq!(index_name("/index/faces"), Some("faces"));
        assert_eq!(index_name("/index//add"), None);
        assert_eq!(index_name("/predict"), None);
        assert_eq!(index_name("/"), None);
    }
}
