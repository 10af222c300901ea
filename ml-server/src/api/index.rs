//! Vector index endpoints.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::routing::post;
use axum::{Json, Router};
use ml_common::{IndexRequest, SearchParams};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::state::AppState;
use crate::validation::validate_embeddings;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/index/:name/search", post(search))
        .route("/index/:name/add", post(add))
        .route("/index/:name/create", post(create))
}

/// Parse a JSON body, reporting malformed input as a bad request.
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::InvalidRequest(format!("Invalid JSON body: {}", e)))
}

fn log_index_size(state: &AppState, name: &str) {
    if let (Some(len), Some(dimension)) = (state.indices.len(name), state.indices.dimension(name)) {
        tracing::debug!("Index '{}' holds {} vectors of dimension {}", name, len, dimension);
    }
}

/// POST /index/{name}/search?k=N - Nearest IDs for each query vector.
async fn search(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<SearchParams>,
    body: Bytes,
) -> Result<Json<Vec<Vec<String>>>> {
    let body: Value = parse_body(&body)?;
    let embeddings = match body {
        Value::Object(mut fields) => fields.remove("embeddings").unwrap_or(Value::Null),
        other => other,
    };
    let embeddings = validate_embeddings(&embeddings)?;
    let k = params.k();

    tracing::debug!(
        "Searching index '{}' with {} queries, k={}",
        name,
        embeddings.nrows(),
        k
    );

    let worker = state.clone();
    let neighbours = state
        .dispatcher
        .run(move || worker.indices.search(&name, embeddings.view(), k))
        .await?;
    Ok(Json(neighbours))
}

/// POST /index/{name}/add - Append to an index, creating it if needed.
async fn add(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<()>> {
    let request: IndexRequest = parse_body(&body)?;
    let embeddings = validate_embeddings(&request.embeddings)?;

    let worker = state.clone();
    let index_name = name.clone();
    state
        .dispatcher
        .run(move || worker.indices.add(&index_name, request.embedding_ids, embeddings.view()))
        .await?;
    log_index_size(&state, &name);
    Ok(Json(()))
}

/// POST /index/{name}/create - Build an index, replacing any existing one.
async fn create(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<()>> {
    let request: IndexRequest = parse_body(&body)?;
    let embeddings = validate_embeddings(&request.embeddings)?;

    let worker = state.clone();
    let index_name = name.clone();
    state
        .dispatcher
        .run(move || worker.indices.create(&index_name, request.embedding_ids, embeddings.view()))
        .await?;
    log_index_size(&state, &name);
    Ok(Json(()))
}
