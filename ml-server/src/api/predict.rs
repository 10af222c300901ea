//! Multipart inference endpoints.

use std::str::FromStr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use ml_common::ModelType;
use ndarray::Array2;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{ModelInput, ModelOptions};
use crate::state::AppState;
use crate::validation::parse_options;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/predict", post(predict))
        .route("/pipeline", post(pipeline))
}

/// Raw multipart fields shared by `/predict` and `/pipeline`.
#[derive(Debug, Default)]
struct PredictForm {
    model_name: Option<String>,
    model_type: Option<String>,
    options: Option<String>,
    text: Option<String>,
    image: Option<Bytes>,
    index_name: Option<String>,
    embedding_id: Option<String>,
    k: Option<String>,
}

impl PredictForm {
    async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| Error::InvalidRequest(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "image" {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::InvalidRequest(e.body_text()))?;
                form.image = Some(bytes);
                continue;
            }

            let value = field
                .text()
                .await
                .map_err(|e| Error::InvalidRequest(e.body_text()))?;
            let slot = match name.as_str() {
                "modelName" => &mut form.model_name,
                "modelType" => &mut form.model_type,
                "options" => &mut form.options,
                "text" => &mut form.text,
                "indexName" => &mut form.index_name,
                "embeddingId" => &mut form.embedding_id,
                "k" => &mut form.k,
                other => {
                    tracing::debug!("Ignoring unknown form field '{}'", other);
                    continue;
                }
            };
            *slot = Some(value);
        }
        Ok(form)
    }

    /// Validate the model fields and pick the input, image first.
    fn into_request(self) -> Result<PredictRequest> {
        let model_name = self
            .model_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::InvalidRequest("modelName is required".to_string()))?;
        let model_type = self
            .model_type
            .ok_or_else(|| Error::InvalidRequest("modelType is required".to_string()))?;
        let model_type =
            ModelType::from_str(&model_type).map_err(|e| Error::InvalidRequest(e.to_string()))?;

        let input = match (self.image, self.text) {
            (Some(image), _) => ModelInput::Image(image.to_vec()),
            (None, Some(text)) => ModelInput::Text(text),
            (None, None) => {
                return Err(Error::InvalidRequest(
                    "Either image or text must be provided".to_string(),
                ))
            }
        };
        let options = parse_options(self.options.as_deref().unwrap_or("{}"))?;

        Ok(PredictRequest {
            model_name,
            model_type,
            options,
            input,
        })
    }
}

struct PredictRequest {
    model_name: String,
    model_type: ModelType,
    options: ModelOptions,
    input: ModelInput,
}

async fn run_predict(state: &Arc<AppState>, request: PredictRequest) -> Result<Vec<f32>> {
    tracing::debug!(
        "Predict request for {} model '{}' with {} input",
        request.model_type,
        request.model_name,
        request.input.kind()
    );

    let worker = state.clone();
    state
        .dispatcher
        .run(move || {
            worker.predict(
                &request.model_name,
                request.model_type,
                &request.options,
                request.input,
            )
        })
        .await
}

/// POST /predict - Run a model on text or an uploaded image.
async fn predict(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<Vec<f32>>> {
    let request = PredictForm::read(multipart).await?.into_request()?;
    let embedding = run_predict(&state, request).await?;
    Ok(Json(embedding))
}

/// POST /pipeline - Predict, then optionally search and/or add to an index.
async fn pipeline(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<Value>> {
    let mut form = PredictForm::read(multipart).await?;
    let index_name = form.index_name.take();
    let embedding_id = form.embedding_id.take();
    let k = form.k.take().map(|k| parse_k(&k)).transpose()?;
    if let Some(k) = k {
        if k < 1 {
            return Err(Error::InvalidRequest(format!(
                "k must be a positive integer; got {}",
                k
            )));
        }
    }

    let embedding = run_predict(&state, form.into_request()?).await?;
    let Some(index_name) = index_name else {
        return Ok(Json(Value::from(embedding)));
    };

    let ncols = embedding.len();
    let embeddings = Array2::from_shape_vec((1, ncols), embedding)
        .map_err(|e| Error::Internal(e.to_string()))?;
    let mut output = Value::from(embeddings.row(0).to_vec());

    if let Some(k) = k {
        let worker = state.clone();
        let name = index_name.clone();
        let query = embeddings.clone();
        let neighbours = state
            .dispatcher
            .run(move || worker.indices.search(&name, query.view(), k))
            .await?;
        output = serde_json::to_value(neighbours).map_err(|e| Error::Internal(e.to_string()))?;
    }

    if let Some(embedding_id) = embedding_id {
        let worker = state.clone();
        state
            .dispatcher
            .run(move || worker.indices.add(&index_name, vec![embedding_id], embeddings.view()))
            .await?;
    }

    Ok(Json(output))
}

fn parse_k(k: &str) -> Result<i64> {
    k.trim()
        .parse()
        .map_err(|_| Error::InvalidRequest(format!("k must be a positive integer; got {}", k)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(model_type: &str) -> PredictForm {
        PredictForm {
            model_name: Some("m".to_string()),
            model_type: Some(model_type.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_image_wins_over_text() {
        let mut form = form("clip");
        form.text = Some("a cat".to_string());
        form.image = Some(Bytes::from_static(b"\x89PNG"));

        let request = form.into_request().unwrap();
        assert!(matches!(request.input, ModelInput::Image(bytes) if bytes == b"\x89PNG"));
    }

    #[test]
    fn test_missing_input_is_rejected() {
        let result = form("clip").into_request();
        assert!(matches!(result, Err(Error::InvalidRequest(msg)) if msg.contains("image or text")));
    }

    #[test]
    fn test_unknown_model_type_is_rejected() {
        let mut form = form("facial-recognition");
        form.text = Some("hi".to_string());

        assert!(matches!(form.into_request(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_missing_model_name_is_rejected() {
        let mut form = form("clip");
        form.model_name = None;
        form.text = Some("hi".to_string());

        assert!(matches!(form.into_request(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_options_default_to_empty() {
        let mut form = form("text-embedding");
        form.text = Some("hi".to_string());

        let request = form.into_request().unwrap();
        assert!(request.options.is_empty());
        assert_eq!(request.model_type, ModelType::TextEmbedding);
    }

    #[test]
    fn test_parse_k() {
        assert_eq!(parse_k("5").unwrap(), 5);
        assert_eq!(parse_k(" -1 ").unwrap(), -1);
        assert!(parse_k("five").is_err());
    }
}
