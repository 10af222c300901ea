//! Model handles and their lifecycle.
//!
//! This module defines the `InferenceModel` trait that wraps an externally
//! implemented model behind load/configure/predict operations, the
//! `ModelFactory` that constructs unloaded handles, and the cache and loader
//! that decide when handles are created, loaded and dropped.

mod cache;
mod embed;
mod loader;

pub use self::cache::{Clock, ModelCache, SystemClock};
pub use self::embed::{FastEmbedFactory, FastEmbedModel};
pub use self::loader::ModelLoader;

use std::sync::Arc;

use ml_common::ModelType;
use serde_json::{Map, Value};

use crate::error::Result;

/// Options passed along with a predict request (the `options` form field).
pub type ModelOptions = Map<String, Value>;

/// Input to a single prediction.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelInput {
    Text(String),
    /// Encoded image bytes (PNG, JPEG, ...).
    Image(Vec<u8>),
}

impl ModelInput {
    pub fn kind(&self) -> &'static str {
        match self {
            ModelInput::Text(_) => "text",
            ModelInput::Image(_) => "image",
        }
    }
}

/// Why a model failed to load.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// A file the model needs is missing from the on-disk cache.
    #[error("missing model file: {0}")]
    Missing(String),
    /// A cached file exists but cannot be parsed (bad protobuf, bad archive).
    #[error("corrupt model file: {0}")]
    Corrupt(String),
    #[error("{0}")]
    Other(String),
}

impl LoadError {
    /// Whether clearing the model's on-disk cache may fix this failure.
    pub fn is_cache_fault(&self) -> bool {
        matches!(self, LoadError::Missing(_) | LoadError::Corrupt(_))
    }
}

/// A loadable, configurable model.
///
/// Implementations use interior mutability: a handle is shared between
/// requests through an `Arc` and loaded at most once by the `ModelLoader`.
pub trait InferenceModel: Send + Sync {
    fn model_name(&self) -> &str;

    fn model_type(&self) -> ModelType;

    fn is_loaded(&self) -> bool;

    /// Load the model weights, downloading them first if needed.
    fn load(&self) -> std::result::Result<(), LoadError>;

    /// Delete the model's on-disk cache and mark it unloaded.
    fn clear_cache(&self) -> Result<()>;

    /// Apply per-request options. Unknown keys are ignored.
    fn configure(&self, options: &ModelOptions);

    /// Run the model on one input and return its embedding.
    fn predict(&self, input: ModelInput) -> Result<Vec<f32>>;
}

/// Constructs unloaded model handles.
pub trait ModelFactory: Send + Sync {
    fn create(
        &self,
        model_name: &str,
        model_type: ModelType,
        options: &ModelOptions,
    ) -> Result<Arc<dyn InferenceModel>>;
}

/// Read the batch size option, accepting both `batchSize` and `batch_size`.
pub fn batch_size_option(options: &ModelOptions) -> Option<usize> {
    options
        .get("batchSize")
        .or_else(|| options.get("batch_size"))
        .and_then(Value::as_u64)
        .filter(|&n| n > 0)
        .map(|n| n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> ModelOptions {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_batch_size_option() {
        assert_eq!(batch_size_option(&options(json!({"batchSize": 8}))), Some(8));
        assert_eq!(batch_size_option(&options(json!({"batch_size": 4}))), Some(4));
        assert_eq!(batch_size_option(&options(json!({"batchSize": 0}))), None);
        assert_eq!(batch_size_option(&options(json!({"batchSize": "8"}))), None);
        assert_eq!(batch_size_option(&options(json!({}))), None);
    }

    #[test]
    fn test_cache_fault_classification() {
        assert!(LoadError::Missing("model.onnx".into()).is_cache_fault());
        assert!(LoadError::Corrupt("model.onnx".into()).is_cache_fault());
        assert!(!LoadError::Other("out of memory".into()).is_cache_fault());
    }
}
