//! Lazy model loading with one lock per model type.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use ml_common::ModelType;

use super::{InferenceModel, LoadError};
use crate::error::{Error, Result};

/// Loads model handles on first use.
///
/// Loads of models of the same type are serialized; models of different
/// types load concurrently. A load that fails because of a missing or
/// corrupt cached file clears the model's cache and is retried exactly once.
pub struct ModelLoader {
    locks: HashMap<ModelType, Mutex<()>>,
}

impl ModelLoader {
    pub fn new() -> Self {
        Self {
            locks: ModelType::ALL
                .into_iter()
                .map(|model_type| (model_type, Mutex::new(())))
                .collect(),
        }
    }

    /// Make sure `model` is loaded, loading it if needed.
    ///
    /// The type lock is held from the first load attempt through the cache
    /// clear and the retry, so no other load of this type can read files
    /// while they are being deleted.
    pub fn ensure_loaded(&self, model: &dyn InferenceModel) -> Result<()> {
        if model.is_loaded() {
            return Ok(());
        }

        let _guard = self.locks[&model.model_type()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Another request may have loaded it while we waited
        if model.is_loaded() {
            return Ok(());
        }

        tracing::info!("Loading {} model '{}'", model.model_type(), model.model_name());
        match model.load() {
            Ok(()) => Ok(()),
            Err(e) if e.is_cache_fault() => {
                tracing::warn!(
                    "Failed to load {} model '{}' ({}). Clearing cache and retrying.",
                    model.model_type(),
                    model.model_name(),
                    e
                );
                model.clear_cache()?;
                model.load().map_err(|e| load_failed(model, e))
            }
            Err(e) => Err(load_failed(model, e)),
        }
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn load_failed(model: &dyn InferenceModel, e: LoadError) -> Error {
    Error::LoadFailed(format!(
        "{} model '{}': {}",
        model.model_type(),
        model.model_name(),
        e
    ))
}
