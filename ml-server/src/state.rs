//! Shared application state.

use std::sync::Arc;

use ml_common::ModelType;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::index::IndexRegistry;
use crate::model::{
    Clock, FastEmbedFactory, InferenceModel, ModelCache, ModelFactory, ModelInput, ModelLoader,
    ModelOptions, SystemClock,
};

/// Shared application state passed to all handlers.
pub struct AppState {
    pub config: Config,
    pub dispatcher: Dispatcher,
    pub model_cache: ModelCache,
    pub model_loader: ModelLoader,
    pub indices: IndexRegistry,
}

impl AppState {
    /// State backed by fastembed models cached under `models.cache_folder`.
    pub fn new(config: Config) -> Self {
        let factory = Arc::new(FastEmbedFactory::new(config.models.cache_folder.clone()));
        Self::with_factory(config, factory, Arc::new(SystemClock))
    }

    pub fn with_factory(config: Config, factory: Arc<dyn ModelFactory>, clock: Arc<dyn Clock>) -> Self {
        let ttl = config.models.ttl();
        let model_cache = ModelCache::new(factory, ttl, clock);
        match ttl {
            Some(ttl) => tracing::info!(
                "Created in-memory cache with unloading after {}s of inactivity.",
                ttl.as_secs()
            ),
            None => tracing::info!("Created in-memory cache with unloading disabled."),
        }

        let dispatcher = Dispatcher::new(config.requests.threads);
        tracing::info!(
            "Initialized request thread pool with {} threads.",
            dispatcher.threads()
        );

        let indices = IndexRegistry::new(config.index.clone());

        Self {
            config,
            dispatcher,
            model_cache,
            model_loader: ModelLoader::new(),
            indices,
        }
    }

    /// Fetch a model from the cache and make sure it is loaded. Blocking.
    pub fn load_model(
        &self,
        model_name: &str,
        model_type: ModelType,
        options: &ModelOptions,
    ) -> Result<Arc<dyn InferenceModel>> {
        let model = self.model_cache.get(model_name, model_type, options)?;
        self.model_loader.ensure_loaded(model.as_ref())?;
        Ok(model)
    }

    /// Load (if needed), configure and run a model. Blocking.
    pub fn predict(
        &self,
        model_name: &str,
        model_type: ModelType,
        options: &ModelOptions,
        input: ModelInput,
    ) -> Result<Vec<f32>> {
        let model = self.load_model(model_name, model_type, options)?;
        model.configure(options);
        model.predict(input)
    }

    /// Load every model listed under `models.preload`, logging failures.
    pub async fn preload(self: &Arc<Self>) {
        for entry in self.config.models.preload.clone() {
            let state = self.clone();
            let name = entry.name.clone();
            let model_type = entry.model_type;
            let result = self
                .dispatcher
                .run(move || {
                    state
                        .load_model(&entry.name, model_type, &ModelOptions::new())
                        .map(|_| ())
                })
                .await;
            match result {
                Ok(()) => tracing::info!("Preloaded {} model '{}'", model_type, name),
                Err(e) => tracing::warn!("Failed to preload model '{}': {}", name, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreloadModel;
    use crate::test_util::{test_config, FakeFactory, ManualClock};

    #[test]
    fn test_predict_loads_and_configures() {
        let factory = Arc::new(FakeFactory::new(12));
        let state = AppState::with_factory(test_config(), factory.clone(), Arc::new(ManualClock::new()));
        let options = serde_json::json!({"batchSize": 3}).as_object().cloned().unwrap();

        let embedding = state
            .predict("m", ModelType::TextEmbedding, &options, ModelInput::Text("hi".into()))
            .unwrap();

        assert_eq!(embedding.len(), 12);
        let model = factory.last().unwrap();
        assert!(model.is_loaded());
        assert_eq!(model.batch_size(), Some(3));
    }

    #[tokio::test]
    async fn test_preload_loads_listed_models() {
        let mut config = test_config();
        config.models.preload = vec![
            PreloadModel {
                name: "m".to_string(),
                model_type: ModelType::Clip,
            },
            PreloadModel {
                name: FakeFactory::UNKNOWN_MODEL.to_string(),
                model_type: ModelType::Clip,
            },
        ];
        let factory = Arc::new(FakeFactory::new(12));
        let state = Arc::new(AppState::with_factory(config, factory.clone(), Arc::new(ManualClock::new())));

        state.preload().await;

        assert_eq!(factory.created(), 1);
        assert!(factory.last().unwrap().is_loaded());
        assert_eq!(state.model_cache.len(), 1);
    }
}
