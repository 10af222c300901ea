//! In-process stand-ins for models and clocks, used by unit and API tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use ml_common::ModelType;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    batch_size_option, Clock, InferenceModel, LoadError, ModelFactory, ModelInput, ModelOptions,
};
use crate::state::AppState;

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deterministic model producing `dim`-sized embeddings derived from the input bytes.
pub struct FakeModel {
    name: String,
    model_type: ModelType,
    dim: usize,
    loaded: AtomicBool,
    load_calls: AtomicUsize,
    clear_calls: AtomicUsize,
    load_failures: Mutex<VecDeque<LoadError>>,
    batch_size: Mutex<Option<usize>>,
}

impl FakeModel {
    pub fn new(name: &str, model_type: ModelType, dim: usize) -> Self {
        Self {
            name: name.to_string(),
            model_type,
            dim,
            loaded: AtomicBool::new(false),
            load_calls: AtomicUsize::new(0),
            clear_calls: AtomicUsize::new(0),
            load_failures: Mutex::new(VecDeque::new()),
            batch_size: Mutex::new(None),
        }
    }

    /// Make the next loads fail with these errors, in order.
    pub fn with_load_failures(self, failures: Vec<LoadError>) -> Self {
        *self.load_failures.lock().unwrap_or_else(PoisonError::into_inner) = failures.into();
        self
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn clear_calls(&self) -> usize {
        self.clear_calls.load(Ordering::SeqCst)
    }

    pub fn batch_size(&self) -> Option<usize> {
        *self.batch_size.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The embedding `predict` returns for `bytes`.
    pub fn embed_bytes(bytes: &[u8], dim: usize) -> Vec<f32> {
        let mut vector = vec![0.0f32; dim];
        for (i, &b) in bytes.iter().enumerate() {
            vector[i % dim] += b as f32 / 255.0;
        }
        vector
    }
}

impl InferenceModel for FakeModel {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn model_type(&self) -> ModelType {
        self.model_type
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn load(&self) -> std::result::Result<(), LoadError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        // Widen the race window for concurrent load tests
        std::thread::sleep(Duration::from_millis(5));

        let failure = self
            .load_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match failure {
            Some(e) => Err(e),
            None => {
                self.loaded.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    fn clear_cache(&self) -> Result<()> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        self.loaded.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn configure(&self, options: &ModelOptions) {
        *self.batch_size.lock().unwrap_or_else(PoisonError::into_inner) = batch_size_option(options);
    }

    fn predict(&self, input: ModelInput) -> Result<Vec<f32>> {
        if !self.is_loaded() {
            return Err(Error::Internal(format!("model '{}' is not loaded", self.name)));
        }
        let accepted = match &input {
            ModelInput::Text(_) => self.model_type.accepts_text(),
            ModelInput::Image(_) => self.model_type.accepts_image(),
        };
        if !accepted {
            return Err(Error::InvalidRequest(format!(
                "{} model '{}' does not accept {} input",
                self.model_type,
                self.name,
                input.kind()
            )));
        }

        let bytes = match &input {
            ModelInput::Text(text) => text.as_bytes(),
            ModelInput::Image(bytes) => bytes.as_slice(),
        };
        Ok(Self::embed_bytes(bytes, self.dim))
    }
}

/// Factory handing out `FakeModel`s and counting how many it created.
pub struct FakeFactory {
    dim: usize,
    created: AtomicUsize,
    last: Mutex<Option<Arc<FakeModel>>>,
}

impl FakeFactory {
    /// Model name the factory refuses to create.
    pub const UNKNOWN_MODEL: &'static str = "unknown-model";

    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            created: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// The most recently created model.
    pub fn last(&self) -> Option<Arc<FakeModel>> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ModelFactory for FakeFactory {
    fn create(
        &self,
        model_name: &str,
        model_type: ModelType,
        _options: &ModelOptions,
    ) -> Result<Arc<dyn InferenceModel>> {
        if model_name == Self::UNKNOWN_MODEL {
            return Err(Error::ModelNotFound(format!("{} model '{}'", model_type, model_name)));
        }
        let model = Arc::new(FakeModel::new(model_name, model_type, self.dim));
        self.created.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(model.clone());
        Ok(model)
    }
}

/// Configuration suitable for tests: small pool, no TTL, temp cache folder.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.models.cache_folder = std::env::temp_dir().join("vector-ml-test-cache");
    config.models.ttl_secs = 0;
    config.requests.threads = 2;
    config.logging.level = "debug".to_string();
    config
}

/// App state wired to a `FakeFactory` producing `dim`-sized embeddings.
pub fn create_test_state(dim: usize) -> (Arc<AppState>, Arc<FakeFactory>) {
    let factory = Arc::new(FakeFactory::new(dim));
    let state = AppState::with_factory(test_config(), factory.clone(), Arc::new(ManualClock::new()));
    (Arc::new(state), factory)
}
