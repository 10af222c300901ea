//! Model handles backed by fastembed (ONNX Runtime).
//!
//! Weights are fetched from the Hugging Face hub into the configured cache
//! folder on first load and read from there afterwards.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use fastembed::{
    EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions, ModelInfo,
    TextEmbedding,
};
use ml_common::ModelType;

use super::{batch_size_option, InferenceModel, LoadError, ModelFactory, ModelInput, ModelOptions};
use crate::error::{Error, Result};

/// Creates `FastEmbedModel` handles rooted at a cache folder.
pub struct FastEmbedFactory {
    cache_dir: PathBuf,
}

impl FastEmbedFactory {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }
}

impl ModelFactory for FastEmbedFactory {
    fn create(
        &self,
        model_name: &str,
        model_type: ModelType,
        _options: &ModelOptions,
    ) -> Result<Arc<dyn InferenceModel>> {
        let model = FastEmbedModel::resolve(model_name, model_type, &self.cache_dir)?;
        Ok(Arc::new(model))
    }
}

/// A text, image or CLIP embedding model.
///
/// CLIP models are split in two: the textual tower handles text input and
/// the visual tower handles images. Both are loaded together.
pub struct FastEmbedModel {
    model_name: String,
    model_type: ModelType,
    cache_dir: PathBuf,
    text_spec: Option<(EmbeddingModel, String)>,
    vision_spec: Option<(ImageEmbeddingModel, String)>,
    text: RwLock<Option<TextEmbedding>>,
    vision: RwLock<Option<ImageEmbedding>>,
    batch_size: RwLock<Option<usize>>,
}

impl FastEmbedModel {
    /// Map a model name onto the library's supported models.
    ///
    /// Names match a model code (`Qdrant/all-MiniLM-L6-v2`) or its basename,
    /// ignoring case. A CLIP model `X` needs both `X-text` and `X-vision`.
    pub fn resolve(model_name: &str, model_type: ModelType, cache_dir: &Path) -> Result<Self> {
        let not_found = || Error::ModelNotFound(format!("{} model '{}'", model_type, model_name));

        let (text_spec, vision_spec) = match model_type {
            ModelType::Clip => {
                let text = find_model(
                    TextEmbedding::list_supported_models(),
                    &format!("{}-text", model_name),
                )
                .ok_or_else(not_found)?;
                let vision = find_model(
                    ImageEmbedding::list_supported_models(),
                    &format!("{}-vision", model_name),
                )
                .ok_or_else(not_found)?;
                (Some(text), Some(vision))
            }
            ModelType::TextEmbedding => {
                let text = find_model(TextEmbedding::list_supported_models(), model_name)
                    .ok_or_else(not_found)?;
                (Some(text), None)
            }
            ModelType::ImageEmbedding => {
                let vision = find_model(ImageEmbedding::list_supported_models(), model_name)
                    .ok_or_else(not_found)?;
                (None, Some(vision))
            }
        };

        Ok(Self {
            model_name: model_name.to_string(),
            model_type,
            cache_dir: cache_dir.to_path_buf(),
            text_spec,
            vision_spec,
            text: RwLock::new(None),
            vision: RwLock::new(None),
            batch_size: RwLock::new(None),
        })
    }

    /// Cache directories of every file set this model uses.
    fn cache_paths(&self) -> Vec<PathBuf> {
        let text = self.text_spec.iter().map(|(_, code)| code);
        let vision = self.vision_spec.iter().map(|(_, code)| code);
        text.chain(vision)
            .map(|code| self.cache_dir.join(hub_cache_dir_name(code)))
            .collect()
    }

    fn batch_size(&self) -> Option<usize> {
        *self.batch_size.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InferenceModel for FastEmbedModel {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn model_type(&self) -> ModelType {
        self.model_type
    }

    fn is_loaded(&self) -> bool {
        let text_ready = self.text_spec.is_none()
            || self.text.read().unwrap_or_else(PoisonError::into_inner).is_some();
        let vision_ready = self.vision_spec.is_none()
            || self.vision.read().unwrap_or_else(PoisonError::into_inner).is_some();
        text_ready && vision_ready
    }

    fn load(&self) -> std::result::Result<(), LoadError> {
        if let Some((model, code)) = &self.text_spec {
            let mut slot = self.text.write().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                let options = InitOptions::new(model.clone())
                    .with_cache_dir(self.cache_dir.clone())
                    .with_show_download_progress(false);
                *slot = Some(TextEmbedding::try_new(options).map_err(|e| classify_load_error(&e))?);
                tracing::debug!("Loaded text model {}", code);
            }
        }

        if let Some((model, code)) = &self.vision_spec {
            let mut slot = self.vision.write().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                let options = ImageInitOptions::new(model.clone())
                    .with_cache_dir(self.cache_dir.clone())
                    .with_show_download_progress(false);
                *slot = Some(ImageEmbedding::try_new(options).map_err(|e| classify_load_error(&e))?);
                tracing::debug!("Loaded vision model {}", code);
            }
        }

        Ok(())
    }

    fn clear_cache(&self) -> Result<()> {
        *self.text.write().unwrap_or_else(PoisonError::into_inner) = None;
        *self.vision.write().unwrap_or_else(PoisonError::into_inner) = None;

        for path in self.cache_paths() {
            if !path.exists() {
                continue;
            }
            tracing::info!("Removing model cache {}", path.display());
            std::fs::remove_dir_all(&path).map_err(|e| {
                Error::Internal(format!("Failed to clear cache {}: {}", path.display(), e))
            })?;
        }
        Ok(())
    }

    fn configure(&self, options: &ModelOptions) {
        *self.batch_size.write().unwrap_or_else(PoisonError::into_inner) =
            batch_size_option(options);
    }

    fn predict(&self, input: ModelInput) -> Result<Vec<f32>> {
        let batch_size = self.batch_size();

        let embeddings = match input {
            ModelInput::Text(text) => {
                let guard = self.text.read().unwrap_or_else(PoisonError::into_inner);
                let model = guard.as_ref().ok_or_else(|| self.wrong_input("text"))?;
                model.embed(vec![text], batch_size)
            }
            ModelInput::Image(bytes) => {
                let guard = self.vision.read().unwrap_or_else(PoisonError::into_inner);
                let model = guard.as_ref().ok_or_else(|| self.wrong_input("image"))?;
                model.embed_bytes(&[bytes.as_slice()], batch_size)
            }
        }
        .map_err(|e| Error::InferenceFailed(format!("{}: {:#}", self.model_name, e)))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::InferenceFailed(format!("{}: empty output", self.model_name)))
    }
}

impl FastEmbedModel {
    fn wrong_input(&self, kind: &str) -> Error {
        let accepts = match kind {
            "text" => self.model_type.accepts_text(),
            _ => self.model_type.accepts_image(),
        };
        if accepts {
            Error::Internal(format!("{} model '{}' is not loaded", self.model_type, self.model_name))
        } else {
            Error::InvalidRequest(format!(
                "{} model '{}' does not accept {} input",
                self.model_type, self.model_name, kind
            ))
        }
    }
}

fn find_model<T>(models: Vec<ModelInfo<T>>, name: &str) -> Option<(T, String)> {
    models
        .into_iter()
        .find(|info| matches_model_code(&info.model_code, name))
        .map(|info| (info.model, info.model_code))
}

fn matches_model_code(code: &str, name: &str) -> bool {
    let basename = code.rsplit('/').next().unwrap_or(code);
    code.eq_ignore_ascii_case(name) || basename.eq_ignore_ascii_case(name)
}

/// Directory name the hub client uses for a repository (`models--org--name`).
fn hub_cache_dir_name(model_code: &str) -> String {
    format!("models--{}", model_code.replace('/', "--"))
}

/// Decide whether a load failure came from the on-disk cache.
fn classify_load_error(err: &anyhow::Error) -> LoadError {
    let message = format!("{:#}", err);

    let io_kind = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<std::io::Error>())
        .map(|io| io.kind());
    match io_kind {
        Some(ErrorKind::NotFound) => return LoadError::Missing(message),
        Some(_) => return LoadError::Corrupt(message),
        None => {}
    }

    let lower = message.to_lowercase();
    if lower.contains("no such file") || lower.contains("nosuchfile") {
        LoadError::Missing(message)
    } else if ["protobuf", "zip", "corrupt", "unexpected end of file"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        LoadError::Corrupt(message)
    } else {
        LoadError::Other(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_matches_model_code() {
        assert!(matches_model_code("Qdrant/all-MiniLM-L6-v2", "Qdrant/all-MiniLM-L6-v2"));
        assert!(matches_model_code("Qdrant/all-MiniLM-L6-v2", "all-minilm-l6-v2"));
        assert!(!matches_model_code("Qdrant/all-MiniLM-L6-v2", "all-MiniLM"));
        assert!(!matches_model_code("Qdrant/all-MiniLM-L6-v2", "Qdrant"));
    }

    #[test]
    fn test_hub_cache_dir_name() {
        assert_eq!(
            hub_cache_dir_name("Qdrant/clip-ViT-B-32-text"),
            "models--Qdrant--clip-ViT-B-32-text"
        );
    }

    #[test]
    fn test_classify_io_errors() {
        let missing = anyhow::Error::new(std::io::Error::new(ErrorKind::NotFound, "model.onnx"));
        assert!(matches!(classify_load_error(&missing), LoadError::Missing(_)));

        let truncated = anyhow::Error::new(std::io::Error::new(ErrorKind::UnexpectedEof, "eof"))
            .context("reading tokenizer");
        assert!(matches!(classify_load_error(&truncated), LoadError::Corrupt(_)));
    }

    #[test]
    fn test_classify_by_message() {
        let protobuf = anyhow!("Load model from model.onnx failed: Protobuf parsing failed");
        assert!(matches!(classify_load_error(&protobuf), LoadError::Corrupt(_)));

        let no_file = anyhow!("[ONNXRuntimeError] : 3 : NO_SUCHFILE : No such file or directory");
        assert!(matches!(classify_load_error(&no_file), LoadError::Missing(_)));

        let other = anyhow!("CUDA out of memory");
        assert!(matches!(classify_load_error(&other), LoadError::Other(_)));
    }

    #[test]
    fn test_resolve_text_model() {
        let dir = tempfile::tempdir().unwrap();
        let model = FastEmbedModel::resolve("all-MiniLM-L6-v2", ModelType::TextEmbedding, dir.path())
            .unwrap();

        assert_eq!(model.model_name(), "all-MiniLM-L6-v2");
        assert!(!model.is_loaded());
        assert_eq!(
            model.cache_paths(),
            vec![dir.path().join("models--Qdrant--all-MiniLM-L6-v2")]
        );
    }

    #[test]
    fn test_resolve_clip_needs_both_towers() {
        let dir = tempfile::tempdir().unwrap();
        let model = FastEmbedModel::resolve("clip-ViT-B-32", ModelType::Clip, dir.path()).unwrap();

        assert_eq!(model.cache_paths().len(), 2);
    }

    #[test]
    fn test_resolve_unknown_model() {
        let dir = tempfile::tempdir().unwrap();
        let result = FastEmbedModel::resolve("no-such-model", ModelType::TextEmbedding, dir.path());

        assert!(matches!(result, Err(Error::ModelNotFound(_))));
    }

    #[test]
    fn test_clear_cache_removes_model_directory() {
        let dir = tempfile::tempdir().unwrap();
        let model = FastEmbedModel::resolve("all-MiniLM-L6-v2", ModelType::TextEmbedding, dir.path())
            .unwrap();
        let cached = dir.path().join("models--Qdrant--all-MiniLM-L6-v2");
        std::fs::create_dir_all(cached.join("snapshots")).unwrap();
        std::fs::write(cached.join("snapshots").join("model.onnx"), b"garbage").unwrap();

        model.clear_cache().unwrap();

        assert!(!cached.exists());
        assert!(dir.path().exists());
    }

    #[test]
    fn test_predict_rejects_unsupported_input() {
        let dir = tempfile::tempdir().unwrap();
        let model = FastEmbedModel::resolve("all-MiniLM-L6-v2", ModelType::TextEmbedding, dir.path())
            .unwrap();

        let result = model.predict(ModelInput::Image(vec![0u8; 4]));

        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }
}
