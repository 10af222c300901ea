//! Model types served by the inference server.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kinds of models a request can be routed to.
///
/// The model type decides which inputs a model accepts and which load lock
/// serializes its weight loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelType {
    /// Joint text/image embedding model (textual and visual towers)
    Clip,
    /// Text-only embedding model
    TextEmbedding,
    /// Image-only embedding model
    ImageEmbedding,
}

impl ModelType {
    /// All model type variants for iteration.
    pub const ALL: [ModelType; 3] = [
        ModelType::Clip,
        ModelType::TextEmbedding,
        ModelType::ImageEmbedding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Clip => "clip",
            ModelType::TextEmbedding => "text-embedding",
            ModelType::ImageEmbedding => "image-embedding",
        }
    }

    pub fn accepts_text(&self) -> bool {
        matches!(self, ModelType::Clip | ModelType::TextEmbedding)
    }

    pub fn accepts_image(&self) -> bool {
        matches!(self, ModelType::Clip | ModelType::ImageEmbedding)
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known model type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown model type '{0}'")]
pub struct ParseModelTypeError(pub String);

impl FromStr for ModelType {
    type Err = ParseModelTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseModelTypeError(s.to_string()))
    }
}
