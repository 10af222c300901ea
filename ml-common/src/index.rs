//! Request and response bodies for the index and root endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Number of neighbours returned by a search when `k` is not given.
pub const DEFAULT_K: i64 = 10;

/// Body of `POST /index/{name}/add` and `POST /index/{name}/create`.
///
/// `embeddings` is kept as raw JSON so the server can report shape problems
/// (wrong number of axes, too few columns) with its own messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRequest {
    pub embedding_ids: Vec<String>,
    pub embeddings: Value,
}

/// Query string of `POST /index/{name}/search`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub k: Option<i64>,
}

impl SearchParams {
    pub fn k(&self) -> i64 {
        self.k.unwrap_or(DEFAULT_K)
    }
}

/// Body of `GET /`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_request_deserialization() {
        let json = r#"{
            "embedding_ids": ["a", "b"],
            "embeddings": [[0.0, 1.0], [1.0, 0.0]]
        }"#;

        let request: IndexRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.embedding_ids, vec!["a", "b"]);
        assert!(request.embeddings.is_array());
    }

    #[test]
    fn test_index_request_requires_ids() {
        let json = r#"{"embeddings": [[0.0, 1.0]]}"#;
        assert!(serde_json::from_str::<IndexRequest>(json).is_err());
    }

    #[test]
    fn test_search_params_default_k() {
        assert_eq!(SearchParams::default().k(), DEFAULT_K);
        assert_eq!(SearchParams { k: Some(3) }.k(), 3);
    }
}
