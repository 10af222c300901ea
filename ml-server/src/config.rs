//! Configuration for the inference server.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use ml_common::ModelType;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the inference server.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub requests: RequestsConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted request body, uploaded images included.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Model cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Root directory for downloaded model weights.
    #[serde(default = "default_cache_folder")]
    pub cache_folder: PathBuf,
    /// Seconds of inactivity before a model is unloaded. 0 keeps models forever.
    #[serde(default = "default_model_ttl")]
    pub ttl_secs: u64,
    /// Models to load before the server starts accepting requests.
    #[serde(default)]
    pub preload: Vec<PreloadModel>,
}

impl ModelsConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            cache_folder: default_cache_folder(),
            ttl_secs: default_model_ttl(),
            preload: vec![],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreloadModel {
    pub name: String,
    pub model_type: ModelType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestsConfig {
    /// Size of the blocking worker pool. 0 runs blocking work inline.
    #[serde(default = "default_request_threads")]
    pub threads: usize,
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            threads: default_request_threads(),
        }
    }
}

/// HNSW parameters used for every index.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_hnsw_m")]
    pub m: usize,
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            m: default_hnsw_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3003
}
fn default_max_upload_bytes() -> usize {
    1 << 24
}
fn default_cache_folder() -> PathBuf {
    PathBuf::from("/cache")
}
fn default_model_ttl() -> u64 {
    300
}
fn default_request_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
fn default_hnsw_m() -> usize {
    32
}
fn default_ef_construction() -> usize {
    40
}
fn default_ef_search() -> usize {
    16
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (ML__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("models.ttl_secs", default_model_ttl() as i64)?
            .set_default("requests.threads", default_request_threads() as i64)?
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("ML")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_config() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 3003);
        assert_eq!(server.max_upload_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_model_ttl() {
        let mut models = ModelsConfig::default();
        assert_eq!(models.ttl(), Some(Duration::from_secs(300)));

        models.ttl_secs = 0;
        assert_eq!(models.ttl(), None);
    }

    #[test]
    fn test_default_index_config() {
        let index = IndexConfig::default();
        assert_eq!(index.m, 32);
        assert_eq!(index.ef_construction, 40);
        assert_eq!(index.ef_search, 16);
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let config: Config = ConfigLoader::builder()
            .add_source(File::from_str(
                r#"
                [models]
                ttl_secs = 0

                [[models.preload]]
                name = "clip-ViT-B-32"
                model_type = "clip"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.models.ttl(), None);
        assert_eq!(config.models.preload.len(), 1);
        assert_eq!(config.models.preload[0].model_type, ModelType::Clip);
        assert_eq!(config.server.port, 3003);
    }
}
