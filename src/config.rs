use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::store::DistanceMetric;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub burndown: BurndownConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./db/chat_rag.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectionConfig {
    #[serde(default = "default_collection_name")]
    pub name: String,
    #[serde(default)]
    pub metric: DistanceMetric,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name: default_collection_name(),
            metric: DistanceMetric::default(),
        }
    }
}

fn default_collection_name() -> String {
    "chat_history".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Endpoint override. Ollama defaults to `http://localhost:11434`,
    /// OpenAI to `https://api.openai.com/v1`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Result count used by `POST /query` when the request omits `n_results`.
    #[serde(default = "default_n_results")]
    pub default_n_results: usize,
    /// Request body cap in bytes. Unset means no limit.
    #[serde(default)]
    pub max_body_bytes: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            default_n_results: default_n_results(),
            max_body_bytes: None,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_n_results() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
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

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BurndownConfig {
    /// `owner/repo`. Falls back to the `GITHUB_REPOSITORY` environment variable.
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for BurndownConfig {
    fn default() -> Self {
        Self {
            repository: None,
            api_url: default_api_url(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("reports/burndown_charts")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the built-in defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        let config = Config::default();
        validate(&config)?;
        return Ok(config);
    }
    load_config(path)
}

fn validate(config: &Config) -> Result<()> {
    if config.collection.name.trim().is_empty() {
        anyhow::bail!("collection.name must not be empty");
    }

    if config.server.default_n_results < 1 {
        anyhow::bail!("server.default_n_results must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "local" | "hashing" => {}
        "openai" | "ollama" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, ollama, or hashing.",
            other
        ),
    }

    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }

    if config.server.max_body_bytes == Some(0) {
        anyhow::bail!("server.max_body_bytes must be > 0 when set");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("chat-rag.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "");
        let config = load_config(&path).unwrap();
        assert_eq!(config.collection.name, "chat_history");
        assert_eq!(config.collection.metric, DistanceMetric::Cosine);
        assert_eq!(config.server.bind, "0.0.0.0:8000");
        assert_eq!(config.server.default_n_results, 3);
        assert_eq!(config.embedding.provider, "local");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = load_config_or_default(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.db.path, PathBuf::from("./db/chat_rag.sqlite"));
    }

    #[test]
    fn test_missing_file_is_an_error_for_load_config() {
        let tmp = TempDir::new().unwrap();
        assert!(load_config(&tmp.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_parses_sections() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            r#"
[db]
path = "/tmp/rag.sqlite"

[collection]
name = "notes"
metric = "l2"

[embedding]
provider = "hashing"
dims = 128

[server]
bind = "127.0.0.1:9000"
default_n_results = 5
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.collection.name, "notes");
        assert_eq!(config.collection.metric, DistanceMetric::L2);
        assert_eq!(config.embedding.dims, Some(128));
        assert_eq!(config.server.default_n_results, 5);
        assert_eq!(config.server.max_body_bytes, None);
    }

    #[test]
    fn test_max_body_bytes() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[server]\nmax_body_bytes = 1048576\n");
        assert_eq!(load_config(&path).unwrap().server.max_body_bytes, Some(1_048_576));

        let path = write_config(&tmp, "[server]\nmax_body_bytes = 0\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_body_bytes"));
    }

    #[test]
    fn test_openai_requires_model_and_dims() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[embedding]\nprovider = \"openai\"\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[embedding]\nprovider = \"chroma\"\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[collection]\nmetric = \"manhattan\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_zero_default_n_results_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[server]\ndefault_n_results = 0\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("default_n_results"));
    }
}
