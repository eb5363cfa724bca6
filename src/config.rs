//! Typed configuration, loaded from TOML and environment overrides.
//!
//! Every section is `#[serde(default)]`, so a config file only needs the keys
//! it changes. [`FabricConfig::validate`] runs once when a fabric is built;
//! nothing downstream re-checks these values.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::FabricError;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FabricConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GeneratorConfig,
    pub optimization: OptimizationConfig,
    pub attribution: AttributionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub db_path: String,
    pub postgres_url: Option<String>,
    pub table: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// ONNX Runtime with a sentence-transformers export on disk.
    Local,
    /// Any OpenAI-compatible `/embeddings` endpoint.
    OpenAi,
    /// Deterministic hashing; no model, no network.
    Hash,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub model: String,
    pub dimensions: usize,
    pub cache_dir: String,
    pub base_url: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProviderKind {
    None,
    OpenAi,
    Anthropic,
}

/// One text-generation collaborator.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneratorConfig {
    pub provider: GenerationProviderKind,
    pub model: String,
    /// Defaults per provider when unset.
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key. Defaults per provider.
    pub api_key_env: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Compress content before it is indexed.
    pub compression: bool,
    /// Rewrite queries before `retrieve_context` searches.
    pub reasoning: bool,
    /// Replaces the built-in compression instruction.
    pub compression_prompt: Option<String>,
    /// Replaces the built-in reasoning instruction.
    pub reasoning_prompt: Option<String>,
    /// Dedicated generator for compression; falls back to `[generation]`.
    pub compressor: Option<GeneratorConfig>,
    /// Dedicated generator for reasoning; falls back to `[generation]`.
    pub reasoner: Option<GeneratorConfig>,
}

/// Default attribution applied by calls that do not pass one.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AttributionConfig {
    pub entity_id: Option<String>,
    pub process_id: Option<String>,
    pub session_id: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            host: "127.0.0.1".into(),
            port: 7437,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_fabric_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self {
            backend: StorageBackend::Sqlite,
            db_path,
            postgres_url: None,
            table: "memories".into(),
            max_connections: 5,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_fabric_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: EmbeddingProviderKind::Local,
            model: "all-MiniLM-L6-v2".into(),
            dimensions: 384,
            cache_dir,
            base_url: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_secs: 30,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: GenerationProviderKind::None,
            model: "gpt-4o-mini".into(),
            base_url: None,
            api_key_env: None,
            max_tokens: 512,
            temperature: 0.0,
            timeout_secs: 60,
        }
    }
}

impl GeneratorConfig {
    pub fn resolved_base_url(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.provider {
            GenerationProviderKind::Anthropic => "https://api.anthropic.com".into(),
            GenerationProviderKind::OpenAi | GenerationProviderKind::None => {
                "https://api.openai.com/v1".into()
            }
        }
    }

    pub fn resolved_api_key_env(&self) -> String {
        if let Some(name) = &self.api_key_env {
            return name.clone();
        }
        match self.provider {
            GenerationProviderKind::Anthropic => "ANTHROPIC_API_KEY".into(),
            GenerationProviderKind::OpenAi | GenerationProviderKind::None => {
                "OPENAI_API_KEY".into()
            }
        }
    }

    fn validate(&self, section: &str) -> Result<(), FabricError> {
        if self.provider == GenerationProviderKind::None {
            return Ok(());
        }
        if self.model.trim().is_empty() {
            return Err(FabricError::config(format!("{section}.model must not be empty")));
        }
        if self.timeout_secs == 0 {
            return Err(FabricError::config(format!(
                "{section}.timeout_secs must be positive"
            )));
        }
        if self.max_tokens == 0 {
            return Err(FabricError::config(format!(
                "{section}.max_tokens must be positive"
            )));
        }
        Ok(())
    }
}

/// Returns `~/.memfabric/`
pub fn default_fabric_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".memfabric")
}

/// Returns the default config file path: `~/.memfabric/config.toml`
pub fn default_config_path() -> PathBuf {
    default_fabric_dir().join("config.toml")
}

impl FabricConfig {
    /// Load config from the default TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            FabricConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MEMFABRIC_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MEMFABRIC_POSTGRES_URL") {
            self.storage.backend = StorageBackend::Postgres;
            self.storage.postgres_url = Some(val);
        }
        if let Ok(val) = std::env::var("MEMFABRIC_ENTITY") {
            self.attribution.entity_id = Some(val);
        }
        if let Ok(val) = std::env::var("MEMFABRIC_PROCESS") {
            self.attribution.process_id = Some(val);
        }
        if let Ok(val) = std::env::var("MEMFABRIC_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Check the whole configuration once. Every failure is a
    /// [`FabricError::Configuration`].
    pub fn validate(&self) -> Result<(), FabricError> {
        if self.embedding.dimensions == 0 {
            return Err(FabricError::config("embedding.dimensions must be positive"));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(FabricError::config("embedding.model must not be empty"));
        }
        if self.embedding.provider == EmbeddingProviderKind::OpenAi && self.embedding.timeout_secs == 0 {
            return Err(FabricError::config("embedding.timeout_secs must be positive"));
        }

        match self.storage.backend {
            StorageBackend::Sqlite => {
                if self.storage.db_path.trim().is_empty() {
                    return Err(FabricError::config("storage.db_path must not be empty"));
                }
            }
            StorageBackend::Postgres => {
                if self.storage.postgres_url.as_deref().is_none_or(|u| u.trim().is_empty()) {
                    return Err(FabricError::config(
                        "storage.postgres_url is required for the postgres backend",
                    ));
                }
                if !crate::store::postgres::is_valid_identifier(&self.storage.table) {
                    return Err(FabricError::config(format!(
                        "storage.table {:?} is not a valid SQL identifier",
                        self.storage.table
                    )));
                }
                if self.storage.max_connections == 0 {
                    return Err(FabricError::config("storage.max_connections must be positive"));
                }
            }
        }

        self.generation.validate("generation")?;
        if let Some(compressor) = &self.optimization.compressor {
            compressor.validate("optimization.compressor")?;
        }
        if let Some(reasoner) = &self.optimization.reasoner {
            reasoner.validate("optimization.reasoner")?;
        }
        Ok(())
    }
}

impl StorageConfig {
    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = FabricConfig::default();
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.generation.provider, GenerationProviderKind::None);
        assert!(!config.optimization.compression);
        assert!(config.storage.db_path.ends_with("memory.db"));
        config.validate().unwrap();
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"

[storage]
backend = "postgres"
postgres_url = "postgres://localhost/agents"
table = "agent_memory"

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dimensions = 1536

[generation]
provider = "anthropic"
model = "claude-haiku"

[optimization]
compression = true
reasoning = true

[optimization.compressor]
provider = "openai"
model = "gpt-4o-mini"

[attribution]
entity_id = "user-42"
"#;
        let config: FabricConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.storage.backend, StorageBackend::Postgres);
        assert_eq!(config.storage.table, "agent_memory");
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::OpenAi);
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.generation.provider, GenerationProviderKind::Anthropic);
        assert_eq!(config.generation.resolved_base_url(), "https://api.anthropic.com");
        assert_eq!(config.generation.resolved_api_key_env(), "ANTHROPIC_API_KEY");
        let compressor = config.optimization.compressor.as_ref().unwrap();
        assert_eq!(compressor.provider, GenerationProviderKind::OpenAi);
        // defaults still apply for unset fields
        assert_eq!(compressor.max_tokens, 512);
        assert!(config.optimization.reasoner.is_none());
        assert_eq!(config.attribution.entity_id.as_deref(), Some("user-42"));
        config.validate().unwrap();
    }

    #[test]
    fn unknown_provider_is_rejected_at_parse_time() {
        let toml_str = r#"
[generation]
provider = "sk-ant-guess"
"#;
        assert!(toml::from_str::<FabricConfig>(toml_str).is_err());
    }

    #[test]
    fn postgres_without_url_is_invalid() {
        let mut config = FabricConfig::default();
        config.storage.backend = StorageBackend::Postgres;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, FabricError::Configuration(_)));
        assert!(err.to_string().contains("postgres_url"));
    }

    #[test]
    fn bad_table_name_is_invalid() {
        let mut config = FabricConfig::default();
        config.storage.backend = StorageBackend::Postgres;
        config.storage.postgres_url = Some("postgres://localhost/db".into());
        config.storage.table = "memories; drop".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_dimensions_is_invalid() {
        let mut config = FabricConfig::default();
        config.embedding.dimensions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn enabled_generator_needs_a_model() {
        let mut config = FabricConfig::default();
        config.optimization.reasoner = Some(GeneratorConfig {
            provider: GenerationProviderKind::OpenAi,
            model: " ".into(),
            ..Default::default()
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("optimization.reasoner.model"));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = GeneratorConfig {
            provider: GenerationProviderKind::OpenAi,
            base_url: Some("http://localhost:11434/v1/".into()),
            ..Default::default()
        };
        assert_eq!(config.resolved_base_url(), "http://localhost:11434/v1");
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = FabricConfig::default();
        std::env::set_var("MEMFABRIC_DB", "/tmp/override.db");
        std::env::set_var("MEMFABRIC_ENTITY", "env-entity");
        std::env::set_var("MEMFABRIC_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.attribution.entity_id.as_deref(), Some("env-entity"));
        assert_eq!(config.server.log_level, "trace");

        // Clean up
        std::env::remove_var("MEMFABRIC_DB");
        std::env::remove_var("MEMFABRIC_ENTITY");
        std::env::remove_var("MEMFABRIC_LOG_LEVEL");
    }
}
