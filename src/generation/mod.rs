//! Text-generation collaborators used by the optimization pipeline.
//!
//! A [`TextGenerator`] turns a prompt into text. Two HTTP adapters are
//! provided: an OpenAI-compatible chat-completions client ([`openai`]) and an
//! Anthropic messages client ([`anthropic`]). Which one is used is always an
//! explicit configuration choice.

pub mod anthropic;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{GenerationProviderKind, GeneratorConfig};
use crate::error::{FabricError, GenerationError};

/// Prompt in, text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short identifier used in log lines.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Build the generator described by `config`.
///
/// Returns `Ok(None)` for `provider = "none"`. A remote provider whose API key
/// variable is unset is a configuration error.
pub fn create_generator(
    config: &GeneratorConfig,
) -> Result<Option<Arc<dyn TextGenerator>>, FabricError> {
    if config.provider == GenerationProviderKind::None {
        return Ok(None);
    }

    let key_env = config.resolved_api_key_env();
    let api_key = std::env::var(&key_env).map_err(|_| {
        FabricError::config(format!(
            "environment variable {key_env} is not set (required by the {:?} generator)",
            config.provider
        ))
    })?;

    let client = http_client(config.timeout_secs)?;
    let generator: Arc<dyn TextGenerator> = match config.provider {
        GenerationProviderKind::OpenAi => {
            Arc::new(openai::OpenAiGenerator::new(client, config, api_key))
        }
        GenerationProviderKind::Anthropic => {
            Arc::new(anthropic::AnthropicGenerator::new(client, config, api_key))
        }
        GenerationProviderKind::None => return Ok(None),
    };
    Ok(Some(generator))
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, FabricError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| FabricError::config(format!("failed to build HTTP client: {e}")))
}

/// Map a non-success HTTP response to [`GenerationError::Provider`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GenerationError::Provider {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_provider_builds_nothing() {
        let config = GeneratorConfig::default();
        assert!(create_generator(&config).unwrap().is_none());
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let config = GeneratorConfig {
            provider: GenerationProviderKind::Anthropic,
            api_key_env: Some("MEMFABRIC_TEST_MISSING_KEY".into()),
            ..Default::default()
        };
        let err = create_generator(&config).err().unwrap();
        assert!(matches!(err, FabricError::Configuration(_)));
        assert!(err.to_string().contains("MEMFABRIC_TEST_MISSING_KEY"));
    }
}
