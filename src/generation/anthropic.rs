//! Anthropic messages API generator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{check_status, TextGenerator};
use crate::config::GeneratorConfig;
use crate::error::GenerationError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicGenerator {
    pub fn new(client: reqwest::Client, config: &GeneratorConfig, api_key: String) -> Self {
        Self {
            client,
            endpoint: format!("{}/v1/messages", config.resolved_base_url()),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        let message: MessagesResponse = check_status(response).await?.json().await?;
        extract_text(message)
    }
}

/// Concatenate every text block; tool-use and other blocks are ignored.
fn extract_text(message: MessagesResponse) -> Result<String, GenerationError> {
    let text: String = message
        .content
        .into_iter()
        .filter(|b| b.block_type == "text")
        .filter_map(|b| b.text)
        .collect();
    if text.is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationProviderKind;

    #[test]
    fn default_endpoint() {
        let config = GeneratorConfig {
            provider: GenerationProviderKind::Anthropic,
            model: "claude-haiku".into(),
            ..Default::default()
        };
        let generator = AnthropicGenerator::new(reqwest::Client::new(), &config, "k".into());
        assert_eq!(generator.endpoint, "https://api.anthropic.com/v1/messages");
        assert_eq!(generator.name(), "claude-haiku");
    }

    #[test]
    fn text_blocks_are_joined() {
        let json = r#"{"content":[{"type":"text","text":"a"},{"type":"tool_use","id":"t"},{"type":"text","text":"b"}],"stop_reason":"end_turn"}"#;
        let parsed: MessagesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(extract_text(parsed).unwrap(), "ab");
    }

    #[test]
    fn no_text_is_empty() {
        let parsed: MessagesResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        assert!(matches!(extract_text(parsed), Err(GenerationError::Empty)));
    }
}
