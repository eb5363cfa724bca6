//! OpenAI-compatible `/chat/completions` generator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{check_status, TextGenerator};
use crate::config::GeneratorConfig;
use crate::error::GenerationError;

pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(client: reqwest::Client, config: &GeneratorConfig, api_key: String) -> Self {
        Self {
            client,
            endpoint: format!("{}/chat/completions", config.resolved_base_url()),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let completion: ChatResponse = check_status(response).await?.json().await?;
        extract_text(completion)
    }
}

fn extract_text(completion: ChatResponse) -> Result<String, GenerationError> {
    completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or(GenerationError::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_uses_configured_base_url() {
        let config = GeneratorConfig {
            base_url: Some("http://localhost:8000/v1/".into()),
            ..Default::default()
        };
        let generator = OpenAiGenerator::new(reqwest::Client::new(), &config, "k".into());
        assert_eq!(generator.endpoint, "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn first_choice_is_returned() {
        let json = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"short"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(extract_text(parsed).unwrap(), "short");
    }

    #[test]
    fn no_choices_is_empty() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(extract_text(parsed), Err(GenerationError::Empty)));
    }
}
