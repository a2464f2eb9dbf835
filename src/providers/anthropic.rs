//! Anthropic messages API provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    map_status_error, map_transport_error, ChatMessage, DiagnosisResult, Provider, ProviderError,
    ProviderFamily,
};
use crate::config::ProviderConfig;
use crate::request::DiagnosisRequest;

/// Messages API endpoint
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug)]
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.unwrap_or_else(|| ANTHROPIC_API_URL.to_string()),
            api_key,
            model,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| ProviderError::MissingCredential {
                provider: "Anthropic".to_string(),
                env_var: config
                    .api_key_env
                    .clone()
                    .unwrap_or_else(|| ProviderFamily::Anthropic.default_key_env().to_string()),
            })?;
        Ok(Self::new(
            api_key,
            config.model.clone(),
            config.base_url.clone(),
        ))
    }

    fn build_request(&self, request: &DiagnosisRequest) -> MessagesRequest {
        // The messages API takes the system prompt out of band
        let mut system = None;
        let mut messages = Vec::new();
        for message in request.messages() {
            if message.role == "system" {
                system = Some(message.content);
            } else {
                messages.push(message);
            }
        }
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            system,
            messages,
            temperature: request.temperature,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Anthropic
    }

    fn name(&self) -> &'static str {
        "Anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn diagnose(&self, request: &DiagnosisRequest) -> DiagnosisResult {
        let body = self.build_request(request);

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(self.name(), e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(map_status_error(self.name(), status.as_u16(), error_body));
        }

        let response_body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| map_transport_error(self.name(), e))?;

        let content = response_body
            .content
            .into_iter()
            .filter_map(|block| (block.content_type == "text").then_some(block.text))
            .collect::<Vec<_>>()
            .join("");

        if content.trim().is_empty() {
            return Err(ProviderError::MalformedResponse {
                provider: self.name().to_string(),
                message: "response contained no text blocks".to_string(),
            });
        }

        Ok(content)
    }
}

// API types

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}
