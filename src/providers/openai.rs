//! OpenAI-compatible chat completions provider.
//!
//! Covers the OpenAI API itself and any endpoint speaking the same dialect
//! (self-hosted gateways, proxy services) via the `base_url` override.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    map_status_error, map_transport_error, ChatMessage, DiagnosisResult, Provider, ProviderError,
    ProviderFamily,
};
use crate::config::ProviderConfig;
use crate::request::DiagnosisRequest;

/// Default chat completions endpoint
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.unwrap_or_else(|| OPENAI_API_URL.to_string()),
            api_key,
            model,
        }
    }

    /// Construct from configuration; fails fast when no credential resolves.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| ProviderError::MissingCredential {
                provider: "OpenAI".to_string(),
                env_var: config
                    .api_key_env
                    .clone()
                    .unwrap_or_else(|| ProviderFamily::OpenAi.default_key_env().to_string()),
            })?;
        Ok(Self::new(
            api_key,
            config.model.clone(),
            config.base_url.clone(),
        ))
    }

    fn build_request(&self, request: &DiagnosisRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: request.messages(),
            max_tokens: Some(request.max_tokens),
            temperature: request.temperature,
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::OpenAi
    }

    fn name(&self) -> &'static str {
        "OpenAI"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn diagnose(&self, request: &DiagnosisRequest) -> DiagnosisResult {
        let body = self.build_request(request);

        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(self.name(), e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(map_status_error(self.name(), status.as_u16(), error_body));
        }

        let response_body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| map_transport_error(self.name(), e))?;

        let content = response_body
            .choices
            .into_iter()
            .filter_map(|choice| choice.message.map(|m| m.content))
            .collect::<Vec<_>>()
            .join("");

        if content.trim().is_empty() {
            return Err(ProviderError::MalformedResponse {
                provider: self.name().to_string(),
                message: "response contained no message content".to_string(),
            });
        }

        Ok(content)
    }
}

// API types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::snapshot::ContextSnapshot;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new("test-key".to_string(), "gpt-4o-mini".to_string(), None)
    }

    #[test]
    fn test_provider_identity() {
        let p = provider();
        assert_eq!(p.family(), ProviderFamily::OpenAi);
        assert_eq!(p.name(), "OpenAI");
        assert_eq!(p.model_name(), "gpt-4o-mini");
        assert_eq!(p.base_url, OPENAI_API_URL);
    }

    #[test]
    fn test_base_url_override() {
        let p = OpenAiProvider::new(
            "k".to_string(),
            "m".to_string(),
            Some("http://localhost:8080/v1/chat/completions".to_string()),
        );
        assert_eq!(p.base_url, "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_from_config_without_credential_fails() {
        let config = ProviderConfig {
            api_key_env: Some("OOPS_OPENAI_TEST_UNSET".to_string()),
            ..Default::default()
        };
        let err = OpenAiProvider::from_config(&config).unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredential { .. }));
    }

    #[test]
    fn test_request_body_shape() {
        let request = DiagnosisRequest::question(
            "why is the build failing?",
            ContextSnapshot::default(),
            &Config::default(),
        );
        let body = provider().build_request(&request);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["max_tokens"], 512);
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"CAUSE: x"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.as_ref().unwrap().content, "CAUSE: x");
    }
}
