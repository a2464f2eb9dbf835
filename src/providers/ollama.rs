//! Local Ollama inference endpoint provider.
//!
//! Talks to an Ollama server's `/api/generate` route. No credential; the
//! chat messages are flattened into a single prompt because the generate
//! route takes free text.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    map_status_error, map_transport_error, DiagnosisResult, Provider, ProviderError,
    ProviderFamily,
};
use crate::config::ProviderConfig;
use crate::request::DiagnosisRequest;

/// Default local endpoint
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(model: String, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            model,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(config.model.clone(), config.base_url.clone())
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, request: &DiagnosisRequest) -> GenerateRequest {
        // Flatten system + user messages into one prompt
        let prompt = request
            .messages()
            .into_iter()
            .map(|m| m.content)
            .collect::<Vec<_>>()
            .join("\n\n");
        GenerateRequest {
            model: self.model.clone(),
            prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: Some(request.max_tokens),
                temperature: request.temperature,
            },
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Ollama
    }

    fn name(&self) -> &'static str {
        "Ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn diagnose(&self, request: &DiagnosisRequest) -> DiagnosisResult {
        let body = self.build_request(request);

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(self.name(), e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(map_status_error(self.name(), status.as_u16(), error_body));
        }

        let response_body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| map_transport_error(self.name(), e))?;

        if response_body.response.trim().is_empty() {
            return Err(ProviderError::MalformedResponse {
                provider: self.name().to_string(),
                message: "response contained no generated text".to_string(),
            });
        }

        Ok(response_body.response)
    }
}

// API types

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}
