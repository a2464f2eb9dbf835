//! AI backend abstraction for failure diagnosis.
//!
//! One contract — submit a diagnosis request, get text or a typed failure —
//! with one implementation per backend family: OpenAI-compatible chat
//! completion endpoints, a local Ollama endpoint, and the Anthropic
//! messages API.

pub mod anthropic;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::request::DiagnosisRequest;

/// Available backend families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    /// Any OpenAI-compatible chat completions endpoint
    #[default]
    #[value(name = "openai")]
    OpenAi,
    /// Local Ollama inference endpoint
    Ollama,
    /// Anthropic messages API
    Anthropic,
}

impl ProviderFamily {
    /// Conventional environment variable for this family's credential
    pub fn default_key_env(&self) -> &'static str {
        match self {
            ProviderFamily::OpenAi => "OPENAI_API_KEY",
            ProviderFamily::Ollama => "",
            ProviderFamily::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderFamily::OpenAi => write!(f, "openai"),
            ProviderFamily::Ollama => write!(f, "ollama"),
            ProviderFamily::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl std::str::FromStr for ProviderFamily {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderFamily::OpenAi),
            "ollama" => Ok(ProviderFamily::Ollama),
            "anthropic" => Ok(ProviderFamily::Anthropic),
            _ => Err(format!(
                "Unknown provider: {}. Valid options: openai, ollama, anthropic",
                s
            )),
        }
    }
}

/// One role-tagged message in the provider wire contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Typed failures of a diagnosis attempt
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API key not configured for {provider}. Set {env_var} or [provider].api_key.")]
    MissingCredential { provider: String, env_var: String },

    #[error("{provider} unreachable: {message}")]
    Unreachable { provider: String, message: String },

    #[error("{provider} rejected the request (HTTP {status}): {message}")]
    Rejected {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}. Please wait and try again.")]
    RateLimited { provider: String },

    #[error("Invalid response from {provider}: {message}")]
    MalformedResponse { provider: String, message: String },
}

impl ProviderError {
    /// Whether one transparent retry is worthwhile. Only transport-level
    /// failures qualify; auth and validation failures need operator action.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Unreachable { .. })
    }

    /// Short kind tag for logs and notices
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::MissingCredential { .. } => "missing-credential",
            ProviderError::Unreachable { .. } => "unreachable",
            ProviderError::Rejected { .. } => "rejected",
            ProviderError::RateLimited { .. } => "rate-limited",
            ProviderError::MalformedResponse { .. } => "malformed-response",
        }
    }
}

/// Result of one diagnosis attempt: the raw generated text, or a typed failure
pub type DiagnosisResult = Result<String, ProviderError>;

/// A configured AI backend
#[async_trait]
pub trait Provider: Send + Sync {
    fn family(&self) -> ProviderFamily;

    /// Display name
    fn name(&self) -> &'static str;

    fn model_name(&self) -> &str;

    /// Perform one request. Implementations map transport and status errors
    /// into the `ProviderError` taxonomy and never panic.
    async fn diagnose(&self, request: &DiagnosisRequest) -> DiagnosisResult;
}

/// Map a reqwest transport error into the taxonomy
pub(crate) fn map_transport_error(provider: &str, err: reqwest::Error) -> ProviderError {
    if err.is_decode() {
        ProviderError::MalformedResponse {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    } else {
        ProviderError::Unreachable {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }
}

/// Map a non-success HTTP status into the taxonomy
pub(crate) fn map_status_error(provider: &str, status: u16, body: String) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            provider: provider.to_string(),
        },
        400..=499 => ProviderError::Rejected {
            provider: provider.to_string(),
            status,
            message: truncate_body(&body),
        },
        _ => ProviderError::Unreachable {
            provider: provider.to_string(),
            message: format!("HTTP {status}: {}", truncate_body(&body)),
        },
    }
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= 300 {
        trimmed.to_string()
    } else {
        let mut end = 300;
        while end > 0 && !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &trimmed[..end])
    }
}

/// The provider gateway: selects a backend from configuration and enforces
/// the call policy — finite timeout, one transparent retry on transient
/// failure, credentials never echoed back.
pub struct Gateway {
    provider: Box<dyn Provider>,
    timeout: Duration,
    credential: Option<String>,
}

impl Gateway {
    /// Construct the backend named by the configuration.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let credential = config.resolve_api_key();
        let provider: Box<dyn Provider> = match config.family {
            ProviderFamily::OpenAi => Box::new(openai::OpenAiProvider::from_config(config)?),
            ProviderFamily::Ollama => Box::new(ollama::OllamaProvider::from_config(config)),
            ProviderFamily::Anthropic => Box::new(anthropic::AnthropicProvider::from_config(config)?),
        };
        Ok(Self {
            provider,
            timeout: config.timeout(),
            credential,
        })
    }

    /// Test seam: wrap an arbitrary provider.
    pub fn with_provider(provider: Box<dyn Provider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            credential: None,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Submit a request. At most two attempts ever reach the backend: the
    /// original call, plus one retry when the first failure was transient.
    pub async fn submit(&self, request: &DiagnosisRequest) -> DiagnosisResult {
        let first = self.attempt(request).await;
        let result = match first {
            Err(ref err) if err.is_transient() => {
                tracing::debug!(kind = err.kind(), "transient provider failure, retrying once");
                self.attempt(request).await
            }
            other => other,
        };
        result.map(|text| self.redact(text)).map_err(|e| self.redact_error(e))
    }

    async fn attempt(&self, request: &DiagnosisRequest) -> DiagnosisResult {
        match tokio::time::timeout(self.timeout, self.provider.diagnose(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Unreachable {
                provider: self.provider.name().to_string(),
                message: format!("request timed out after {}s", self.timeout.as_secs()),
            }),
        }
    }

    /// Strip the credential from any text that could reach the terminal.
    fn redact(&self, text: String) -> String {
        match self.credential {
            Some(ref key) if !key.is_empty() && text.contains(key.as_str()) => {
                text.replace(key.as_str(), "***")
            }
            _ => text,
        }
    }

    fn redact_error(&self, err: ProviderError) -> ProviderError {
        match err {
            ProviderError::Unreachable { provider, message } => ProviderError::Unreachable {
                provider,
                message: self.redact(message),
            },
            ProviderError::Rejected {
                provider,
                status,
                message,
            } => ProviderError::Rejected {
                provider,
                status,
                message: self.redact(message),
            },
            ProviderError::MalformedResponse { provider, message } => {
                ProviderError::MalformedResponse {
                    provider,
                    message: self.redact(message),
                }
            }
            other => other,
        }
    }
}
